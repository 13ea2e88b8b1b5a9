mod address_map;
mod store;

pub use address_map::AddressMap;
pub use store::PixelStore;

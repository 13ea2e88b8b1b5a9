use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::AddressMap;
use crate::color::Rgb;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("strand {0} is not part of the scene")]
    UnknownStrand(u8),
}

/// One strand's pixels. Every write and resize happens under this lock.
#[derive(Debug, Default)]
struct StrandBuffer {
    pixels: Mutex<Vec<Rgb>>,
}

impl StrandBuffer {
    fn with_len(len: usize) -> Self {
        Self {
            pixels: Mutex::new(vec![Rgb::BLACK; len]),
        }
    }
}

/// Published strand layout. Replaced as a whole, never edited in place.
#[derive(Debug, Default)]
struct StrandTable {
    generation: u64,
    strands: BTreeMap<u8, Arc<StrandBuffer>>,
}

/// Current color of every pixel, shared between the network and the renderer.
///
/// Writers look up their strand in the published table and lock only that
/// strand, so a frame costs a copy of its own colors and nothing more.
#[derive(Debug, Default)]
pub struct PixelStore {
    table: ArcSwap<StrandTable>,
    // Serializes layout publishers; never taken on the write path
    publish: Mutex<()>,
}

impl PixelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grow a strand to at least `len` pixels, creating it if needed.
    ///
    /// New pixels are black. Never shrinks.
    pub fn ensure_strand_length(&self, strand: u8, len: usize) {
        let _publish = self.publish.lock();
        let current = self.table.load_full();

        if let Some(buffer) = current.strands.get(&strand) {
            let mut pixels = buffer.pixels.lock();
            if pixels.len() < len {
                pixels.resize(len, Rgb::BLACK);
            }
            return;
        }

        let mut strands = current.strands.clone();
        strands.insert(strand, Arc::new(StrandBuffer::with_len(len)));
        self.table.store(Arc::new(StrandTable {
            generation: current.generation + 1,
            strands,
        }));
    }

    /// Publish the strand layout described by `map`.
    ///
    /// Surviving strands keep their colors and are resized under their own
    /// lock; strands the map no longer mentions are dropped from the table.
    pub fn apply_layout(&self, map: &AddressMap) {
        let _publish = self.publish.lock();
        let current = self.table.load_full();

        let mut strands = BTreeMap::new();
        for (strand, len) in map.strands() {
            let buffer = match current.strands.get(&strand) {
                Some(existing) => {
                    existing.pixels.lock().resize(len, Rgb::BLACK);
                    existing.clone()
                }
                None => Arc::new(StrandBuffer::with_len(len)),
            };
            strands.insert(strand, buffer);
        }

        let generation = current.generation + 1;
        debug!(
            generation,
            strands = strands.len(),
            pixels = map.total_pixels(),
            "Publishing strand layout"
        );
        self.table.store(Arc::new(StrandTable { generation, strands }));
    }

    /// Write `colors` starting at `offset`, dropping whatever falls past the
    /// end of the strand. Returns the number of pixels actually written.
    pub fn write(&self, strand: u8, offset: usize, colors: &[Rgb]) -> Result<usize, StoreError> {
        let buffer = self
            .table
            .load()
            .strands
            .get(&strand)
            .cloned()
            .ok_or(StoreError::UnknownStrand(strand))?;

        let mut pixels = buffer.pixels.lock();
        if offset >= pixels.len() {
            return Ok(0);
        }
        let count = colors.len().min(pixels.len() - offset);
        pixels[offset..offset + count].copy_from_slice(&colors[..count]);
        Ok(count)
    }

    /// Copy of a strand's current colors; empty for unknown strands.
    pub fn snapshot(&self, strand: u8) -> Vec<Rgb> {
        self.table
            .load()
            .strands
            .get(&strand)
            .map(|buffer| buffer.pixels.lock().clone())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn strand_len(&self, strand: u8) -> usize {
        self.table
            .load()
            .strands
            .get(&strand)
            .map(|buffer| buffer.pixels.lock().len())
            .unwrap_or(0)
    }

    /// Bumped every time a new strand layout is published.
    #[cfg(test)]
    pub fn generation(&self) -> u64 {
        self.table.load().generation
    }
}

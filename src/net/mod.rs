mod listener;
pub mod protocol;
pub mod sender;
mod throughput;

pub use listener::{IngestStats, Listener, ListenerEvent, ListenerHandle};
pub use throughput::{ThroughputTracker, SAMPLE_PERIOD};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// How frames reach the simulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// One message per datagram
    #[default]
    Udp,
    /// Messages framed by their length header on a byte stream
    Tcp,
}

pub mod canvas;
pub mod headless;
pub mod terminal;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::config::DisplayConfig;
use crate::net::ListenerEvent;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    #[default]
    Terminal,
    /// No drawing, throughput is logged once per second
    Headless,
}

/// Presentation toggles and connection bookkeeping shared by both modes.
#[derive(Debug, Clone)]
pub struct ViewState {
    pub show_labels: bool,
    pub show_stats: bool,
    pub show_center: bool,
    pub clients: usize,
}

impl ViewState {
    pub fn new(config: &DisplayConfig) -> Self {
        Self {
            show_labels: config.show_labels,
            show_stats: config.show_stats,
            show_center: config.show_center,
            clients: 0,
        }
    }

    pub fn track(&mut self, event: ListenerEvent) {
        match event {
            ListenerEvent::ClientConnected(_) => self.clients += 1,
            ListenerEvent::ClientDisconnected(_) => self.clients = self.clients.saturating_sub(1),
        }
    }
}

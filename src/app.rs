use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::net::{
    IngestStats, Listener, ListenerEvent, ListenerHandle, ThroughputTracker, SAMPLE_PERIOD,
};
use crate::pixels::PixelStore;
use crate::scene::{Scene, SceneController};

/// Pending connection events the UI has not drained yet.
const EVENT_QUEUE: usize = 64;

/// The running ingestion pipeline plus the scene it feeds.
pub struct Simulator {
    pub scene: SceneController,
    pub store: Arc<PixelStore>,
    pub ups_rx: watch::Receiver<u64>,
    pub events: mpsc::Receiver<ListenerEvent>,
    listener: ListenerHandle,
    tracker: JoinHandle<()>,
}

impl Simulator {
    /// Build the scene layout, bind the listener and start sampling throughput.
    pub async fn start(config: &Config) -> Result<Self> {
        let store = Arc::new(PixelStore::new());
        let scene = SceneController::new(Scene::from_config(&config.scene), store.clone());
        info!(
            "Scene '{}': {} fixtures, {} pixels",
            scene.scene().name(),
            scene.fixtures().len(),
            scene.address_map().total_pixels()
        );

        let stats = IngestStats::new();
        let (event_tx, events) = mpsc::channel(EVENT_QUEUE);
        let listener = Listener::bind(&config.network, store.clone(), stats.clone())
            .await?
            .with_events(event_tx)
            .spawn()?;

        let (ups_rx, tracker) = ThroughputTracker::new(stats).spawn(SAMPLE_PERIOD);

        Ok(Self {
            scene,
            store,
            ups_rx,
            events,
            listener,
            tracker,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> &IngestStats {
        self.listener.stats()
    }

    /// Latest updates-per-second sample.
    pub fn updates_per_second(&self) -> u64 {
        *self.ups_rx.borrow()
    }

    pub async fn shutdown(self) {
        self.listener.shutdown().await;
        self.tracker.abort();
    }
}

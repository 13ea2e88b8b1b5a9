use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::IngestStats;

/// Sampling period of the updates-per-second figure.
pub const SAMPLE_PERIOD: Duration = Duration::from_secs(1);

/// Turns the cumulative frame counter into an updates-per-second figure.
pub struct ThroughputTracker {
    stats: IngestStats,
    baseline: u64,
}

impl ThroughputTracker {
    pub fn new(stats: IngestStats) -> Self {
        let baseline = stats.frames();
        Self { stats, baseline }
    }

    /// Frames applied since the previous sample.
    ///
    /// The counter is read once, so a frame landing on the boundary is
    /// counted in exactly one window.
    pub fn sample(&mut self) -> u64 {
        let now = self.stats.frames();
        let delta = now.saturating_sub(self.baseline);
        self.baseline = now;
        delta
    }

    /// Sample every `period` on a background task, publishing each value.
    ///
    /// The task ends once every receiver has been dropped.
    pub fn spawn(mut self, period: Duration) -> (watch::Receiver<u64>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(0);

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let ups = self.sample();
                trace!(ups, "Throughput sample");

                if tx.send(ups).is_err() {
                    debug!("Throughput receivers dropped, stopping tracker");
                    break;
                }
            }
        });

        (rx, task)
    }
}

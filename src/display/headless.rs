//! Runs the pipeline without a view, logging throughput as it changes.

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::info;

use super::ViewState;
use crate::app::Simulator;
use crate::config::Config;
use crate::ipc::{self, IpcCommand};
use crate::net::ListenerEvent;

pub async fn run(config: Config, sim: Simulator, mut ipc_rx: mpsc::Receiver<IpcCommand>) -> Result<()> {
    let mut sim = sim;
    let mut view = ViewState::new(&config.display);
    let mut ups_rx = sim.ups_rx.clone();
    let mut last_frames = 0;

    info!("Running headless, press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            Some(cmd) = ipc_rx.recv() => {
                ipc::process_ipc_command(cmd, &mut sim, &mut view);
            }
            Some(event) = sim.events.recv() => {
                match &event {
                    ListenerEvent::ClientConnected(addr) => info!("Client {} connected", addr),
                    ListenerEvent::ClientDisconnected(addr) => info!("Client {} disconnected", addr),
                }
                view.track(event);
            }
            changed = ups_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let ups = *ups_rx.borrow_and_update();
                let frames = sim.stats().frames();
                // Stay quiet while nothing arrives
                if ups > 0 || frames != last_frames {
                    info!(
                        "{} ups, {} frames, {} rejected, {} clients",
                        ups,
                        frames,
                        sim.stats().rejected(),
                        view.clients
                    );
                }
                last_frames = frames;
            }
        }
    }

    sim.shutdown().await;
    Ok(())
}

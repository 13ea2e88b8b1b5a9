use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::app::Simulator;
use crate::display::ViewState;
use crate::scene::{Fixture, FixtureEdit, FixtureId, FixtureSpec};

/// Commands sent from the IPC server to the display loop
pub enum IpcCommand {
    Ping { reply: oneshot::Sender<String> },
    Stats { reply: oneshot::Sender<String> },
    ListFixtures { reply: oneshot::Sender<String> },
    ShowFixture { id: FixtureId, reply: oneshot::Sender<String> },
    AddFixture { spec: FixtureSpec, reply: oneshot::Sender<String> },
    SetFixture { id: FixtureId, edit: FixtureEdit, reply: oneshot::Sender<String> },
    RemoveFixture { id: FixtureId, reply: oneshot::Sender<String> },
    Clear { reply: oneshot::Sender<String> },
    ToggleLabels { reply: oneshot::Sender<String> },
    ToggleCenter { reply: oneshot::Sender<String> },
    ToggleLock { reply: oneshot::Sender<String> },
}

/// How long the `ctl` client waits to connect and again for the reply
const CLIENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Get the socket path for IPC
pub fn socket_path() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(dir).join("firesim.sock")
    } else {
        PathBuf::from("/tmp/firesim.sock")
    }
}

fn parse_num<T: std::str::FromStr>(value: &str, what: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Invalid {}: {}", what, value))
}

/// Parse a protocol line into an IpcCommand
fn parse_command(line: &str, reply: oneshot::Sender<String>) -> Result<IpcCommand> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        ["ping"] => Ok(IpcCommand::Ping { reply }),
        ["stats"] => Ok(IpcCommand::Stats { reply }),
        ["fixtures"] => Ok(IpcCommand::ListFixtures { reply }),
        ["fixture", "show", id] => Ok(IpcCommand::ShowFixture {
            id: FixtureId(parse_num(id, "fixture id")?),
            reply,
        }),
        ["fixture", "add", strand, address, pixels, rest @ ..] => {
            let (pos1, pos2) = match rest {
                [] => ([0, 0], [0, 0]),
                [x1, y1, x2, y2] => (
                    [parse_num(x1, "x1")?, parse_num(y1, "y1")?],
                    [parse_num(x2, "x2")?, parse_num(y2, "y2")?],
                ),
                _ => anyhow::bail!("Expected: fixture add <strand> <address> <pixels> [x1 y1 x2 y2]"),
            };
            Ok(IpcCommand::AddFixture {
                spec: FixtureSpec {
                    strand: parse_num(strand, "strand")?,
                    address: parse_num(address, "address")?,
                    pixels: parse_num(pixels, "pixel count")?,
                    pos1,
                    pos2,
                },
                reply,
            })
        }
        ["fixture", "set", id, strand, address, pixels] => Ok(IpcCommand::SetFixture {
            id: FixtureId(parse_num(id, "fixture id")?),
            edit: FixtureEdit {
                strand: Some(parse_num(strand, "strand")?),
                address: Some(parse_num(address, "address")?),
                pixels: Some(parse_num(pixels, "pixel count")?),
            },
            reply,
        }),
        ["fixture", "remove", id] => Ok(IpcCommand::RemoveFixture {
            id: FixtureId(parse_num(id, "fixture id")?),
            reply,
        }),
        ["clear"] => Ok(IpcCommand::Clear { reply }),
        ["labels"] => Ok(IpcCommand::ToggleLabels { reply }),
        ["center"] => Ok(IpcCommand::ToggleCenter { reply }),
        ["lock"] => Ok(IpcCommand::ToggleLock { reply }),
        _ => Err(anyhow::anyhow!("Unknown command: {}", line)),
    }
}

fn describe(fixture: &Fixture) -> String {
    format!(
        "{}={}:{}+{}",
        fixture.id, fixture.strand, fixture.address, fixture.pixels
    )
}

/// Process an IPC command against the running simulator
pub fn process_ipc_command(cmd: IpcCommand, sim: &mut Simulator, view: &mut ViewState) {
    match cmd {
        IpcCommand::Ping { reply } => {
            let _ = reply.send("ok: pong".to_string());
        }
        IpcCommand::Stats { reply } => {
            let stats = sim.stats();
            let status = format!(
                "ok: listen={} ups={} frames={} rejected={} fixtures={} pixels={} clients={} locked={}",
                sim.local_addr(),
                sim.updates_per_second(),
                stats.frames(),
                stats.rejected(),
                sim.scene.fixtures().len(),
                sim.scene.address_map().total_pixels(),
                view.clients,
                sim.scene.is_locked(),
            );
            let _ = reply.send(status);
        }
        IpcCommand::ListFixtures { reply } => {
            let fixtures: Vec<String> = sim
                .scene
                .fixtures()
                .iter()
                .map(describe)
                .collect();
            let _ = reply.send(format!("ok: {}", fixtures.join(",")));
        }
        IpcCommand::ShowFixture { id, reply } => {
            let response = match sim.scene.scene().get(id) {
                Some(f) => format!(
                    "ok: {} from {},{} to {},{}",
                    describe(f),
                    f.pos1[0],
                    f.pos1[1],
                    f.pos2[0],
                    f.pos2[1]
                ),
                None => format!("err: no fixture {}", id),
            };
            let _ = reply.send(response);
        }
        IpcCommand::AddFixture { spec, reply } => {
            let response = match sim.scene.add_fixture(spec) {
                Ok(id) => format!("ok: {}", id),
                Err(e) => format!("err: {}", e),
            };
            let _ = reply.send(response);
        }
        IpcCommand::SetFixture { id, edit, reply } => {
            let response = match sim.scene.update_fixture(id, edit) {
                Ok(f) => format!("ok: {}", describe(&f)),
                Err(e) => format!("err: {}", e),
            };
            let _ = reply.send(response);
        }
        IpcCommand::RemoveFixture { id, reply } => {
            let response = match sim.scene.remove_fixture(id) {
                Ok(f) => format!("ok: removed {}", f.id),
                Err(e) => format!("err: {}", e),
            };
            let _ = reply.send(response);
        }
        IpcCommand::Clear { reply } => {
            let response = match sim.scene.clear_fixtures() {
                Ok(()) => "ok: cleared".to_string(),
                Err(e) => format!("err: {}", e),
            };
            let _ = reply.send(response);
        }
        IpcCommand::ToggleLabels { reply } => {
            view.show_labels = !view.show_labels;
            let state = if view.show_labels { "on" } else { "off" };
            let _ = reply.send(format!("ok: labels {}", state));
        }
        IpcCommand::ToggleCenter { reply } => {
            view.show_center = !view.show_center;
            let state = if view.show_center { "on" } else { "off" };
            let _ = reply.send(format!("ok: center {}", state));
        }
        IpcCommand::ToggleLock { reply } => {
            let state = if sim.scene.toggle_locked() { "locked" } else { "unlocked" };
            let _ = reply.send(format!("ok: {}", state));
        }
    }
}

/// Forward one parsed request to the display loop and wait for its answer.
async fn dispatch(line: &str, cmd_tx: &mpsc::Sender<IpcCommand>) -> String {
    let (reply_tx, reply_rx) = oneshot::channel();
    let command = match parse_command(line, reply_tx) {
        Ok(cmd) => cmd,
        Err(e) => return format!("err: {:#}", e),
    };

    if cmd_tx.send(command).await.is_err() {
        return "err: simulator is shutting down".to_string();
    }
    reply_rx
        .await
        .unwrap_or_else(|_| "err: command dropped".to_string())
}

/// One request line in, one reply line out.
async fn handle_client(stream: UnixStream, cmd_tx: mpsc::Sender<IpcCommand>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let Some(line) = BufReader::new(reader).lines().next_line().await? else {
        return Ok(());
    };
    let line = line.trim();
    if line.is_empty() {
        return Ok(());
    }

    let reply = dispatch(line, &cmd_tx).await;
    writer.write_all(format!("{}\n", reply).as_bytes()).await?;
    Ok(())
}

/// Bind the control socket and serve it until the process exits
pub async fn start_server(cmd_tx: mpsc::Sender<IpcCommand>) -> Result<()> {
    let path = socket_path();

    // Remove stale socket from previous run
    let _ = std::fs::remove_file(&path);

    let listener = UnixListener::bind(&path)
        .with_context(|| format!("Failed to bind control socket {}", path.display()))?;
    info!("Control socket listening on {}", path.display());

    serve(listener, cmd_tx).await
}

async fn serve(listener: UnixListener, cmd_tx: mpsc::Sender<IpcCommand>) -> Result<()> {
    loop {
        let (stream, _) = listener
            .accept()
            .await
            .context("Control socket accept failed")?;
        let cmd_tx = cmd_tx.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, cmd_tx).await {
                debug!("Control client error: {:#}", e);
            }
        });
    }
}

/// Send one command line to the running simulator and return its reply
pub async fn send_command(line: &str) -> Result<String> {
    request(&socket_path(), line).await
}

async fn request(path: &Path, line: &str) -> Result<String> {
    let mut stream = timeout(CLIENT_TIMEOUT, UnixStream::connect(path))
        .await
        .context("Connection timed out")?
        .with_context(|| format!("Could not connect to {}. Is firesim running?", path.display()))?;

    stream.write_all(format!("{}\n", line).as_bytes()).await?;
    stream.shutdown().await?;

    let mut reply = String::new();
    timeout(CLIENT_TIMEOUT, BufReader::new(stream).read_line(&mut reply))
        .await
        .context("Reply timed out")?
        .context("Failed to read reply")?;

    Ok(reply.trim().to_string())
}

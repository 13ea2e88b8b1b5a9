use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{info, warn};

mod app;
mod color;
mod config;
mod display;
mod ipc;
mod net;
mod pixels;
mod scene;

use app::Simulator;
use config::Config;
use display::DisplayMode;
use net::sender::{Pattern, SenderOptions};
use net::Transport;

/// Pending control socket commands the display loop has not handled yet.
const IPC_QUEUE: usize = 16;

#[derive(Parser, Debug)]
#[command(name = "firesim")]
#[command(author, version, about = "LED fixture simulator fed by a pixel stream")]
pub(crate) struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Display mode: terminal or headless
    #[arg(short, long)]
    pub(crate) mode: Option<DisplayMode>,

    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Transport to listen on
    #[arg(short, long)]
    pub(crate) transport: Option<Transport>,

    /// Local address to bind
    #[arg(long)]
    pub(crate) bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub(crate) port: Option<u16>,

    /// Terminal redraw rate
    #[arg(long)]
    pub(crate) fps: Option<u32>,

    /// Hide strand:address labels
    #[arg(long)]
    pub(crate) no_labels: bool,

    /// Write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream a test pattern to a running simulator
    Send {
        #[arg(long, default_value = "127.0.0.1:7890")]
        target: SocketAddr,
        #[arg(short, long, default_value = "udp")]
        transport: Transport,
        #[arg(short, long, default_value = "0")]
        strand: u8,
        #[arg(long, default_value = "64")]
        pixels: u16,
        #[arg(long, default_value = "rainbow")]
        pattern: Pattern,
        #[arg(long, default_value = "30")]
        fps: u32,
        /// Stop after this many frames
        #[arg(long)]
        frames: Option<u64>,
    },
    /// Send a command to the control socket of a running simulator
    Ctl {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        words: Vec<String>,
    },
    /// Write the default config file
    InitConfig,
    /// Print shell completions
    Completions { shell: clap_complete::Shell },
}

fn init_logging(log_file: Option<&Path>, mode: DisplayMode) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("firesim=info".parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        // Log lines would tear through the alternate screen
        None if mode == DisplayMode::Terminal => builder.with_writer(std::io::sink).init(),
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match &args.command {
        Some(Command::Send {
            target,
            transport,
            strand,
            pixels,
            pattern,
            fps,
            frames,
        }) => {
            init_logging(args.log_file.as_deref(), DisplayMode::Headless)?;
            return net::sender::run(SenderOptions {
                target: *target,
                transport: *transport,
                strand: *strand,
                pixels: *pixels,
                pattern: *pattern,
                fps: *fps,
                ticks: *frames,
            })
            .await;
        }
        Some(Command::Ctl { words }) => {
            let response = ipc::send_command(&words.join(" ")).await?;
            println!("{}", response);
            if response.starts_with("err") {
                std::process::exit(1);
            }
            return Ok(());
        }
        Some(Command::InitConfig) => {
            let path = Config::init_default_config()?;
            println!("Wrote {}", path.display());
            return Ok(());
        }
        Some(Command::Completions { shell }) => {
            clap_complete::generate(*shell, &mut Args::command(), "firesim", &mut std::io::stdout());
            return Ok(());
        }
        None => {}
    }

    // Load config, CLI flags take priority
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_from_default_path().unwrap_or_default(),
    };
    config.merge_args(&args);

    init_logging(args.log_file.as_deref(), config.display.mode)?;
    info!("Starting FireSim in {:?} mode", config.display.mode);

    let sim = Simulator::start(&config).await?;

    let (ipc_tx, ipc_rx) = mpsc::channel(IPC_QUEUE);
    tokio::spawn(async move {
        if let Err(e) = ipc::start_server(ipc_tx).await {
            warn!("Control socket unavailable: {:#}", e);
        }
    });

    let result = match config.display.mode {
        DisplayMode::Terminal => display::terminal::run(config, sim, ipc_rx).await,
        DisplayMode::Headless => display::headless::run(config, sim, ipc_rx).await,
    };

    let _ = std::fs::remove_file(ipc::socket_path());
    result
}

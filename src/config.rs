use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use crate::display::DisplayMode;
use crate::net::Transport;
use crate::scene::SceneConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub scene: SceneConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub transport: Transport,
    /// Local address to listen on
    pub bind: String,
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Udp,
            bind: "0.0.0.0".to_string(),
            port: 7890,
        }
    }
}

impl NetworkConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .bind
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.bind))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub mode: DisplayMode,
    /// Redraw rate of the terminal view
    pub fps: u32,
    pub show_labels: bool,
    pub show_stats: bool,
    /// Mark the middle of the scene
    pub show_center: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            mode: DisplayMode::Terminal,
            fps: 30,
            show_labels: true,
            show_stats: true,
            show_center: false,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        Ok(config)
    }

    /// Get the default XDG config path (~/.config/firesim/config.toml)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("firesim").join("config.toml"))
    }

    /// Load config from the default XDG path if it exists
    /// Returns None if file doesn't exist, warns on parse errors
    pub fn load_from_default_path() -> Option<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            match Self::load(&path) {
                Ok(config) => Some(config),
                Err(e) => {
                    // Logging is not up yet when the config is read
                    eprintln!("Warning: {:#}\nUsing defaults.", e);
                    None
                }
            }
        } else {
            None
        }
    }

    /// Initialize default config file at XDG path, returns the path
    pub fn init_default_config() -> Result<PathBuf> {
        let path = Self::default_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&path, Self::generate_config_template())?;

        Ok(path)
    }

    /// Generate a commented TOML config template
    pub fn generate_config_template() -> String {
        r#"# FireSim Configuration
# This file is auto-generated. Edit as needed.

[network]
# Transport: "udp" (one message per datagram) or "tcp" (length-framed stream)
transport = "udp"
# Address to listen on
bind = "0.0.0.0"
port = 7890

[display]
# Display mode: "terminal" or "headless"
mode = "terminal"
# Redraw rate of the terminal view
fps = 30
# Show strand:address labels next to fixtures
show_labels = true
# Show the updates-per-second status line
show_stats = true
# Draw a marker at the center of the scene
show_center = false

[scene]
name = "demo"
# Scene extents, fixtures are scaled from this area to the terminal
width = 200
height = 100
# Reject fixture edits from the control socket until unlocked
locked = false

# One entry per fixture. Pixels [address, address + pixels) of the strand
# are drawn from pos1 to pos2.
[[scene.fixtures]]
strand = 0
address = 0
pixels = 32
pos1 = [10, 20]
pos2 = [190, 20]

[[scene.fixtures]]
strand = 0
address = 32
pixels = 32
pos1 = [190, 50]
pos2 = [10, 50]

[[scene.fixtures]]
strand = 1
address = 0
pixels = 24
pos1 = [10, 80]
pos2 = [190, 80]
"#
        .to_string()
    }

    /// Merge CLI arguments into config (CLI takes priority)
    pub fn merge_args(&mut self, args: &crate::Args) {
        if let Some(mode) = args.mode {
            self.display.mode = mode;
        }
        if let Some(fps) = args.fps {
            self.display.fps = fps.max(1);
        }
        if args.no_labels {
            self.display.show_labels = false;
        }

        if let Some(transport) = args.transport {
            self.network.transport = transport;
        }
        if let Some(ref bind) = args.bind {
            self.network.bind = bind.clone();
        }
        if let Some(port) = args.port {
            self.network.port = port;
        }
    }
}

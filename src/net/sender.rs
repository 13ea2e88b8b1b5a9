//! Test-pattern sender, the other end of the wire protocol.

use anyhow::{Context, Result};
use clap::ValueEnum;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use super::protocol::Message;
use super::Transport;
use crate::color::{lerp_color, Rgb};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Pattern {
    /// Scrolling rainbow, one full-strand frame per tick
    #[default]
    Rainbow,
    /// A single lit pixel with a fading tail, sent as single-pixel frames
    Chase,
}

#[derive(Debug, Clone)]
pub struct SenderOptions {
    pub target: SocketAddr,
    pub transport: Transport,
    pub strand: u8,
    pub pixels: u16,
    pub pattern: Pattern,
    pub fps: u32,
    /// Stop after this many ticks; run until Ctrl-C otherwise
    pub ticks: Option<u64>,
}

/// Produces the messages for each tick of a pattern.
pub struct PatternGenerator {
    pattern: Pattern,
    strand: u8,
    pixels: u16,
    step: u64,
}

impl PatternGenerator {
    pub fn new(pattern: Pattern, strand: u8, pixels: u16) -> Self {
        Self {
            pattern,
            strand,
            pixels,
            step: 0,
        }
    }

    pub fn next_messages(&mut self) -> Vec<Message> {
        let step = self.step;
        self.step += 1;

        if self.pixels == 0 {
            return Vec::new();
        }
        let len = self.pixels as u64;

        match self.pattern {
            Pattern::Rainbow => {
                let shift = step as f32 * 4.0;
                let colors = (0..self.pixels)
                    .map(|i| Rgb::from_hue(shift + i as f32 * 360.0 / self.pixels as f32, 0.5))
                    .collect();
                vec![Message::SetStrand {
                    strand: self.strand,
                    colors,
                }]
            }
            Pattern::Chase => {
                // Head, then the pixels one and two positions behind it
                let trail = [
                    Rgb::WHITE,
                    lerp_color(Rgb::WHITE, Rgb::BLACK, 0.75),
                    Rgb::BLACK,
                ];
                trail
                    .iter()
                    .take(len.min(trail.len() as u64) as usize)
                    .enumerate()
                    .map(|(behind, &color)| Message::SetPixel {
                        strand: self.strand,
                        offset: ((step + len - behind as u64 % len) % len) as u16,
                        color,
                    })
                    .collect()
            }
        }
    }
}

enum Link {
    Udp(UdpSocket, SocketAddr),
    Tcp(TcpStream),
}

impl Link {
    async fn open(transport: Transport, target: SocketAddr) -> Result<Self> {
        match transport {
            Transport::Udp => {
                let local = if target.is_ipv4() {
                    SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)
                } else {
                    SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0)
                };
                let socket = UdpSocket::bind(local)
                    .await
                    .context("Failed to open UDP socket")?;
                Ok(Link::Udp(socket, target))
            }
            Transport::Tcp => {
                let stream = TcpStream::connect(target)
                    .await
                    .with_context(|| format!("Could not connect to {}", target))?;
                stream.set_nodelay(true)?;
                Ok(Link::Tcp(stream))
            }
        }
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        match self {
            Link::Udp(socket, target) => {
                socket.send_to(bytes, *target).await?;
            }
            Link::Tcp(stream) => stream.write_all(bytes).await?,
        }
        Ok(())
    }
}

/// Stream a pattern to a running simulator.
pub async fn run(options: SenderOptions) -> Result<()> {
    let mut link = Link::open(options.transport, options.target).await?;
    let mut generator = PatternGenerator::new(options.pattern, options.strand, options.pixels);

    let period = Duration::from_secs_f64(1.0 / options.fps.max(1) as f64);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Sending {:?} to {} over {:?} ({} pixels on strand {})",
        options.pattern, options.target, options.transport, options.pixels, options.strand
    );

    let mut ticks = 0u64;
    let mut sent = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {}
        }

        for message in generator.next_messages() {
            link.send(&message.encode()).await?;
            sent += 1;
        }

        ticks += 1;
        if options.ticks.is_some_and(|limit| ticks >= limit) {
            break;
        }
    }

    info!("Sent {} frames", sent);
    Ok(())
}

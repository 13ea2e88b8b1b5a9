use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, trace, warn};

use super::protocol::{decode_datagram, DecodeError, FrameDecoder, UpdateRecord, MAX_MESSAGE_SIZE};
use super::Transport;
use crate::config::NetworkConfig;
use crate::pixels::PixelStore;

/// Stream read size; one read never holds more than a maximal frame.
const READ_CHUNK: usize = 64 * 1024;

/// Cumulative ingestion counters, shared with whoever wants to read them.
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    inner: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    frames: AtomicU64,
    rejected: AtomicU64,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames successfully applied to the pixel store.
    pub fn frames(&self) -> u64 {
        self.inner.frames.load(Ordering::Relaxed)
    }

    /// Frames dropped as malformed or aimed at a strand the scene lacks.
    pub fn rejected(&self) -> u64 {
        self.inner.rejected.load(Ordering::Relaxed)
    }

    fn record_applied(&self) {
        self.inner.frames.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rejected(&self) {
        self.inner.rejected.fetch_add(1, Ordering::Relaxed);
    }
}

/// Connection lifecycle notifications for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    ClientConnected(SocketAddr),
    ClientDisconnected(SocketAddr),
}

enum Endpoint {
    Udp(UdpSocket),
    Tcp(TcpListener),
}

/// Applies decoded frames to the store and counts them.
#[derive(Clone)]
struct Ingest {
    store: Arc<PixelStore>,
    stats: IngestStats,
    shutdown: watch::Receiver<bool>,
}

impl Ingest {
    fn apply(&self, decoded: Result<UpdateRecord, DecodeError>, peer: SocketAddr) {
        // No writes once shutdown has begun
        if *self.shutdown.borrow() {
            return;
        }

        let record = match decoded {
            Ok(record) => record,
            Err(e) => {
                self.stats.record_rejected();
                debug!(%peer, "Dropping malformed frame: {}", e);
                return;
            }
        };

        match self
            .store
            .write(record.strand, record.start_offset, &record.colors)
        {
            Ok(written) => {
                self.stats.record_applied();
                trace!(
                    %peer,
                    strand = record.strand,
                    offset = record.start_offset,
                    written,
                    "Applied frame"
                );
            }
            Err(e) => {
                self.stats.record_rejected();
                debug!(%peer, "Dropping frame: {}", e);
            }
        }
    }
}

/// Network endpoint feeding the pixel store.
pub struct Listener {
    endpoint: Endpoint,
    store: Arc<PixelStore>,
    stats: IngestStats,
    events: Option<mpsc::Sender<ListenerEvent>>,
}

impl Listener {
    /// Bind the configured endpoint. Failure here is a startup failure.
    pub async fn bind(
        config: &NetworkConfig,
        store: Arc<PixelStore>,
        stats: IngestStats,
    ) -> Result<Self> {
        let addr = config.socket_addr()?;
        let endpoint = match config.transport {
            Transport::Udp => Endpoint::Udp(
                UdpSocket::bind(addr)
                    .await
                    .with_context(|| format!("Failed to bind UDP listener on {}", addr))?,
            ),
            Transport::Tcp => Endpoint::Tcp(
                TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("Failed to bind TCP listener on {}", addr))?,
            ),
        };

        Ok(Self {
            endpoint,
            store,
            stats,
            events: None,
        })
    }

    /// Send connection events to `tx`. Events are dropped if the channel is full.
    pub fn with_events(mut self, tx: mpsc::Sender<ListenerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        let addr = match &self.endpoint {
            Endpoint::Udp(socket) => socket.local_addr()?,
            Endpoint::Tcp(listener) => listener.local_addr()?,
        };
        Ok(addr)
    }

    /// Run the receive loop on its own task.
    pub fn spawn(self) -> Result<ListenerHandle> {
        let local_addr = self.local_addr()?;
        let stats = self.stats.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ingest = Ingest {
            store: self.store,
            stats: self.stats,
            shutdown: shutdown_rx,
        };
        let events = self.events;

        let task = match self.endpoint {
            Endpoint::Udp(socket) => {
                info!("Listening for UDP frames on {}", local_addr);
                tokio::spawn(run_udp(socket, ingest))
            }
            Endpoint::Tcp(listener) => {
                info!("Listening for TCP frames on {}", local_addr);
                tokio::spawn(run_tcp(listener, ingest, events))
            }
        };

        Ok(ListenerHandle {
            local_addr,
            stats,
            shutdown_tx,
            task,
        })
    }
}

/// Owner's side of a running listener.
pub struct ListenerHandle {
    local_addr: SocketAddr,
    stats: IngestStats,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Stop receiving and wait until every socket is closed.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!("Listener task ended abnormally: {}", e);
        }
        info!("Listener on {} stopped", self.local_addr);
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender also means shutdown
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn run_udp(socket: UdpSocket, ingest: Ingest) {
    let mut shutdown = ingest.shutdown.clone();
    let mut buf = vec![0u8; MAX_MESSAGE_SIZE];

    loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, peer)) => ingest.apply(decode_datagram(&buf[..len]), peer),
                Err(e) => {
                    // ICMP errors surface here on some platforms; keep receiving
                    debug!("UDP receive error: {}", e);
                }
            },
        }
    }
}

async fn run_tcp(
    listener: TcpListener,
    ingest: Ingest,
    events: Option<mpsc::Sender<ListenerEvent>>,
) {
    let mut shutdown = ingest.shutdown.clone();
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(%peer, "Client connected");
                    notify(&events, ListenerEvent::ClientConnected(peer));
                    connections.spawn(handle_client(stream, peer, ingest.clone(), events.clone()));
                }
                Err(e) => warn!("Failed to accept connection: {}", e),
            },
            // Reap finished connections so the set does not grow
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    connections.shutdown().await;
}

async fn handle_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    ingest: Ingest,
    events: Option<mpsc::Sender<ListenerEvent>>,
) {
    let mut shutdown = ingest.shutdown.clone();
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            read = stream.read(&mut buf) => match read {
                Ok(0) => {
                    info!(%peer, "Client disconnected");
                    break;
                }
                Ok(n) => {
                    decoder.extend(&buf[..n]);
                    while let Some(decoded) = decoder.next_frame() {
                        ingest.apply(decoded, peer);
                    }
                }
                Err(e) => {
                    info!(%peer, "Client connection lost: {}", e);
                    break;
                }
            },
        }
    }

    if decoder.buffered() > 0 {
        debug!(%peer, bytes = decoder.buffered(), "Discarding partial frame");
    }
    notify(&events, ListenerEvent::ClientDisconnected(peer));
}

fn notify(events: &Option<mpsc::Sender<ListenerEvent>>, event: ListenerEvent) {
    if let Some(tx) = events {
        let _ = tx.try_send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Rgb;
    use crate::net::protocol::Message;
    use crate::pixels::AddressMap;
    use crate::scene::{Fixture, FixtureId};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn store_with_strand(strand: u8, pixels: u16) -> Arc<PixelStore> {
        let store = Arc::new(PixelStore::new());
        let fixture = Fixture {
            id: FixtureId(0),
            strand,
            address: 0,
            pixels,
            pos1: [0, 0],
            pos2: [0, 0],
        };
        store.apply_layout(&AddressMap::from_fixtures(&[fixture]));
        store
    }

    fn loopback(transport: Transport) -> NetworkConfig {
        NetworkConfig {
            transport,
            bind: "127.0.0.1".to_string(),
            port: 0,
        }
    }

    async fn wait_for(stats: &IngestStats, frames: u64, rejected: u64) {
        for _ in 0..200 {
            if stats.frames() >= frames && stats.rejected() >= rejected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "timed out: frames={} rejected={}, wanted {} and {}",
            stats.frames(),
            stats.rejected(),
            frames,
            rejected
        );
    }

    fn gradient(n: usize) -> Vec<Rgb> {
        (0..n).map(|i| Rgb::new(i as u8, 10, 20)).collect()
    }

    #[tokio::test]
    async fn test_udp_end_to_end() {
        let store = store_with_strand(0, 10);
        let stats = IngestStats::new();
        let listener = Listener::bind(&loopback(Transport::Udp), store.clone(), stats.clone())
            .await
            .unwrap();
        let handle = listener.spawn().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = handle.local_addr();

        let full = Message::SetStrand {
            strand: 0,
            colors: gradient(10),
        };
        sender.send_to(&full.encode(), target).await.unwrap();
        wait_for(&stats, 1, 0).await;

        let pixel = Message::SetPixel {
            strand: 0,
            offset: 5,
            color: Rgb::new(255, 0, 0),
        };
        sender.send_to(&pixel.encode(), target).await.unwrap();
        wait_for(&stats, 2, 0).await;

        let mut expected = gradient(10);
        expected[5] = Rgb::new(255, 0, 0);
        assert_eq!(store.snapshot(0), expected);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_udp_malformed_frames_do_not_count() {
        let store = store_with_strand(0, 4);
        let stats = IngestStats::new();
        let handle = Listener::bind(&loopback(Transport::Udp), store.clone(), stats.clone())
            .await
            .unwrap()
            .spawn()
            .unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = handle.local_addr();

        // Declares 9 payload bytes, carries 6
        sender
            .send_to(&[0, 0x00, 0, 9, 1, 1, 1, 2, 2, 2], target)
            .await
            .unwrap();
        // Unknown command
        sender.send_to(&[0, 0x09, 0, 0], target).await.unwrap();
        // Strand the scene does not have
        let stray = Message::SetPixel {
            strand: 7,
            offset: 0,
            color: Rgb::WHITE,
        };
        sender.send_to(&stray.encode(), target).await.unwrap();
        wait_for(&stats, 0, 3).await;

        assert_eq!(stats.frames(), 0);
        assert_eq!(store.snapshot(0), vec![Rgb::BLACK; 4]);

        // Later valid frames still get through
        let valid = Message::SetStrand {
            strand: 0,
            colors: vec![Rgb::WHITE; 4],
        };
        sender.send_to(&valid.encode(), target).await.unwrap();
        wait_for(&stats, 1, 3).await;
        assert_eq!(store.snapshot(0), vec![Rgb::WHITE; 4]);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_tcp_split_frames_and_events() {
        let store = store_with_strand(1, 6);
        let stats = IngestStats::new();
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let handle = Listener::bind(&loopback(Transport::Tcp), store.clone(), stats.clone())
            .await
            .unwrap()
            .with_events(event_tx)
            .spawn()
            .unwrap();

        let mut client = TcpStream::connect(handle.local_addr()).await.unwrap();
        let connected = tokio::time::timeout(Duration::from_secs(2), event_rx.recv())
            .await
            .unwrap();
        assert!(matches!(connected, Some(ListenerEvent::ClientConnected(_))));

        let mut bytes = Message::SetStrand {
            strand: 1,
            colors: gradient(6),
        }
        .encode();
        bytes.extend([1, 0x33, 0, 1, 0xFF]);
        bytes.extend(
            Message::SetPixel {
                strand: 1,
                offset: 2,
                color: Rgb::WHITE,
            }
            .encode(),
        );

        let (head, tail) = bytes.split_at(7);
        client.write_all(head).await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(tail).await.unwrap();
        wait_for(&stats, 2, 1).await;

        let mut expected = gradient(6);
        expected[2] = Rgb::WHITE;
        assert_eq!(store.snapshot(1), expected);

        drop(client);
        let disconnected = tokio::time::timeout(Duration::from_secs(2), event_rx.recv())
            .await
            .unwrap();
        assert!(matches!(disconnected, Some(ListenerEvent::ClientDisconnected(_))));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_writes_after_shutdown() {
        let store = store_with_strand(0, 2);
        let stats = IngestStats::new();
        let handle = Listener::bind(&loopback(Transport::Tcp), store.clone(), stats.clone())
            .await
            .unwrap()
            .spawn()
            .unwrap();
        let addr = handle.local_addr();

        let mut client = TcpStream::connect(addr).await.unwrap();
        handle.shutdown().await;

        let frame = Message::SetStrand {
            strand: 0,
            colors: vec![Rgb::WHITE; 2],
        };
        // The server side is gone; the write may or may not error
        let _ = client.write_all(&frame.encode()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.frames(), 0);
        assert_eq!(store.snapshot(0), vec![Rgb::BLACK; 2]);
        // Endpoint was released
        assert!(TcpListener::bind(addr).await.is_ok());
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let store = Arc::new(PixelStore::new());
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = NetworkConfig {
            transport: Transport::Tcp,
            bind: "127.0.0.1".to_string(),
            port: taken.local_addr().unwrap().port(),
        };

        let result = Listener::bind(&config, store, IngestStats::new()).await;
        let err = result.err().unwrap();
        assert!(err.to_string().contains("Failed to bind TCP listener"));
    }
}

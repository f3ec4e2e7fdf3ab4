//! Beast/AVR/SBS wire fan-out (§4.7, §6 "Connection acceptance and
//! backpressure policy are delegated to the external network layer; the
//! core feeds each publisher via a bounded channel and drops ... when
//! full").
//!
//! A `tokio::sync::broadcast` channel stands in for that bounded channel:
//! each connected client gets its own receiver, and a client that falls
//! behind has its oldest unread events dropped by the channel itself,
//! which is exactly the "ring full -> drop oldest, count it" policy §5
//! specifies for the sample ring, applied here to the publisher side.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use chrono::{DateTime, Utc};
use m1090_decode::{cpr::Position, message::Decoded, IcaoAddress};
use parking_lot::Mutex;
use tokio::{
    io::AsyncWriteExt,
    net::TcpListener,
    sync::broadcast,
};
use tokio_util::sync::CancellationToken;

use crate::stats::DecodeStats;

/// A fully decoded (or raw, pre-CRC) event on its way out to a feeder.
#[derive(Clone, Debug)]
pub struct FeedEvent {
    pub frame: Vec<u8>,
    pub timestamp_12mhz: u64,
    pub signal_level_u8: u8,
    pub decoded: Option<Decoded>,
    pub position: Option<Position>,
    pub now: DateTime<Utc>,
}

/// Broadcasts decoded/raw messages to however many Beast/AVR/SBS listeners
/// are configured. Cheaply cloneable; the demod task holds the sending
/// half, each listener task holds its own receiver.
#[derive(Clone)]
pub struct Feed {
    sender: broadcast::Sender<FeedEvent>,
}

const FEED_CHANNEL_CAPACITY: usize = 1024;

impl Feed {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(FEED_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: FeedEvent) {
        // Err means no receivers are subscribed right now, which is the
        // common case when no feeder is configured; not a drop.
        let _ = self.sender.send(event);
    }

    fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.sender.subscribe()
    }
}

/// Assigns small, stable per-connection SBS `aircraft_id`s the way a
/// BaseStation session does, without pulling in a database (§4.7 "session/
/// aircraft/flight IDs ... as defined by the SBS-1 format").
#[derive(Default)]
struct SbsIds {
    next: AtomicU32,
    assigned: Mutex<HashMap<IcaoAddress, u32>>,
}

impl SbsIds {
    fn id_for(&self, address: IcaoAddress) -> u32 {
        *self
            .assigned
            .lock()
            .entry(address)
            .or_insert_with(|| self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

pub async fn serve_beast(
    listen: SocketAddr,
    feed: Feed,
    stats: Arc<DecodeStats>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen).await?;
    tracing::info!(%listen, "beast feeder listening");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                let receiver = feed.subscribe();
                let stats = stats.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(error) = run_beast_connection(socket, receiver, &stats, shutdown).await {
                        tracing::debug!(%peer, %error, "beast connection closed");
                    }
                });
            }
        }
    }
}

async fn run_beast_connection(
    mut socket: tokio::net::TcpStream,
    mut receiver: broadcast::Receiver<FeedEvent>,
    stats: &DecodeStats,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            event = receiver.recv() => {
                match event {
                    Ok(event) => {
                        let record = match event.frame.len() {
                            2 => m1090_beast::encode_mode_ac(
                                event.timestamp_12mhz,
                                event.signal_level_u8,
                                event.frame[..2].try_into().unwrap(),
                            ),
                            7 => m1090_beast::encode_short(
                                event.timestamp_12mhz,
                                event.signal_level_u8,
                                event.frame[..7].try_into().unwrap(),
                            ),
                            14 => m1090_beast::encode_long(
                                event.timestamp_12mhz,
                                event.signal_level_u8,
                                event.frame[..14].try_into().unwrap(),
                            ),
                            _ => continue,
                        };
                        socket.write_all(&record).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        for _ in 0..n {
                            stats.record_feeder_ring_full();
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            }
        }
    }
}

pub async fn serve_avr(
    listen: SocketAddr,
    feed: Feed,
    stats: Arc<DecodeStats>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen).await?;
    tracing::info!(%listen, "AVR feeder listening");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                let receiver = feed.subscribe();
                let stats = stats.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(error) = run_avr_connection(socket, receiver, &stats, shutdown).await {
                        tracing::debug!(%peer, %error, "AVR connection closed");
                    }
                });
            }
        }
    }
}

async fn run_avr_connection(
    mut socket: tokio::net::TcpStream,
    mut receiver: broadcast::Receiver<FeedEvent>,
    stats: &DecodeStats,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            event = receiver.recv() => {
                match event {
                    Ok(event) if event.frame.len() == 7 || event.frame.len() == 14 => {
                        let line = format!("*{};\n", hex::encode_upper(&event.frame));
                        socket.write_all(line.as_bytes()).await?;
                    }
                    Ok(_) => {} // Mode A/C has no AVR representation
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        for _ in 0..n {
                            stats.record_feeder_ring_full();
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            }
        }
    }
}

pub async fn serve_sbs(
    listen: SocketAddr,
    feed: Feed,
    stats: Arc<DecodeStats>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen).await?;
    tracing::info!(%listen, "SBS feeder listening");
    let ids = Arc::new(SbsIds::default());

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                let receiver = feed.subscribe();
                let stats = stats.clone();
                let ids = ids.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(error) = run_sbs_connection(socket, receiver, &stats, &ids, shutdown).await {
                        tracing::debug!(%peer, %error, "SBS connection closed");
                    }
                });
            }
        }
    }
}

async fn run_sbs_connection(
    mut socket: tokio::net::TcpStream,
    mut receiver: broadcast::Receiver<FeedEvent>,
    stats: &DecodeStats,
    ids: &SbsIds,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    const SESSION_ID: u32 = 1;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            event = receiver.recv() => {
                match event {
                    Ok(event) => {
                        let Some(decoded) = &event.decoded else { continue };
                        if decoded.mode_ac {
                            // SBS has no representation for a tentative
                            // Mode A/C-only target; only Mode S is fed.
                            continue;
                        }
                        let aircraft_id = ids.id_for(decoded.address);
                        let line = m1090_sbs::encode_message(decoded, event.position, SESSION_ID, aircraft_id, event.now);
                        socket.write_all(line.as_bytes()).await?;
                        socket.write_all(b"\n").await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        for _ in 0..n {
                            stats.record_feeder_ring_full();
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            }
        }
    }
}

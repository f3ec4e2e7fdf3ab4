//! Task topology (§5): a decode task that owns the table as its sole
//! mutator, a 4 Hz tick task that sweeps staleness and republishes the JSON
//! snapshot, and whatever feeder listeners the operator asked for. Mirrors
//! `adsbee-api-server`'s tracker reactor: one task per concern, talking to
//! shared state behind a lock or an atomic pointer swap rather than to each
//! other directly.

use std::{pin::Pin, sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use chrono::Utc;
use futures_util::{future::poll_fn, StreamExt};
use m1090_decode::{crc::IcaoCache, frame};
use m1090_demod::{stream::DemodulateStream, AsyncReadSamples, Demodulator, IqSample, Quality};
use m1090_server::Command;
use m1090_table::{json, Table};
use tokio::{sync::{mpsc, watch}, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    channel::{ChannelSource, CHUNK_SAMPLES},
    feed::{Feed, FeedEvent},
    stats::DecodeStats,
};

const TICK_INTERVAL: Duration = Duration::from_millis(250);

pub struct Runtime {
    pub table: Arc<Table>,
    pub stats: Arc<DecodeStats>,
    pub feed: Feed,
    pub snapshot: Arc<ArcSwap<serde_json::Value>>,
    pub snapshot_changed: watch::Receiver<()>,
    pub shutdown: CancellationToken,
}

impl Runtime {
    pub fn new(table: Arc<Table>) -> (Self, watch::Sender<()>) {
        let (snapshot_tx, snapshot_rx) = watch::channel(());
        let runtime = Self {
            table,
            stats: Arc::new(DecodeStats::default()),
            feed: Feed::new(),
            snapshot: Arc::new(ArcSwap::new(Arc::new(serde_json::Value::Null))),
            snapshot_changed: snapshot_rx,
            shutdown: CancellationToken::new(),
        };
        (runtime, snapshot_tx)
    }

    /// Reads sample chunks off `source` as fast as the driver hands them
    /// over and forwards them to the decode task via a bounded channel
    /// (§5). A full channel means the decode task has fallen behind; the
    /// chunk just read is dropped rather than blocking the source read,
    /// since stalling the source would desynchronize it from the RF
    /// front-end's own clock.
    pub async fn run_source_task<S>(&self, mut source: S, tx: mpsc::Sender<Box<[IqSample]>>)
    where
        S: AsyncReadSamples + Unpin,
        S::Error: std::fmt::Display,
    {
        let mut buf = vec![IqSample::default(); CHUNK_SAMPLES].into_boxed_slice();

        loop {
            let read = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                read = poll_fn(|cx| Pin::new(&mut source).poll_read_samples(cx, &mut buf)) => read,
            };

            match read {
                Ok(0) => {
                    tracing::info!("sample source exhausted");
                    self.shutdown.cancel();
                    return;
                }
                Ok(n) => {
                    let chunk = buf[..n].to_vec().into_boxed_slice();
                    if tx.try_send(chunk).is_err() {
                        self.stats.record_source_buffer_dropped();
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, "sample source failed; stopping source task");
                    self.shutdown.cancel();
                    return;
                }
            }
        }
    }

    /// Demodulates, decodes, and applies every frame read off the source
    /// channel (§4.2-§4.5). This is the table's sole writer (§5); it also
    /// publishes every decoded/raw message onto the feed for the Beast/AVR/
    /// SBS listeners.
    pub async fn run_decode_task(&self, source: ChannelSource, max_uncertain_bits: usize) {
        m1090_demod::init_magnitude_table();

        let demodulator = Demodulator::new(Quality::Default, max_uncertain_bits);
        let mut stream = std::pin::pin!(DemodulateStream::new(source, demodulator));
        let mut cache = IcaoCache::default();
        let start = tokio::time::Instant::now();

        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                next = stream.next() => next,
            };

            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(error)) => {
                    tracing::warn!(%error, "sample source failed; stopping decode task");
                    self.shutdown.cancel();
                    return;
                }
                None => {
                    tracing::info!("sample source exhausted");
                    self.shutdown.cancel();
                    return;
                }
            };

            let now = Utc::now();
            let raw = message.frame.as_ref();
            let timestamp_12mhz = (start.elapsed().as_nanos() * 12 / 1000) as u64;
            let signal_level_u8 = (message.signal_level.sqrt() * 255.0).clamp(0.0, 255.0) as u8;

            let decoded = match frame::decode(raw, &cache) {
                Ok(decoded) => decoded,
                Err(error) => {
                    self.stats.record_frame_error(&error);
                    self.feed.publish(FeedEvent {
                        frame: raw.to_vec(),
                        timestamp_12mhz,
                        signal_level_u8,
                        decoded: None,
                        position: None,
                        now,
                    });
                    continue;
                }
            };

            if decoded.corrected_bit.is_some() {
                self.stats.record_corrected();
            }

            if decoded.df.is_some_and(|df| df.trailer_is_direct_checksum()) {
                cache.insert(decoded.address.value());
            }

            self.table.apply(&decoded, now);
            let position = self.table.snapshot(|aircraft| {
                aircraft.get(&decoded.address).and_then(|a| a.position.as_ref().map(|p| p.value))
            });

            self.feed.publish(FeedEvent {
                frame: raw.to_vec(),
                timestamp_12mhz,
                signal_level_u8,
                decoded: Some(decoded),
                position,
                now,
            });
        }
    }

    /// 4 Hz staleness sweep + JSON snapshot republication (§4.6, §5). Also
    /// runs §4.5's once-per-process home-position sanity check: if a home
    /// position is configured but the global CPR plausibility check has
    /// never fired by 80s of uptime, the configured position is probably
    /// wrong, and every subsequent global decode would be silently
    /// rejected as implausible — that's a fatal misconfiguration, not a
    /// transient condition, so it signals shutdown rather than logging and
    /// continuing.
    pub async fn run_tick_task(&self, json_config: json::JsonConfig, snapshot_tx: watch::Sender<()>) {
        const HOME_CHECK_DEADLINE: Duration = Duration::from_secs(80);

        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let start = tokio::time::Instant::now();
        let mut home_checked = false;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = interval.tick() => {}
            }

            let now = Utc::now();
            self.table.sweep(now);
            let document = json::aircraft_document(&self.table, &json_config, now);
            self.snapshot.store(Arc::new(document));
            let _ = snapshot_tx.send(());

            let elapsed = start.elapsed();
            if !home_checked && elapsed >= HOME_CHECK_DEADLINE {
                home_checked = true;
                if self.table.home_position_suspect() {
                    tracing::error!(
                        "no aircraft position has passed the global CPR plausibility check in the first {}s of operation; the configured home position is probably wrong",
                        HOME_CHECK_DEADLINE.as_secs(),
                    );
                    self.shutdown.cancel();
                    return;
                }
            }
        }
    }

    /// Applies operator commands (§6) as they arrive. `Shutdown` and
    /// `Follow` have no direct `Table` method and are handled here;
    /// everything else is a one-line delegation.
    pub async fn run_command_task(&self, mut commands: mpsc::Receiver<Command>) {
        loop {
            let command = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                command = commands.recv() => command,
            };

            let Some(command) = command else { return };
            match command {
                Command::Shutdown => {
                    tracing::info!("shutdown requested via control channel");
                    self.shutdown.cancel();
                    return;
                }
                Command::SetHome { lat, lon } => {
                    self.table.set_home(Some(m1090_decode::cpr::Position { latitude: lat, longitude: lon }));
                }
                Command::SetTtl { ttl_secs } => {
                    self.table.set_ttl(Duration::from_secs(ttl_secs));
                }
                Command::ResetStats => {
                    self.table.reset_stats();
                    self.stats.reset();
                }
                Command::Follow { icao } => {
                    tracing::info!(%icao, "follow requested (no dedicated transport; visible via /data/live)");
                }
            }
        }
    }
}

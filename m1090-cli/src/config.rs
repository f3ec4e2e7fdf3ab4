//! Command-line configuration (§6 "ambient additions"): `clap` (derive) +
//! `dotenvy` for `.env` loading + `humantime` for duration-valued flags,
//! matching `adsbee-cli`/`adsb-index-cli`.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use m1090_decode::cpr::Position;
use m1090_source::rtlsdr::TunerConfig;
use m1090_table::Config as TableConfig;
use rtlsdr_async::Gain;

#[derive(Debug, Parser)]
#[clap(name = "m1090", about = "Mode S / ADS-B receiver core")]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the full receiver: source -> demod -> decode -> table -> publishers.
    Serve(ServeArgs),
    /// List RTL-SDR devices visible to the host (`rtlsdr_async::devices`).
    ListDevices,
}

#[derive(Debug, Parser)]
pub struct ServeArgs {
    #[clap(flatten)]
    pub source: SourceArgs,

    /// Receiver position, used as the CPR local-decode seed and as the
    /// centre of the global-decode plausibility check (§4.4).
    #[clap(long, allow_hyphen_values = true, requires = "lon")]
    pub lat: Option<f64>,
    #[clap(long, allow_hyphen_values = true, requires = "lat")]
    pub lon: Option<f64>,

    /// Aircraft record eviction window (§4.5 "default 60s, configurable").
    #[clap(long, default_value = "60s", value_parser = humantime::parse_duration)]
    pub ttl: Duration,

    /// HTTP/WS listen address serving `/data/*.json` and operator controls.
    #[clap(long, default_value = "127.0.0.1:8080")]
    pub http_listen: SocketAddr,

    /// Beast binary feeder listen address (§4.7). Omit to disable.
    #[clap(long)]
    pub beast_listen: Option<SocketAddr>,

    /// AVR ASCII feeder listen address (§4.7). Omit to disable.
    #[clap(long)]
    pub avr_listen: Option<SocketAddr>,

    /// SBS (BaseStation) feeder listen address (§4.7). Omit to disable.
    #[clap(long)]
    pub sbs_listen: Option<SocketAddr>,

    /// Number of prior aircraft.json snapshots advertised via `history`
    /// (§6 "a sliding history ... default 120").
    #[clap(long, default_value_t = 120)]
    pub history: u32,

    /// Use the `alt_baro`/`geom_rate`/`gs` FlightAware-style field aliases
    /// instead of the readsb/tar1090 names (§4.6).
    #[clap(long)]
    pub flightaware_aliases: bool,

    /// Maximum uncertain bits tolerated per frame before it's dropped (§4.2).
    #[clap(long, default_value_t = 5)]
    pub max_uncertain_bits: usize,
}

#[derive(Debug, Clone, Parser)]
pub struct SourceArgs {
    /// Replay raw interleaved I/Q samples from a file instead of a live
    /// RTL-SDR (a recording, or a named pipe from `rtl_sdr`).
    #[clap(long, conflicts_with = "device")]
    pub source_file: Option<PathBuf>,

    /// RTL-SDR device index (default: first device found).
    #[clap(long)]
    pub device: Option<u32>,

    /// Frequency correction in PPM, applied to the live device only.
    #[clap(long, default_value_t = 0)]
    pub freq_correction_ppm: i32,

    /// Manual tuner gain in tenths of a dB. Omit to leave AGC enabled.
    #[clap(long)]
    pub gain: Option<i32>,
}

impl ServeArgs {
    pub fn home(&self) -> Option<Position> {
        match (self.lat, self.lon) {
            (Some(latitude), Some(longitude)) => Some(Position { latitude, longitude }),
            _ => None,
        }
    }

    pub fn table_config(&self) -> TableConfig {
        TableConfig {
            home: self.home(),
            ttl: self.ttl,
            ..TableConfig::default()
        }
    }
}

/// Which sample source `--source-file`/`--device` selected.
pub enum SampleSource {
    File(PathBuf),
    RtlSdr(TunerConfig),
}

impl SourceArgs {
    pub fn gain(&self) -> Option<Gain> {
        self.gain.map(Gain::ManualValue)
    }

    pub fn resolve(&self) -> SampleSource {
        match &self.source_file {
            Some(path) => SampleSource::File(path.clone()),
            None => SampleSource::RtlSdr(TunerConfig {
                device_index: self.device.unwrap_or(0),
                frequency_correction_ppm: self.freq_correction_ppm,
                gain: self.gain(),
            }),
        }
    }
}

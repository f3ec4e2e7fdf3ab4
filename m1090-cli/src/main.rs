//! Receiver binary: parses configuration, wires the task topology in
//! [`runtime`] to a sample source, and serves the HTTP/WS API, mirroring
//! `adsbee-cli`'s `main` (`dotenvy` + `color_eyre` + `tracing_subscriber`
//! boilerplate, then dispatch on a `Command` subcommand).

mod channel;
mod config;
mod feed;
mod runtime;
mod stats;

use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Context, Result};
use config::{Args, Command, SampleSource, ServeArgs};
use m1090_server::{Api, Handle};
use m1090_source::{file::ReaderSource, rtlsdr::RtlSdrSource};
use m1090_table::{json::JsonConfig, Table};
use runtime::Runtime;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    color_eyre::install()?;
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    match args.command {
        Command::ListDevices => list_devices(),
        Command::Serve(serve_args) => serve(serve_args).await,
    }
}

fn list_devices() -> Result<()> {
    for device in rtlsdr_async::devices() {
        println!(
            "{}: {} ({})",
            device.index(),
            device.device_name().unwrap_or("unknown"),
            device.serial().unwrap_or("no serial"),
        );
    }
    Ok(())
}

enum OpenedSource {
    File(ReaderSource<tokio::io::BufReader<tokio::fs::File>>),
    RtlSdr(RtlSdrSource),
}

async fn open_source(source: SampleSource) -> Result<OpenedSource> {
    match source {
        SampleSource::File(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("opening sample file {}", path.display()))?;
            Ok(OpenedSource::File(ReaderSource::new(tokio::io::BufReader::new(file))))
        }
        SampleSource::RtlSdr(config) => {
            let source = RtlSdrSource::open(config).await.context("opening RTL-SDR device")?;
            Ok(OpenedSource::RtlSdr(source))
        }
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let table = Arc::new(Table::new(args.table_config()));
    let (runtime, snapshot_tx) = Runtime::new(table.clone());
    let runtime = Arc::new(runtime);

    let json_config = JsonConfig {
        history: args.history,
        flightaware_aliases: args.flightaware_aliases,
        ..JsonConfig::default()
    };

    let (command_tx, command_rx) = tokio::sync::mpsc::channel(32);
    let handle = Handle::new(command_tx);
    let api = Api::new(
        table,
        runtime.snapshot.clone(),
        runtime.snapshot_changed.clone(),
        json_config,
        handle,
        runtime.shutdown.clone(),
    );

    let mut tasks = tokio::task::JoinSet::new();

    let http_listen = args.http_listen;
    tasks.spawn({
        let shutdown = runtime.shutdown.clone();
        async move {
            if let Err(error) = api.serve(http_listen).await {
                tracing::error!(%error, "HTTP/WS server exited");
                shutdown.cancel();
            }
        }
    });

    tasks.spawn({
        let runtime = runtime.clone();
        async move { runtime.run_tick_task(json_config, snapshot_tx).await }
    });

    tasks.spawn({
        let runtime = runtime.clone();
        async move { runtime.run_command_task(command_rx).await }
    });

    spawn_feeders(&mut tasks, &args, &runtime);

    let max_uncertain_bits = args.max_uncertain_bits;
    let source = args.source.resolve();
    let (sample_tx, sample_source) = channel::channel();

    tasks.spawn({
        let runtime = runtime.clone();
        async move {
            match open_source(source).await {
                Ok(OpenedSource::File(source)) => runtime.run_source_task(source, sample_tx).await,
                Ok(OpenedSource::RtlSdr(source)) => runtime.run_source_task(source, sample_tx).await,
                Err(error) => {
                    tracing::error!(%error, "failed to open sample source");
                    runtime.shutdown.cancel();
                }
            }
        }
    });

    tasks.spawn({
        let runtime = runtime.clone();
        async move { runtime.run_decode_task(sample_source, max_uncertain_bits).await }
    });

    tokio::select! {
        _ = wait_for_shutdown() => runtime.shutdown.cancel(),
        _ = runtime.shutdown.cancelled() => {}
    }

    while tasks.join_next().await.is_some() {}
    Ok(())
}

fn spawn_feeders(tasks: &mut tokio::task::JoinSet<()>, args: &ServeArgs, runtime: &Arc<Runtime>) {
    if let Some(listen) = args.beast_listen {
        let feed = runtime.feed.clone();
        let stats = runtime.stats.clone();
        let shutdown = runtime.shutdown.clone();
        tasks.spawn(async move {
            if let Err(error) = feed::serve_beast(listen, feed, stats, shutdown).await {
                tracing::error!(%error, "beast feeder failed");
            }
        });
    }
    if let Some(listen) = args.avr_listen {
        let feed = runtime.feed.clone();
        let stats = runtime.stats.clone();
        let shutdown = runtime.shutdown.clone();
        tasks.spawn(async move {
            if let Err(error) = feed::serve_avr(listen, feed, stats, shutdown).await {
                tracing::error!(%error, "AVR feeder failed");
            }
        });
    }
    if let Some(listen) = args.sbs_listen {
        let feed = runtime.feed.clone();
        let stats = runtime.stats.clone();
        let shutdown = runtime.shutdown.clone();
        tasks.spawn(async move {
            if let Err(error) = feed::serve_sbs(listen, feed, stats, shutdown).await {
                tracing::error!(%error, "SBS feeder failed");
            }
        });
    }
}

async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

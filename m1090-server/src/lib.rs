//! HTTP/WS surface serving the JSON snapshot and accepting operator
//! controls (§6). Grounded on `adsb-index-server`'s `Api` struct: a cheaply
//! cloneable handle passed into every axum handler as state, owning a
//! `Router` builder and a graceful-shutdown `serve`.
//!
//! This crate is the external collaborator boundary: the receiver core
//! (`m1090-table`, `m1090-decode`, `m1090-demod`) never depends on it, only
//! `m1090-cli` wires the two together.

pub mod command;
pub mod control;
pub mod data;
pub mod error;
pub mod live;

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::{Router, routing};
use m1090_table::{Table, json::JsonConfig};
use serde_json::Value;
use tokio::{net::ToSocketAddrs, sync::watch};
use tokio_util::sync::CancellationToken;

pub use crate::command::{Command, Handle};

#[derive(Clone)]
pub struct Api {
    pub table: Arc<Table>,
    pub snapshot: Arc<ArcSwap<Value>>,
    pub snapshot_changed: watch::Receiver<()>,
    pub json_config: JsonConfig,
    pub handle: Handle,
    pub shutdown: CancellationToken,
}

impl Api {
    pub fn new(
        table: Arc<Table>,
        snapshot: Arc<ArcSwap<Value>>,
        snapshot_changed: watch::Receiver<()>,
        json_config: JsonConfig,
        handle: Handle,
        shutdown: CancellationToken,
    ) -> Self {
        Self { table, snapshot, snapshot_changed, json_config, handle, shutdown }
    }

    pub fn router(&self) -> Router<()> {
        Router::new()
            .route("/data/receiver.json", routing::get(data::get_receiver))
            .route("/data/aircraft.json", routing::get(data::get_aircraft))
            .route("/data/live", routing::get(live::get_live))
            .route("/control", routing::post(control::post_control))
            .fallback(routing::get(not_found))
            .with_state(self.clone())
    }

    pub async fn serve(&self, listen_addresses: impl ToSocketAddrs) -> std::io::Result<()> {
        let tcp_listener = tokio::net::TcpListener::bind(listen_addresses).await?;
        let shutdown = self.shutdown.clone();

        axum::serve(tcp_listener, self.router().into_make_service())
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
            })
            .await
    }
}

async fn not_found() -> impl axum::response::IntoResponse {
    (axum::http::StatusCode::NOT_FOUND, "not found")
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use m1090_table::Config;
    use tower::ServiceExt;

    use super::*;

    fn test_api() -> (Api, tokio::sync::mpsc::Receiver<Command>) {
        let table = Arc::new(Table::new(Config::default()));
        let document = m1090_table::json::aircraft_document(&table, &JsonConfig::default(), Utc::now());
        let snapshot = Arc::new(ArcSwap::new(Arc::new(document)));
        let (_tx, rx) = watch::channel(());
        let (command_tx, command_rx) = tokio::sync::mpsc::channel(8);
        let api = Api::new(table, snapshot, rx, JsonConfig::default(), Handle::new(command_tx), CancellationToken::new());
        (api, command_rx)
    }

    #[tokio::test]
    async fn serves_an_empty_aircraft_snapshot() {
        let (api, _rx) = test_api();
        let request = axum::http::Request::builder()
            .uri("/data/aircraft.json")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = api.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn forwards_a_control_command() {
        let (api, mut rx) = test_api();
        let body = serde_json::to_vec(&Command::ResetStats).unwrap();
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/control")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(body))
            .unwrap();
        let response = api.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        assert_eq!(rx.recv().await, Some(Command::ResetStats));
    }
}

//! `GET /data/live` (§6): a WebSocket that pushes the aircraft JSON document
//! every time the tick task publishes a new snapshot, instead of making
//! clients poll `/data/aircraft.json`. Mirrors the teacher's WebSocket
//! handler shape (`on_upgrade` + a `select!` against the shutdown token).

use axum::{
    extract::{State, WebSocketUpgrade, ws},
    response::IntoResponse,
};

use crate::Api;

pub async fn get_live(State(api): State<Api>, upgrade: WebSocketUpgrade) -> impl IntoResponse {
    upgrade.on_upgrade(move |websocket| run(api, websocket))
}

async fn run(api: Api, mut websocket: ws::WebSocket) {
    let mut snapshot_changed = api.snapshot_changed.clone();

    loop {
        tokio::select! {
            _ = api.shutdown.cancelled() => {
                let _ = websocket.send(ws::Message::Close(None)).await;
                break;
            }
            incoming = websocket.recv() => {
                match incoming {
                    None | Some(Err(_)) => break,
                    Some(Ok(ws::Message::Close(_))) => break,
                    Some(Ok(_)) => {
                        // clients don't send anything meaningful on this
                        // socket; ignore and keep streaming snapshots.
                    }
                }
            }
            result = snapshot_changed.changed() => {
                if result.is_err() {
                    // sender (the tick task) dropped; nothing more to push.
                    break;
                }
                let document = (**api.snapshot.load()).clone();
                let Ok(text) = serde_json::to_string(&document) else { continue };
                if websocket.send(ws::Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

//! Operator control commands (§6): a small `Command` enum delivered over an
//! `mpsc` channel into whichever task applies it, mirroring the `Command`
//! enum/`Handle` split the tracker reactor uses for its own control plane.

use tokio::sync::mpsc;

/// One operator action. `SetHome`/`SetTtl`/`ResetStats` end up calling the
/// matching method on `m1090_table::Table`; `Shutdown`/`Follow` have no
/// direct table-level representation and are handled by the runtime loop
/// that owns the command receiver.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Shutdown,
    SetHome { lat: f64, lon: f64 },
    SetTtl { ttl_secs: u64 },
    ResetStats,
    Follow { icao: String },
}

/// Cheaply cloneable front-end to the command channel, handed to the axum
/// state so every request handler can submit a command without owning the
/// receiving end.
#[derive(Clone, Debug)]
pub struct Handle {
    sender: mpsc::Sender<Command>,
}

#[derive(Debug, thiserror::Error)]
#[error("command channel closed; the owning task has shut down")]
pub struct ChannelClosed;

impl Handle {
    pub fn new(sender: mpsc::Sender<Command>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, command: Command) -> Result<(), ChannelClosed> {
        self.sender.send(command).await.map_err(|_| ChannelClosed)
    }
}

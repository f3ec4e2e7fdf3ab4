//! `POST /control` (§6): accepts one [`Command`] per request and forwards
//! it to whichever task owns the command receiver.

use axum::{Json, extract::State};
use serde::Serialize;

use crate::{Api, command::Command, error::ApiError};

#[derive(Debug, Serialize)]
pub struct Accepted {
    accepted: bool,
}

pub async fn post_control(State(api): State<Api>, Json(command): Json<Command>) -> Result<Json<Accepted>, ApiError> {
    tracing::debug!(?command, "operator command");
    api.handle.send(command).await?;
    Ok(Json(Accepted { accepted: true }))
}

//! `/data/receiver.json` and `/data/aircraft.json` (§4.6, §6).

use axum::{Json, extract::{Query, State}};
use m1090_table::{SortKey, SortOrder, table::compare};
use serde::Deserialize;
use serde_json::Value;

use crate::{Api, error::ApiError};

pub async fn get_receiver(State(api): State<Api>) -> Json<Value> {
    Json(m1090_table::json::receiver_document(&api.json_config, api.table.home()))
}

/// Serves the cached tick-built snapshot unless a sort is requested, in
/// which case it reads the table directly under its lock (§4.5 "the server
/// thread... takes the table read lock only for the interactive sorted
/// view").
pub async fn get_aircraft(State(api): State<Api>, Query(query): Query<AircraftQuery>) -> Result<Json<Value>, ApiError> {
    match query.sort {
        None => Ok(Json((**api.snapshot.load()).clone())),
        Some(sort) => {
            let order = query.order.unwrap_or(SortOrderQuery::Ascending).into();
            let now = chrono::Utc::now();
            let entries = api.table.snapshot(|aircraft| {
                let mut entries: Vec<_> = aircraft.values().collect();
                entries.sort_by(|a, b| compare(a, b, sort.into(), order));
                entries.into_iter().map(|a| m1090_table::json::aircraft_entry_value(a, &api.json_config, now)).collect::<Vec<_>>()
            });
            Ok(Json(Value::Array(entries)))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AircraftQuery {
    sort: Option<SortKeyQuery>,
    order: Option<SortOrderQuery>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKeyQuery {
    Callsign,
    Country,
    Icao,
    Altitude,
    Distance,
    Regnum,
    Speed,
    Seen,
    Messages,
}

impl From<SortKeyQuery> for SortKey {
    fn from(value: SortKeyQuery) -> Self {
        match value {
            SortKeyQuery::Callsign => SortKey::Callsign,
            SortKeyQuery::Country => SortKey::Country,
            SortKeyQuery::Icao => SortKey::Icao,
            SortKeyQuery::Altitude => SortKey::Altitude,
            SortKeyQuery::Distance => SortKey::Distance,
            SortKeyQuery::Regnum => SortKey::Regnum,
            SortKeyQuery::Speed => SortKey::Speed,
            SortKeyQuery::Seen => SortKey::Seen,
            SortKeyQuery::Messages => SortKey::Messages,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrderQuery {
    Ascending,
    Descending,
}

impl From<SortOrderQuery> for SortOrder {
    fn from(value: SortOrderQuery) -> Self {
        match value {
            SortOrderQuery::Ascending => SortOrder::Ascending,
            SortOrderQuery::Descending => SortOrder::Descending,
        }
    }
}

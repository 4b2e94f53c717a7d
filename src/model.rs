//! In-memory records shared by the decoder, the static index and the
//! resolver.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// How a single stop of a live trip is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopRelationship {
    OnTime,
    Skipped,
    Canceled,
    NoData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopTimeUpdate {
    pub stop_id: Option<String>,
    pub stop_sequence: Option<u32>,
    /// Predicted arrival, falling back to the predicted departure.
    pub predicted: Option<DateTime<Utc>>,
    /// Delay in seconds when the feed only reports a delay.
    pub delay: Option<i32>,
    pub relationship: StopRelationship,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TripUpdate {
    pub trip_id: String,
    pub route_id: Option<String>,
    pub direction_id: Option<u32>,
    pub start_date: Option<NaiveDate>,
    pub canceled: bool,
    pub stop_time_updates: Vec<StopTimeUpdate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VehiclePosition {
    pub trip_id: String,
    pub current_stop_sequence: Option<u32>,
    pub stop_id: Option<String>,
    pub latitude: Option<f32>,
    pub longitude: Option<f32>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// One consistent view of the realtime feeds. Replaced as a whole on every
/// successful refresh and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveSnapshot {
    pub trip_updates: Vec<TripUpdate>,
    /// trip_id -> latest vehicle position
    pub vehicles: HashMap<String, VehiclePosition>,
    pub feed_timestamp: Option<DateTime<Utc>>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl LiveSnapshot {
    pub fn is_empty(&self) -> bool {
        self.fetched_at.is_none()
    }
}

/// A configured (stop, route, direction, service type) lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct DepartureQuery {
    pub name: String,
    pub stop_id: String,
    pub route_id: String,
    pub direction_id: Option<u32>,
    pub service_type: Option<String>,
    pub icon: String,
    pub limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Source {
    // Declaration order is the tie-break order when times are equal.
    Live,
    Static,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleInfo {
    pub latitude: f32,
    pub longitude: f32,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepartureResult {
    pub time: DateTime<Utc>,
    pub source: Source,
    pub trip_id: String,
    pub route_id: String,
    pub stop_id: String,
    pub direction_id: Option<u32>,
    pub headsign: Option<String>,
    pub delay: Option<i32>,
    pub vehicle: Option<VehicleInfo>,
}

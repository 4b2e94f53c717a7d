//! One reporting sensor per configured departure, wrapping engine queries
//! into a state string and a bag of attributes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::info;

use crate::config::{Config, DEFAULT_SERVICE_TYPE};
use crate::engine::TransitData;
use crate::error::ConfigError;
use crate::model::{DepartureQuery, DepartureResult};

pub const ATTR_STOP_ID: &str = "Stop ID";
pub const ATTR_ROUTE: &str = "Route";
pub const ATTR_DIRECTION_ID: &str = "Direction ID";
pub const ATTR_DUE_IN: &str = "Due in";
pub const ATTR_DUE_AT: &str = "Due at";
pub const ATTR_SOURCE: &str = "Source";
pub const ATTR_HEADSIGN: &str = "Headsign";
pub const ATTR_LATITUDE: &str = "Latitude";
pub const ATTR_LONGITUDE: &str = "Longitude";

/// Shown as the state when no departure is known.
pub const NO_DEPARTURE: &str = "-";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorState {
    pub name: String,
    pub icon: String,
    /// Minutes until the next departure.
    pub state: String,
    pub unit_of_measurement: &'static str,
    pub attributes: Map<String, Value>,
}

impl SensorState {
    /// Renders `results` (already sorted) as seen at `now`. Clock times are
    /// shown in `tz`.
    pub fn from_results(
        query: &DepartureQuery,
        results: &[DepartureResult],
        now: DateTime<Utc>,
        tz: Tz,
    ) -> Self {
        let mut attributes = Map::new();
        attributes.insert(ATTR_STOP_ID.into(), json!(query.stop_id));
        attributes.insert(ATTR_ROUTE.into(), json!(query.route_id));
        if let Some(direction) = query.direction_id {
            attributes.insert(ATTR_DIRECTION_ID.into(), json!(direction.to_string()));
        }

        let state = match results.first() {
            Some(first) => {
                let due_in = due_in_minutes(first.time, now);
                attributes.insert(ATTR_DUE_IN.into(), json!(due_in));
                attributes.insert(ATTR_DUE_AT.into(), json!(clock_time(first.time, tz)));
                attributes.insert(ATTR_SOURCE.into(), json!(first.source));
                if let Some(headsign) = &first.headsign {
                    attributes.insert(ATTR_HEADSIGN.into(), json!(headsign));
                }
                if let Some(vehicle) = &first.vehicle {
                    attributes.insert(ATTR_LATITUDE.into(), json!(vehicle.latitude));
                    attributes.insert(ATTR_LONGITUDE.into(), json!(vehicle.longitude));
                }
                due_in.to_string()
            }
            None => NO_DEPARTURE.to_string(),
        };

        if let Some(next) = results.get(1) {
            let label = query.service_type.as_deref().unwrap_or(DEFAULT_SERVICE_TYPE);
            attributes.insert(format!("Next {label}"), json!(clock_time(next.time, tz)));
            attributes.insert(
                format!("Next {label} Due in"),
                json!(due_in_minutes(next.time, now)),
            );
        }

        Self {
            name: query.name.clone(),
            icon: query.icon.clone(),
            state,
            unit_of_measurement: "min",
            attributes,
        }
    }
}

/// Whole minutes until `time`, never negative.
fn due_in_minutes(time: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (time - now).num_minutes().max(0)
}

fn clock_time(time: DateTime<Utc>, tz: Tz) -> String {
    time.with_timezone(&tz).format("%H:%M").to_string()
}

pub struct DepartureSensor {
    query: DepartureQuery,
    data: Arc<TransitData>,
    state: Option<SensorState>,
}

impl DepartureSensor {
    pub fn new(query: DepartureQuery, data: Arc<TransitData>) -> Self {
        Self {
            query,
            data,
            state: None,
        }
    }

    pub fn query(&self) -> &DepartureQuery {
        &self.query
    }

    /// Last computed state; `None` until the first [`update`](Self::update).
    pub fn state(&self) -> Option<&SensorState> {
        self.state.as_ref()
    }

    pub async fn update(&mut self) -> &SensorState {
        let results = self.data.query(&self.query).await;
        let tz = self
            .data
            .schedule()
            .map(|s| s.timezone())
            .unwrap_or(chrono_tz::UTC);
        let state = SensorState::from_results(&self.query, &results, Utc::now(), tz);
        info!(
            sensor = %self.query.name,
            state = %state.state,
            departures = results.len(),
            "Sensor updated"
        );
        self.state.insert(state)
    }
}

pub struct SensorFactory;

impl SensorFactory {
    /// Builds one sensor per departure entry, all sharing `data`.
    pub fn create_sensors_from_config(
        config: &Config,
        data: Arc<TransitData>,
    ) -> Result<Vec<DepartureSensor>, ConfigError> {
        Ok(config
            .departure_queries()?
            .into_iter()
            .map(|query| DepartureSensor::new(query, data.clone()))
            .collect())
    }
}

//! Configuration: the raw YAML shape and its validated, immutable form.

use std::time::Duration;

use reqwest::Url;
use reqwest::header::{HeaderName, HeaderValue};
use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;
use crate::model::DepartureQuery;
use crate::schedule::ServiceType;

/// Minimum time between two live feed fetches.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_NEXT_BUS_LIMIT: usize = 1;
pub const DEFAULT_API_KEY_HEADER: &str = "Authorization";
pub const DEFAULT_SERVICE_TYPE: &str = "Service";
pub const DEFAULT_ICON: &str = "mdi:bus";
/// Timeout budget for each realtime feed request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout budget for the static archive download.
pub const STATIC_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// The departures block as written in the YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub trip_update_url: Option<String>,
    pub api_key: Option<String>,
    pub api_key_header_name: Option<String>,
    pub vehicle_position_url: Option<String>,
    pub route_delimiter: Option<String>,
    /// Seconds
    pub update_interval: Option<u64>,
    pub static_gtfs_url: Option<String>,
    #[serde(default)]
    pub enable_static_fallback: bool,
    #[serde(default)]
    pub departures: Vec<DepartureConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepartureConfig {
    pub name: String,
    #[serde(rename = "stopid")]
    pub stop_id: String,
    pub route: String,
    #[serde(rename = "directionid")]
    pub direction_id: Option<String>,
    pub service_type: Option<String>,
    pub icon: Option<String>,
    pub next_bus_limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeySettings {
    pub header_name: String,
    pub key: String,
}

/// Validated engine construction parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSettings {
    pub trip_update_url: Url,
    pub vehicle_position_url: Option<Url>,
    pub route_delimiter: Option<String>,
    pub api_key: Option<ApiKeySettings>,
    pub refresh_interval: Duration,
    pub static_gtfs_url: Option<Url>,
    pub static_fallback: bool,
    pub request_timeout: Duration,
    pub static_request_timeout: Duration,
}

impl FeedSettings {
    /// Settings for a single trip-update feed with every optional field at
    /// its default.
    pub fn new(trip_update_url: Url) -> Self {
        Self {
            trip_update_url,
            vehicle_position_url: None,
            route_delimiter: None,
            api_key: None,
            refresh_interval: DEFAULT_UPDATE_INTERVAL,
            static_gtfs_url: None,
            static_fallback: false,
            request_timeout: REQUEST_TIMEOUT,
            static_request_timeout: STATIC_REQUEST_TIMEOUT,
        }
    }
}

impl Config {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    pub fn feed_settings(&self) -> Result<FeedSettings, ConfigError> {
        let trip_update_url = self
            .trip_update_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::MissingField("trip_update_url"))?;

        let refresh_interval = match self.update_interval {
            Some(0) => return Err(ConfigError::ZeroInterval),
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_UPDATE_INTERVAL,
        };

        let api_key = self
            .api_key
            .as_ref()
            .filter(|k| !k.is_empty())
            .map(|key| ApiKeySettings {
                header_name: self
                    .api_key_header_name
                    .clone()
                    .filter(|h| !h.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_API_KEY_HEADER.to_string()),
                key: key.clone(),
            });
        if let Some(key) = &api_key {
            HeaderName::from_bytes(key.header_name.as_bytes())
                .map_err(|_| ConfigError::InvalidHeaderName(key.header_name.clone()))?;
            HeaderValue::from_str(&key.key).map_err(|_| ConfigError::InvalidHeaderValue)?;
        }

        Ok(FeedSettings {
            trip_update_url: parse_url("trip_update_url", trip_update_url)?,
            vehicle_position_url: optional_url("vehicle_position_url", &self.vehicle_position_url)?,
            route_delimiter: self.route_delimiter.clone().filter(|d| !d.is_empty()),
            api_key,
            refresh_interval,
            static_gtfs_url: optional_url("static_gtfs_url", &self.static_gtfs_url)?,
            static_fallback: self.enable_static_fallback,
            request_timeout: REQUEST_TIMEOUT,
            static_request_timeout: STATIC_REQUEST_TIMEOUT,
        })
    }

    pub fn departure_queries(&self) -> Result<Vec<DepartureQuery>, ConfigError> {
        if self.departures.is_empty() {
            return Err(ConfigError::NoDepartures);
        }
        self.departures.iter().map(DepartureConfig::to_query).collect()
    }

    /// Validates the whole block at once.
    pub fn validate(&self) -> Result<(FeedSettings, Vec<DepartureQuery>), ConfigError> {
        Ok((self.feed_settings()?, self.departure_queries()?))
    }
}

impl DepartureConfig {
    pub fn to_query(&self) -> Result<DepartureQuery, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidDeparture {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("empty name"));
        }
        if self.stop_id.trim().is_empty() {
            return Err(invalid("empty stopid"));
        }
        if self.route.trim().is_empty() {
            return Err(invalid("empty route"));
        }

        let direction_id = match self.direction_id.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(d) => Some(
                d.parse::<u32>()
                    .map_err(|_| invalid("directionid must be an unsigned integer"))?,
            ),
        };

        let limit = match self.next_bus_limit {
            Some(0) => return Err(invalid("next_bus_limit must be at least 1")),
            Some(n) => n,
            None => DEFAULT_NEXT_BUS_LIMIT,
        };

        let service_type = self.service_type.clone().filter(|s| !s.trim().is_empty());
        if let Some(label) = &service_type
            && ServiceType::parse_label(label).is_none()
        {
            debug!(
                departure = %self.name,
                service_type = %label,
                "Service type is a display label only"
            );
        }

        Ok(DepartureQuery {
            name: self.name.trim().to_string(),
            stop_id: self.stop_id.trim().to_string(),
            route_id: self.route.trim().to_string(),
            direction_id,
            service_type,
            icon: self
                .icon
                .clone()
                .filter(|i| !i.is_empty())
                .unwrap_or_else(|| DEFAULT_ICON.to_string()),
            limit,
        })
    }
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value.trim()).map_err(|e| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
            reason: "scheme must be http or https".to_string(),
        });
    }
    Ok(url)
}

fn optional_url(field: &'static str, value: &Option<String>) -> Result<Option<Url>, ConfigError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => parse_url(field, v).map(Some),
    }
}

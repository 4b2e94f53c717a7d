//! The aggregation engine: owns the cached live snapshot and the static
//! schedule, throttles feed refreshes and answers departure queries.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::config::FeedSettings;
use crate::error::{ConfigError, DecodeError, FetchError};
use crate::fetch::auth::ApiKey;
use crate::fetch::{BasicClient, HttpClient, MAX_FEED_SIZE, fetch_bytes};
use crate::model::{DepartureQuery, DepartureResult, LiveSnapshot, VehiclePosition};
use crate::parser::{DecodedTripUpdates, decode_trip_updates, decode_vehicle_positions};
use crate::resolver::{ResolveOptions, resolve};
use crate::schedule::{self, ScheduleIndex};

#[derive(Debug, thiserror::Error)]
enum RefreshError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Public transport data for one configured departures block.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct TransitData {
    settings: FeedSettings,
    client: Box<dyn HttpClient>,
    static_client: Box<dyn HttpClient>,
    /// Time of the last refresh attempt. Held across the fetch so at most
    /// one refresh is in flight.
    last_attempt: Mutex<Option<Instant>>,
    live: RwLock<Arc<LiveSnapshot>>,
    /// `None` once a build has been attempted and failed or was skipped.
    schedule: OnceCell<Option<Arc<ScheduleIndex>>>,
}

impl TransitData {
    pub fn new(settings: FeedSettings) -> Result<Self, ConfigError> {
        let basic = BasicClient::new(settings.request_timeout).map_err(ConfigError::Client)?;
        let client: Box<dyn HttpClient> = match &settings.api_key {
            Some(key) => Box::new(ApiKey::new(basic, &key.header_name, &key.key)?),
            None => Box::new(basic),
        };
        let static_client =
            BasicClient::new(settings.static_request_timeout).map_err(ConfigError::Client)?;

        Ok(Self::with_clients(settings, client, Box::new(static_client)))
    }

    /// Builds an engine on top of caller-provided HTTP clients. The API key
    /// from `settings` is not applied; wrap `client` in [`ApiKey`] if needed.
    pub fn with_clients(
        settings: FeedSettings,
        client: Box<dyn HttpClient>,
        static_client: Box<dyn HttpClient>,
    ) -> Self {
        Self {
            settings,
            client,
            static_client,
            last_attempt: Mutex::new(None),
            live: RwLock::new(Arc::new(LiveSnapshot::default())),
            schedule: OnceCell::new(),
        }
    }

    /// The current live snapshot. Never observed half-written.
    pub async fn snapshot(&self) -> Arc<LiveSnapshot> {
        self.live.read().await.clone()
    }

    pub fn schedule(&self) -> Option<Arc<ScheduleIndex>> {
        self.schedule.get().cloned().flatten()
    }

    /// Fetches and indexes the static schedule, once. Failures are logged
    /// and leave the engine in live-only mode.
    pub async fn load_static_data(&self) -> Option<Arc<ScheduleIndex>> {
        self.schedule
            .get_or_init(|| async {
                let url = self.settings.static_gtfs_url.as_ref()?;
                match schedule::build(self.static_client.as_ref(), url).await {
                    Ok(index) => {
                        info!(
                            url = %url,
                            trips = index.trip_count(),
                            timezone = %index.timezone(),
                            "Static schedule loaded"
                        );
                        Some(Arc::new(index))
                    }
                    Err(e) => {
                        warn!(
                            url = %url,
                            error = %e,
                            "Static schedule unavailable, continuing live-only"
                        );
                        None
                    }
                }
            })
            .await
            .clone()
    }

    /// Refreshes the live snapshot unless the last attempt is younger than
    /// the refresh interval. Failures keep the previous snapshot.
    #[tracing::instrument(skip_all)]
    pub async fn refresh(&self) {
        let mut last_attempt = self.last_attempt.lock().await;
        if let Some(at) = *last_attempt {
            let elapsed = at.elapsed();
            if elapsed < self.settings.refresh_interval {
                debug!(elapsed_ms = elapsed.as_millis() as u64, "Refresh throttled");
                return;
            }
        }
        *last_attempt = Some(Instant::now());

        let previous = self.snapshot().await;
        match self.fetch_snapshot(&previous).await {
            Ok(snapshot) => {
                info!(
                    trip_updates = snapshot.trip_updates.len(),
                    vehicles = snapshot.vehicles.len(),
                    feed_timestamp = ?snapshot.feed_timestamp,
                    "Live feed refreshed"
                );
                *self.live.write().await = Arc::new(snapshot);
            }
            Err(e) => {
                warn!(
                    url = %self.settings.trip_update_url,
                    timeout = matches!(&e, RefreshError::Fetch(f) if f.is_timeout()),
                    error = %e,
                    "Live feed refresh failed, keeping previous snapshot"
                );
            }
        }
    }

    async fn fetch_snapshot(&self, previous: &LiveSnapshot) -> Result<LiveSnapshot, RefreshError> {
        let trips = async {
            let body = fetch_bytes(
                self.client.as_ref(),
                &self.settings.trip_update_url,
                MAX_FEED_SIZE,
            )
            .await?;
            Ok::<DecodedTripUpdates, RefreshError>(decode_trip_updates(&body)?)
        };
        let vehicles = async {
            let Some(url) = &self.settings.vehicle_position_url else {
                return None;
            };
            let result = async {
                let body = fetch_bytes(self.client.as_ref(), url, MAX_FEED_SIZE).await?;
                Ok::<Vec<VehiclePosition>, RefreshError>(decode_vehicle_positions(&body)?)
            }
            .await;
            Some(result.inspect_err(|e| {
                warn!(
                    url = %url,
                    error = %e,
                    "Vehicle position refresh failed, keeping previous positions"
                );
            }))
        };

        let (trips, vehicles) = tokio::join!(trips, vehicles);
        let trips = trips?;

        let vehicles = match vehicles {
            Some(Ok(positions)) => positions
                .into_iter()
                .map(|v| (v.trip_id.clone(), v))
                .collect(),
            Some(Err(_)) => previous.vehicles.clone(),
            None => Default::default(),
        };

        Ok(LiveSnapshot {
            trip_updates: trips.trip_updates,
            vehicles,
            feed_timestamp: trips.timestamp,
            fetched_at: Some(Utc::now()),
        })
    }

    /// Refreshes (subject to throttling) and resolves `query` against the
    /// current state.
    pub async fn query(&self, query: &DepartureQuery) -> Vec<DepartureResult> {
        self.refresh().await;
        self.resolve_at(query, Utc::now()).await
    }

    /// Resolves `query` against the cached state without refreshing.
    pub async fn resolve_at(
        &self,
        query: &DepartureQuery,
        now: DateTime<Utc>,
    ) -> Vec<DepartureResult> {
        let live = self.snapshot().await;
        let schedule = self.schedule();
        let options = ResolveOptions {
            route_delimiter: self.settings.route_delimiter.as_deref(),
            static_fallback: self.settings.static_fallback,
        };
        let results = resolve(query, &live, schedule.as_deref(), &options, now);
        debug!(departure = %query.name, results = results.len(), "Resolved departures");
        results
    }
}

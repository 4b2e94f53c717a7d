//! Departure resolution: combines the live snapshot with the static
//! schedule into the next departures for one query.
//!
//! Everything here is a pure function of its inputs.

use std::collections::HashSet;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::model::{
    DepartureQuery, DepartureResult, LiveSnapshot, Source, StopRelationship, StopTimeUpdate,
    TripUpdate, VehicleInfo,
};
use crate::schedule::{ScheduleIndex, ServiceType, StaticTrip};

/// Predictions up to this many seconds in the past are still reported so a
/// bus that is just pulling in does not vanish.
pub const GRACE_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions<'a> {
    /// Splits feed route fields that carry several route ids.
    pub route_delimiter: Option<&'a str>,
    pub static_fallback: bool,
}

/// Splits a feed route field into the set of route ids it names.
///
/// Without a delimiter the whole (trimmed) field is the single token.
pub fn route_tokens<'a>(field: &'a str, delimiter: Option<&str>) -> HashSet<&'a str> {
    match delimiter.filter(|d| !d.is_empty()) {
        Some(delim) => field
            .split(delim)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect(),
        None => std::iter::once(field.trim())
            .filter(|t| !t.is_empty())
            .collect(),
    }
}

pub fn resolve(
    query: &DepartureQuery,
    live: &LiveSnapshot,
    schedule: Option<&ScheduleIndex>,
    options: &ResolveOptions<'_>,
    now: DateTime<Utc>,
) -> Vec<DepartureResult> {
    let cutoff = now - Duration::seconds(GRACE_WINDOW_SECS);
    let today = schedule
        .map(|s| now.with_timezone(&s.timezone()).date_naive())
        .unwrap_or_else(|| now.date_naive());

    let mut results = Vec::new();
    // Trips the live feed already speaks for at this stop.
    let mut blocked: HashSet<&str> = HashSet::new();

    for tu in &live.trip_updates {
        let static_trip = schedule.and_then(|s| s.trip(&tu.trip_id));
        if !trip_matches(query, tu, static_trip, options.route_delimiter) {
            continue;
        }
        if tu.canceled {
            blocked.insert(&tu.trip_id);
            continue;
        }

        let vehicle = live.vehicles.get(&tu.trip_id);
        let static_seq = schedule
            .and_then(|s| s.stop_time(&tu.trip_id, &query.stop_id, None))
            .map(|st| st.stop_sequence);

        for stu in tu
            .stop_time_updates
            .iter()
            .filter(|stu| stop_matches(stu, &query.stop_id, static_seq))
        {
            match stu.relationship {
                StopRelationship::Skipped | StopRelationship::Canceled => {
                    blocked.insert(&tu.trip_id);
                    continue;
                }
                StopRelationship::NoData => continue,
                StopRelationship::OnTime => {}
            }
            blocked.insert(&tu.trip_id);

            let stop_seq = stu.stop_sequence.or(static_seq);
            if let (Some(current), Some(seq)) =
                (vehicle.and_then(|v| v.current_stop_sequence), stop_seq)
            {
                if current > seq {
                    // already passed this stop
                    continue;
                }
            }

            let service_date = tu.start_date.unwrap_or(today);
            let Some(time) = predicted_time(stu, tu, &query.stop_id, schedule, service_date)
            else {
                continue;
            };
            if time <= cutoff {
                continue;
            }

            results.push(DepartureResult {
                time,
                source: Source::Live,
                trip_id: tu.trip_id.clone(),
                route_id: query.route_id.clone(),
                stop_id: query.stop_id.clone(),
                direction_id: tu.direction_id.or(static_trip.and_then(|t| t.direction_id)),
                headsign: static_trip.and_then(|t| t.headsign.clone()),
                delay: stu.delay,
                vehicle: vehicle.and_then(|v| {
                    Some(VehicleInfo {
                        latitude: v.latitude?,
                        longitude: v.longitude?,
                        timestamp: v.timestamp,
                    })
                }),
            });
        }
    }

    if options.static_fallback && results.len() < query.limit {
        if let Some(schedule) = schedule {
            let service_type = query
                .service_type
                .as_deref()
                .and_then(ServiceType::parse_label);
            let dates = [today.pred_opt(), Some(today), today.succ_opt()];
            for date in dates.into_iter().flatten() {
                for trip in schedule.trips_serving(
                    &query.stop_id,
                    &query.route_id,
                    query.direction_id,
                    service_type,
                    date,
                ) {
                    if blocked.contains(trip.trip_id.as_str()) {
                        continue;
                    }
                    let Some(time) =
                        schedule.scheduled_time(&trip.trip_id, &query.stop_id, None, date)
                    else {
                        continue;
                    };
                    if time <= now {
                        continue;
                    }
                    results.push(static_result(query, trip, time));
                }
            }
        }
    }

    results.sort_by(|a, b| a.time.cmp(&b.time).then(a.source.cmp(&b.source)));
    results.truncate(query.limit);
    results
}

fn trip_matches(
    query: &DepartureQuery,
    tu: &TripUpdate,
    static_trip: Option<&StaticTrip>,
    delimiter: Option<&str>,
) -> bool {
    let route_field = tu
        .route_id
        .as_deref()
        .or(static_trip.map(|t| t.route_id.as_str()));
    let Some(route_field) = route_field else {
        return false;
    };
    if !route_tokens(route_field, delimiter).contains(query.route_id.as_str()) {
        return false;
    }

    match query.direction_id {
        Some(wanted) => {
            let direction = tu
                .direction_id
                .or(static_trip.and_then(|t| t.direction_id));
            direction == Some(wanted)
        }
        None => true,
    }
}

fn stop_matches(stu: &StopTimeUpdate, stop_id: &str, static_seq: Option<u32>) -> bool {
    match (&stu.stop_id, stu.stop_sequence) {
        (Some(id), _) => id == stop_id,
        (None, Some(seq)) => static_seq == Some(seq),
        (None, None) => false,
    }
}

/// Absolute prediction, or scheduled time plus delay when the feed only
/// reports a delay.
fn predicted_time(
    stu: &StopTimeUpdate,
    tu: &TripUpdate,
    stop_id: &str,
    schedule: Option<&ScheduleIndex>,
    service_date: NaiveDate,
) -> Option<DateTime<Utc>> {
    if let Some(time) = stu.predicted {
        return Some(time);
    }
    let delay = stu.delay?;
    let scheduled =
        schedule?.scheduled_time(&tu.trip_id, stop_id, stu.stop_sequence, service_date)?;
    Some(scheduled + Duration::seconds(i64::from(delay)))
}

fn static_result(
    query: &DepartureQuery,
    trip: &StaticTrip,
    time: DateTime<Utc>,
) -> DepartureResult {
    DepartureResult {
        time,
        source: Source::Static,
        trip_id: trip.trip_id.clone(),
        route_id: trip.route_id.clone(),
        stop_id: query.stop_id.clone(),
        direction_id: trip.direction_id,
        headsign: trip.headsign.clone(),
        delay: None,
        vehicle: None,
    }
}

//! Static GTFS schedule index.
//!
//! Built once from the static archive and read-only afterwards. Answers
//! "which trips of route R stop at S on date D" and "when is trip T
//! scheduled at S".

mod calendar;
mod load;
mod route_type;

pub use calendar::ServiceCalendar;
pub use load::{MAX_ARCHIVE_SIZE, build};
pub use route_type::ServiceType;

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

#[derive(Debug, Clone, PartialEq)]
pub struct StaticRoute {
    pub route_id: String,
    pub route_type: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaticTrip {
    pub trip_id: String,
    pub route_id: String,
    pub service_id: String,
    pub direction_id: Option<u32>,
    pub headsign: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaticStopTime {
    pub trip_id: String,
    pub stop_id: String,
    pub stop_sequence: u32,
    /// Seconds after midnight of the service date; may exceed 24h.
    pub arrival: Option<u32>,
    pub departure: Option<u32>,
}

impl StaticStopTime {
    /// Arrival, falling back to departure.
    pub fn time_of_day(&self) -> Option<u32> {
        self.arrival.or(self.departure)
    }
}

pub struct ScheduleIndex {
    timezone: Tz,
    routes: HashMap<String, StaticRoute>,
    trips: HashMap<String, StaticTrip>,
    /// trip_id -> stop_times ordered by stop_sequence
    stop_times: HashMap<String, Vec<StaticStopTime>>,
    calendars: HashMap<String, ServiceCalendar>,
    /// stop_id -> route_id -> trip_ids ordered by time of day at that stop
    trips_by_stop_route: HashMap<String, HashMap<String, Vec<String>>>,
}

impl ScheduleIndex {
    pub fn new(
        timezone: Tz,
        routes: Vec<StaticRoute>,
        trips: Vec<StaticTrip>,
        stop_times: Vec<StaticStopTime>,
        calendars: Vec<ServiceCalendar>,
    ) -> Self {
        let routes: HashMap<_, _> = routes.into_iter().map(|r| (r.route_id.clone(), r)).collect();
        let trips: HashMap<_, _> = trips.into_iter().map(|t| (t.trip_id.clone(), t)).collect();
        let calendars = calendars
            .into_iter()
            .map(|c| (c.service_id.clone(), c))
            .collect();

        let mut by_trip: HashMap<String, Vec<StaticStopTime>> = HashMap::new();
        for st in stop_times {
            by_trip.entry(st.trip_id.clone()).or_default().push(st);
        }
        for sts in by_trip.values_mut() {
            sts.sort_by_key(|st| st.stop_sequence);
        }

        let mut keyed: HashMap<String, HashMap<String, Vec<(u32, String)>>> = HashMap::new();
        for (trip_id, sts) in &by_trip {
            let Some(trip) = trips.get(trip_id) else {
                continue;
            };
            for st in sts {
                keyed
                    .entry(st.stop_id.clone())
                    .or_default()
                    .entry(trip.route_id.clone())
                    .or_default()
                    .push((st.time_of_day().unwrap_or(u32::MAX), trip_id.clone()));
            }
        }
        let trips_by_stop_route = keyed
            .into_iter()
            .map(|(stop_id, per_route)| {
                let per_route = per_route
                    .into_iter()
                    .map(|(route_id, mut entries)| {
                        entries.sort();
                        let mut seen = HashSet::new();
                        entries.retain(|(_, trip)| seen.insert(trip.clone()));
                        (route_id, entries.into_iter().map(|(_, trip)| trip).collect())
                    })
                    .collect();
                (stop_id, per_route)
            })
            .collect();

        Self {
            timezone,
            routes,
            trips,
            stop_times: by_trip,
            calendars,
            trips_by_stop_route,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn trip(&self, trip_id: &str) -> Option<&StaticTrip> {
        self.trips.get(trip_id)
    }

    pub fn route(&self, route_id: &str) -> Option<&StaticRoute> {
        self.routes.get(route_id)
    }

    pub fn trip_count(&self) -> usize {
        self.trips.len()
    }

    pub fn is_service_active(&self, service_id: &str, date: NaiveDate) -> bool {
        self.calendars
            .get(service_id)
            .is_some_and(|cal| cal.is_active(date))
    }

    /// Trips of `route_id` stopping at `stop_id` that run on `date`, in
    /// order of their time of day at that stop.
    pub fn trips_serving(
        &self,
        stop_id: &str,
        route_id: &str,
        direction_id: Option<u32>,
        service_type: Option<ServiceType>,
        date: NaiveDate,
    ) -> Vec<&StaticTrip> {
        let Some(trip_ids) = self
            .trips_by_stop_route
            .get(stop_id)
            .and_then(|per_route| per_route.get(route_id))
        else {
            return Vec::new();
        };

        if let Some(wanted) = service_type {
            let route_mode = self
                .routes
                .get(route_id)
                .and_then(|r| r.route_type)
                .and_then(ServiceType::from_route_type);
            if route_mode != Some(wanted) {
                return Vec::new();
            }
        }

        trip_ids
            .iter()
            .filter_map(|id| self.trips.get(id))
            .filter(|trip| direction_id.is_none() || trip.direction_id == direction_id)
            .filter(|trip| self.is_service_active(&trip.service_id, date))
            .collect()
    }

    /// The stop time of `trip_id` at `stop_id`. When the trip visits the
    /// stop more than once, `stop_sequence` picks the visit.
    pub fn stop_time(
        &self,
        trip_id: &str,
        stop_id: &str,
        stop_sequence: Option<u32>,
    ) -> Option<&StaticStopTime> {
        let sts = self.stop_times.get(trip_id)?;
        stop_sequence
            .and_then(|seq| {
                sts.iter()
                    .find(|st| st.stop_id == stop_id && st.stop_sequence == seq)
            })
            .or_else(|| sts.iter().find(|st| st.stop_id == stop_id))
    }

    /// Absolute scheduled time of `trip_id` at `stop_id` on `service_date`.
    pub fn scheduled_time(
        &self,
        trip_id: &str,
        stop_id: &str,
        stop_sequence: Option<u32>,
        service_date: NaiveDate,
    ) -> Option<DateTime<Utc>> {
        let secs = self.stop_time(trip_id, stop_id, stop_sequence)?.time_of_day()?;
        service_time_to_utc(secs, service_date, self.timezone)
    }
}

/// Converts a GTFS time of day into an absolute instant.
///
/// GTFS measures stop times from "noon minus 12h" of the service date, which
/// differs from midnight on daylight-saving transition days.
pub fn service_time_to_utc(secs: u32, service_date: NaiveDate, tz: Tz) -> Option<DateTime<Utc>> {
    let noon = service_date.and_hms_opt(12, 0, 0)?;
    let local_noon = tz.from_local_datetime(&noon).earliest()?;
    let reference = local_noon - Duration::hours(12);
    Some((reference + Duration::seconds(i64::from(secs))).with_timezone(&Utc))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub(crate) fn stop_time(trip: &str, stop: &str, seq: u32, secs: u32) -> StaticStopTime {
        StaticStopTime {
            trip_id: trip.to_string(),
            stop_id: stop.to_string(),
            stop_sequence: seq,
            arrival: Some(secs),
            departure: Some(secs),
        }
    }

    pub(crate) fn trip(id: &str, route: &str, service: &str, dir: Option<u32>) -> StaticTrip {
        StaticTrip {
            trip_id: id.to_string(),
            route_id: route.to_string(),
            service_id: service.to_string(),
            direction_id: dir,
            headsign: Some(format!("To {id}")),
        }
    }

    /// Route 42 (bus) and route 7 (tram) in UTC; service "ALL" runs every
    /// day of 2026, "WE" only on weekends.
    pub(crate) fn sample_index() -> ScheduleIndex {
        let routes = vec![
            StaticRoute {
                route_id: "42".to_string(),
                route_type: Some(3),
            },
            StaticRoute {
                route_id: "7".to_string(),
                route_type: Some(0),
            },
        ];
        let trips = vec![
            trip("T1", "42", "ALL", Some(0)),
            trip("T2", "42", "ALL", Some(1)),
            trip("T3", "42", "WE", Some(0)),
            trip("T4", "7", "ALL", Some(0)),
            trip("T5", "42", "ALL", Some(0)),
        ];
        let stop_times = vec![
            stop_time("T1", "S0", 1, 8 * 3600),
            stop_time("T1", "S1", 2, 8 * 3600 + 600),
            stop_time("T2", "S1", 1, 9 * 3600),
            stop_time("T3", "S1", 1, 10 * 3600),
            stop_time("T4", "S1", 1, 7 * 3600),
            stop_time("T5", "S1", 1, 6 * 3600),
        ];
        let all_year = [true; 7];
        let weekends = [false, false, false, false, false, true, true];
        let calendars = vec![
            ServiceCalendar::weekly("ALL", all_year, date(2026, 1, 1), date(2026, 12, 31)),
            ServiceCalendar::weekly("WE", weekends, date(2026, 1, 1), date(2026, 12, 31)),
        ];
        ScheduleIndex::new(Tz::UTC, routes, trips, stop_times, calendars)
    }

    fn ids(trips: Vec<&StaticTrip>) -> Vec<&str> {
        trips.into_iter().map(|t| t.trip_id.as_str()).collect()
    }

    #[test]
    fn test_trips_serving_ordered_by_time_at_stop() {
        let index = sample_index();
        let monday = date(2026, 10, 19);
        let trips = index.trips_serving("S1", "42", None, None, monday);
        assert_eq!(ids(trips), vec!["T5", "T1", "T2"]);
    }

    #[test]
    fn test_trips_serving_filters_direction() {
        let index = sample_index();
        let monday = date(2026, 10, 19);
        let trips = index.trips_serving("S1", "42", Some(1), None, monday);
        assert_eq!(ids(trips), vec!["T2"]);
    }

    #[test]
    fn test_trips_serving_filters_calendar() {
        let index = sample_index();
        let saturday = date(2026, 10, 24);
        let trips = index.trips_serving("S1", "42", Some(0), None, saturday);
        assert_eq!(ids(trips), vec!["T5", "T1", "T3"]);

        let next_year = date(2027, 1, 4);
        assert!(index.trips_serving("S1", "42", None, None, next_year).is_empty());
    }

    #[test]
    fn test_trips_serving_filters_service_type() {
        let index = sample_index();
        let monday = date(2026, 10, 19);
        assert!(
            index
                .trips_serving("S1", "42", None, Some(ServiceType::Tram), monday)
                .is_empty()
        );
        let trams = index.trips_serving("S1", "7", None, Some(ServiceType::Tram), monday);
        assert_eq!(ids(trams), vec!["T4"]);
    }

    #[test]
    fn test_trips_serving_unknown_stop() {
        let index = sample_index();
        assert!(
            index
                .trips_serving("nowhere", "42", None, None, date(2026, 10, 19))
                .is_empty()
        );
    }

    #[test]
    fn test_scheduled_time() {
        let index = sample_index();
        let at = index.scheduled_time("T1", "S1", None, date(2026, 10, 19));
        assert_eq!(
            at,
            Some(Utc.with_ymd_and_hms(2026, 10, 19, 8, 10, 0).unwrap())
        );
        assert_eq!(index.scheduled_time("T1", "S9", None, date(2026, 10, 19)), None);
    }

    #[test]
    fn test_service_time_past_midnight() {
        let at = service_time_to_utc(25 * 3600 + 30 * 60, date(2026, 10, 19), Tz::UTC);
        assert_eq!(at, Some(Utc.with_ymd_and_hms(2026, 10, 20, 1, 30, 0).unwrap()));
    }

    #[test]
    fn test_service_time_in_zone() {
        // 08:00 in New York during EDT is 12:00 UTC
        let at = service_time_to_utc(8 * 3600, date(2026, 7, 1), chrono_tz::America::New_York);
        assert_eq!(at, Some(Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap()));
    }
}

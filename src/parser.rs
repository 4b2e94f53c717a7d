//! Protobuf decoder for GTFS Realtime feeds.
//!
//! Turns a raw feed body into [`TripUpdate`] / [`VehiclePosition`] records.
//! No I/O happens here; alert entities and unknown extensions are skipped.

use chrono::{DateTime, NaiveDate, Utc};
use prost::Message;

use crate::error::DecodeError;
use crate::gtfs_rt::{self, FeedMessage};
use crate::gtfs_rt::feed_header::Incrementality;
use crate::gtfs_rt::trip_descriptor::ScheduleRelationship as TripRelationship;
use crate::gtfs_rt::trip_update::stop_time_update::ScheduleRelationship as StuRelationship;
use crate::model::{StopRelationship, StopTimeUpdate, TripUpdate, VehiclePosition};

/// Trip updates decoded from one feed message.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTripUpdates {
    pub timestamp: Option<DateTime<Utc>>,
    pub trip_updates: Vec<TripUpdate>,
}

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] and validates its
/// envelope.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a `FeedMessage`,
/// if the declared `gtfs_realtime_version` is not a 1.x or 2.x version, or if
/// the feed is `DIFFERENTIAL`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage, DecodeError> {
    let feed = FeedMessage::decode(bytes)?;

    let version = feed.header.gtfs_realtime_version.trim();
    let major = version.split('.').next().unwrap_or_default();
    if major != "1" && major != "2" {
        return Err(DecodeError::UnsupportedVersion(version.to_string()));
    }

    if feed.header.incrementality() == Incrementality::Differential {
        return Err(DecodeError::Differential);
    }

    Ok(feed)
}

pub fn decode_trip_updates(bytes: &[u8]) -> Result<DecodedTripUpdates, DecodeError> {
    let feed = parse_feed(bytes)?;
    Ok(DecodedTripUpdates {
        timestamp: feed.header.timestamp.and_then(epoch_to_utc),
        trip_updates: trip_updates_from_feed(&feed),
    })
}

pub fn decode_vehicle_positions(bytes: &[u8]) -> Result<Vec<VehiclePosition>, DecodeError> {
    let feed = parse_feed(bytes)?;
    Ok(vehicle_positions_from_feed(&feed))
}

pub fn trip_updates_from_feed(feed: &FeedMessage) -> Vec<TripUpdate> {
    feed.entity
        .iter()
        .filter(|e| !e.is_deleted())
        .filter_map(|e| e.trip_update.as_ref().map(|tu| convert_trip_update(&e.id, tu)))
        .collect()
}

pub fn vehicle_positions_from_feed(feed: &FeedMessage) -> Vec<VehiclePosition> {
    feed.entity
        .iter()
        .filter(|e| !e.is_deleted())
        .filter_map(|e| e.vehicle.as_ref())
        .filter_map(convert_vehicle)
        .collect()
}

fn convert_trip_update(entity_id: &str, tu: &gtfs_rt::TripUpdate) -> TripUpdate {
    let trip = &tu.trip;
    let canceled = matches!(
        trip.schedule_relationship(),
        TripRelationship::Canceled | TripRelationship::Deleted
    );

    let stop_time_updates = tu
        .stop_time_update
        .iter()
        .map(|stu| {
            let relationship = if canceled {
                StopRelationship::Canceled
            } else {
                match stu.schedule_relationship() {
                    StuRelationship::Skipped => StopRelationship::Skipped,
                    StuRelationship::NoData => StopRelationship::NoData,
                    StuRelationship::Scheduled | StuRelationship::Unscheduled => {
                        StopRelationship::OnTime
                    }
                }
            };

            let event_time = |ev: &Option<gtfs_rt::trip_update::StopTimeEvent>| {
                ev.as_ref()
                    .and_then(|ev| ev.time)
                    .filter(|t| *t > 0)
                    .and_then(|t| DateTime::from_timestamp(t, 0))
            };
            let event_delay = |ev: &Option<gtfs_rt::trip_update::StopTimeEvent>| {
                ev.as_ref().and_then(|ev| ev.delay)
            };

            StopTimeUpdate {
                stop_id: stu.stop_id.clone().filter(|s| !s.is_empty()),
                stop_sequence: stu.stop_sequence,
                predicted: event_time(&stu.arrival).or_else(|| event_time(&stu.departure)),
                delay: event_delay(&stu.arrival).or_else(|| event_delay(&stu.departure)),
                relationship,
            }
        })
        .collect();

    TripUpdate {
        trip_id: trip
            .trip_id
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| entity_id.to_string()),
        route_id: trip.route_id.clone().filter(|s| !s.is_empty()),
        direction_id: trip.direction_id,
        start_date: trip.start_date.as_deref().and_then(parse_service_date),
        canceled,
        stop_time_updates,
    }
}

fn convert_vehicle(v: &gtfs_rt::VehiclePosition) -> Option<VehiclePosition> {
    let trip_id = v.trip.as_ref()?.trip_id.clone().filter(|s| !s.is_empty())?;
    Some(VehiclePosition {
        trip_id,
        current_stop_sequence: v.current_stop_sequence,
        stop_id: v.stop_id.clone(),
        latitude: v.position.as_ref().map(|p| p.latitude),
        longitude: v.position.as_ref().map(|p| p.longitude),
        timestamp: v.timestamp.and_then(epoch_to_utc),
    })
}

fn epoch_to_utc(secs: u64) -> Option<DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
}

/// Parse a GTFS `YYYYMMDD` date.
pub fn parse_service_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y%m%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs_rt::trip_update::{StopTimeEvent, StopTimeUpdate as RtStopTimeUpdate};
    use crate::gtfs_rt::{FeedEntity, FeedHeader, TripDescriptor};

    fn create_header(version: &str) -> FeedHeader {
        FeedHeader {
            gtfs_realtime_version: version.to_string(),
            timestamp: Some(1_700_000_000),
            incrementality: None,
            feed_version: None,
        }
    }

    fn trip_entity(id: &str, relationship: Option<TripRelationship>) -> FeedEntity {
        FeedEntity {
            id: id.to_string(),
            trip_update: Some(gtfs_rt::TripUpdate {
                trip: TripDescriptor {
                    trip_id: Some(format!("trip-{id}")),
                    route_id: Some("42".to_string()),
                    direction_id: Some(1),
                    start_date: Some("20261019".to_string()),
                    schedule_relationship: relationship.map(|r| r as i32),
                    ..Default::default()
                },
                stop_time_update: vec![
                    RtStopTimeUpdate {
                        stop_sequence: Some(3),
                        stop_id: Some("S1".to_string()),
                        arrival: Some(StopTimeEvent {
                            time: Some(1_700_000_300),
                            delay: Some(45),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    RtStopTimeUpdate {
                        stop_sequence: Some(4),
                        stop_id: Some("S2".to_string()),
                        departure: Some(StopTimeEvent {
                            time: Some(1_700_000_600),
                            ..Default::default()
                        }),
                        schedule_relationship: Some(StuRelationship::Skipped as i32),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_empty_bytes_is_unsupported_version() {
        // An empty buffer decodes to a default FeedMessage whose version is "".
        let result = parse_feed(&[]);
        assert!(matches!(result, Err(DecodeError::UnsupportedVersion(v)) if v.is_empty()));
    }

    #[test]
    fn test_parse_invalid_bytes() {
        let invalid_bytes = vec![0xFF, 0xFE, 0x00, 0x01];
        let result = parse_feed(&invalid_bytes);
        assert!(matches!(result, Err(DecodeError::Protobuf(_))));
    }

    #[test]
    fn test_parse_truncated_feed() {
        let feed = FeedMessage {
            header: create_header("2.0"),
            entity: vec![trip_entity("a", None)],
        };
        let encoded = feed.encode_to_vec();
        let result = parse_feed(&encoded[..encoded.len() - 5]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_version() {
        let feed = FeedMessage {
            header: create_header("3.0"),
            entity: vec![],
        };
        let result = parse_feed(&feed.encode_to_vec());
        assert!(matches!(result, Err(DecodeError::UnsupportedVersion(v)) if v == "3.0"));
    }

    #[test]
    fn test_parse_rejects_differential() {
        let mut header = create_header("2.0");
        header.incrementality = Some(Incrementality::Differential as i32);
        let feed = FeedMessage {
            header,
            entity: vec![],
        };
        let result = parse_feed(&feed.encode_to_vec());
        assert!(matches!(result, Err(DecodeError::Differential)));
    }

    #[test]
    fn test_decode_trip_updates() {
        let feed = FeedMessage {
            header: create_header("1.0"),
            entity: vec![trip_entity("a", None)],
        };
        let decoded = decode_trip_updates(&feed.encode_to_vec()).unwrap();

        assert_eq!(
            decoded.timestamp,
            DateTime::from_timestamp(1_700_000_000, 0)
        );
        assert_eq!(decoded.trip_updates.len(), 1);

        let tu = &decoded.trip_updates[0];
        assert_eq!(tu.trip_id, "trip-a");
        assert_eq!(tu.route_id.as_deref(), Some("42"));
        assert_eq!(tu.direction_id, Some(1));
        assert_eq!(tu.start_date, NaiveDate::from_ymd_opt(2026, 10, 19));
        assert!(!tu.canceled);

        let first = &tu.stop_time_updates[0];
        assert_eq!(first.stop_id.as_deref(), Some("S1"));
        assert_eq!(first.predicted, DateTime::from_timestamp(1_700_000_300, 0));
        assert_eq!(first.delay, Some(45));
        assert_eq!(first.relationship, StopRelationship::OnTime);

        let second = &tu.stop_time_updates[1];
        assert_eq!(second.predicted, DateTime::from_timestamp(1_700_000_600, 0));
        assert_eq!(second.relationship, StopRelationship::Skipped);
    }

    #[test]
    fn test_canceled_trip_marks_every_stop() {
        let feed = FeedMessage {
            header: create_header("2.0"),
            entity: vec![trip_entity("c", Some(TripRelationship::Canceled))],
        };
        let decoded = decode_trip_updates(&feed.encode_to_vec()).unwrap();
        let tu = &decoded.trip_updates[0];

        assert!(tu.canceled);
        assert!(
            tu.stop_time_updates
                .iter()
                .all(|stu| stu.relationship == StopRelationship::Canceled)
        );
    }

    #[test]
    fn test_alerts_and_deleted_entities_are_ignored() {
        let mut deleted = trip_entity("d", None);
        deleted.is_deleted = Some(true);
        let alert = FeedEntity {
            id: "alert".to_string(),
            alert: Some(gtfs_rt::Alert::default()),
            ..Default::default()
        };
        let feed = FeedMessage {
            header: create_header("2.0"),
            entity: vec![alert, deleted, trip_entity("k", None)],
        };

        let updates = trip_updates_from_feed(&feed);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].trip_id, "trip-k");
    }

    #[test]
    fn test_trip_without_id_uses_entity_id() {
        let mut entity = trip_entity("e1", None);
        if let Some(tu) = entity.trip_update.as_mut() {
            tu.trip.trip_id = None;
        }
        let feed = FeedMessage {
            header: create_header("2.0"),
            entity: vec![entity],
        };

        assert_eq!(trip_updates_from_feed(&feed)[0].trip_id, "e1");
    }

    #[test]
    fn test_decode_vehicle_positions() {
        let feed = FeedMessage {
            header: create_header("2.0"),
            entity: vec![
                FeedEntity {
                    id: "v1".to_string(),
                    vehicle: Some(gtfs_rt::VehiclePosition {
                        trip: Some(TripDescriptor {
                            trip_id: Some("trip-a".to_string()),
                            ..Default::default()
                        }),
                        position: Some(gtfs_rt::Position {
                            latitude: 42.0,
                            longitude: -71.0,
                            bearing: Some(180.0),
                            speed: None,
                            odometer: None,
                        }),
                        current_stop_sequence: Some(2),
                        timestamp: Some(1_700_000_100),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                // no trip descriptor, cannot be matched to a trip
                FeedEntity {
                    id: "v2".to_string(),
                    vehicle: Some(gtfs_rt::VehiclePosition::default()),
                    ..Default::default()
                },
            ],
        };

        let vehicles = decode_vehicle_positions(&feed.encode_to_vec()).unwrap();
        assert_eq!(vehicles.len(), 1);
        assert_eq!(vehicles[0].trip_id, "trip-a");
        assert_eq!(vehicles[0].current_stop_sequence, Some(2));
        assert_eq!(vehicles[0].latitude, Some(42.0));
        assert_eq!(vehicles[0].longitude, Some(-71.0));
        assert_eq!(
            vehicles[0].timestamp,
            DateTime::from_timestamp(1_700_000_100, 0)
        );
    }
}

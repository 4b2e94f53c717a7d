use std::collections::HashMap;
use std::io::{Cursor, Read, Seek};

use chrono_tz::Tz;
use reqwest::Url;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use super::{ScheduleIndex, ServiceCalendar, StaticRoute, StaticStopTime, StaticTrip};
use crate::error::StaticBuildError;
use crate::fetch::{HttpClient, fetch_bytes};
use crate::parser::parse_service_date;

/// Maximum accepted download size of the static archive (200 MB).
pub const MAX_ARCHIVE_SIZE: u64 = 200 * 1024 * 1024;
/// Maximum total decompressed size of the static archive (2 GB).
pub const MAX_DECOMPRESSED_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Downloads the static archive at `url` and indexes it.
#[tracing::instrument(skip_all, fields(url = %url))]
pub async fn build<C: HttpClient + ?Sized>(
    client: &C,
    url: &Url,
) -> Result<ScheduleIndex, StaticBuildError> {
    let body = fetch_bytes(client, url, MAX_ARCHIVE_SIZE).await?;
    info!(size_kb = body.len() / 1024, "Downloaded static schedule archive");

    // zip inflation and CSV parsing are CPU bound
    let index = tokio::task::spawn_blocking(move || ScheduleIndex::from_archive(&body)).await??;
    info!(trips = index.trip_count(), timezone = %index.timezone(), "Static schedule indexed");
    Ok(index)
}

impl ScheduleIndex {
    /// Indexes an in-memory GTFS zip archive.
    pub fn from_archive(bytes: &[u8]) -> Result<Self, StaticBuildError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;

        let mut total_uncompressed: u64 = 0;
        for i in 0..archive.len() {
            total_uncompressed += archive.by_index(i)?.size();
        }
        if total_uncompressed > MAX_DECOMPRESSED_SIZE {
            return Err(StaticBuildError::TooLarge {
                size: total_uncompressed,
                max: MAX_DECOMPRESSED_SIZE,
            });
        }

        let timezone = parse_timezone(&mut archive);

        let routes = parse_routes(&mut archive)?;
        info!(count = routes.len(), "Parsed routes.txt");

        let trips = parse_trips(&mut archive)?;
        info!(count = trips.len(), "Parsed trips.txt");

        let stop_times = parse_stop_times(&mut archive)?;
        info!(count = stop_times.len(), "Parsed stop_times.txt");

        let calendars = parse_calendars(&mut archive);
        info!(services = calendars.len(), "Parsed service calendars");

        Ok(ScheduleIndex::new(
            timezone, routes, trips, stop_times, calendars,
        ))
    }
}

// --- CSV helpers ---

/// Finds `name` in the archive, also accepting archives that nest the
/// tables in a single top-level folder.
fn find_table<R: Read + Seek>(archive: &ZipArchive<R>, name: &str) -> Option<String> {
    let suffix = format!("/{name}");
    archive
        .file_names()
        .find(|f| *f == name || f.ends_with(&suffix))
        .map(str::to_string)
}

/// Reads a whole table out of the archive; `None` when it is absent.
fn read_table<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &'static str,
) -> Result<Option<Vec<u8>>, StaticBuildError> {
    let Some(path) = find_table(archive, name) else {
        return Ok(None);
    };
    let mut file = archive.by_name(&path)?;
    let mut buf = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut buf)
        .map_err(|e| StaticBuildError::Csv {
            table: name,
            source: e.into(),
        })?;
    Ok(Some(buf))
}

fn csv_reader(bytes: &[u8]) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes)
}

struct Columns(Vec<String>);

impl Columns {
    fn read<R: Read>(
        rdr: &mut csv::Reader<R>,
        table: &'static str,
    ) -> Result<Self, StaticBuildError> {
        let headers = rdr
            .headers()
            .map_err(|source| StaticBuildError::Csv { table, source })?;
        Ok(Self(
            headers
                .iter()
                .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
                .collect(),
        ))
    }

    fn optional(&self, column: &str) -> Option<usize> {
        self.0.iter().position(|h| h == column)
    }

    fn required(
        &self,
        table: &'static str,
        column: &'static str,
    ) -> Result<usize, StaticBuildError> {
        self.optional(column)
            .ok_or(StaticBuildError::MissingColumn { table, column })
    }
}

fn field(record: &csv::StringRecord, idx: Option<usize>) -> Option<&str> {
    idx.and_then(|i| record.get(i)).filter(|s| !s.is_empty())
}

/// Parse GTFS time string "HH:MM:SS" to seconds since midnight.
/// Hours may exceed 23 for trips running past midnight.
pub fn parse_gtfs_time(time_str: &str) -> Option<u32> {
    let mut parts = time_str.trim().split(':');
    let hours: u32 = parts.next()?.parse().ok()?;
    let minutes: u32 = parts.next()?.parse().ok()?;
    let seconds: u32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes > 59 || seconds > 59 {
        return None;
    }
    hours.checked_mul(3600)?.checked_add(minutes * 60 + seconds)
}

// --- Tables ---

fn parse_timezone<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Tz {
    let zone = (|| -> Result<Option<String>, StaticBuildError> {
        let Some(bytes) = read_table(archive, "agency.txt")? else {
            return Ok(None);
        };
        let mut rdr = csv_reader(&bytes);
        let cols = Columns::read(&mut rdr, "agency.txt")?;
        let idx = cols.optional("agency_timezone");
        let first = rdr
            .records()
            .next()
            .transpose()
            .map_err(|source| StaticBuildError::Csv {
                table: "agency.txt",
                source,
            })?;
        Ok(first.and_then(|r| field(&r, idx).map(str::to_string)))
    })();

    match zone {
        Ok(Some(name)) => match name.parse::<Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                warn!(timezone = %name, "Unknown agency_timezone, using UTC");
                Tz::UTC
            }
        },
        Ok(None) => {
            warn!("No agency_timezone in static schedule, using UTC");
            Tz::UTC
        }
        Err(e) => {
            warn!(error = %e, "Unreadable agency.txt, using UTC");
            Tz::UTC
        }
    }
}

fn parse_routes<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<Vec<StaticRoute>, StaticBuildError> {
    const TABLE: &str = "routes.txt";
    let bytes = read_table(archive, TABLE)?.ok_or(StaticBuildError::MissingTable(TABLE))?;
    let mut rdr = csv_reader(&bytes);
    let cols = Columns::read(&mut rdr, TABLE)?;

    let idx_id = cols.required(TABLE, "route_id")?;
    let idx_type = cols.optional("route_type");

    let mut routes = Vec::new();
    let mut skipped = 0usize;
    for result in rdr.records() {
        let record = result.map_err(|source| StaticBuildError::Csv { table: TABLE, source })?;
        let Some(route_id) = field(&record, Some(idx_id)) else {
            skipped += 1;
            continue;
        };
        routes.push(StaticRoute {
            route_id: route_id.to_string(),
            route_type: field(&record, idx_type).and_then(|s| s.parse().ok()),
        });
    }
    if skipped > 0 {
        warn!(skipped, "Skipped routes.txt records with empty route_id");
    }
    Ok(routes)
}

fn parse_trips<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<Vec<StaticTrip>, StaticBuildError> {
    const TABLE: &str = "trips.txt";
    let bytes = read_table(archive, TABLE)?.ok_or(StaticBuildError::MissingTable(TABLE))?;
    let mut rdr = csv_reader(&bytes);
    let cols = Columns::read(&mut rdr, TABLE)?;

    let idx_trip = cols.required(TABLE, "trip_id")?;
    let idx_route = cols.required(TABLE, "route_id")?;
    let idx_service = cols.required(TABLE, "service_id")?;
    let idx_headsign = cols.optional("trip_headsign");
    let idx_dir = cols.optional("direction_id");

    let mut trips = Vec::new();
    let mut skipped = 0usize;
    for result in rdr.records() {
        let record = result.map_err(|source| StaticBuildError::Csv { table: TABLE, source })?;
        let (Some(trip_id), Some(route_id), Some(service_id)) = (
            field(&record, Some(idx_trip)),
            field(&record, Some(idx_route)),
            field(&record, Some(idx_service)),
        ) else {
            skipped += 1;
            continue;
        };
        trips.push(StaticTrip {
            trip_id: trip_id.to_string(),
            route_id: route_id.to_string(),
            service_id: service_id.to_string(),
            direction_id: field(&record, idx_dir).and_then(|s| s.parse().ok()),
            headsign: field(&record, idx_headsign).map(str::to_string),
        });
    }
    if skipped > 0 {
        warn!(skipped, "Skipped trips.txt records missing trip, route or service id");
    }
    Ok(trips)
}

fn parse_stop_times<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<Vec<StaticStopTime>, StaticBuildError> {
    const TABLE: &str = "stop_times.txt";
    let bytes = read_table(archive, TABLE)?.ok_or(StaticBuildError::MissingTable(TABLE))?;
    let mut rdr = csv_reader(&bytes);
    let cols = Columns::read(&mut rdr, TABLE)?;

    let idx_trip = cols.required(TABLE, "trip_id")?;
    let idx_stop = cols.required(TABLE, "stop_id")?;
    let idx_seq = cols.required(TABLE, "stop_sequence")?;
    let idx_arr = cols.optional("arrival_time");
    let idx_dep = cols.optional("departure_time");

    let mut stop_times = Vec::new();
    let mut skipped = 0usize;
    for result in rdr.records() {
        let record = result.map_err(|source| StaticBuildError::Csv { table: TABLE, source })?;
        let (Some(trip_id), Some(stop_id), Some(stop_sequence)) = (
            field(&record, Some(idx_trip)),
            field(&record, Some(idx_stop)),
            field(&record, Some(idx_seq)).and_then(|s| s.parse().ok()),
        ) else {
            skipped += 1;
            continue;
        };
        let arrival = field(&record, idx_arr).map(parse_gtfs_time);
        let departure = field(&record, idx_dep).map(parse_gtfs_time);
        // a time that is present but unparsable invalidates the row
        if matches!(arrival, Some(None)) || matches!(departure, Some(None)) {
            skipped += 1;
            continue;
        }
        stop_times.push(StaticStopTime {
            trip_id: trip_id.to_string(),
            stop_id: stop_id.to_string(),
            stop_sequence,
            arrival: arrival.flatten(),
            departure: departure.flatten(),
        });
    }
    if skipped > 0 {
        warn!(skipped, "Skipped malformed stop_times.txt records");
    }
    Ok(stop_times)
}

/// Merges `calendar.txt` and `calendar_dates.txt`. Both are optional; an
/// unreadable file counts as absent.
fn parse_calendars<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Vec<ServiceCalendar> {
    let mut calendars: HashMap<String, ServiceCalendar> = match parse_calendar(archive) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable calendar.txt");
            HashMap::new()
        }
    };

    if let Err(e) = parse_calendar_dates(archive, &mut calendars) {
        warn!(error = %e, "Ignoring unreadable calendar_dates.txt");
    }

    calendars.into_values().collect()
}

fn parse_calendar<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<HashMap<String, ServiceCalendar>, StaticBuildError> {
    const TABLE: &str = "calendar.txt";
    let Some(bytes) = read_table(archive, TABLE)? else {
        debug!("No calendar.txt in static schedule");
        return Ok(HashMap::new());
    };
    let mut rdr = csv_reader(&bytes);
    let cols = Columns::read(&mut rdr, TABLE)?;

    let idx_service = cols.required(TABLE, "service_id")?;
    let idx_start = cols.required(TABLE, "start_date")?;
    let idx_end = cols.required(TABLE, "end_date")?;
    let idx_days = [
        "monday",
        "tuesday",
        "wednesday",
        "thursday",
        "friday",
        "saturday",
        "sunday",
    ]
    .map(|day| cols.optional(day));

    let mut calendars = HashMap::new();
    let mut skipped = 0usize;
    for result in rdr.records() {
        let Ok(record) = result else {
            skipped += 1;
            continue;
        };
        let service_id = field(&record, Some(idx_service));
        let start = field(&record, Some(idx_start)).and_then(parse_service_date);
        let end = field(&record, Some(idx_end)).and_then(parse_service_date);
        let (Some(service_id), Some(start), Some(end)) = (service_id, start, end) else {
            skipped += 1;
            continue;
        };
        let weekdays = idx_days.map(|idx| field(&record, idx) == Some("1"));
        calendars.insert(
            service_id.to_string(),
            ServiceCalendar::weekly(service_id, weekdays, start, end),
        );
    }
    if skipped > 0 {
        warn!(skipped, "Skipped malformed calendar.txt records");
    }
    Ok(calendars)
}

fn parse_calendar_dates<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    calendars: &mut HashMap<String, ServiceCalendar>,
) -> Result<(), StaticBuildError> {
    const TABLE: &str = "calendar_dates.txt";
    let Some(bytes) = read_table(archive, TABLE)? else {
        debug!("No calendar_dates.txt in static schedule");
        return Ok(());
    };
    let mut rdr = csv_reader(&bytes);
    let cols = Columns::read(&mut rdr, TABLE)?;

    let idx_service = cols.required(TABLE, "service_id")?;
    let idx_date = cols.required(TABLE, "date")?;
    let idx_type = cols.required(TABLE, "exception_type")?;

    let mut count = 0usize;
    for result in rdr.records() {
        let Ok(record) = result else {
            continue;
        };
        let (Some(service_id), Some(date), Some(exception_type)) = (
            field(&record, Some(idx_service)),
            field(&record, Some(idx_date)).and_then(parse_service_date),
            field(&record, Some(idx_type)).and_then(|s| s.parse::<u8>().ok()),
        ) else {
            continue;
        };
        calendars
            .entry(service_id.to_string())
            .or_insert_with(|| ServiceCalendar::exceptions_only(service_id))
            .add_exception(date, exception_type);
        count += 1;
    }
    debug!(exceptions = count, "Parsed calendar_dates.txt");
    Ok(())
}

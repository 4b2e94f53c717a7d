//! Error types for configuration, feed fetching, decoding and the static
//! schedule build.
//!
//! Only [`ConfigError`] ever reaches a caller of the engine; the others are
//! logged at the engine boundary and turned into "keep the previous state".

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing mandatory field `{0}`")]
    MissingField(&'static str),
    #[error("invalid URL in `{field}` ({value}): {reason}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid API key header name `{0}`")]
    InvalidHeaderName(String),
    #[error("API key is not a valid HTTP header value")]
    InvalidHeaderValue,
    #[error("departure `{name}`: {reason}")]
    InvalidDeparture { name: String, reason: String },
    #[error("no departures configured")]
    NoDepartures,
    #[error("`update_interval` must be at least one second")]
    ZeroInterval,
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },
    #[error("{url} response too large: {size} bytes (max {max} bytes)")]
    TooLarge { url: String, size: u64, max: u64 },
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Request { source, .. } if source.is_timeout())
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed feed message: {0}")]
    Protobuf(#[from] prost::DecodeError),
    #[error("unsupported gtfs_realtime_version `{0}`")]
    UnsupportedVersion(String),
    #[error("DIFFERENTIAL feeds are not supported")]
    Differential,
}

#[derive(Debug, Error)]
pub enum StaticBuildError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("archive is missing mandatory table {0}")]
    MissingTable(&'static str),
    #[error("{table} is missing column {column}")]
    MissingColumn {
        table: &'static str,
        column: &'static str,
    },
    #[error("{table}: {source}")]
    Csv {
        table: &'static str,
        #[source]
        source: csv::Error,
    },
    #[error("archive decompressed size {size} bytes exceeds limit {max} bytes")]
    TooLarge { size: u64, max: u64 },
    #[error("schedule parser task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod model;
pub mod output;
pub mod parser;
pub mod resolver;
pub mod schedule;
pub mod sensor;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}

//! Output formatting for sensor states.
//!
//! Supports pretty-printing and JSON serialization.

use anyhow::Result;
use tracing::{debug, info};

use crate::sensor::SensorState;

/// Logs a sensor state using Rust's debug pretty-print format.
pub fn print_pretty(state: &SensorState) {
    info!("{:#?}", state);
}

/// Logs a sensor state as pretty-printed JSON.
pub fn print_json(state: &SensorState) -> Result<()> {
    let json = render_json(state)?;
    debug!(sensor = %state.name, bytes = json.len(), "Rendered sensor state");
    info!("{}", json);
    Ok(())
}

pub fn render_json(state: &SensorState) -> Result<String> {
    Ok(serde_json::to_string_pretty(state)?)
}

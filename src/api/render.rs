//! JSON and CSV bodies for stored observations

use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::{json, Value};

use crate::domain::Observation;
use crate::error::{Error, Result};

/// Column order shared by the JSON and CSV renderings
pub const COLUMNS: [&str; 7] = ["station", "ts", "temp", "rh", "pres", "wind", "rain"];

/// `{"columns": [...], "rows": [[...], ...]}`
#[derive(Debug, Serialize)]
pub struct LogsBody {
    pub columns: &'static [&'static str],
    pub rows: Vec<Value>,
}

impl LogsBody {
    pub fn new(observations: &[Observation]) -> Self {
        Self {
            columns: &COLUMNS,
            rows: observations.iter().map(row).collect(),
        }
    }
}

fn timestamp(obs: &Observation) -> String {
    obs.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn row(obs: &Observation) -> Value {
    json!([
        obs.station,
        timestamp(obs),
        obs.temperature,
        obs.relative_humidity,
        obs.pressure,
        obs.wind_speed,
        obs.precipitation,
    ])
}

/// CSV with a header row, rows in the order given
pub fn to_csv(observations: &[Observation]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(COLUMNS)?;

    for obs in observations {
        writer.write_record([
            obs.station.clone(),
            timestamp(obs),
            obs.temperature.to_string(),
            obs.relative_humidity.to_string(),
            obs.pressure.to_string(),
            obs.wind_speed.to_string(),
            obs.precipitation.to_string(),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| Error::Internal(format!("CSV flush failed: {}", e)))
}

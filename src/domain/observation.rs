//! Observation - the pipeline's single domain entity
//!
//! Holds the canonical observation type, its strict wire schema
//! (`observation.v1`) and the validity table the consumer enforces
//! before anything reaches the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::DecodeError;

/// AMQP `type` property carried by every published observation
pub const MESSAGE_TYPE_V1: &str = "observation.v1";

// =============================================================================
// Observation
// =============================================================================

/// One weather reading tied to a station and the instant it was observed.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Station identifier (routing key on the broker)
    pub station: String,
    /// Observation instant, not ingestion time
    pub timestamp: DateTime<Utc>,
    /// Air temperature in °C
    pub temperature: f64,
    /// Relative humidity in percent
    pub relative_humidity: i32,
    /// Sea-level pressure in hPa
    pub pressure: f64,
    /// Wind speed in source units (not converted)
    pub wind_speed: i32,
    /// Precipitation accumulation
    pub precipitation: f64,
}

impl Observation {
    /// Check every invariant that must hold before persistence.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.station.trim().is_empty() {
            return Err(ValidationError::EmptyStation);
        }

        for bounds in FIELD_BOUNDS.iter() {
            bounds.check(bounds.field.value_of(self))?;
        }

        Ok(())
    }

    /// Returns true if [`validate`](Self::validate) passes
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Serialize into the `observation.v1` wire body
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&ObservationMessage::from(self))
    }

    /// Decode a broker payload.
    ///
    /// `message_type` is the AMQP `type` property. Absent means v1; any other
    /// value is refused rather than guessed at.
    pub fn decode(payload: &[u8], message_type: Option<&str>) -> Result<Self, DecodeError> {
        match message_type {
            None | Some(MESSAGE_TYPE_V1) => {}
            Some(other) => return Err(DecodeError::UnsupportedType(other.to_string())),
        }

        let message: ObservationMessage = serde_json::from_slice(payload)?;
        Ok(message.into())
    }
}

// =============================================================================
// Wire Schema
// =============================================================================

/// Wire representation of an observation (`observation.v1`).
///
/// Every field is required and unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObservationMessage {
    pub station: String,
    pub ts: DateTime<Utc>,
    pub temp: f64,
    pub rh: i32,
    pub pres: f64,
    pub wind: i32,
    pub rain: f64,
}

impl From<&Observation> for ObservationMessage {
    fn from(obs: &Observation) -> Self {
        Self {
            station: obs.station.clone(),
            ts: obs.timestamp,
            temp: obs.temperature,
            rh: obs.relative_humidity,
            pres: obs.pressure,
            wind: obs.wind_speed,
            rain: obs.precipitation,
        }
    }
}

impl From<ObservationMessage> for Observation {
    fn from(msg: ObservationMessage) -> Self {
        Self {
            station: msg.station,
            timestamp: msg.ts,
            temperature: msg.temp,
            relative_humidity: msg.rh,
            pressure: msg.pres,
            wind_speed: msg.wind,
            precipitation: msg.rain,
        }
    }
}

// =============================================================================
// Validity Table
// =============================================================================

/// Numeric observation field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Temperature,
    RelativeHumidity,
    Pressure,
    WindSpeed,
    Precipitation,
}

impl Field {
    fn value_of(self, obs: &Observation) -> f64 {
        match self {
            Field::Temperature => obs.temperature,
            Field::RelativeHumidity => f64::from(obs.relative_humidity),
            Field::Pressure => obs.pressure,
            Field::WindSpeed => f64::from(obs.wind_speed),
            Field::Precipitation => obs.precipitation,
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Field::Temperature => write!(f, "temp"),
            Field::RelativeHumidity => write!(f, "rh"),
            Field::Pressure => write!(f, "pres"),
            Field::WindSpeed => write!(f, "wind"),
            Field::Precipitation => write!(f, "rain"),
        }
    }
}

/// Inclusive bounds for one field; `None` on a side means unbounded
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldBounds {
    pub field: Field,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl FieldBounds {
    const fn new(field: Field, min: Option<f64>, max: Option<f64>) -> Self {
        Self { field, min, max }
    }

    /// Returns true when neither side is bounded
    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    fn check(&self, value: f64) -> Result<(), ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::NotFinite { field: self.field });
        }

        let below = self.min.is_some_and(|min| value < min);
        let above = self.max.is_some_and(|max| value > max);
        if below || above {
            return Err(ValidationError::OutOfRange {
                field: self.field,
                value,
                min: self.min,
                max: self.max,
            });
        }

        Ok(())
    }
}

/// Validity bounds for every numeric field.
///
/// Wind speed and precipitation are deliberately listed as unbounded.
pub const FIELD_BOUNDS: [FieldBounds; 5] = [
    FieldBounds::new(Field::Temperature, Some(-40.0), Some(60.0)),
    FieldBounds::new(Field::RelativeHumidity, Some(0.0), Some(100.0)),
    FieldBounds::new(Field::Pressure, Some(870.0), Some(1100.0)),
    FieldBounds::new(Field::WindSpeed, None, None),
    FieldBounds::new(Field::Precipitation, None, None),
];

/// Look up the bounds row for a field
pub fn bounds_for(field: Field) -> FieldBounds {
    FIELD_BOUNDS
        .iter()
        .copied()
        .find(|b| b.field == field)
        .unwrap_or(FieldBounds::new(field, None, None))
}

/// Domain invariant violation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("station identifier is empty")]
    EmptyStation,

    #[error("{field} is not a finite number")]
    NotFinite { field: Field },

    #[error("{field}={value} outside [{}, {}]", fmt_bound(.min), fmt_bound(.max))]
    OutOfRange {
        field: Field,
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
    },
}

fn fmt_bound(bound: &Option<f64>) -> String {
    bound.map_or_else(|| "unbounded".to_string(), |b| b.to_string())
}

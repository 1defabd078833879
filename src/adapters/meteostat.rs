//! Meteostat Station Source
//!
//! Implements the `StationSource` port against the Meteostat hourly endpoint
//! (served through RapidAPI). Each poll asks for a bounded date range and
//! keeps the most recent hourly record.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::domain::{Observation, StationSource};
use crate::error::{Error, Result};

/// Pressure used when the source has no sea-level reading, in hPa
pub const DEFAULT_PRESSURE_HPA: f64 = 1013.25;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the Meteostat source
#[derive(Debug, Clone)]
pub struct MeteostatConfig {
    /// API base URL
    pub base_url: String,

    /// Value of the `X-RapidAPI-Host` header
    pub api_host: String,

    /// RapidAPI key
    pub api_key: String,

    /// Station identifier to poll
    pub station: String,

    /// Request timeout
    pub timeout: Duration,

    /// Days before today included in the requested range
    pub lookback_days: i64,
}

impl Default for MeteostatConfig {
    fn default() -> Self {
        Self {
            base_url: "https://meteostat.p.rapidapi.com".to_string(),
            api_host: "meteostat.p.rapidapi.com".to_string(),
            api_key: String::new(),
            station: "LEMD".to_string(),
            timeout: Duration::from_secs(15),
            lookback_days: 1,
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct HourlyResponse {
    #[serde(default)]
    data: Vec<HourlyRecord>,
}

#[derive(Debug, Deserialize)]
struct HourlyRecord {
    time: String,
    temp: Option<f64>,
    rhum: Option<f64>,
    pres: Option<f64>,
    wspd: Option<f64>,
    prcp: Option<f64>,
}

impl HourlyRecord {
    /// Map into the canonical schema; absent readings fall back to neutral values
    fn into_observation(self, station: &str) -> Result<Observation> {
        let timestamp = parse_record_time(&self.time)?;
        let temperature = self.temp.ok_or_else(|| {
            Error::SourceResponseParse(format!("record {} has no temperature", self.time))
        })?;

        Ok(Observation {
            station: station.to_string(),
            timestamp,
            temperature,
            relative_humidity: self.rhum.map_or(0, |rh| rh.trunc() as i32),
            pressure: self.pres.unwrap_or(DEFAULT_PRESSURE_HPA),
            wind_speed: self.wspd.map_or(0, |w| w.trunc() as i32),
            precipitation: self.prcp.unwrap_or(0.0),
        })
    }
}

/// Meteostat reports `YYYY-MM-DD HH:MM:SS` in UTC; RFC 3339 is accepted too
fn parse_record_time(raw: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc)))
        .map_err(|e| Error::SourceResponseParse(format!("invalid record time '{}': {}", raw, e)))
}

// =============================================================================
// Source
// =============================================================================

/// Polls Meteostat for the latest hourly observation of one station
pub struct MeteostatSource {
    config: MeteostatConfig,
    client: Client,
}

impl MeteostatSource {
    /// Create a new source; the HTTP client carries the request timeout
    pub fn new(config: MeteostatConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn date_range(&self, now: DateTime<Utc>) -> (String, String) {
        let start = now - chrono::Duration::days(self.config.lookback_days);
        (
            start.format("%Y-%m-%d").to_string(),
            now.format("%Y-%m-%d").to_string(),
        )
    }
}

impl std::fmt::Debug for MeteostatSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeteostatSource")
            .field("base_url", &self.config.base_url)
            .field("station", &self.config.station)
            .field("timeout", &self.config.timeout)
            .finish()
    }
}

#[async_trait]
impl StationSource for MeteostatSource {
    #[instrument(skip(self), fields(station = %self.config.station))]
    async fn acquire(&self) -> Result<Observation> {
        let (start, end) = self.date_range(Utc::now());
        let url = format!("{}/stations/hourly", self.config.base_url);

        debug!("Requesting hourly records {}..{}", start, end);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("station", self.config.station.as_str()),
                ("start", start.as_str()),
                ("end", end.as_str()),
            ])
            .header("X-RapidAPI-Key", &self.config.api_key)
            .header("X-RapidAPI-Host", &self.config.api_host)
            .send()
            .await
            .map_err(Error::SourceConnection)?;

        if !response.status().is_success() {
            return Err(Error::SourceRequest(format!(
                "Request failed with status: {}",
                response.status()
            )));
        }

        let body: HourlyResponse = response
            .json()
            .await
            .map_err(|e| Error::SourceResponseParse(e.to_string()))?;

        latest_observation(body, &self.config.station, Utc::now())
    }

    fn name(&self) -> &'static str {
        "meteostat"
    }
}

/// Newest record that carries a temperature and is not in the future.
///
/// Trailing hours of the requested range are often still empty.
fn latest_observation(
    body: HourlyResponse,
    station: &str,
    now: DateTime<Utc>,
) -> Result<Observation> {
    for record in body.data.into_iter().rev() {
        if record.temp.is_none() {
            continue;
        }
        let observation = record.into_observation(station)?;
        if observation.timestamp <= now {
            return Ok(observation);
        }
    }

    Err(Error::SourceResponseParse(format!(
        "no hourly record with a temperature for station {}",
        station
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn parse(json: &str) -> HourlyResponse {
        serde_json::from_str(json).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_meteostat_config_default() {
        let config = MeteostatConfig::default();

        assert_eq!(config.base_url, "https://meteostat.p.rapidapi.com");
        assert_eq!(config.timeout, Duration::from_secs(15));
        assert_eq!(config.station, "LEMD");
        assert!(config.api_key.is_empty());
    }

    #[test]
    fn test_latest_record_is_used() {
        let body = parse(
            r#"{"meta":{},"data":[
                {"time":"2024-01-01 00:00:00","temp":4.0,"rhum":85,"pres":1013.1,"wspd":7.2,"prcp":0.0},
                {"time":"2024-01-01 01:00:00","temp":5.2,"rhum":80,"pres":1012.0,"wspd":3.9,"prcp":0.2}
            ]}"#,
        );

        let obs = latest_observation(body, "LEMD", now()).unwrap();

        assert_eq!(obs.station, "LEMD");
        assert_eq!(
            obs.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap()
        );
        assert_eq!(obs.temperature, 5.2);
        assert_eq!(obs.relative_humidity, 80);
        assert_eq!(obs.pressure, 1012.0);
        assert_eq!(obs.wind_speed, 3);
        assert_eq!(obs.precipitation, 0.2);
    }

    #[test]
    fn test_missing_readings_use_neutral_values() {
        let body = parse(
            r#"{"data":[{"time":"2024-01-01 00:00:00","temp":5.2,"rhum":null,"pres":null,"wspd":null,"prcp":null}]}"#,
        );

        let obs = latest_observation(body, "LEMD", now()).unwrap();

        assert_eq!(obs.relative_humidity, 0);
        assert_eq!(obs.pressure, DEFAULT_PRESSURE_HPA);
        assert_eq!(obs.wind_speed, 0);
        assert_eq!(obs.precipitation, 0.0);
    }

    #[test]
    fn test_missing_temperature_is_error() {
        let body = parse(r#"{"data":[{"time":"2024-01-01 00:00:00","temp":null}]}"#);
        assert_matches!(
            latest_observation(body, "LEMD", now()),
            Err(Error::SourceResponseParse(_))
        );
    }

    #[test]
    fn test_trailing_empty_hours_are_skipped() {
        let body = parse(
            r#"{"data":[
                {"time":"2024-01-01 09:00:00","temp":4.8,"rhum":82,"pres":1012.5,"wspd":2.0,"prcp":0.0},
                {"time":"2024-01-01 10:00:00","temp":5.2,"rhum":80,"pres":1012.0,"wspd":3.9,"prcp":0.0},
                {"time":"2024-01-01 11:00:00","temp":null,"rhum":null,"pres":null,"wspd":null,"prcp":null},
                {"time":"2024-01-01 12:00:00","temp":null,"rhum":null,"pres":null,"wspd":null,"prcp":null}
            ]}"#,
        );

        let obs = latest_observation(body, "LEMD", now()).unwrap();

        assert_eq!(
            obs.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
        );
        assert_eq!(obs.temperature, 5.2);
    }

    #[test]
    fn test_future_records_are_skipped() {
        let body = parse(
            r#"{"data":[
                {"time":"2024-01-01 23:00:00","temp":3.0},
                {"time":"2024-01-02 01:00:00","temp":2.5}
            ]}"#,
        );

        let obs = latest_observation(body, "LEMD", now()).unwrap();

        assert_eq!(obs.temperature, 3.0);
    }

    #[test]
    fn test_all_empty_hours_is_error() {
        let body = parse(
            r#"{"data":[
                {"time":"2024-01-01 10:00:00","temp":null},
                {"time":"2024-01-01 11:00:00","temp":null}
            ]}"#,
        );

        assert_matches!(
            latest_observation(body, "LEMD", now()),
            Err(Error::SourceResponseParse(_))
        );
    }

    #[test]
    fn test_humidity_is_truncated() {
        let body = parse(r#"{"data":[{"time":"2024-01-01 00:00:00","temp":5.2,"rhum":99.6}]}"#);

        let obs = latest_observation(body, "LEMD", now()).unwrap();

        assert_eq!(obs.relative_humidity, 99);
    }

    #[test]
    fn test_empty_data_is_error() {
        assert!(latest_observation(parse(r#"{"data":[]}"#), "LEMD", now()).is_err());
        assert!(latest_observation(parse(r#"{}"#), "LEMD", now()).is_err());
    }

    #[test]
    fn test_record_time_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_record_time("2024-01-01 00:00:00").unwrap(), expected);
        assert_eq!(parse_record_time("2024-01-01T00:00:00Z").unwrap(), expected);
        assert!(parse_record_time("01/01/2024").is_err());
    }

    #[test]
    fn test_date_range_is_bounded() {
        let source = MeteostatSource::new(MeteostatConfig::default()).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        let (start, end) = source.date_range(now);

        assert_eq!(start, "2024-02-29");
        assert_eq!(end, "2024-03-01");
    }

    #[test]
    fn test_source_name() {
        let source = MeteostatSource::new(MeteostatConfig::default()).unwrap();
        assert_eq!(source.name(), "meteostat");
    }
}

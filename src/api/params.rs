//! Query-string parsing for the log endpoints

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::domain::LogQuery;
use crate::error::{Error, Result};

/// Build a [`LogQuery`] from a raw (still percent-encoded) query string.
///
/// Empty values count as absent. Unknown keys are ignored.
pub fn parse_log_query(raw: Option<&str>) -> Result<LogQuery> {
    parse(raw, true)
}

/// Filters for the CSV export; `limit` is not a parameter there and the
/// export cap always applies.
pub fn parse_export_query(raw: Option<&str>) -> Result<LogQuery> {
    Ok(parse(raw, false)?.for_export())
}

fn parse(raw: Option<&str>, accept_limit: bool) -> Result<LogQuery> {
    let mut query = LogQuery::new();
    let (mut start, mut end) = (None, None);

    for pair in raw.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = urlencoding::decode(value)
            .map_err(|e| Error::invalid_query(key, format!("bad encoding: {}", e)))?;
        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        match key {
            "station" => query = query.station(value),
            "start" => start = Some(parse_timestamp("start", value)?),
            "end" => end = Some(parse_timestamp("end", value)?),
            "limit" if accept_limit => {
                let limit: u32 = value
                    .parse()
                    .map_err(|_| Error::invalid_query("limit", "must be a positive integer"))?;
                query = query.with_limit(limit)?;
            }
            _ => {}
        }
    }

    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(Error::invalid_query("start", "must not be after end"));
        }
    }

    Ok(query.between(start, end))
}

/// RFC 3339, or a bare `YYYY-MM-DDTHH:MM:SS` taken as UTC
fn parse_timestamp(name: &str, value: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| Error::invalid_query(name, format!("'{}' is not an RFC 3339 timestamp", value)))
}

//! Postgres Observation Store
//!
//! Implements the `ObservationStore` port on a pooled `sqlx` connection.
//! Idempotency comes from the (station, ts) unique constraint and
//! `ON CONFLICT DO NOTHING`; no application-level locking is involved.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use tracing::{debug, info, instrument};

use crate::domain::{LogQuery, Observation, ObservationStore};
use crate::error::Result;

/// Table bootstrap; safe to run on every start
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS weather_logs (
    id      BIGSERIAL PRIMARY KEY,
    station TEXT             NOT NULL,
    ts      TIMESTAMPTZ      NOT NULL,
    temp    DOUBLE PRECISION NOT NULL,
    rh      INTEGER          NOT NULL,
    pres    DOUBLE PRECISION NOT NULL,
    wind    INTEGER          NOT NULL,
    rain    DOUBLE PRECISION NOT NULL,
    CONSTRAINT weather_logs_station_ts_key UNIQUE (station, ts)
);
CREATE INDEX IF NOT EXISTS weather_logs_ts_idx ON weather_logs (ts DESC);
"#;

const INSERT_SQL: &str = "INSERT INTO weather_logs (station, ts, temp, rh, pres, wind, rain) \
     VALUES ($1, $2, $3, $4, $5, $6, $7) \
     ON CONFLICT (station, ts) DO NOTHING";

/// Reads normalize column types so tables created with `REAL` or nullable
/// columns decode into the same row shape; rows without a temperature are skipped.
const SELECT_SQL: &str = "SELECT station, ts, \
     temp::float8 AS temp, \
     COALESCE(rh, 0)::int4 AS rh, \
     COALESCE(pres, 1013.25)::float8 AS pres, \
     COALESCE(wind, 0)::int4 AS wind, \
     COALESCE(rain, 0)::float8 AS rain \
     FROM weather_logs WHERE temp IS NOT NULL";

// =============================================================================
// Configuration
// =============================================================================

/// Database connection settings
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    /// Upper bound on pooled connections
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "postgres".to_string(),
            port: 5432,
            database: "weather".to_string(),
            user: "weather".to_string(),
            password: "weather".to_string(),
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .password(&self.password)
    }
}

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct ObservationRow {
    station: String,
    ts: DateTime<Utc>,
    temp: f64,
    rh: i32,
    pres: f64,
    wind: i32,
    rain: f64,
}

impl From<ObservationRow> for Observation {
    fn from(row: ObservationRow) -> Self {
        Self {
            station: row.station,
            timestamp: row.ts,
            temperature: row.temp,
            relative_humidity: row.rh,
            pressure: row.pres,
            wind_speed: row.wind,
            precipitation: row.rain,
        }
    }
}

// =============================================================================
// Store
// =============================================================================

/// Observation store backed by a Postgres connection pool
#[derive(Debug, Clone)]
pub struct PgObservationStore {
    pool: PgPool,
}

impl PgObservationStore {
    /// Open a bounded pool
    #[instrument(skip(config), fields(host = %config.host, database = %config.database))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(config.connect_options())
            .await?;

        info!(
            "Connected to Postgres {}:{}/{}",
            config.host, config.port, config.database
        );
        Ok(Self { pool })
    }

    /// Open a pool from a `postgres://` URL
    pub async fn connect_url(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the table and index if missing
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        debug!("weather_logs schema ensured");
        Ok(())
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ObservationStore for PgObservationStore {
    #[instrument(skip(self, observation), fields(station = %observation.station, ts = %observation.timestamp))]
    async fn insert(&self, observation: &Observation) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(INSERT_SQL)
            .bind(&observation.station)
            .bind(observation.timestamp)
            .bind(observation.temperature)
            .bind(observation.relative_humidity)
            .bind(observation.pressure)
            .bind(observation.wind_speed)
            .bind(observation.precipitation)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn query(&self, query: &LogQuery) -> Result<Vec<Observation>> {
        let mut builder = QueryBuilder::<Postgres>::new(SELECT_SQL);

        if let Some(station) = &query.station {
            builder.push(" AND station = ").push_bind(station.clone());
        }
        if let Some(start) = query.start {
            builder.push(" AND ts >= ").push_bind(start);
        }
        if let Some(end) = query.end {
            builder.push(" AND ts <= ").push_bind(end);
        }

        builder
            .push(" ORDER BY ts DESC LIMIT ")
            .push_bind(i64::from(query.limit()));

        let rows = builder
            .build_query_as::<ObservationRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Observation::from).collect())
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM weather_logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_default() {
        let config = DatabaseConfig::default();

        assert_eq!(config.host, "postgres");
        assert_eq!(config.port, 5432);
        assert_eq!(config.database, "weather");
        assert_eq!(config.user, "weather");
        assert_eq!(config.max_connections, 5);
    }

    #[test]
    fn test_insert_ignores_conflicts_on_natural_key() {
        assert!(INSERT_SQL.contains("ON CONFLICT (station, ts) DO NOTHING"));
    }

    #[test]
    fn test_schema_declares_unique_station_ts() {
        assert!(SCHEMA_SQL.contains("UNIQUE (station, ts)"));
        assert!(SCHEMA_SQL.contains("IF NOT EXISTS"));
    }

    #[test]
    fn test_reads_normalize_legacy_column_types() {
        assert!(SELECT_SQL.contains("temp::float8 AS temp"));
        assert!(SELECT_SQL.contains("COALESCE(pres, 1013.25)::float8 AS pres"));
        assert!(SELECT_SQL.contains("COALESCE(rain, 0)::float8 AS rain"));
        assert!(SELECT_SQL.contains("COALESCE(rh, 0)::int4 AS rh"));
        assert!(SELECT_SQL.ends_with("WHERE temp IS NOT NULL"));
    }

    #[test]
    fn test_row_maps_to_observation() {
        let row = ObservationRow {
            station: "LEMD".into(),
            ts: Utc::now(),
            temp: 5.2,
            rh: 80,
            pres: 1012.0,
            wind: 3,
            rain: 0.0,
        };
        let ts = row.ts;

        let obs = Observation::from(row);

        assert_eq!(obs.station, "LEMD");
        assert_eq!(obs.timestamp, ts);
        assert_eq!(obs.relative_humidity, 80);
    }
}

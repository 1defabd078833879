//! Weather Ingest
//!
//! One binary, three roles:
//!
//! ```text
//! ┌──────────────┐      ┌───────────────┐      ┌──────────────┐
//! │   producer   │─────▶│   RabbitMQ    │─────▶│   consumer   │──▶ Postgres
//! │ (poll+publish)│      │ weather.topic │      │ (validate+ack)│        │
//! └──────────────┘      └───────────────┘      └──────────────┘        ▼
//!                                                                   api
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use weather_ingest::adapters::{AmqpPublisher, DatabaseConfig, PgObservationStore};
use weather_ingest::api::{self, ApiState};
use weather_ingest::broker::{AmqpSession, BrokerConfig};
use weather_ingest::consumer::{worker, Consumer};
use weather_ingest::error::{Error, Result};
use weather_ingest::http;
use weather_ingest::metrics::{ApiMetrics, PipelineMetrics};
use weather_ingest::producer::{Producer, ProducerConfig, SourceKind};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Weather observation ingestion pipeline
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    log: LogArgs,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Poll a station and publish observations
    Producer(ProducerArgs),
    /// Validate and persist observations from the queue
    Consumer(ConsumerArgs),
    /// Serve stored observations over HTTP
    Api(ApiArgs),
}

#[derive(Args, Debug)]
struct LogArgs {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,
}

#[derive(Args, Debug)]
struct BrokerArgs {
    #[arg(long, env = "RABBITMQ_HOST", default_value = "rabbitmq")]
    rabbitmq_host: String,

    #[arg(long, env = "RABBITMQ_PORT", default_value = "5672")]
    rabbitmq_port: u16,

    #[arg(long, env = "RABBITMQ_USER", default_value = "guest")]
    rabbitmq_user: String,

    #[arg(long, env = "RABBITMQ_PASS", default_value = "guest")]
    rabbitmq_pass: String,
}

impl From<&BrokerArgs> for BrokerConfig {
    fn from(args: &BrokerArgs) -> Self {
        BrokerConfig {
            host: args.rabbitmq_host.clone(),
            port: args.rabbitmq_port,
            user: args.rabbitmq_user.clone(),
            password: args.rabbitmq_pass.clone(),
            ..Default::default()
        }
    }
}

#[derive(Args, Debug)]
struct DatabaseArgs {
    #[arg(long, env = "POSTGRES_HOST", default_value = "postgres")]
    postgres_host: String,

    #[arg(long, env = "POSTGRES_PORT", default_value = "5432")]
    postgres_port: u16,

    #[arg(long, env = "POSTGRES_DB", default_value = "weather")]
    postgres_db: String,

    #[arg(long, env = "POSTGRES_USER", default_value = "weather")]
    postgres_user: String,

    #[arg(long, env = "POSTGRES_PASSWORD", default_value = "weather")]
    postgres_password: String,

    /// Upper bound on pooled database connections
    #[arg(long, env = "POSTGRES_MAX_CONNECTIONS", default_value = "5")]
    postgres_max_connections: u32,
}

impl From<&DatabaseArgs> for DatabaseConfig {
    fn from(args: &DatabaseArgs) -> Self {
        DatabaseConfig {
            host: args.postgres_host.clone(),
            port: args.postgres_port,
            database: args.postgres_db.clone(),
            user: args.postgres_user.clone(),
            password: args.postgres_password.clone(),
            max_connections: args.postgres_max_connections,
        }
    }
}

#[derive(Args, Debug)]
struct ProducerArgs {
    #[command(flatten)]
    broker: BrokerArgs,

    /// Station identifier, also the routing key
    #[arg(long, env = "STATION", default_value = "LEMD")]
    station: String,

    /// Seconds between polls (at least 1)
    #[arg(
        long,
        env = "INTERVAL",
        default_value = "60",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    interval: u64,

    /// Station source: auto, meteostat or simulated
    #[arg(long, env = "SOURCE", default_value = "auto")]
    source: String,

    /// RapidAPI key for Meteostat
    #[arg(long, env = "RAPIDAPI_KEY", default_value = "", hide_env_values = true)]
    rapidapi_key: String,

    /// Port for the producer's /metrics endpoint
    #[arg(long, env = "PROMETHEUS_PORT", default_value = "8002")]
    prometheus_port: u16,
}

#[derive(Args, Debug)]
struct ConsumerArgs {
    #[command(flatten)]
    broker: BrokerArgs,

    #[command(flatten)]
    database: DatabaseArgs,

    /// Port for the consumer's /metrics endpoint
    #[arg(long, env = "PROMETHEUS_PORT", default_value = "8001")]
    prometheus_port: u16,
}

#[derive(Args, Debug)]
struct ApiArgs {
    #[command(flatten)]
    database: DatabaseArgs,

    /// API bind address
    #[arg(long, env = "API_LISTEN", default_value = "0.0.0.0:8000")]
    listen: String,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log)?;

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let result = match cli.role {
        Role::Producer(args) => run_producer(args, shutdown).await,
        Role::Consumer(args) => run_consumer(args, shutdown).await,
        Role::Api(args) => run_api(args, shutdown).await,
    };

    if let Err(e) = &result {
        error!("Fatal: {}", e);
    }
    result
}

// =============================================================================
// Roles
// =============================================================================

async fn run_producer(args: ProducerArgs, shutdown: CancellationToken) -> Result<()> {
    let config = ProducerConfig {
        station: args.station.clone(),
        interval: Duration::from_secs(args.interval),
        source: args.source.parse::<SourceKind>()?,
        rapidapi_key: args.rapidapi_key.clone(),
    };
    let broker = BrokerConfig::from(&args.broker);

    info!("Starting producer");
    info!("  Station: {}", config.station);
    info!("  Interval: {:?}", config.interval);
    info!("  Source: {}", config.effective_source());
    info!("  Broker: {}", broker.display_uri());

    let metrics = PipelineMetrics::new()?;
    spawn_metrics_server(args.prometheus_port, &metrics, shutdown.clone());

    let publisher = Arc::new(AmqpPublisher::new(broker));
    let producer = Producer::new(
        config.build_source()?,
        publisher.clone(),
        metrics,
        config.interval,
    );

    producer.run(shutdown).await;

    if let Err(e) = publisher.close().await {
        warn!("Failed to close broker connection: {}", e);
    }
    info!("Producer shutdown complete");
    Ok(())
}

async fn run_consumer(args: ConsumerArgs, shutdown: CancellationToken) -> Result<()> {
    let broker = BrokerConfig::from(&args.broker);
    let database = DatabaseConfig::from(&args.database);

    info!("Starting consumer");
    info!("  Broker: {}", broker.display_uri());
    info!(
        "  Database: {}:{}/{} (pool {})",
        database.host, database.port, database.database, database.max_connections
    );

    let metrics = PipelineMetrics::new()?;
    spawn_metrics_server(args.prometheus_port, &metrics, shutdown.clone());

    let store = Arc::new(PgObservationStore::connect(&database).await?);
    store.ensure_schema().await?;

    let session = AmqpSession::connect(&broker).await?;
    let consumer = Consumer::new(store.clone(), metrics);

    let result = worker::run(&consumer, &session, shutdown).await;

    if let Err(e) = session.close().await {
        warn!("Failed to close broker connection: {}", e);
    }
    store.close().await;

    info!("Consumer shutdown complete");
    result
}

async fn run_api(args: ApiArgs, shutdown: CancellationToken) -> Result<()> {
    let database = DatabaseConfig::from(&args.database);

    info!("Starting query API");
    info!("  Database: {}:{}/{}", database.host, database.port, database.database);

    let store = Arc::new(PgObservationStore::connect(&database).await?);
    store.ensure_schema().await?;

    let state = ApiState::new(store.clone(), ApiMetrics::new()?);
    let result = api::serve_api(&args.listen, state, shutdown).await;

    store.close().await;
    info!("Query API shutdown complete");
    result
}

// =============================================================================
// Runtime Plumbing
// =============================================================================

fn spawn_metrics_server(port: u16, metrics: &PipelineMetrics, shutdown: CancellationToken) {
    let addr = format!("0.0.0.0:{}", port);
    let registry = metrics.registry().clone();

    tokio::spawn(async move {
        if let Err(e) = http::serve_metrics(&addr, registry, shutdown).await {
            error!("Metrics server error: {}", e);
        }
    });
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received interrupt, shutting down");
                shutdown.cancel();
            }
            Err(e) => error!("Failed to listen for interrupt: {}", e),
        }
    });
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &LogArgs) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["lapin=warn", "sqlx=warn", "hyper=warn", "reqwest=warn"] {
        let directive = directive
            .parse()
            .map_err(|e| Error::Config(format!("Invalid log directive {}: {}", directive, e)))?;
        filter = filter.add_directive(directive);
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

//! Infrastructure Adapters
//!
//! Implementations of the domain ports, following the Port/Adapter
//! (Hexagonal) pattern.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Ports (domain::ports)                     │
//! │  StationSource │ ObservationPublisher │ ObservationStore      │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Adapters (this module)                     │
//! │  MeteostatSource │ SimulatedSource │ AmqpPublisher            │
//! │  PgObservationStore │ InMemoryObservationStore │ InMemoryBroker│
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod amqp;
mod memory;
mod meteostat;
mod postgres;
mod simulated;

pub use amqp::{observation_properties, AmqpPublisher};
pub use memory::{InMemoryBroker, InMemoryDelivery, InMemoryObservationStore};
pub use meteostat::{MeteostatConfig, MeteostatSource, DEFAULT_PRESSURE_HPA};
pub use postgres::{DatabaseConfig, PgObservationStore, SCHEMA_SQL};
pub use simulated::SimulatedSource;

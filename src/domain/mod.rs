//! Domain Layer
//!
//! - **Observation** (`observation.rs`) - the entity, its wire schema and validity table
//! - **Ports** (`ports.rs`) - trait abstractions the pipeline stages depend on
//!
//! # Usage
//!
//! ```ignore
//! use weather_ingest::domain::{Observation, ObservationStore};
//!
//! async fn persist<S: ObservationStore>(store: &S, payload: &[u8]) -> Result<u64> {
//!     let observation = Observation::decode(payload, None)?;
//!     if !observation.is_valid() {
//!         return Ok(0);
//!     }
//!     store.insert(&observation).await
//! }
//! ```

pub mod observation;
pub mod ports;

pub use observation::{
    bounds_for, Field, FieldBounds, Observation, ObservationMessage, ValidationError,
    FIELD_BOUNDS, MESSAGE_TYPE_V1,
};
pub use ports::{LogQuery, ObservationPublisher, ObservationStore, StationSource};

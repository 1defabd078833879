//! Consumer - validate, persist, acknowledge
//!
//! The protocol (`protocol.rs`) decides each delivery's fate independently of
//! the broker client; the worker (`worker.rs`) feeds it from AMQP.

mod protocol;
pub mod worker;

pub use protocol::{Consumer, Disposition, Outcome};
pub use worker::PREFETCH_COUNT;

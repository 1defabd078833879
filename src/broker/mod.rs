//! Broker module
//!
//! AMQP topology declarations and the long-lived session both pipeline
//! stages connect through.

mod connection;
pub mod topology;

pub use connection::{AmqpSession, BrokerConfig};
pub use topology::{topic_matches, BINDING_PATTERN, EXCHANGE, MAX_PRIORITY, QUEUE};

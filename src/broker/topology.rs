//! Broker Topology
//!
//! One durable topic exchange as the single entry point, one durable
//! priority-capable queue bound to it with a match-all pattern.
//!
//! ```text
//!   producer ──(routing key = station)──▶ weather.topic ──[#]──▶ weather.queue ──▶ consumer
//! ```
//!
//! Declarations are idempotent: re-declaring with the same arguments is a
//! no-op on the broker, so both sides declare what they rely on.

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, ExchangeKind};
use tracing::{debug, instrument};

use crate::error::Result;

/// Topic exchange every producer publishes to
pub const EXCHANGE: &str = "weather.topic";

/// Durable queue collecting every station's observations
pub const QUEUE: &str = "weather.queue";

/// Binding pattern; matches every routing key
pub const BINDING_PATTERN: &str = "#";

/// Priority levels the queue is provisioned with
pub const MAX_PRIORITY: u8 = 10;

/// AMQP delivery mode that asks the broker to persist the message
pub const PERSISTENT_DELIVERY: u8 = 2;

/// Declare the durable topic exchange.
#[instrument(skip(channel))]
pub async fn declare_exchange(channel: &Channel) -> Result<()> {
    channel
        .exchange_declare(
            EXCHANGE,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    debug!("Declared exchange {}", EXCHANGE);
    Ok(())
}

/// Declare the exchange, the priority queue and the match-all binding.
#[instrument(skip(channel))]
pub async fn declare_consumer_topology(channel: &Channel) -> Result<()> {
    declare_exchange(channel).await?;

    channel
        .queue_declare(
            QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            queue_arguments(),
        )
        .await?;

    channel
        .queue_bind(
            QUEUE,
            EXCHANGE,
            BINDING_PATTERN,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    debug!(
        "Declared queue {} bound to {} with '{}'",
        QUEUE, EXCHANGE, BINDING_PATTERN
    );
    Ok(())
}

fn queue_arguments() -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        "x-max-priority".into(),
        AMQPValue::LongInt(i32::from(MAX_PRIORITY)),
    );
    args
}

// =============================================================================
// Topic Matching
// =============================================================================

/// AMQP topic match: `*` is exactly one word, `#` is zero or more words.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && match_words(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && match_words(rest, &key[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::ShortString;
    use proptest::prelude::*;

    #[test]
    fn test_topology_names() {
        assert_eq!(EXCHANGE, "weather.topic");
        assert_eq!(QUEUE, "weather.queue");
        assert_eq!(BINDING_PATTERN, "#");
        assert_eq!(MAX_PRIORITY, 10);
    }

    #[test]
    fn test_queue_arguments_carry_max_priority() {
        let args = queue_arguments();
        let value = args.inner().get(&ShortString::from("x-max-priority"));
        assert_eq!(value, Some(&AMQPValue::LongInt(10)));
    }

    #[test]
    fn test_hash_matches_station_keys() {
        assert!(topic_matches("#", "LEMD"));
        assert!(topic_matches("#", "es.madrid.LEMD"));
        assert!(topic_matches("#", ""));
    }

    #[test]
    fn test_star_matches_one_word() {
        assert!(topic_matches("es.*", "es.LEMD"));
        assert!(!topic_matches("es.*", "es"));
        assert!(!topic_matches("es.*", "es.madrid.LEMD"));
    }

    #[test]
    fn test_literal_and_mixed_patterns() {
        assert!(topic_matches("LEMD", "LEMD"));
        assert!(!topic_matches("LEMD", "LEBL"));
        assert!(topic_matches("es.#.LEMD", "es.LEMD"));
        assert!(topic_matches("es.#.LEMD", "es.madrid.barajas.LEMD"));
        assert!(!topic_matches("es.#.LEMD", "fr.LEMD"));
    }

    proptest! {
        #[test]
        fn prop_match_all_binding_matches_any_key(key in "[A-Za-z0-9]{1,8}(\\.[A-Za-z0-9]{1,8}){0,3}") {
            prop_assert!(topic_matches(BINDING_PATTERN, &key));
        }

        #[test]
        fn prop_literal_pattern_matches_itself(key in "[A-Z]{4}") {
            prop_assert!(topic_matches(&key, &key));
        }
    }
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Declaration Options
//!
//! This module provides the options used when asserting the configured queue.
//! It includes the Dead Letter and TTL arguments understood by RabbitMQ, plus
//! arbitrary extension arguments.

use crate::fields;
use lapin::{
    options::QueueDeclareOptions,
    types::{AMQPValue, FieldTable, LongInt, LongString, ShortString},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Constant for the header field used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Constant for the header field used to specify a dead letter routing key
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
/// Constant for the header field used to specify message TTL
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";

/// Declaration options for the configured queue.
///
/// Unset flags fall back to the broker defaults, except `durable` which
/// defaults to `true`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    pub durable: Option<bool>,
    pub exclusive: Option<bool>,
    pub auto_delete: Option<bool>,
    pub arguments: QueueArguments,
}

/// Extra `x-` arguments passed along with the queue declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueArguments {
    pub dead_letter_exchange: Option<String>,
    pub dead_letter_routing_key: Option<String>,
    /// TTL in milliseconds
    pub message_ttl: Option<i32>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl QueueOptions {
    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = Some(durable);
        self
    }

    /// Makes the queue exclusive to the connection.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = Some(true);
        self
    }

    /// Sets the queue to auto-delete when no longer used.
    pub fn auto_delete(mut self) -> Self {
        self.auto_delete = Some(true);
        self
    }

    /// Routes rejected or expired messages to `exchange`, optionally with a new routing key.
    pub fn dead_letter(mut self, exchange: &str, routing_key: Option<&str>) -> Self {
        self.arguments.dead_letter_exchange = Some(exchange.to_owned());
        self.arguments.dead_letter_routing_key = routing_key.map(str::to_owned);
        self
    }

    /// Sets the message Time-To-Live (TTL) for the queue, in milliseconds.
    pub fn ttl(mut self, ttl: i32) -> Self {
        self.arguments.message_ttl = Some(ttl);
        self
    }

    /// Adds an arbitrary extension argument.
    pub fn argument(mut self, key: &str, value: Value) -> Self {
        self.arguments.extra.insert(key.to_owned(), value);
        self
    }

    pub(crate) fn declare_options(&self) -> QueueDeclareOptions {
        QueueDeclareOptions {
            passive: false,
            durable: self.durable.unwrap_or(true),
            exclusive: self.exclusive.unwrap_or_default(),
            auto_delete: self.auto_delete.unwrap_or_default(),
            nowait: false,
        }
    }

    pub(crate) fn field_table(&self) -> FieldTable {
        let mut queue_args = BTreeMap::<ShortString, AMQPValue>::new();

        fields::extend_btree(&self.arguments.extra, &mut queue_args);

        if let Some(exchange) = &self.arguments.dead_letter_exchange {
            queue_args.insert(
                ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
                AMQPValue::LongString(LongString::from(exchange.as_str())),
            );
        }

        if let Some(key) = &self.arguments.dead_letter_routing_key {
            queue_args.insert(
                ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
                AMQPValue::LongString(LongString::from(key.as_str())),
            );
        }

        if let Some(ttl) = self.arguments.message_ttl {
            queue_args.insert(
                ShortString::from(AMQP_HEADERS_MESSAGE_TTL),
                AMQPValue::LongInt(LongInt::from(ttl)),
            );
        }

        FieldTable::from(queue_args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn durable_defaults_to_true() {
        let options = QueueOptions::default().declare_options();
        assert!(options.durable);
        assert!(!options.exclusive);
        assert!(!options.auto_delete);

        let options = QueueOptions::default().durable(false).declare_options();
        assert!(!options.durable);
    }

    #[test]
    fn renders_dead_letter_and_ttl_arguments() {
        let table = QueueOptions::default()
            .dead_letter("dlx", Some("dead"))
            .ttl(60_000)
            .argument("x-max-length", json!(100))
            .field_table();
        let args = table.inner();

        assert_eq!(
            args.get(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            Some(&AMQPValue::LongString(LongString::from("dlx")))
        );
        assert_eq!(
            args.get(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
            Some(&AMQPValue::LongString(LongString::from("dead")))
        );
        assert_eq!(
            args.get(AMQP_HEADERS_MESSAGE_TTL),
            Some(&AMQPValue::LongInt(60_000))
        );
        assert_eq!(args.get("x-max-length"), Some(&AMQPValue::LongLongInt(100)));
    }

    #[test]
    fn deserializes_from_json() {
        let options: QueueOptions = serde_json::from_value(json!({
            "exclusive": true,
            "arguments": {
                "dead_letter_exchange": "dlx",
                "x-queue-type": "quorum"
            }
        }))
        .unwrap();

        assert_eq!(options.exclusive, Some(true));
        assert_eq!(options.arguments.dead_letter_exchange.as_deref(), Some("dlx"));
        assert_eq!(options.arguments.extra.get("x-queue-type"), Some(&json!("quorum")));
    }
}

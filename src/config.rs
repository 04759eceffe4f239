// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Configuration
//!
//! The configuration handed to the connection manager, the publisher and the
//! consumer. It can be deserialized, built in code, or read from the process
//! environment.

use crate::{errors::AmqpError, exchange::ExchangeKind, queue::QueueOptions};
use serde::{Deserialize, Serialize};
use std::env;

pub const RABBITMQ_URL_ENV_KEY: &str = "RABBITMQ_URL";
pub const RABBITMQ_QUEUE_ENV_KEY: &str = "RABBITMQ_QUEUE";
pub const RABBITMQ_EXCHANGE_ENV_KEY: &str = "RABBITMQ_EXCHANGE";
pub const RABBITMQ_EXCHANGE_TYPE_ENV_KEY: &str = "RABBITMQ_EXCHANGE_TYPE";
pub const RABBITMQ_ROUTING_KEY_ENV_KEY: &str = "RABBITMQ_ROUTING_KEY";
pub const RABBITMQ_PREFETCH_COUNT_ENV_KEY: &str = "RABBITMQ_PREFETCH_COUNT";

/// Connection and topology settings for a single component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RabbitMQConfig {
    pub url: String,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub exchange_type: Option<ExchangeKind>,
    #[serde(default)]
    pub routing_key: Option<String>,
    #[serde(default)]
    pub prefetch_count: Option<u16>,
    #[serde(default)]
    pub queue_options: Option<QueueOptions>,
}

impl RabbitMQConfig {
    pub fn new(url: &str) -> Self {
        RabbitMQConfig {
            url: url.to_owned(),
            ..Default::default()
        }
    }

    pub fn queue(mut self, queue: &str) -> Self {
        self.queue = Some(queue.to_owned());
        self
    }

    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange = Some(exchange.to_owned());
        self
    }

    pub fn exchange_type(mut self, kind: ExchangeKind) -> Self {
        self.exchange_type = Some(kind);
        self
    }

    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = Some(key.to_owned());
        self
    }

    pub fn prefetch_count(mut self, count: u16) -> Self {
        self.prefetch_count = Some(count);
        self
    }

    pub fn queue_options(mut self, options: QueueOptions) -> Self {
        self.queue_options = Some(options);
        self
    }

    /// Reads the configuration from `RABBITMQ_*` environment variables.
    ///
    /// `RABBITMQ_URL` is required, every other key is optional. Empty values
    /// are treated as unset.
    pub fn from_env() -> Result<Self, AmqpError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, AmqpError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let Some(url) = read(RABBITMQ_URL_ENV_KEY) else {
            return Err(AmqpError::ConfigurationError(format!(
                "{} is required",
                RABBITMQ_URL_ENV_KEY
            )));
        };

        let exchange_type = match read(RABBITMQ_EXCHANGE_TYPE_ENV_KEY) {
            Some(value) => Some(value.parse::<ExchangeKind>()?),
            None => None,
        };

        let prefetch_count = match read(RABBITMQ_PREFETCH_COUNT_ENV_KEY) {
            Some(value) => Some(value.parse::<u16>().map_err(|err| {
                AmqpError::ConfigurationError(format!(
                    "{}: {}",
                    RABBITMQ_PREFETCH_COUNT_ENV_KEY, err
                ))
            })?),
            None => None,
        };

        Ok(RabbitMQConfig {
            url,
            queue: read(RABBITMQ_QUEUE_ENV_KEY),
            exchange: read(RABBITMQ_EXCHANGE_ENV_KEY),
            exchange_type,
            routing_key: read(RABBITMQ_ROUTING_KEY_ENV_KEY),
            prefetch_count,
            queue_options: None,
        })
    }

    pub(crate) fn exchange_kind(&self) -> ExchangeKind {
        self.exchange_type.unwrap_or_default()
    }

    pub(crate) fn binding_key(&self) -> &str {
        self.routing_key.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn reads_environment() {
        let cfg = RabbitMQConfig::from_lookup(lookup(&[
            (RABBITMQ_URL_ENV_KEY, "amqp://localhost:5672"),
            (RABBITMQ_QUEUE_ENV_KEY, "users"),
            (RABBITMQ_EXCHANGE_ENV_KEY, "events"),
            (RABBITMQ_EXCHANGE_TYPE_ENV_KEY, "topic"),
            (RABBITMQ_PREFETCH_COUNT_ENV_KEY, "10"),
            (RABBITMQ_ROUTING_KEY_ENV_KEY, ""),
        ]))
        .unwrap();

        assert_eq!(
            cfg,
            RabbitMQConfig::new("amqp://localhost:5672")
                .queue("users")
                .exchange("events")
                .exchange_type(ExchangeKind::Topic)
                .prefetch_count(10)
        );
        assert_eq!(cfg.binding_key(), "");
    }

    #[test]
    fn url_is_required() {
        let err = RabbitMQConfig::from_lookup(lookup(&[(RABBITMQ_QUEUE_ENV_KEY, "q")])).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn rejects_invalid_prefetch() {
        let err = RabbitMQConfig::from_lookup(lookup(&[
            (RABBITMQ_URL_ENV_KEY, "amqp://localhost"),
            (RABBITMQ_PREFETCH_COUNT_ENV_KEY, "many"),
        ]))
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn exchange_kind_defaults_to_direct() {
        let cfg: RabbitMQConfig =
            serde_json::from_str(r#"{"url":"amqp://localhost","exchange":"events"}"#).unwrap();
        assert_eq!(cfg.exchange_kind(), ExchangeKind::Direct);
        assert_eq!(cfg.queue, None);
    }
}

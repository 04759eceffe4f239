// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! This module provides functionality for publishing messages either straight
//! to the configured queue or to the configured exchange with a routing key.
//! Payloads are encoded with a [`Codec`] (JSON by default) and the current
//! OpenTelemetry context is propagated in the message headers.

use crate::{
    channel::AmqpConnector,
    codec::{Codec, JsonCodec},
    config::RabbitMQConfig,
    connection::RabbitMQConnection,
    errors::AmqpError,
    fields, logging, otel,
};
use chrono::Utc;
use lapin::{
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties,
};
use serde::Serialize;
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tracing::{debug, error, trace, Instrument};
use uuid::Uuid;

const COMPONENT: &str = "RabbitMQ_Publisher";

/// AMQP delivery mode for messages that survive a broker restart
pub const DELIVERY_MODE_PERSISTENT: u8 = 2;
/// AMQP delivery mode for messages kept in memory only
pub const DELIVERY_MODE_TRANSIENT: u8 = 1;

/// Per-message publishing options.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishOptions {
    /// Delivery mode 2 when set, 1 otherwise. Defaults to `true`
    pub persistent: bool,
    pub correlation_id: Option<String>,
    /// Application headers, sent next to the trace context entries
    pub headers: Option<HashMap<String, Value>>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        PublishOptions {
            persistent: true,
            correlation_id: None,
            headers: None,
        }
    }
}

impl PublishOptions {
    /// Keeps the message in memory only (delivery mode 1).
    pub fn transient(mut self) -> Self {
        self.persistent = false;
        self
    }

    /// Sets the correlation id property, also logged with every publish.
    pub fn correlation_id(mut self, id: &str) -> Self {
        self.correlation_id = Some(id.to_owned());
        self
    }

    /// Adds an application header. Values are converted to the matching AMQP
    /// field type, objects become nested field tables.
    pub fn header(mut self, key: &str, value: Value) -> Self {
        self.headers
            .get_or_insert_with(HashMap::default)
            .insert(key.to_owned(), value);
        self
    }
}

/// Publishes messages to the configured queue or exchange.
pub struct RabbitMQPublisher<C: Codec = JsonCodec> {
    config: Arc<RabbitMQConfig>,
    connection: RabbitMQConnection,
    codec: C,
}

impl RabbitMQPublisher<JsonCodec> {
    /// Creates a publisher connecting through `lapin`.
    ///
    /// Fails when neither a queue nor an exchange is configured.
    pub fn new(config: RabbitMQConfig) -> Result<Self, AmqpError> {
        Self::validate(&config)?;
        Ok(RabbitMQPublisher {
            connection: RabbitMQConnection::new(config.clone()),
            config: Arc::new(config),
            codec: JsonCodec,
        })
    }

    /// Creates a publisher that opens its connection through `connector`.
    ///
    /// # Parameters
    /// * `config` - Broker URL and the queue and/or exchange to publish to
    /// * `connector` - Client used to open the connection
    ///
    /// # Returns
    /// The publisher, or `MissingQueueOrExchange` when neither target is configured
    pub fn with_connector(
        config: RabbitMQConfig,
        connector: Arc<dyn AmqpConnector>,
    ) -> Result<Self, AmqpError> {
        Self::validate(&config)?;
        let config = Arc::new(config);
        Ok(RabbitMQPublisher {
            connection: RabbitMQConnection::with_connector(config.clone(), connector),
            config,
            codec: JsonCodec,
        })
    }

    fn validate(config: &RabbitMQConfig) -> Result<(), AmqpError> {
        if config.queue.is_none() && config.exchange.is_none() {
            error!("either queue or exchange must be configured");
            return Err(AmqpError::MissingQueueOrExchange);
        }
        Ok(())
    }
}

impl<C: Codec> RabbitMQPublisher<C> {
    /// Swaps the payload codec.
    pub fn with_codec<N: Codec>(self, codec: N) -> RabbitMQPublisher<N> {
        RabbitMQPublisher {
            config: self.config,
            connection: self.connection,
            codec,
        }
    }

    /// The connection manager owned by this publisher.
    pub fn connection(&self) -> &RabbitMQConnection {
        &self.connection
    }

    /// Sends `message` to the configured queue through the default exchange.
    ///
    /// # Parameters
    /// * `message` - Payload, encoded with the publisher's codec
    /// * `options` - Persistence, correlation id and headers, defaults when `None`
    ///
    /// # Returns
    /// The client's acknowledgment that the message was accepted for delivery.
    /// This is not a broker confirmation. Fails with `MissingQueue` when no
    /// queue is configured.
    pub async fn publish<T>(
        &self,
        message: &T,
        options: Option<PublishOptions>,
    ) -> Result<bool, AmqpError>
    where
        T: Serialize + ?Sized,
    {
        let options = options.unwrap_or_default();
        let correlation_id = options.correlation_id.as_deref().unwrap_or_default();
        let span = logging::component_span(COMPONENT, "publish");

        async {
            let Some(queue) = self.config.queue.as_deref() else {
                error!(correlation_id, "no queue configured for this publisher");
                return Err(AmqpError::MissingQueue);
            };

            debug!(correlation_id, queue, "publishing message to queue");
            let payload = self.codec.encode(message)?;
            let properties = self.properties(&options);

            match self
                .connection
                .with_channel(|channel| async move {
                    channel.basic_publish("", queue, &payload, properties).await
                })
                .await
            {
                Ok(acked) => {
                    debug!(correlation_id, queue, acked, "message published successfully");
                    Ok(acked)
                }
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        correlation_id, queue, "failed to publish message"
                    );
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Publishes `message` to the configured exchange with `routing_key`.
    ///
    /// Fire-and-forget: no delivery acknowledgment is reported.
    pub async fn publish_to_exchange<T>(
        &self,
        message: &T,
        routing_key: &str,
        options: Option<PublishOptions>,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + ?Sized,
    {
        let options = options.unwrap_or_default();
        let correlation_id = options.correlation_id.as_deref().unwrap_or_default();
        let span = logging::component_span(COMPONENT, "publish_to_exchange");

        async {
            let Some(exchange) = self.config.exchange.as_deref() else {
                error!(correlation_id, routing_key, "no exchange configured for this publisher");
                return Err(AmqpError::MissingExchange);
            };

            debug!(correlation_id, exchange, routing_key, "publishing message to exchange");
            let payload = self.codec.encode(message)?;
            trace!(message_size = payload.len(), "serialized message for publishing");
            let properties = self.properties(&options);

            match self
                .connection
                .with_channel(|channel| async move {
                    channel
                        .basic_publish(exchange, routing_key, &payload, properties)
                        .await
                })
                .await
            {
                Ok(_) => {
                    debug!(correlation_id, exchange, routing_key, "message published to exchange");
                    Ok(())
                }
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        correlation_id, exchange, routing_key, "failed to publish message to exchange"
                    );
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Closes the underlying connection.
    pub async fn close(&self) {
        debug!(
            queue = self.config.queue.as_deref(),
            exchange = self.config.exchange.as_deref(),
            "closing publisher connection"
        );
        self.connection.close().await;
    }

    fn properties(&self, options: &PublishOptions) -> BasicProperties {
        let mut btree = BTreeMap::<ShortString, AMQPValue>::default();

        otel::inject_current(&mut btree);

        if let Some(headers) = &options.headers {
            fields::extend_btree(headers, &mut btree);
        }

        let mut properties = BasicProperties::default()
            .with_content_type(ShortString::from(self.codec.content_type()))
            .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
            .with_timestamp(Utc::now().timestamp().unsigned_abs())
            .with_delivery_mode(if options.persistent {
                DELIVERY_MODE_PERSISTENT
            } else {
                DELIVERY_MODE_TRANSIENT
            });

        if let Some(id) = &options.correlation_id {
            properties = properties.with_correlation_id(ShortString::from(id.as_str()));
        }

        if !btree.is_empty() {
            properties = properties.with_headers(FieldTable::from(btree));
        }

        properties
    }
}

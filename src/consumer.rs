// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Consumer
//!
//! This module provides functionality for consuming and processing messages
//! from the configured queue. Each delivery is decoded, handed to a
//! [`MessageHandler`], and then settled:
//! 1. Successfully handled messages are acknowledged
//! 2. Messages that fail to decode or to be handled are negatively
//!    acknowledged without requeue, so the broker drops or dead-letters them
//! 3. Nothing is settled explicitly when the consumer runs in `no_ack` mode
//!
//! Failures are contained per message and never stop the consumer.

use crate::{
    channel::{AmqpChannel, AmqpConnector, ConsumeOptions, Delivery, DeliveryCallback},
    codec::{Codec, JsonCodec},
    config::RabbitMQConfig,
    connection::RabbitMQConnection,
    errors::AmqpError,
    logging, otel,
};
use async_trait::async_trait;
use futures_util::FutureExt;
use opentelemetry::{
    global,
    trace::{Span, Status},
};
use serde::de::DeserializeOwned;
use std::{
    borrow::Cow,
    future::Future,
    marker::PhantomData,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::{debug, error, info, warn, Instrument};

const COMPONENT: &str = "RabbitMQ_Consumer";

/// Processes decoded messages.
///
/// Returning an error rejects the message without requeue.
#[async_trait]
pub trait MessageHandler<T>: Send + Sync {
    async fn handle(&self, message: T) -> Result<(), AmqpError>;
}

#[async_trait]
impl<T, F, Fut> MessageHandler<T> for F
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), AmqpError>> + Send + 'static,
{
    async fn handle(&self, message: T) -> Result<(), AmqpError> {
        (self)(message).await
    }
}

/// How a delivery is settled with the broker once processing finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    /// Negative acknowledgment without requeue
    Reject,
    /// The broker already acknowledged the delivery
    Skip,
}

/// Decides how a processed delivery is settled.
pub fn settle(outcome: &Result<(), AmqpError>, no_ack: bool) -> Settlement {
    match (no_ack, outcome) {
        (true, _) => Settlement::Skip,
        (false, Ok(_)) => Settlement::Ack,
        (false, Err(_)) => Settlement::Reject,
    }
}

/// Consumes messages from the configured queue.
pub struct RabbitMQConsumer<C: Codec = JsonCodec> {
    config: Arc<RabbitMQConfig>,
    queue: String,
    connection: RabbitMQConnection,
    codec: Arc<C>,
    consumer_tag: Mutex<Option<String>>,
}

impl RabbitMQConsumer<JsonCodec> {
    /// Creates a consumer connecting through `lapin`.
    ///
    /// Fails when no queue is configured.
    pub fn new(config: RabbitMQConfig) -> Result<Self, AmqpError> {
        let queue = Self::validate(&config)?;
        Ok(RabbitMQConsumer {
            connection: RabbitMQConnection::new(config.clone()),
            config: Arc::new(config),
            queue,
            codec: Arc::new(JsonCodec),
            consumer_tag: Mutex::new(None),
        })
    }

    /// Creates a consumer that opens its connection through `connector`.
    ///
    /// Fails with `MissingQueue` when no queue is configured.
    pub fn with_connector(
        config: RabbitMQConfig,
        connector: Arc<dyn AmqpConnector>,
    ) -> Result<Self, AmqpError> {
        let queue = Self::validate(&config)?;
        let config = Arc::new(config);
        Ok(RabbitMQConsumer {
            connection: RabbitMQConnection::with_connector(config.clone(), connector),
            config,
            queue,
            codec: Arc::new(JsonCodec),
            consumer_tag: Mutex::new(None),
        })
    }

    fn validate(config: &RabbitMQConfig) -> Result<String, AmqpError> {
        match &config.queue {
            Some(queue) => Ok(queue.clone()),
            None => {
                error!("queue must be configured for consumer");
                Err(AmqpError::MissingQueue)
            }
        }
    }
}

impl<C: Codec> RabbitMQConsumer<C> {
    /// Swaps the payload codec.
    pub fn with_codec<N: Codec>(self, codec: N) -> RabbitMQConsumer<N> {
        RabbitMQConsumer {
            config: self.config,
            queue: self.queue,
            connection: self.connection,
            codec: Arc::new(codec),
            consumer_tag: self.consumer_tag,
        }
    }

    /// The connection manager owned by this consumer.
    pub fn connection(&self) -> &RabbitMQConnection {
        &self.connection
    }

    /// Tag of the active consumer registration, if any.
    pub fn consumer_tag(&self) -> Option<String> {
        self.tag().clone()
    }

    fn tag(&self) -> MutexGuard<'_, Option<String>> {
        self.consumer_tag
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `handler` for messages on the configured queue and returns
    /// the broker-assigned consumer tag.
    pub async fn consume<T, H>(
        &self,
        handler: H,
        options: Option<ConsumeOptions>,
    ) -> Result<String, AmqpError>
    where
        T: DeserializeOwned + Send + 'static,
        H: MessageHandler<T> + 'static,
    {
        let options = options.unwrap_or_default();
        let queue = self.queue.as_str();
        let span = logging::component_span(COMPONENT, "consume");

        let registered = self
            .connection
            .with_channel(|channel| async move {
                if let Some(prefetch) = self.config.prefetch_count {
                    debug!(prefetch, "setting prefetch count");
                    channel.basic_qos(prefetch).await?;
                }

                let callback = delivery_callback::<T, H, C>(
                    channel.clone(),
                    self.codec.clone(),
                    Arc::new(handler),
                    queue.to_owned(),
                    options.no_ack,
                );

                channel.basic_consume(queue, &options, callback).await
            })
            .instrument(span)
            .await;

        match registered {
            Ok(tag) => {
                *self.tag() = Some(tag.clone());
                info!(consumer_tag = tag.as_str(), queue, "consumer started");
                Ok(tag)
            }
            Err(err) => {
                error!(error = err.to_string(), queue, "failed to start consumer");
                Err(err)
            }
        }
    }

    /// Cancels `consumer_tag`, or the active registration when `None`.
    ///
    /// Without any tag to cancel this logs a warning and returns without
    /// contacting the broker. The stored tag is forgotten after every
    /// successful cancel.
    ///
    /// # Parameters
    /// * `consumer_tag` - Tag to cancel, defaults to the stored one
    ///
    /// # Returns
    /// Ok(()) on success or the broker failure, in which case the stored tag is kept
    pub async fn cancel(&self, consumer_tag: Option<&str>) -> Result<(), AmqpError> {
        let queue = self.queue.as_str();
        let target = match consumer_tag {
            Some(tag) => Some(tag.to_owned()),
            None => self.consumer_tag(),
        };

        let Some(target) = target else {
            warn!(queue, "attempted to cancel consumer with no active consumer tag");
            return Ok(());
        };

        debug!(consumer_tag = target.as_str(), queue, "attempting to cancel consumer");

        let span = logging::component_span(COMPONENT, "cancel");
        if let Err(err) = self
            .connection
            .with_channel(|channel| async move { channel.basic_cancel(&target).await })
            .instrument(span)
            .await
        {
            error!(error = err.to_string(), queue, "failed to cancel consumer");
            return Err(err);
        }

        *self.tag() = None;
        info!(queue, "successfully cancelled consumer");
        Ok(())
    }

    /// Cancels the active registration, if any, then closes the connection.
    pub async fn close(&self) -> Result<(), AmqpError> {
        let queue = self.queue.as_str();
        let has_active_consumer = self.consumer_tag().is_some();
        debug!(queue, has_active_consumer, "closing consumer connection");

        if has_active_consumer {
            if let Err(err) = self.cancel(None).await {
                error!(error = err.to_string(), queue, "failed to close consumer connection");
                return Err(err);
            }
        }

        self.connection.close().await;
        *self.tag() = None;
        info!(queue, "consumer connection closed successfully");
        Ok(())
    }
}

fn delivery_callback<T, H, C>(
    channel: Arc<dyn AmqpChannel>,
    codec: Arc<C>,
    handler: Arc<H>,
    queue: String,
    no_ack: bool,
) -> DeliveryCallback
where
    T: DeserializeOwned + Send + 'static,
    H: MessageHandler<T> + 'static,
    C: Codec,
{
    let processor = Arc::new(DeliveryProcessor {
        channel,
        codec,
        handler,
        queue,
        no_ack,
        _message: PhantomData,
    });

    Arc::new(move |delivery| {
        let processor = processor.clone();
        async move { processor.process(delivery).await }.boxed()
    })
}

struct DeliveryProcessor<T, H, C> {
    channel: Arc<dyn AmqpChannel>,
    codec: Arc<C>,
    handler: Arc<H>,
    queue: String,
    no_ack: bool,
    _message: PhantomData<fn() -> T>,
}

impl<T, H, C> DeliveryProcessor<T, H, C>
where
    T: DeserializeOwned + Send + 'static,
    H: MessageHandler<T> + 'static,
    C: Codec,
{
    async fn process(&self, delivery: Option<Delivery>) {
        let Some(delivery) = delivery else {
            warn!(queue = self.queue.as_str(), "received null message");
            return;
        };

        let correlation_id = delivery.correlation_id();
        let span = logging::message_span(&self.queue, correlation_id.as_deref());

        self.handle(delivery).instrument(span).await
    }

    async fn handle(&self, delivery: Delivery) {
        let mut span = otel::new_span(
            &delivery.properties,
            &global::tracer(otel::CONSUMER_TRACER),
            &self.queue,
        );

        let outcome = match self.codec.decode::<T>(&delivery.data) {
            Ok(message) => {
                debug!(size = delivery.data.len(), "processing message");
                self.handler.handle(message).await
            }
            Err(err) => Err(err),
        };

        match &outcome {
            Ok(_) => span.set_status(Status::Ok),
            Err(err) => {
                error!(error = err.to_string(), "error processing message");
                span.record_error(err);
                span.set_status(Status::Error {
                    description: Cow::from(err.to_string()),
                });
            }
        }

        match settle(&outcome, self.no_ack) {
            Settlement::Ack => match self.channel.basic_ack(delivery.delivery_tag).await {
                Ok(_) => debug!("message acknowledged"),
                Err(err) => error!(error = err.to_string(), "error to ack msg"),
            },
            Settlement::Reject => match self.channel.basic_nack(delivery.delivery_tag, false).await {
                Ok(_) => debug!("message negatively acknowledged"),
                Err(err) => error!(error = err.to_string(), "error to nack msg"),
            },
            Settlement::Skip => {}
        }
    }
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # lapin Client
//!
//! This module implements the client seam on top of `lapin`. It establishes
//! connections, opens channels, and drives consumer streams on the tokio
//! runtime.

use crate::{
    channel::{
        AmqpChannel, AmqpConnection, AmqpConnector, ConnectionEvent, ConnectionEventCallback,
        ConsumeOptions, Delivery, DeliveryCallback,
    },
    errors::AmqpError,
    exchange::ExchangeKind,
    queue::QueueOptions,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
        BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions,
    },
    publisher_confirm::Confirmation,
    types::{FieldTable, LongString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};
use tracing::{debug, error, warn};

const REPLY_SUCCESS: u16 = 200;

/// Opens `lapin` connections.
#[derive(Debug, Clone, Default)]
pub struct LapinConnector {
    connection_name: Option<String>,
}

impl LapinConnector {
    /// Creates a connector advertising `name` as the client connection name.
    pub fn named(name: &str) -> Self {
        LapinConnector {
            connection_name: Some(name.to_owned()),
        }
    }
}

#[async_trait]
impl AmqpConnector for LapinConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn AmqpConnection>, AmqpError> {
        debug!("creating amqp connection...");
        let mut options = ConnectionProperties::default();
        if let Some(name) = &self.connection_name {
            options = options.with_connection_name(LongString::from(name.as_str()));
        }

        match Connection::connect(url, options).await {
            Ok(conn) => {
                debug!("amqp connected");
                Ok(Arc::new(LapinConnection { inner: conn }))
            }
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError(err.to_string()))
            }
        }
    }
}

pub struct LapinConnection {
    inner: Connection,
}

#[async_trait]
impl AmqpConnection for LapinConnection {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        debug!("creating amqp channel...");
        match self.inner.create_channel().await {
            Ok(c) => {
                debug!("channel created");
                Ok(Arc::new(LapinChannel {
                    inner: c,
                    cancellations: Cancellations::default(),
                }))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }
    }

    // lapin reports broker-initiated closes through the error hook as well.
    fn on_event(&self, callback: ConnectionEventCallback) {
        self.inner
            .on_error(move |err| callback(ConnectionEvent::Error(err.to_string())));
    }

    fn is_connected(&self) -> bool {
        self.inner.status().connected()
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.inner
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|err| AmqpError::CloseError(err.to_string()))
    }
}

/// Consumers this client cancelled itself, keyed by tag.
///
/// A consumer stream that ends after its flag was raised is an orderly
/// shutdown, any other end is a broker-side cancel.
#[derive(Debug, Default)]
pub(crate) struct Cancellations {
    flags: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl Cancellations {
    pub(crate) fn register(&self, consumer_tag: &str) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        self.flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(consumer_tag.to_owned(), flag.clone());
        flag
    }

    pub(crate) fn cancel(&self, consumer_tag: &str) {
        if let Some(flag) = self
            .flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(consumer_tag)
        {
            flag.store(true, Ordering::SeqCst);
        }
    }

    pub(crate) fn cancel_all(&self) {
        for (_, flag) in self
            .flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
        {
            flag.store(true, Ordering::SeqCst);
        }
    }

    pub(crate) fn forget(&self, consumer_tag: &str) {
        self.flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(consumer_tag);
    }
}

pub struct LapinChannel {
    inner: Channel,
    cancellations: Cancellations,
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), AmqpError> {
        self.inner
            .exchange_declare(
                name,
                kind.into(),
                ExchangeDeclareOptions {
                    durable,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), name, "error to declare the exchange");
                AmqpError::DeclareExchangeError(name.to_owned())
            })
    }

    async fn queue_declare(&self, name: &str, options: &QueueOptions) -> Result<(), AmqpError> {
        match self
            .inner
            .queue_declare(name, options.declare_options(), options.field_table())
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), name, "error to declare the queue");
                Err(AmqpError::DeclareQueueError(name.to_owned()))
            }
            _ => Ok(()),
        }
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        self.inner
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to bind queue to exchange");
                AmqpError::BindingExchangeToQueueError(exchange.to_owned(), queue.to_owned())
            })
    }

    async fn basic_qos(&self, prefetch_count: u16) -> Result<(), AmqpError> {
        self.inner
            .basic_qos(prefetch_count, BasicQosOptions { global: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to configure qos");
                AmqpError::QoSDeclarationError(err.to_string())
            })
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<bool, AmqpError> {
        let confirm = self
            .inner
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                payload,
                properties,
            )
            .await
            .map_err(|err| AmqpError::PublishingError(err.to_string()))?;

        // Without confirm mode this resolves immediately to NotRequested.
        match confirm.await {
            Ok(Confirmation::Nack(_)) => Ok(false),
            Ok(_) => Ok(true),
            Err(err) => Err(AmqpError::PublishingError(err.to_string())),
        }
    }

    async fn basic_consume(
        &self,
        queue: &str,
        options: &ConsumeOptions,
        callback: DeliveryCallback,
    ) -> Result<String, AmqpError> {
        let mut consumer = match self
            .inner
            .basic_consume(
                queue,
                options.consumer_tag.as_deref().unwrap_or_default(),
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: options.no_ack,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::ConsumerDeclarationError(err.to_string()))
            }
            Ok(c) => Ok(c),
        }?;

        let tag = consumer.tag().as_str().to_owned();
        let cancelled = self.cancellations.register(&tag);

        tokio::spawn(async move {
            while let Some(result) = consumer.next().await {
                match result {
                    Ok(delivery) => {
                        callback(Some(Delivery {
                            delivery_tag: delivery.delivery_tag,
                            data: delivery.data,
                            properties: delivery.properties,
                            redelivered: delivery.redelivered,
                        }))
                        .await
                    }
                    Err(err) => error!(error = err.to_string(), "errors consume msg"),
                }
            }

            if cancelled.load(Ordering::SeqCst) {
                debug!("consumer stream ended after client cancel");
                return;
            }

            warn!("consumer stream ended");
            callback(None).await;
        });

        Ok(tag)
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.inner
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                AmqpError::AckMessageError
            })
    }

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.inner
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling nack msg");
                AmqpError::NackMessageError
            })
    }

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        self.cancellations.cancel(consumer_tag);
        match self
            .inner
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => {
                self.cancellations.forget(consumer_tag);
                Err(AmqpError::CancelConsumerError(err.to_string()))
            }
        }
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.cancellations.cancel_all();
        self.inner
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|err| AmqpError::CloseError(err.to_string()))
    }
}

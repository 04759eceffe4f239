// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Client Seam
//!
//! The connection manager, the publisher and the consumer never talk to
//! `lapin` directly. They go through the traits in this module, which cover
//! exactly the broker operations this crate needs. The `lapin`-backed
//! implementation lives in [`crate::client`].
//!
//! Connection-level events and message deliveries are surfaced through
//! callbacks registered on these traits. The state transitions they trigger
//! live in the connection manager and the consumer.

use crate::{errors::AmqpError, exchange::ExchangeKind, queue::QueueOptions};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use lapin::BasicProperties;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

/// Event raised by the client when a connection stops being usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection failed with the given error
    Error(String),
    /// The connection was closed
    Closed,
}

/// Callback invoked for every connection-level event.
pub type ConnectionEventCallback = Box<dyn Fn(ConnectionEvent) + Send + Sync>;

/// Callback invoked for every delivery on a consumer.
///
/// `None` signals that the consumer was cancelled on the broker side.
pub type DeliveryCallback = Arc<dyn Fn(Option<Delivery>) -> BoxFuture<'static, ()> + Send + Sync>;

/// A message delivered to a consumer.
#[derive(Debug, Clone, Default)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub data: Vec<u8>,
    pub properties: BasicProperties,
    pub redelivered: bool,
}

impl Delivery {
    pub fn correlation_id(&self) -> Option<String> {
        self.properties
            .correlation_id()
            .as_ref()
            .map(|id| id.as_str().to_owned())
    }
}

/// Options for registering a consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumeOptions {
    /// The broker acknowledges deliveries automatically
    pub no_ack: bool,
    /// Explicit consumer tag, the broker generates one when unset
    pub consumer_tag: Option<String>,
}

impl ConsumeOptions {
    pub fn no_ack(mut self) -> Self {
        self.no_ack = true;
        self
    }

    pub fn consumer_tag(mut self, tag: &str) -> Self {
        self.consumer_tag = Some(tag.to_owned());
        self
    }
}

/// Opens connections to a broker.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AmqpConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Arc<dyn AmqpConnection>, AmqpError>;
}

/// An open broker connection.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AmqpConnection: Send + Sync {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError>;

    /// Registers a callback for connection errors and closes.
    fn on_event(&self, callback: ConnectionEventCallback);

    fn is_connected(&self) -> bool;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// A channel on an open connection.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), AmqpError>;

    async fn queue_declare(&self, name: &str, options: &QueueOptions) -> Result<(), AmqpError>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError>;

    async fn basic_qos(&self, prefetch_count: u16) -> Result<(), AmqpError>;

    /// Publishes a message. The returned flag is `false` only when the
    /// broker explicitly refused it.
    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<bool, AmqpError>;

    /// Registers a consumer and returns the broker-assigned tag.
    async fn basic_consume(
        &self,
        queue: &str,
        options: &ConsumeOptions,
        callback: DeliveryCallback,
    ) -> Result<String, AmqpError>;

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError>;

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError>;

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

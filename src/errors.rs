// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the RabbitMQ Layer
//!
//! This module provides the error taxonomy shared by the connection manager,
//! the publisher and the consumer. Variants are grouped by the moment they can
//! surface: component construction, channel initialization, channel
//! operations, message handling and teardown.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Every variant owns plain strings so errors can be cloned and handed to all
/// callers awaiting the same pending connection attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// A publisher was created without a queue and without an exchange
    #[error("either queue or exchange must be configured")]
    MissingQueueOrExchange,

    /// A queue-bound operation was requested but no queue is configured
    #[error("no queue configured")]
    MissingQueue,

    /// An exchange-bound operation was requested but no exchange is configured
    #[error("no exchange configured")]
    MissingExchange,

    /// Invalid or incomplete configuration values
    #[error("invalid configuration `{0}`")]
    ConfigurationError(String),

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect `{0}`")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel `{0}`")]
    ChannelError(String),

    /// The pending connection attempt resolved but no channel is available
    #[error("channel initialization failed")]
    ChannelInitializationFailed,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error publishing a message
    #[error("failure to publish `{0}`")]
    PublishingError(String),

    /// Error registering a consumer on a queue
    #[error("failure to declare consumer `{0}`")]
    ConsumerDeclarationError(String),

    /// Error cancelling a consumer
    #[error("failure to cancel consumer `{0}`")]
    CancelConsumerError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error serializing a payload before publishing
    #[error("failure to serialize payload `{0}`")]
    SerializePayloadError(String),

    /// Error parsing a message payload
    #[error("failure to parse payload `{0}`")]
    ParsePayloadError(String),

    /// A message handler rejected a message
    #[error("failure to handle message `{0}`")]
    HandlerError(String),

    /// Error closing a channel or a connection
    #[error("failure to close `{0}`")]
    CloseError(String),
}

impl AmqpError {
    /// Whether the error was raised while validating the configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AmqpError::MissingQueueOrExchange
                | AmqpError::MissingQueue
                | AmqpError::MissingExchange
                | AmqpError::ConfigurationError(_)
        )
    }
}

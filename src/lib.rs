// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod fields;
mod otel;

pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod errors;
pub mod events;
pub mod exchange;
pub mod logging;
pub mod publisher;
pub mod queue;

pub use channel::{ConsumeOptions, Delivery};
pub use codec::{Codec, JsonCodec};
pub use config::RabbitMQConfig;
pub use connection::RabbitMQConnection;
pub use consumer::{MessageHandler, RabbitMQConsumer};
pub use errors::AmqpError;
pub use events::{EventMetadata, UserEvent};
pub use exchange::ExchangeKind;
pub use logging::{init_logging, LoggerConfig};
pub use publisher::{PublishOptions, RabbitMQPublisher};
pub use queue::QueueOptions;

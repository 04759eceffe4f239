// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Management
//!
//! `RabbitMQConnection` owns a lazily established connection and the single
//! channel opened on it. The first caller that needs a channel starts the
//! initialization. Concurrent callers await that same pending attempt instead
//! of racing their own connects.
//!
//! Initialization runs in this order:
//! 1. connect to the configured URL
//! 2. open one channel
//! 3. register the connection event hook that clears the state
//! 4. assert the exchange, if configured (durable, `direct` unless set)
//! 5. assert the queue, if configured (durable unless disabled)
//! 6. bind the queue to the exchange when both are configured
//!
//! A channel is never handed out before every step succeeded. There is no
//! automatic reconnection: a connection error only clears the state, and the
//! next call to [`RabbitMQConnection::get_channel`] connects again.
//!
//! Every state carries a generation number. Events raised by an older
//! connection, or attempts that finished after a `close`, never touch a newer
//! generation.

use crate::{
    channel::{AmqpChannel, AmqpConnection, AmqpConnector, ConnectionEvent},
    client::LapinConnector,
    config::RabbitMQConfig,
    errors::AmqpError,
    logging,
};
use futures_util::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};
use tracing::{debug, error, info, warn, Instrument};

const COMPONENT: &str = "RabbitMQ_Connection";

type PendingAttempt = Shared<BoxFuture<'static, Result<(), AmqpError>>>;

enum State {
    Absent,
    Connecting(PendingAttempt),
    Established {
        connection: Arc<dyn AmqpConnection>,
        channel: Arc<dyn AmqpChannel>,
    },
}

struct Inner {
    state: State,
    generation: u64,
}

impl Inner {
    /// Drops whatever the current generation holds and starts a new one.
    fn reset(&mut self) -> State {
        self.generation += 1;
        std::mem::replace(&mut self.state, State::Absent)
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lazily connected, self-cleaning access to a single AMQP channel.
pub struct RabbitMQConnection {
    config: Arc<RabbitMQConfig>,
    connector: Arc<dyn AmqpConnector>,
    inner: Arc<Mutex<Inner>>,
}

impl RabbitMQConnection {
    /// Creates a manager connecting through `lapin`. No I/O happens until
    /// the first channel is requested.
    pub fn new(config: RabbitMQConfig) -> Self {
        Self::with_connector(Arc::new(config), Arc::new(LapinConnector::default()))
    }

    /// Creates a manager that opens connections through `connector`.
    ///
    /// # Parameters
    /// * `config` - Broker URL and the topology asserted on every new channel
    /// * `connector` - Client used to open connections, mocked in tests
    pub fn with_connector(config: Arc<RabbitMQConfig>, connector: Arc<dyn AmqpConnector>) -> Self {
        RabbitMQConnection {
            config,
            connector,
            inner: Arc::new(Mutex::new(Inner {
                state: State::Absent,
                generation: 0,
            })),
        }
    }

    /// Configuration shared with the owning publisher or consumer.
    pub fn config(&self) -> &RabbitMQConfig {
        &self.config
    }

    /// Whether a connection and its channel are currently held.
    pub fn is_established(&self) -> bool {
        matches!(lock(&self.inner).state, State::Established { .. })
    }

    /// Returns the active channel, establishing the connection first when needed.
    ///
    /// Concurrent callers share one pending attempt. A held connection the
    /// client reports as closed is discarded and replaced.
    ///
    /// # Returns
    /// The channel, the initialization error shared by every awaiter, or
    /// `ChannelInitializationFailed` when the manager was closed meanwhile
    pub async fn get_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        let span = logging::component_span(COMPONENT, "get_channel");
        self.resolve_channel().instrument(span).await
    }

    async fn resolve_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        let pending = {
            let mut inner = lock(&self.inner);

            if let State::Established {
                connection,
                channel,
            } = &inner.state
            {
                if connection.is_connected() {
                    debug!("returning active channel");
                    return Ok(channel.clone());
                }
                warn!("held connection is no longer open, discarding it");
                inner.reset();
            }

            match &inner.state {
                State::Connecting(pending) => {
                    debug!("waiting for pending connection attempt");
                    pending.clone()
                }
                _ => {
                    debug!("no active channel, creating new connection attempt");
                    let attempt = initialize(
                        self.config.clone(),
                        self.connector.clone(),
                        Arc::downgrade(&self.inner),
                        inner.generation,
                    )
                    .boxed()
                    .shared();
                    inner.state = State::Connecting(attempt.clone());
                    attempt
                }
            }
        };

        if let Err(err) = pending.await {
            error!(error = err.to_string(), "error while waiting for connection");
            return Err(err);
        }

        match &lock(&self.inner).state {
            State::Established { channel, .. } => Ok(channel.clone()),
            _ => {
                error!("channel not available after initialization");
                Err(AmqpError::ChannelInitializationFailed)
            }
        }
    }

    /// Runs `f` with a ready channel and returns its outcome unchanged.
    pub async fn with_channel<F, Fut, T>(&self, f: F) -> Result<T, AmqpError>
    where
        F: FnOnce(Arc<dyn AmqpChannel>) -> Fut,
        Fut: Future<Output = Result<T, AmqpError>>,
    {
        let channel = self.get_channel().await?;
        f(channel).await
    }

    /// Applies a connection event to the current generation.
    pub fn handle_connection_event(&self, event: ConnectionEvent) {
        let generation = lock(&self.inner).generation;
        on_connection_event(&self.inner, generation, event);
    }

    /// Closes the channel and the connection, best-effort.
    ///
    /// Close failures are logged and swallowed. The state is always absent
    /// afterwards, so calling this repeatedly is safe.
    pub async fn close(&self) {
        let span = logging::component_span(COMPONENT, "close");
        async {
            debug!("closing rabbitmq connection...");
            let previous = lock(&self.inner).reset();

            let State::Established {
                connection,
                channel,
            } = previous
            else {
                debug!("no connection to close");
                return;
            };

            if let Err(err) = channel.close().await {
                error!(error = err.to_string(), "error closing rabbitmq channel");
            }

            match connection.close().await {
                Ok(_) => info!("rabbitmq connection closed successfully"),
                Err(err) => error!(error = err.to_string(), "error closing rabbitmq connection"),
            }
        }
        .instrument(span)
        .await
    }
}

fn on_connection_event(inner: &Mutex<Inner>, generation: u64, event: ConnectionEvent) {
    let mut inner = lock(inner);
    if inner.generation != generation {
        debug!(?event, "ignoring event from a previous connection");
        return;
    }

    match &event {
        ConnectionEvent::Error(err) => error!(error = %err, "rabbitmq connection error"),
        ConnectionEvent::Closed => info!("rabbitmq connection closed"),
    }

    debug!("cleaning up connection state");
    inner.reset();
}

async fn initialize(
    config: Arc<RabbitMQConfig>,
    connector: Arc<dyn AmqpConnector>,
    inner: Weak<Mutex<Inner>>,
    generation: u64,
) -> Result<(), AmqpError> {
    debug!("connecting to rabbitmq...");
    let outcome = establish(&config, connector.as_ref(), &inner, generation).await;

    let superseded = {
        let Some(inner) = inner.upgrade() else {
            return outcome.map(|_| ());
        };
        let mut inner = lock(&inner);

        match outcome {
            Ok((connection, channel)) if inner.generation == generation => {
                inner.state = State::Established {
                    connection,
                    channel,
                };
                info!("rabbitmq connection established");
                return Ok(());
            }
            Ok(opened) => opened,
            Err(err) => {
                error!(error = err.to_string(), "failed to initialize rabbitmq connection");
                if inner.generation == generation {
                    inner.reset();
                }
                return Err(err);
            }
        }
    };

    warn!("connection was closed while initializing, releasing it");
    let (connection, channel) = superseded;
    if let Err(err) = channel.close().await {
        debug!(error = err.to_string(), "error closing superseded channel");
    }
    if let Err(err) = connection.close().await {
        debug!(error = err.to_string(), "error closing superseded connection");
    }

    Ok(())
}

async fn establish(
    config: &RabbitMQConfig,
    connector: &dyn AmqpConnector,
    inner: &Weak<Mutex<Inner>>,
    generation: u64,
) -> Result<(Arc<dyn AmqpConnection>, Arc<dyn AmqpChannel>), AmqpError> {
    let connection = connector.connect(&config.url).await?;

    match prepare_channel(config, connection.as_ref(), inner, generation).await {
        Ok(channel) => Ok((connection, channel)),
        Err(err) => {
            if let Err(close_err) = connection.close().await {
                debug!(
                    error = close_err.to_string(),
                    "error closing half-open connection"
                );
            }
            Err(err)
        }
    }
}

async fn prepare_channel(
    config: &RabbitMQConfig,
    connection: &dyn AmqpConnection,
    inner: &Weak<Mutex<Inner>>,
    generation: u64,
) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
    let channel = connection.create_channel().await?;

    let hook = inner.clone();
    connection.on_event(Box::new(move |event| {
        if let Some(inner) = hook.upgrade() {
            on_connection_event(&inner, generation, event);
        }
    }));

    if let Some(exchange) = &config.exchange {
        debug!(exchange, kind = %config.exchange_kind(), "asserting exchange");
        channel
            .exchange_declare(exchange, config.exchange_kind(), true)
            .await?;
    }

    if let Some(queue) = &config.queue {
        debug!(queue, "asserting queue");
        let options = config.queue_options.clone().unwrap_or_default();
        channel.queue_declare(queue, &options).await?;

        if let Some(exchange) = &config.exchange {
            debug!(
                queue,
                exchange,
                routing_key = config.binding_key(),
                "binding queue to exchange"
            );
            channel
                .queue_bind(queue, exchange, config.binding_key())
                .await?;
        }
    }

    Ok(channel)
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory broker implementing the client seam, shared by the integration
//! tests. Publishing to a queue with a registered consumer runs the consumer
//! callback inline, so a completed publish means the message was handled.

#![allow(dead_code)]

use async_trait::async_trait;
use lapin::BasicProperties;
use rabbitmq_shim::{
    channel::{
        AmqpChannel, AmqpConnection, AmqpConnector, ConnectionEvent, ConnectionEventCallback,
        ConsumeOptions, Delivery, DeliveryCallback,
    },
    AmqpError, ExchangeKind, QueueOptions,
};
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
};
use tokio::sync::Notify;

#[derive(Debug, Clone)]
pub struct Published {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub properties: BasicProperties,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeKind>,
    queues: HashMap<String, QueueOptions>,
    pending: HashMap<String, VecDeque<Delivery>>,
    bindings: Vec<(String, String, String)>,
    consumers: HashMap<String, (String, DeliveryCallback)>,
    published: Vec<Published>,
    acks: Vec<u64>,
    nacks: Vec<(u64, bool)>,
    cancels: Vec<String>,
    prefetch: Option<u16>,
    next_delivery_tag: u64,
    next_consumer_tag: u64,
    event_hooks: Vec<(Arc<AtomicBool>, ConnectionEventCallback)>,
}

#[derive(Default)]
pub struct FakeBroker {
    state: Mutex<BrokerState>,
    connects: AtomicUsize,
    channels_opened: AtomicUsize,
    channels_closed: AtomicUsize,
    connections_closed: AtomicUsize,
    failing_connects: AtomicUsize,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeBroker::default())
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap()
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn AmqpConnector> {
        Arc::new(FakeConnector {
            broker: self.clone(),
        })
    }

    /// Holds every following connect until the returned gate is notified.
    pub fn hold_connects(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Drops every open connection, firing their error hooks.
    pub fn drop_connections(&self, reason: &str) {
        let hooks = std::mem::take(&mut self.state().event_hooks);
        for (connected, hook) in hooks {
            connected.store(false, Ordering::SeqCst);
            hook(ConnectionEvent::Error(reason.to_owned()));
        }
    }

    /// Marks every open connection as dead without firing any hook.
    pub fn lapse_connections(&self) {
        for (connected, _) in self.state().event_hooks.iter() {
            connected.store(false, Ordering::SeqCst);
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn channels_opened(&self) -> usize {
        self.channels_opened.load(Ordering::SeqCst)
    }

    pub fn channels_closed(&self) -> usize {
        self.channels_closed.load(Ordering::SeqCst)
    }

    pub fn connections_closed(&self) -> usize {
        self.connections_closed.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<Published> {
        self.state().published.clone()
    }

    pub fn acks(&self) -> Vec<u64> {
        self.state().acks.clone()
    }

    pub fn nacks(&self) -> Vec<(u64, bool)> {
        self.state().nacks.clone()
    }

    pub fn cancels(&self) -> Vec<String> {
        self.state().cancels.clone()
    }

    pub fn prefetch(&self) -> Option<u16> {
        self.state().prefetch
    }

    pub fn exchange(&self, name: &str) -> Option<ExchangeKind> {
        self.state().exchanges.get(name).copied()
    }

    pub fn queue(&self, name: &str) -> Option<QueueOptions> {
        self.state().queues.get(name).cloned()
    }

    pub fn bindings(&self) -> Vec<(String, String, String)> {
        self.state().bindings.clone()
    }

    pub fn has_consumer(&self, queue: &str) -> bool {
        self.state().consumers.contains_key(queue)
    }

    fn route(&self, exchange: &str, routing_key: &str) -> Vec<String> {
        if exchange.is_empty() {
            return vec![routing_key.to_owned()];
        }

        let state = self.state();
        let fanout = state.exchanges.get(exchange) == Some(&ExchangeKind::Fanout);
        state
            .bindings
            .iter()
            .filter(|(_, ex, key)| ex == exchange && (fanout || key == routing_key))
            .map(|(queue, _, _)| queue.clone())
            .collect()
    }

    /// Queues the delivery, or hands back the consumer callback that must run it.
    fn enqueue(
        &self,
        queue: &str,
        payload: &[u8],
        properties: &BasicProperties,
    ) -> Option<(DeliveryCallback, Delivery)> {
        let mut state = self.state();
        state.next_delivery_tag += 1;
        let delivery = Delivery {
            delivery_tag: state.next_delivery_tag,
            data: payload.to_vec(),
            properties: properties.clone(),
            redelivered: false,
        };

        match state.consumers.get(queue) {
            Some((_, callback)) => Some((callback.clone(), delivery)),
            None => {
                state
                    .pending
                    .entry(queue.to_owned())
                    .or_default()
                    .push_back(delivery);
                None
            }
        }
    }
}

struct FakeConnector {
    broker: Arc<FakeBroker>,
}

#[async_trait]
impl AmqpConnector for FakeConnector {
    async fn connect(&self, _url: &str) -> Result<Arc<dyn AmqpConnection>, AmqpError> {
        self.broker.connects.fetch_add(1, Ordering::SeqCst);

        let gate = self.broker.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let failing = self.broker.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.broker.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(AmqpError::ConnectionError("connection refused".to_owned()));
        }

        Ok(Arc::new(FakeConnection {
            broker: self.broker.clone(),
            connected: Arc::new(AtomicBool::new(true)),
        }))
    }
}

struct FakeConnection {
    broker: Arc<FakeBroker>,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl AmqpConnection for FakeConnection {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        self.broker.channels_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeChannel {
            broker: self.broker.clone(),
        }))
    }

    fn on_event(&self, callback: ConnectionEventCallback) {
        self.broker
            .state()
            .event_hooks
            .push((self.connected.clone(), callback));
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.connected.store(false, Ordering::SeqCst);
        self.broker.connections_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeChannel {
    broker: Arc<FakeBroker>,
}

#[async_trait]
impl AmqpChannel for FakeChannel {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        _durable: bool,
    ) -> Result<(), AmqpError> {
        self.broker.state().exchanges.insert(name.to_owned(), kind);
        Ok(())
    }

    async fn queue_declare(&self, name: &str, options: &QueueOptions) -> Result<(), AmqpError> {
        self.broker
            .state()
            .queues
            .insert(name.to_owned(), options.clone());
        Ok(())
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        self.broker.state().bindings.push((
            queue.to_owned(),
            exchange.to_owned(),
            routing_key.to_owned(),
        ));
        Ok(())
    }

    async fn basic_qos(&self, prefetch_count: u16) -> Result<(), AmqpError> {
        self.broker.state().prefetch = Some(prefetch_count);
        Ok(())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<bool, AmqpError> {
        self.broker.state().published.push(Published {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            payload: payload.to_vec(),
            properties: properties.clone(),
        });

        for queue in self.broker.route(exchange, routing_key) {
            if let Some((callback, delivery)) = self.broker.enqueue(&queue, payload, &properties) {
                callback(Some(delivery)).await;
            }
        }

        Ok(true)
    }

    async fn basic_consume(
        &self,
        queue: &str,
        options: &ConsumeOptions,
        callback: DeliveryCallback,
    ) -> Result<String, AmqpError> {
        let (tag, backlog) = {
            let mut state = self.broker.state();
            state.next_consumer_tag += 1;
            let tag = options
                .consumer_tag
                .clone()
                .unwrap_or_else(|| format!("amq.ctag-{}", state.next_consumer_tag));
            state
                .consumers
                .insert(queue.to_owned(), (tag.clone(), callback.clone()));
            (tag, state.pending.remove(queue).unwrap_or_default())
        };

        for delivery in backlog {
            callback(Some(delivery)).await;
        }

        Ok(tag)
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.broker.state().acks.push(delivery_tag);
        Ok(())
    }

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.broker.state().nacks.push((delivery_tag, requeue));
        Ok(())
    }

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        let mut state = self.broker.state();
        let Some(queue) = state
            .consumers
            .iter()
            .find(|(_, (tag, _))| tag == consumer_tag)
            .map(|(queue, _)| queue.clone())
        else {
            return Err(AmqpError::CancelConsumerError(format!(
                "unknown consumer tag {}",
                consumer_tag
            )));
        };

        state.consumers.remove(&queue);
        state.cancels.push(consumer_tag.to_owned());
        Ok(())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.broker.channels_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

//! Mock implementations of the transport, executor, clock and connection
//! callback.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::callback::{ConnectionCallback, DisconnectReason};
use crate::event::Qos;
use crate::executor::{Executor, Job};
use crate::jwt::Clock;
use crate::transport::{ConnectOptions, Transport, TransportCallback, TransportError};

/// Executor that runs jobs inline on the calling thread.
///
/// Makes callback assertions deterministic in tests. Production code should
/// prefer the default pooled executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, job: Job) {
        job()
    }
}

/// Clock pinned to a fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// A connection event observed by [`RecordingConnectionCallback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected(DisconnectReason),
}

/// Connection callback that records every event it receives.
#[derive(Debug, Default)]
pub struct RecordingConnectionCallback {
    events: Mutex<Vec<ConnectionEvent>>,
}

impl RecordingConnectionCallback {
    pub fn events(&self) -> Vec<ConnectionEvent> {
        lock(&self.events).clone()
    }
}

impl ConnectionCallback for Arc<RecordingConnectionCallback> {
    fn on_connected(&self) {
        lock(&self.events).push(ConnectionEvent::Connected);
    }

    fn on_disconnected(&self, reason: DisconnectReason) {
        lock(&self.events).push(ConnectionEvent::Disconnected(reason));
    }
}

impl ConnectionCallback for RecordingConnectionCallback {
    fn on_connected(&self) {
        lock(&self.events).push(ConnectionEvent::Connected);
    }

    fn on_disconnected(&self, reason: DisconnectReason) {
        lock(&self.events).push(ConnectionEvent::Disconnected(reason));
    }
}

/// One successfully published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRecord {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    pub retained: bool,
}

/// Scriptable in-memory transport.
///
/// Connects and publishes succeed unless a failure has been queued with
/// [`fail_next_connect`](Self::fail_next_connect) or
/// [`fail_next_publish`](Self::fail_next_publish). Inbound traffic and
/// connection loss are driven from the test via
/// [`deliver_message`](Self::deliver_message) and
/// [`drop_connection`](Self::drop_connection).
#[derive(Default)]
pub struct MockTransport {
    connected: AtomicBool,
    connect_failures: Mutex<VecDeque<TransportError>>,
    publish_failures: Mutex<VecDeque<TransportError>>,
    connect_options: Mutex<Vec<ConnectOptions>>,
    published: Mutex<Vec<PublishRecord>>,
    publish_attempts: AtomicUsize,
    subscriptions: Mutex<Vec<String>>,
    force_disconnects: AtomicUsize,
    callback: Mutex<Option<Arc<dyn TransportCallback>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure for the next connect attempt.
    pub fn fail_next_connect(&self, error: TransportError) {
        lock(&self.connect_failures).push_back(error);
    }

    /// Queue a failure for the next publish attempt.
    pub fn fail_next_publish(&self, error: TransportError) {
        lock(&self.publish_failures).push_back(error);
    }

    /// Successfully published messages, in publish order.
    pub fn published(&self) -> Vec<PublishRecord> {
        lock(&self.published).clone()
    }

    /// Total publish attempts, including failed ones.
    pub fn publish_attempts(&self) -> usize {
        self.publish_attempts.load(Ordering::SeqCst)
    }

    /// Options recorded for each successful connect, oldest first.
    pub fn connect_options(&self) -> Vec<ConnectOptions> {
        lock(&self.connect_options).clone()
    }

    pub fn connect_count(&self) -> usize {
        lock(&self.connect_options).len()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.subscriptions).clone()
    }

    pub fn force_disconnect_count(&self) -> usize {
        self.force_disconnects.load(Ordering::SeqCst)
    }

    /// Deliver an inbound message as if the broker published it.
    pub fn deliver_message(&self, topic: &str, payload: &[u8]) {
        let callback = lock(&self.callback).clone();
        if let Some(callback) = callback {
            callback.message_arrived(topic, payload);
        }
    }

    /// Sever the connection as if the broker dropped it.
    pub fn drop_connection(&self, cause: TransportError) {
        self.connected.store(false, Ordering::SeqCst);
        let callback = lock(&self.callback).clone();
        if let Some(callback) = callback {
            callback.connection_lost(cause);
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, options: ConnectOptions) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(error) = lock(&self.connect_failures).pop_front() {
            return Err(error);
        }
        lock(&self.connect_options).push(options);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn force_disconnect(&self) -> Result<(), TransportError> {
        self.force_disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: Qos,
        retained: bool,
    ) -> Result<(), TransportError> {
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.publish_failures).pop_front() {
            return Err(error);
        }
        lock(&self.published).push(PublishRecord {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retained,
        });
        Ok(())
    }

    async fn subscribe(&self, topic_filter: &str) -> Result<(), TransportError> {
        lock(&self.subscriptions).push(topic_filter.to_string());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_callback(&self, callback: Arc<dyn TransportCallback>) {
        *lock(&self.callback) = Some(callback);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

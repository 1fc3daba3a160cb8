//! The public client facade.
//!
//! [`DeviceClient`] is the application's handle: non-blocking connect and
//! disconnect, plus the three publish entry points. All real I/O happens on
//! the supervisor task; the facade only mutates shared outbound state and
//! releases wake tokens.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::backoff::Backoff;
use crate::callback::{
    CommandListener, ConfigListener, ConnectionCallback, ConnectionNotifier,
};
use crate::config::{ConfigError, ConnectionParams};
use crate::event::TopicEvent;
use crate::executor::{BlockingExecutor, Executor};
use crate::jwt::{DeviceKey, JwtSigner};
use crate::pipeline::OutboundPipeline;
use crate::queue::{BoundedQueue, OverflowPolicy};
use crate::router::InboundRouter;
use crate::supervisor::Supervisor;
use crate::transport::{MqttTransport, Transport, TransportCallback, TransportError};

// Retry schedule recommended by the bridge for excessive-load backoff.
const INITIAL_RETRY_INTERVAL: Duration = Duration::from_secs(1);
const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(64);
const MAX_RETRY_JITTER: Duration = Duration::from_secs(1);

const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Shared state between the facade, the supervisor task and the transport
/// callback.
pub(crate) struct ClientCore {
    pub(crate) params: ConnectionParams,
    pub(crate) signer: JwtSigner,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) pipeline: OutboundPipeline,
    pub(crate) router: InboundRouter,
    pub(crate) notifier: ConnectionNotifier,
    pub(crate) subscriptions: Vec<String>,
    /// True while the supervisor should keep running.
    pub(crate) run: AtomicBool,
    /// Wake token: one permit per pending unit of outbound work (plus one
    /// for each disconnect request and connection-lost notification).
    pub(crate) wake: Semaphore,
    pub(crate) backoff: Mutex<Backoff>,
}

/// Bridges transport events into the shared core.
///
/// Holds the core weakly: the transport outlives nothing, but the core owns
/// the transport, and a strong reference here would cycle.
struct TransportHook {
    core: Weak<ClientCore>,
}

impl TransportCallback for TransportHook {
    fn connection_lost(&self, cause: TransportError) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        // Wake the supervisor so it re-enters the reconnect loop.
        core.wake.add_permits(1);
        warn!(error = %cause, "connection to bridge lost");
        let run = core.run.load(Ordering::SeqCst);
        core.notifier.notify_disconnected(cause.disconnect_reason(run));
    }

    fn message_arrived(&self, topic: &str, payload: &[u8]) {
        if let Some(core) = self.core.upgrade() {
            core.router.route(topic, payload);
        }
    }
}

/// Client for a single device registered with the cloud IoT bridge.
///
/// Publish methods work regardless of connection state: while disconnected,
/// telemetry and topic events queue up and device state coalesces to the
/// newest value, all delivered once the connection is (re)established.
pub struct DeviceClient {
    core: Arc<ClientCore>,
    handle: Handle,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceClient {
    pub fn builder() -> DeviceClientBuilder {
        DeviceClientBuilder::default()
    }

    /// Start the client. Non-blocking: spawns the supervisor task if none is
    /// alive and returns immediately. The connection callback reports when
    /// the session is actually up.
    pub fn connect(&self) {
        self.core.run.store(true, Ordering::SeqCst);
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        let alive = worker.as_ref().is_some_and(|task| !task.is_finished());
        if !alive {
            let supervisor = Supervisor::new(Arc::clone(&self.core));
            *worker = Some(self.handle.spawn(supervisor.run()));
        }
    }

    /// Stop the client. Non-blocking and cooperative: the supervisor closes
    /// the transport and reports `ClientClosed` on its way out. A no-op when
    /// no supervisor is alive.
    pub fn disconnect(&self) {
        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        let alive = worker.as_ref().is_some_and(|task| !task.is_finished());
        if alive {
            self.core.run.store(false, Ordering::SeqCst);
            self.core.wake.add_permits(1);
        }
    }

    /// The transport's live connection state. Distinct from what the
    /// connection callback has reported so far.
    pub fn is_connected(&self) -> bool {
        self.core.transport.is_connected()
    }

    /// Queue a telemetry event for delivery to the device's events topic.
    ///
    /// Returns false when the queue refused the event (or, for a drop-oldest
    /// queue at capacity, admitted it by evicting another).
    pub fn publish_telemetry(&self, event: TopicEvent) -> bool {
        if self.core.pipeline.enqueue_telemetry(Arc::new(event)) {
            self.core.wake.add_permits(1);
            return true;
        }
        false
    }

    /// Queue an event for delivery to an arbitrary topic.
    pub fn publish_topic_event(&self, event: TopicEvent) -> bool {
        if self.core.pipeline.enqueue_event(Arc::new(event)) {
            self.core.wake.add_permits(1);
            return true;
        }
        false
    }

    /// Replace the pending device state. Only the newest state is ever
    /// published; intermediate values written while disconnected or while a
    /// publish is in flight are coalesced away.
    pub fn publish_device_state(&self, state: impl Into<Vec<u8>>) {
        let state: Arc<[u8]> = Arc::from(state.into());
        if self.core.pipeline.set_pending_state(state) {
            // Only the empty-to-filled transition owes a wake token; a
            // replaced value was already scheduled.
            self.core.wake.add_permits(1);
        }
    }
}

type ListenerEntry<L> = (Arc<L>, Option<Arc<dyn Executor>>);

/// Builder for [`DeviceClient`].
#[derive(Default)]
pub struct DeviceClientBuilder {
    params: Option<ConnectionParams>,
    key: Option<DeviceKey>,
    telemetry_queue: Option<BoundedQueue<Arc<TopicEvent>>>,
    topic_event_queue: Option<BoundedQueue<Arc<TopicEvent>>>,
    connection_callback: Option<ListenerEntry<dyn ConnectionCallback>>,
    config_listener: Option<ListenerEntry<dyn ConfigListener>>,
    command_listener: Option<ListenerEntry<dyn CommandListener>>,
    backoff: Option<Backoff>,
    transport: Option<Arc<dyn Transport>>,
}

impl DeviceClientBuilder {
    /// Set the connection parameters. Required.
    pub fn connection_params(mut self, params: ConnectionParams) -> Self {
        self.params = Some(params);
        self
    }

    /// Set the private key the device was registered with. Required.
    pub fn device_key(mut self, key: DeviceKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Replace the default telemetry queue (drop-oldest, capacity 1000).
    pub fn telemetry_queue(mut self, queue: BoundedQueue<Arc<TopicEvent>>) -> Self {
        self.telemetry_queue = Some(queue);
        self
    }

    /// Replace the default topic-event queue (drop-oldest, capacity 1000).
    pub fn topic_event_queue(mut self, queue: BoundedQueue<Arc<TopicEvent>>) -> Self {
        self.topic_event_queue = Some(queue);
        self
    }

    /// Register a connection callback running on the default executor.
    pub fn connection_callback(mut self, callback: impl ConnectionCallback) -> Self {
        let callback: Arc<dyn ConnectionCallback> = Arc::new(callback);
        self.connection_callback = Some((callback, None));
        self
    }

    /// Register a connection callback running on the given executor.
    pub fn connection_callback_with_executor(
        mut self,
        executor: Arc<dyn Executor>,
        callback: impl ConnectionCallback,
    ) -> Self {
        let callback: Arc<dyn ConnectionCallback> = Arc::new(callback);
        self.connection_callback = Some((callback, Some(executor)));
        self
    }

    /// Register a configuration listener running on the default executor.
    ///
    /// The bridge resends the device configuration on every connect, so the
    /// listener should expect repeats.
    pub fn on_configuration(mut self, listener: impl ConfigListener) -> Self {
        let listener: Arc<dyn ConfigListener> = Arc::new(listener);
        self.config_listener = Some((listener, None));
        self
    }

    /// Register a configuration listener running on the given executor.
    pub fn on_configuration_with_executor(
        mut self,
        executor: Arc<dyn Executor>,
        listener: impl ConfigListener,
    ) -> Self {
        let listener: Arc<dyn ConfigListener> = Arc::new(listener);
        self.config_listener = Some((listener, Some(executor)));
        self
    }

    /// Register a command listener running on the default executor.
    pub fn on_command(mut self, listener: impl CommandListener) -> Self {
        let listener: Arc<dyn CommandListener> = Arc::new(listener);
        self.command_listener = Some((listener, None));
        self
    }

    /// Register a command listener running on the given executor.
    pub fn on_command_with_executor(
        mut self,
        executor: Arc<dyn Executor>,
        listener: impl CommandListener,
    ) -> Self {
        let listener: Arc<dyn CommandListener> = Arc::new(listener);
        self.command_listener = Some((listener, Some(executor)));
        self
    }

    /// Replace the reconnect backoff schedule (default 1 s doubling to 64 s
    /// with up to 1 s of jitter, per the bridge's load guidance).
    pub fn retry_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Replace the MQTT transport. Intended for tests and alternative broker
    /// bindings; the default is the TLS rumqttc transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Construct the client. Must be called within a tokio runtime, which
    /// the client uses to spawn its supervisor and run callbacks.
    pub fn build(self) -> Result<DeviceClient, ConfigError> {
        let params = self.params.ok_or(ConfigError::MissingParameter("connection params"))?;
        let key = self.key.ok_or(ConfigError::MissingParameter("device key"))?;
        let handle = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;

        let default_executor: Arc<dyn Executor> =
            Arc::new(BlockingExecutor::new(handle.clone()));

        let telemetry_queue = match self.telemetry_queue {
            Some(queue) => queue,
            None => BoundedQueue::new(DEFAULT_QUEUE_CAPACITY, OverflowPolicy::DropOldest)?,
        };
        let topic_event_queue = match self.topic_event_queue {
            Some(queue) => queue,
            None => BoundedQueue::new(DEFAULT_QUEUE_CAPACITY, OverflowPolicy::DropOldest)?,
        };

        let signer = JwtSigner::new(
            key,
            params.project_id().to_string(),
            params.auth_token_lifetime(),
        );

        let router = InboundRouter::new(
            params.configuration_topic().to_string(),
            params.commands_topic_prefix().to_string(),
            with_default_executor(self.config_listener, &default_executor),
            with_default_executor(self.command_listener, &default_executor),
        );

        let notifier = {
            let (callback, executor) =
                match with_default_executor(self.connection_callback, &default_executor) {
                    Some((callback, executor)) => (Some(callback), Some(executor)),
                    None => (None, None),
                };
            ConnectionNotifier::new(callback, executor)
        };

        let mut subscriptions = Vec::with_capacity(2);
        if router.has_config_listener() {
            subscriptions.push(params.configuration_topic().to_string());
        }
        if router.has_command_listener() {
            subscriptions.push(format!("{}/#", params.commands_topic_prefix()));
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(MqttTransport::new(&params)) as Arc<dyn Transport>,
        };

        let backoff = match self.backoff {
            Some(backoff) => backoff,
            None => Backoff::new(INITIAL_RETRY_INTERVAL, MAX_RETRY_INTERVAL, MAX_RETRY_JITTER)?,
        };

        let core = Arc::new(ClientCore {
            params,
            signer,
            transport,
            pipeline: OutboundPipeline::new(telemetry_queue, topic_event_queue),
            router,
            notifier,
            subscriptions,
            run: AtomicBool::new(false),
            wake: Semaphore::new(0),
            backoff: Mutex::new(backoff),
        });
        core.transport.set_callback(Arc::new(TransportHook {
            core: Arc::downgrade(&core),
        }));

        Ok(DeviceClient {
            core,
            handle,
            worker: Mutex::new(None),
        })
    }
}

fn with_default_executor<L: ?Sized>(
    entry: Option<ListenerEntry<L>>,
    default: &Arc<dyn Executor>,
) -> Option<(Arc<L>, Arc<dyn Executor>)> {
    entry.map(|(listener, executor)| (listener, executor.unwrap_or_else(|| Arc::clone(default))))
}

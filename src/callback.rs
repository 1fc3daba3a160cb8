//! User-facing callback and listener surface.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::executor::Executor;

/// Why the client reported a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The source of the error could not be determined.
    Unknown,
    /// The bridge rejected the device's credentials or identity.
    NotAuthorized,
    /// The connection to the bridge was lost.
    ConnectionLost,
    /// A timeout occurred while talking to the bridge.
    ConnectionTimeout,
    /// The client closed the connection itself.
    ClientClosed,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DisconnectReason::Unknown => "unknown",
            DisconnectReason::NotAuthorized => "not authorized",
            DisconnectReason::ConnectionLost => "connection lost",
            DisconnectReason::ConnectionTimeout => "connection timeout",
            DisconnectReason::ClientClosed => "client closed",
        };
        f.write_str(text)
    }
}

/// Receives connection status changes.
pub trait ConnectionCallback: Send + Sync + 'static {
    /// The connection to the bridge was established.
    fn on_connected(&self);

    /// The connection to the bridge was lost or closed.
    fn on_disconnected(&self, reason: DisconnectReason);
}

/// Receives device configuration pushed by the bridge.
///
/// The bridge resends the current configuration on every connect, so the same
/// payload may be delivered multiple times.
pub trait ConfigListener: Send + Sync + 'static {
    fn on_config_received(&self, payload: Vec<u8>);
}

impl<F> ConfigListener for F
where
    F: Fn(Vec<u8>) + Send + Sync + 'static,
{
    fn on_config_received(&self, payload: Vec<u8>) {
        self(payload)
    }
}

/// Receives commands pushed by the bridge.
pub trait CommandListener: Send + Sync + 'static {
    /// `subfolder` is the path below the commands topic prefix, `""` when the
    /// command arrived on the bare prefix.
    fn on_command_received(&self, subfolder: &str, payload: Vec<u8>);
}

impl<F> CommandListener for F
where
    F: Fn(&str, Vec<u8>) + Send + Sync + 'static,
{
    fn on_command_received(&self, subfolder: &str, payload: Vec<u8>) {
        self(subfolder, payload)
    }
}

/// De-duplicating dispatcher for connection events.
///
/// Tracks what the application has been told, which is distinct from the
/// transport's live state: `on_connected` fires only when the observed flag
/// flips false to true, `on_disconnected` only on the reverse flip. The one
/// exception is [`DisconnectReason::NotAuthorized`], which always fires
/// because it signals a misconfiguration the user has to act on. The flag is
/// flipped inside the executor job so event ordering follows dispatch order.
pub(crate) struct ConnectionNotifier {
    callback: Option<Arc<dyn ConnectionCallback>>,
    executor: Option<Arc<dyn Executor>>,
    observed: Arc<AtomicBool>,
}

impl ConnectionNotifier {
    pub(crate) fn new(
        callback: Option<Arc<dyn ConnectionCallback>>,
        executor: Option<Arc<dyn Executor>>,
    ) -> Self {
        Self {
            callback,
            executor,
            observed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn dispatch(&self) -> Option<(Arc<dyn ConnectionCallback>, &Arc<dyn Executor>)> {
        let callback = Arc::clone(self.callback.as_ref()?);
        let executor = self.executor.as_ref()?;
        Some((callback, executor))
    }

    pub(crate) fn notify_connected(&self) {
        let Some((callback, executor)) = self.dispatch() else {
            return;
        };
        let observed = Arc::clone(&self.observed);
        executor.execute(Box::new(move || {
            if !observed.swap(true, Ordering::SeqCst) {
                callback.on_connected();
            }
        }));
    }

    pub(crate) fn notify_disconnected(&self, reason: DisconnectReason) {
        let Some((callback, executor)) = self.dispatch() else {
            return;
        };
        let observed = Arc::clone(&self.observed);
        executor.execute(Box::new(move || {
            if reason == DisconnectReason::NotAuthorized {
                observed.store(false, Ordering::SeqCst);
                callback.on_disconnected(reason);
            } else if observed.swap(false, Ordering::SeqCst) {
                callback.on_disconnected(reason);
            }
        }));
    }
}

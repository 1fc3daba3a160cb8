//! The connection supervisor: one background task that owns the MQTT session.
//!
//! The supervisor is the single writer of the transport. Its outer loop runs
//! while the client wants to stay up: establish a session (minting a fresh
//! auth token each attempt), then serve the connected loop, which sleeps on
//! the wake semaphore and publishes one unit of outbound work per permit.
//! Transport failures are classified: transient ones back off and retry with
//! the failed message still parked in its unsent slot, permanent publish
//! failures drop the one message, and permanent connect failures stop the
//! client so a misconfigured device does not hammer the bridge.

use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::callback::DisconnectReason;
use crate::client::ClientCore;
use crate::event::Qos;
use crate::jwt::TokenError;
use crate::pipeline::OutboundWork;
use crate::transport::{ConnectOptions, TransportError};

/// Why one pass of the reconnect loop ended early.
enum CycleError {
    Transport(TransportError),
    Token(TokenError),
}

pub(crate) struct Supervisor {
    core: Arc<ClientCore>,
}

impl Supervisor {
    pub(crate) fn new(core: Arc<ClientCore>) -> Self {
        Self { core }
    }

    pub(crate) async fn run(self) {
        debug!("supervisor started");
        while self.core.run.load(Ordering::SeqCst) {
            self.reconnect_cycle().await;
        }
        if let Err(err) = self.core.transport.force_disconnect().await {
            error!(error = %err, "error closing transport");
        }
        self.core
            .notifier
            .notify_disconnected(DisconnectReason::ClientClosed);
        debug!("supervisor stopped");
    }

    /// One pass: ensure a session exists, then drain work until something
    /// fails or the client is told to stop.
    async fn reconnect_cycle(&self) {
        match self.serve().await {
            Ok(()) => {}
            Err(CycleError::Transport(err)) => {
                if err.is_retryable(self.core.run.load(Ordering::SeqCst)) {
                    let delay = self
                        .core
                        .backoff
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .next();
                    debug!(
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient transport failure, backing off"
                    );
                    tokio::time::sleep_until(Instant::now() + delay).await;
                } else {
                    // Unrecoverable, e.g. bad credentials or identity. Stop
                    // instead of spamming the bridge with doomed attempts.
                    self.core.run.store(false, Ordering::SeqCst);
                    error!(error = %err, "disconnected from bridge and cannot recover");
                }
                let run = self.core.run.load(Ordering::SeqCst);
                self.core
                    .notifier
                    .notify_disconnected(err.disconnect_reason(run));
            }
            Err(CycleError::Token(err)) => {
                self.core.run.store(false, Ordering::SeqCst);
                error!(error = %err, "cannot sign auth token, stopping client");
            }
        }
    }

    async fn serve(&self) -> Result<(), CycleError> {
        self.connect_transport().await?;
        self.core
            .backoff
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
        self.connected_tasks().await.map_err(CycleError::Transport)
    }

    /// Establish the session: fresh token, connect, subscribe, announce.
    async fn connect_transport(&self) -> Result<(), CycleError> {
        if self.core.transport.is_connected() {
            return Ok(());
        }

        let token = self.core.signer.mint().map_err(CycleError::Token)?;
        let options = ConnectOptions {
            // The bridge ignores the user name but requires one so that the
            // password field carrying the token is transmitted.
            username: "unused".to_string(),
            password: token,
        };
        self.core
            .transport
            .connect(options)
            .await
            .map_err(CycleError::Transport)?;

        for topic in &self.core.subscriptions {
            self.core
                .transport
                .subscribe(topic)
                .await
                .map_err(CycleError::Transport)?;
        }

        info!(broker = %self.core.params.broker_url(), "connected to bridge");
        self.core.notifier.notify_connected();
        Ok(())
    }

    /// The connected loop: one wake permit buys one unit of outbound work.
    async fn connected_tasks(&self) -> Result<(), TransportError> {
        while self.core.transport.is_connected() {
            let Ok(permit) = self.core.wake.acquire().await else {
                return Ok(());
            };
            permit.forget();

            if !self.core.run.load(Ordering::SeqCst) {
                return Ok(());
            }

            match self.core.pipeline.take_next_work() {
                Some(OutboundWork::DeviceState(state)) => {
                    self.publish_checked(
                        self.core.params.device_state_topic(),
                        &state,
                        Qos::AtLeastOnce,
                    )
                    .await?;
                    debug!(len = state.len(), "published device state");
                    self.core.pipeline.clear_state_if_equal(&state);
                }
                Some(OutboundWork::Telemetry(event)) => {
                    let topic =
                        format!("{}{}", self.core.params.telemetry_topic(), event.subpath());
                    self.publish_checked(&topic, event.data(), event.qos()).await?;
                    debug!(%topic, len = event.data().len(), "published telemetry");
                    self.core.pipeline.clear_unsent_telemetry();
                }
                Some(OutboundWork::Event(event)) => {
                    let topic = format!(
                        "{}{}",
                        event.topic_name().unwrap_or_default(),
                        event.subpath()
                    );
                    self.publish_checked(&topic, event.data(), event.qos()).await?;
                    debug!(%topic, len = event.data().len(), "published topic event");
                    self.core.pipeline.clear_unsent_event();
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Publish with the retry contract applied.
    ///
    /// On a retryable failure the consumed wake permit is given back before
    /// propagating, so the parked message is retried after reconnect. A
    /// non-retryable failure means the message itself is the problem; it is
    /// logged and reported as success so the caller clears it and the session
    /// carries on.
    async fn publish_checked(
        &self,
        topic: &str,
        payload: &[u8],
        qos: Qos,
    ) -> Result<(), TransportError> {
        match self.core.transport.publish(topic, payload, qos, false).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_retryable(self.core.run.load(Ordering::SeqCst)) => {
                self.core.wake.add_permits(1);
                Err(err)
            }
            Err(err) => {
                warn!(%topic, error = %err, "dropping unpublishable message");
                Ok(())
            }
        }
    }
}

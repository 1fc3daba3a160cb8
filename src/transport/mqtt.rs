//! MQTT transport over rumqttc.
//!
//! The bridge speaks MQTT 3.1.1 over TLS. A session is established lazily on
//! `connect`: the event loop is polled inline until the broker's ConnAck
//! arrives, then handed to a reader task that forwards inbound publishes and
//! reports the first failure as a lost connection. The supervisor owns
//! reconnection, so the reader never re-polls after an error.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet,
    QoS as MqttQos, Transport as WireTransport,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{
    ClientCause, ConnectOptions, DisconnectCause, Transport, TransportCallback, TransportError,
};
use crate::config::ConnectionParams;
use crate::event::Qos;

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const REQUEST_CHANNEL_CAPACITY: usize = 32;
const DISCONNECT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

type SharedCallback = Arc<StdMutex<Option<Arc<dyn TransportCallback>>>>;

struct Session {
    client: AsyncClient,
    reader: JoinHandle<()>,
}

/// Production [`Transport`] backed by rumqttc.
pub struct MqttTransport {
    host: String,
    port: u16,
    client_id: String,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    callback: SharedCallback,
    session: Mutex<Option<Session>>,
}

impl MqttTransport {
    pub fn new(params: &ConnectionParams) -> Self {
        Self {
            host: params.bridge_hostname().to_string(),
            port: params.bridge_port(),
            client_id: params.client_id().to_string(),
            connected: Arc::new(AtomicBool::new(false)),
            closing: Arc::new(AtomicBool::new(false)),
            callback: Arc::new(StdMutex::new(None)),
            session: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self, options: ConnectOptions) -> Result<(), TransportError> {
        let mut session = self.session.lock().await;
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(stale) = session.take() {
            stale.reader.abort();
        }

        let mut mqtt_options = MqttOptions::new(&self.client_id, &self.host, self.port);
        mqtt_options.set_transport(WireTransport::tls_with_default_config());
        mqtt_options.set_credentials(options.username, options.password);
        mqtt_options.set_keep_alive(KEEP_ALIVE);

        let (client, mut event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        // Poll inline until the broker accepts or rejects the session.
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => match ack.code {
                    ConnectReturnCode::Success => break,
                    code => return Err(map_refusal(code)),
                },
                Ok(_) => continue,
                Err(err) => return Err(map_connection_error(err)),
            }
        }
        debug!(host = %self.host, port = self.port, "broker accepted session");

        self.closing.store(false, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        let reader = tokio::spawn(read_loop(
            event_loop,
            Arc::clone(&self.connected),
            Arc::clone(&self.closing),
            Arc::clone(&self.callback),
        ));
        *session = Some(Session { client, reader });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut session = self.session.lock().await;
        self.closing.store(true, Ordering::SeqCst);
        if let Some(active) = session.take() {
            if let Err(err) = active.client.disconnect().await {
                debug!(error = %err, "disconnect request not deliverable");
            }
            // Give the reader a moment to drain; it exits on the first poll
            // error after the socket closes.
            if tokio::time::timeout(DISCONNECT_DRAIN_TIMEOUT, active.reader)
                .await
                .is_err()
            {
                warn!("reader task did not stop after disconnect");
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn force_disconnect(&self) -> Result<(), TransportError> {
        let mut session = self.session.lock().await;
        self.closing.store(true, Ordering::SeqCst);
        if let Some(active) = session.take() {
            active.reader.abort();
        }
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
        let session = self.session.lock().await;
        let Some(active) = session.as_ref() else {
            return Err(TransportError::NotConnected);
        };
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        active
            .client
            .publish(topic, map_qos(qos), retained, payload.to_vec())
            .await
            .map_err(|_| TransportError::NotConnected)
    }

    async fn subscribe(&self, topic_filter: &str) -> Result<(), TransportError> {
        let session = self.session.lock().await;
        let Some(active) = session.as_ref() else {
            return Err(TransportError::NotConnected);
        };
        active
            .client
            .subscribe(topic_filter, MqttQos::AtLeastOnce)
            .await
            .map_err(|_| TransportError::NotConnected)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_callback(&self, callback: Arc<dyn TransportCallback>) {
        *self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }
}

async fn read_loop(
    mut event_loop: EventLoop,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    callback: SharedCallback,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let callback = callback
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                if let Some(callback) = callback {
                    callback.message_arrived(&publish.topic, &publish.payload);
                }
            }
            Ok(_) => {}
            Err(err) => {
                connected.store(false, Ordering::SeqCst);
                if !closing.load(Ordering::SeqCst) {
                    let mapped = map_connection_error(err);
                    warn!(error = %mapped, "broker session ended");
                    let callback = callback
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clone();
                    if let Some(callback) = callback {
                        callback.connection_lost(mapped);
                    }
                }
                return;
            }
        }
    }
}

fn map_qos(qos: Qos) -> MqttQos {
    match qos {
        Qos::AtMostOnce => MqttQos::AtMostOnce,
        Qos::AtLeastOnce => MqttQos::AtLeastOnce,
    }
}

fn map_refusal(code: ConnectReturnCode) -> TransportError {
    match code {
        ConnectReturnCode::BadUserNamePassword => TransportError::BadCredentials,
        ConnectReturnCode::NotAuthorized => TransportError::NotAuthorized,
        code => TransportError::ServerUnavailable(format!("{code:?}")),
    }
}

fn map_connection_error(err: ConnectionError) -> TransportError {
    match err {
        ConnectionError::ConnectionRefused(code) => map_refusal(code),
        ConnectionError::Io(err) => map_io_error(err),
        ConnectionError::Tls(_) => TransportError::ConnectionLost {
            cause: DisconnectCause::TlsFailure,
        },
        ConnectionError::NetworkTimeout => TransportError::OperationTimeout,
        ConnectionError::FlushTimeout => TransportError::WriteTimeout,
        ConnectionError::RequestsDone => TransportError::ConnectionLost {
            cause: DisconnectCause::Other,
        },
        other => TransportError::Other(other.to_string()),
    }
}

fn map_io_error(err: std::io::Error) -> TransportError {
    match err.kind() {
        ErrorKind::UnexpectedEof => TransportError::ConnectionLost {
            cause: DisconnectCause::EndOfStream,
        },
        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset => {
            TransportError::ConnectionLost {
                cause: DisconnectCause::EndOfStream,
            }
        }
        ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::Client {
            cause: ClientCause::SocketTimeout,
        },
        ErrorKind::ConnectionRefused => TransportError::ServerUnavailable(err.to_string()),
        _ => {
            // Resolver failures come through as uncategorized io errors; the
            // message is the only signal that the host could not be found.
            let text = err.to_string();
            if text.contains("failed to lookup") || text.contains("Name or service not known") {
                TransportError::Client {
                    cause: ClientCause::UnknownHost,
                }
            } else {
                TransportError::Other(text)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ConnectionParams {
        ConnectionParams::builder()
            .project_id("p")
            .registry("r", "region")
            .device_id("d")
            .build()
            .unwrap()
    }

    #[test]
    fn starts_disconnected() {
        let transport = MqttTransport::new(&params());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn publish_without_session_is_not_connected() {
        let transport = MqttTransport::new(&params());
        let result = transport.publish("/devices/d/events", b"x", Qos::AtMostOnce, false).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[test]
    fn refusal_codes_map_to_auth_errors() {
        assert!(matches!(
            map_refusal(ConnectReturnCode::BadUserNamePassword),
            TransportError::BadCredentials
        ));
        assert!(matches!(
            map_refusal(ConnectReturnCode::NotAuthorized),
            TransportError::NotAuthorized
        ));
        assert!(matches!(
            map_refusal(ConnectReturnCode::ServiceUnavailable),
            TransportError::ServerUnavailable(_)
        ));
    }

    #[test]
    fn io_errors_map_by_kind() {
        let eof = std::io::Error::new(ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(
            map_io_error(eof),
            TransportError::ConnectionLost {
                cause: DisconnectCause::EndOfStream
            }
        ));

        let timeout = std::io::Error::new(ErrorKind::TimedOut, "timed out");
        assert!(matches!(
            map_io_error(timeout),
            TransportError::Client {
                cause: ClientCause::SocketTimeout
            }
        ));

        let refused = std::io::Error::new(ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            map_io_error(refused),
            TransportError::ServerUnavailable(_)
        ));

        let dns = std::io::Error::other("failed to lookup address information");
        assert!(matches!(
            map_io_error(dns),
            TransportError::Client {
                cause: ClientCause::UnknownHost
            }
        ));
    }
}

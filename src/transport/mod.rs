//! Transport abstraction over the MQTT session.
//!
//! The supervisor is the only writer of the transport; the facade only reads
//! `is_connected`. The trait exists so tests can substitute a scripted
//! transport for the real broker connection.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::callback::DisconnectReason;
use crate::event::Qos;

pub mod mqtt;

pub use mqtt::MqttTransport;

/// Options passed to [`Transport::connect`]. Identity (host, port, client id)
/// is fixed at transport construction; only the credentials vary, because a
/// fresh auth token is minted for every connection attempt.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub username: String,
    pub password: String,
}

/// What ended an established connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    /// The peer closed the socket; the bridge does this when it drops a
    /// device, e.g. for exceeding a rate limit.
    EndOfStream,
    /// TLS failure on an established connection.
    TlsFailure,
    Other,
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DisconnectCause::EndOfStream => "end of stream",
            DisconnectCause::TlsFailure => "TLS failure",
            DisconnectCause::Other => "other",
        };
        f.write_str(text)
    }
}

/// What a client-side failure was caused by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCause {
    /// The socket timed out; typically a wrong bridge port or an unresponsive
    /// bridge.
    SocketTimeout,
    /// Host resolution failed; no network connectivity or a bad hostname.
    UnknownHost,
    Other,
}

impl fmt::Display for ClientCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ClientCause::SocketTimeout => "socket timeout",
            ClientCause::UnknownHost => "unknown host",
            ClientCause::Other => "other",
        };
        f.write_str(text)
    }
}

/// Transport failures, categorized so the supervisor can decide between
/// retrying, dropping a message, and shutting down.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The broker could not be reached or refused the network connection.
    #[error("unable to connect to broker: {0}")]
    ServerUnavailable(String),
    /// The broker rejected the supplied credentials.
    #[error("broker rejected credentials")]
    BadCredentials,
    /// The broker refused the client as unauthorized.
    #[error("client not authorized by broker")]
    NotAuthorized,
    /// Writing to the broker timed out.
    #[error("write to broker timed out")]
    WriteTimeout,
    /// The operation requires a connection and there is none.
    #[error("client is not connected")]
    NotConnected,
    /// The client gave up waiting for the broker.
    #[error("operation timed out")]
    OperationTimeout,
    /// An established connection was lost.
    #[error("connection lost: {cause}")]
    ConnectionLost { cause: DisconnectCause },
    /// A client-side failure outside the broker protocol.
    #[error("client failure: {cause}")]
    Client { cause: ClientCause },
    /// The message itself was unacceptable to the transport.
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Whether the failed operation may succeed if retried after a backoff.
    ///
    /// End-of-stream on a live session counts as retryable only while the
    /// client still wants to run: in that case the bridge closed the socket
    /// (rate limiting and the like), not us.
    pub fn is_retryable(&self, run: bool) -> bool {
        match self {
            TransportError::ServerUnavailable(_)
            | TransportError::WriteTimeout
            | TransportError::NotConnected
            | TransportError::OperationTimeout => true,
            TransportError::Client {
                cause: ClientCause::UnknownHost,
            } => true,
            TransportError::ConnectionLost {
                cause: DisconnectCause::EndOfStream,
            } => run,
            _ => false,
        }
    }

    /// The reason reported to the application for this failure.
    pub fn disconnect_reason(&self, run: bool) -> DisconnectReason {
        match self {
            TransportError::BadCredentials | TransportError::NotAuthorized => {
                DisconnectReason::NotAuthorized
            }
            TransportError::ConnectionLost {
                cause: DisconnectCause::EndOfStream,
            } => {
                if run {
                    DisconnectReason::ConnectionLost
                } else {
                    DisconnectReason::ClientClosed
                }
            }
            TransportError::ConnectionLost {
                cause: DisconnectCause::TlsFailure,
            } => DisconnectReason::ConnectionLost,
            TransportError::Client {
                cause: ClientCause::SocketTimeout,
            } => DisconnectReason::ConnectionTimeout,
            TransportError::Client {
                cause: ClientCause::UnknownHost,
            } => DisconnectReason::ConnectionLost,
            TransportError::OperationTimeout | TransportError::WriteTimeout => {
                DisconnectReason::ConnectionTimeout
            }
            _ => DisconnectReason::Unknown,
        }
    }
}

/// Receives transport-initiated events.
///
/// Both methods are called from the transport's reader task and must not
/// block; the implementations hand work to executors or release tokens.
pub trait TransportCallback: Send + Sync {
    /// An established connection was lost for the given cause.
    fn connection_lost(&self, cause: TransportError);

    /// An inbound publish arrived on a subscribed topic.
    fn message_arrived(&self, topic: &str, payload: &[u8]);
}

/// The MQTT session operations the client consumes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a session with the broker. A no-op when already connected.
    async fn connect(&self, options: ConnectOptions) -> Result<(), TransportError>;

    /// Cleanly close the session.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Tear the session down without waiting for in-flight traffic.
    async fn force_disconnect(&self) -> Result<(), TransportError>;

    /// Publish a message. Retained delivery is never requested by this
    /// client but remains part of the transport contract.
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: Qos,
        retained: bool,
    ) -> Result<(), TransportError>;

    /// Subscribe to a topic filter.
    async fn subscribe(&self, topic_filter: &str) -> Result<(), TransportError>;

    /// The live connection state of the session.
    fn is_connected(&self) -> bool;

    /// Install the event sink. Must be called before `connect`.
    fn set_callback(&self, callback: Arc<dyn TransportCallback>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        let run = true;
        assert!(TransportError::ServerUnavailable("down".into()).is_retryable(run));
        assert!(TransportError::WriteTimeout.is_retryable(run));
        assert!(TransportError::NotConnected.is_retryable(run));
        assert!(TransportError::OperationTimeout.is_retryable(run));
        assert!(TransportError::Client {
            cause: ClientCause::UnknownHost
        }
        .is_retryable(run));

        assert!(!TransportError::BadCredentials.is_retryable(run));
        assert!(!TransportError::NotAuthorized.is_retryable(run));
        assert!(!TransportError::MalformedMessage("bad".into()).is_retryable(run));
        assert!(!TransportError::Client {
            cause: ClientCause::SocketTimeout
        }
        .is_retryable(run));
        assert!(!TransportError::ConnectionLost {
            cause: DisconnectCause::TlsFailure
        }
        .is_retryable(run));
    }

    #[test]
    fn end_of_stream_is_retryable_only_while_running() {
        let lost = TransportError::ConnectionLost {
            cause: DisconnectCause::EndOfStream,
        };
        assert!(lost.is_retryable(true));
        assert!(!lost.is_retryable(false));
    }

    #[test]
    fn disconnect_reason_mapping() {
        let run = true;
        assert_eq!(
            TransportError::BadCredentials.disconnect_reason(run),
            DisconnectReason::NotAuthorized
        );
        assert_eq!(
            TransportError::NotAuthorized.disconnect_reason(run),
            DisconnectReason::NotAuthorized
        );
        assert_eq!(
            TransportError::ConnectionLost {
                cause: DisconnectCause::TlsFailure
            }
            .disconnect_reason(run),
            DisconnectReason::ConnectionLost
        );
        assert_eq!(
            TransportError::Client {
                cause: ClientCause::SocketTimeout
            }
            .disconnect_reason(run),
            DisconnectReason::ConnectionTimeout
        );
        assert_eq!(
            TransportError::Client {
                cause: ClientCause::UnknownHost
            }
            .disconnect_reason(run),
            DisconnectReason::ConnectionLost
        );
        assert_eq!(
            TransportError::OperationTimeout.disconnect_reason(run),
            DisconnectReason::ConnectionTimeout
        );
        assert_eq!(
            TransportError::WriteTimeout.disconnect_reason(run),
            DisconnectReason::ConnectionTimeout
        );
        assert_eq!(
            TransportError::Other("??".into()).disconnect_reason(run),
            DisconnectReason::Unknown
        );
        assert_eq!(
            TransportError::ServerUnavailable("down".into()).disconnect_reason(run),
            DisconnectReason::Unknown
        );
    }

    #[test]
    fn end_of_stream_reason_depends_on_run_flag() {
        let lost = TransportError::ConnectionLost {
            cause: DisconnectCause::EndOfStream,
        };
        assert_eq!(lost.disconnect_reason(true), DisconnectReason::ConnectionLost);
        assert_eq!(lost.disconnect_reason(false), DisconnectReason::ClientClosed);
    }
}

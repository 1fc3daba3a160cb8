//! Device-side client for Google Cloud IoT Core.
//!
//! Connects a single device to the cloud MQTT bridge, authenticating with
//! short-lived signed JWTs, and provides:
//!
//! - **Telemetry publishing** to the device's events topic, queued FIFO
//! - **Device state publishing**, coalesced so only the newest state is sent
//! - **Arbitrary topic events** with their own FIFO queue
//! - **Configuration and command delivery** from the bridge to registered
//!   listeners
//!
//! All publish methods work whether or not the client is currently
//! connected: messages are buffered in memory and delivered once the
//! background supervisor (re)establishes the session. The supervisor
//! reconnects on transient failures with bounded exponential backoff and
//! stops on unrecoverable ones (for example, rejected credentials),
//! reporting connection changes through an optional [`ConnectionCallback`].
//!
//! # Example
//!
//! ```no_run
//! use iotcore_device::{ConnectionParams, DeviceClient, DeviceKey, Qos, TopicEvent};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let rt = tokio::runtime::Runtime::new()?;
//! # rt.block_on(async {
//! let params = ConnectionParams::builder()
//!     .project_id("my-project")
//!     .registry("my-registry", "us-central1")
//!     .device_id("my-device")
//!     .build()?;
//! let key = DeviceKey::from_ec_pem(&std::fs::read("device_key.pem")?)?;
//!
//! let client = DeviceClient::builder()
//!     .connection_params(params)
//!     .device_key(key)
//!     .on_configuration(|payload: Vec<u8>| {
//!         println!("new config: {} bytes", payload.len());
//!     })
//!     .build()?;
//!
//! client.connect();
//! client.publish_device_state(b"online".to_vec());
//! client.publish_telemetry(TopicEvent::new(b"25.1".to_vec(), Some("temperature"), Qos::AtLeastOnce));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # })?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
mod callback;
mod client;
pub mod config;
mod event;
mod executor;
pub mod jwt;
pub mod logging;
mod pipeline;
pub mod queue;
mod router;
mod supervisor;
pub mod testing;
pub mod transport;

pub use backoff::{Backoff, BackoffError};
pub use callback::{CommandListener, ConfigListener, ConnectionCallback, DisconnectReason};
pub use client::{DeviceClient, DeviceClientBuilder};
pub use config::{ConfigError, ConnectionParams, ConnectionParamsBuilder};
pub use event::{Qos, TopicEvent};
pub use executor::{BlockingExecutor, Executor, Job};
pub use jwt::{Claims, Clock, DeviceKey, JwtSigner, KeyAlgorithm, SystemClock, TokenError};
pub use queue::{BoundedQueue, OverflowPolicy, QueueError};
pub use transport::{
    ClientCause, ConnectOptions, DisconnectCause, MqttTransport, Transport, TransportCallback,
    TransportError,
};

//! Connection identity and configuration.
//!
//! [`ConnectionParams`] holds everything needed to identify one device to the
//! cloud MQTT bridge. The broker URL, client identifier and per-device topic
//! paths are derived once at construction and cached, since they are
//! interpolated into every publish.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const DEFAULT_BRIDGE_HOSTNAME: &str = "mqtt.googleapis.com";
const DEFAULT_BRIDGE_PORT: u16 = 8883;
const DEFAULT_AUTH_TOKEN_LIFETIME: Duration = Duration::from_secs(60 * 60);
const MAX_AUTH_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration and construction errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} cannot be empty")]
    EmptyField(&'static str),
    #[error("bridge port cannot be zero")]
    InvalidPort,
    #[error("auth token lifetime must be greater than zero")]
    ZeroTokenLifetime,
    #[error("auth token lifetime cannot exceed 24 hours")]
    TokenLifetimeTooLong,
    #[error("missing required builder parameter: {0}")]
    MissingParameter(&'static str),
    #[error("no tokio runtime available; construct the client inside a runtime")]
    NoRuntime,
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error(transparent)]
    Queue(#[from] crate::queue::QueueError),
    #[error(transparent)]
    Backoff(#[from] crate::backoff::BackoffError),
}

/// Identity of a single device registered with the cloud bridge, plus the
/// MQTT settings used to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    project_id: String,
    registry_id: String,
    device_id: String,
    cloud_region: String,
    bridge_hostname: String,
    bridge_port: u16,
    auth_token_lifetime: Duration,

    // Derived, cached strings.
    broker_url: String,
    client_id: String,
    telemetry_topic: String,
    device_state_topic: String,
    configuration_topic: String,
    commands_topic_prefix: String,
}

/// On-disk representation accepted by [`ConnectionParams::load_from_file`].
#[derive(Debug, Deserialize)]
struct RawParams {
    project_id: String,
    registry_id: String,
    device_id: String,
    cloud_region: String,
    bridge_hostname: Option<String>,
    bridge_port: Option<u16>,
    auth_token_lifetime_secs: Option<u64>,
}

impl ConnectionParams {
    pub fn builder() -> ConnectionParamsBuilder {
        ConnectionParamsBuilder::default()
    }

    /// Load connection parameters from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let raw: RawParams = toml::from_str(&content)?;

        let mut builder = Self::builder()
            .project_id(raw.project_id)
            .registry(raw.registry_id, raw.cloud_region)
            .device_id(raw.device_id);
        if let Some(hostname) = raw.bridge_hostname {
            builder = builder.bridge_hostname(hostname);
        }
        if let Some(port) = raw.bridge_port {
            builder = builder.bridge_port(port);
        }
        if let Some(secs) = raw.auth_token_lifetime_secs {
            builder = builder.auth_token_lifetime(Duration::from_secs(secs));
        }
        builder.build()
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn registry_id(&self) -> &str {
        &self.registry_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn cloud_region(&self) -> &str {
        &self.cloud_region
    }

    pub fn bridge_hostname(&self) -> &str {
        &self.bridge_hostname
    }

    pub fn bridge_port(&self) -> u16 {
        self.bridge_port
    }

    /// How long minted auth tokens remain valid.
    pub fn auth_token_lifetime(&self) -> Duration {
        self.auth_token_lifetime
    }

    /// Broker URL in the form `ssl://<hostname>:<port>`.
    pub fn broker_url(&self) -> &str {
        &self.broker_url
    }

    /// The full hierarchical path identifying this device to the bridge.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Telemetry topic; never ends with a trailing slash.
    pub fn telemetry_topic(&self) -> &str {
        &self.telemetry_topic
    }

    /// Device state topic; never ends with a trailing slash.
    pub fn device_state_topic(&self) -> &str {
        &self.device_state_topic
    }

    /// Configuration topic the bridge pushes device config on.
    pub fn configuration_topic(&self) -> &str {
        &self.configuration_topic
    }

    /// Prefix under which commands arrive; sub-folders are appended after it.
    pub fn commands_topic_prefix(&self) -> &str {
        &self.commands_topic_prefix
    }
}

/// Builder for [`ConnectionParams`].
#[derive(Debug, Default)]
pub struct ConnectionParamsBuilder {
    project_id: Option<String>,
    registry_id: Option<String>,
    device_id: Option<String>,
    cloud_region: Option<String>,
    bridge_hostname: Option<String>,
    bridge_port: Option<u16>,
    auth_token_lifetime: Option<Duration>,
}

impl ConnectionParamsBuilder {
    /// Set the cloud project id. Required.
    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Set the device registry and its cloud region. Required.
    pub fn registry(
        mut self,
        registry_id: impl Into<String>,
        cloud_region: impl Into<String>,
    ) -> Self {
        self.registry_id = Some(registry_id.into());
        self.cloud_region = Some(cloud_region.into());
        self
    }

    /// Set the device id within the registry. Required.
    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Override the MQTT bridge hostname. Defaults to `mqtt.googleapis.com`.
    pub fn bridge_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.bridge_hostname = Some(hostname.into());
        self
    }

    /// Override the MQTT bridge port. Defaults to 8883; port 443 also works
    /// against the default bridge when 8883 is firewalled.
    pub fn bridge_port(mut self, port: u16) -> Self {
        self.bridge_port = Some(port);
        self
    }

    /// Override how long minted auth tokens remain valid. Defaults to one
    /// hour; the bridge caps lifetimes at 24 hours.
    pub fn auth_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.auth_token_lifetime = Some(lifetime);
        self
    }

    pub fn build(self) -> Result<ConnectionParams, ConfigError> {
        let project_id = require(self.project_id, "project id")?;
        let registry_id = require(self.registry_id, "registry id")?;
        let device_id = require(self.device_id, "device id")?;
        let cloud_region = require(self.cloud_region, "cloud region")?;

        let bridge_hostname = match self.bridge_hostname {
            Some(hostname) if hostname.is_empty() => {
                return Err(ConfigError::EmptyField("bridge hostname"))
            }
            Some(hostname) => hostname,
            None => DEFAULT_BRIDGE_HOSTNAME.to_string(),
        };
        let bridge_port = self.bridge_port.unwrap_or(DEFAULT_BRIDGE_PORT);
        if bridge_port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        let auth_token_lifetime = self.auth_token_lifetime.unwrap_or(DEFAULT_AUTH_TOKEN_LIFETIME);
        if auth_token_lifetime.is_zero() {
            return Err(ConfigError::ZeroTokenLifetime);
        }
        if auth_token_lifetime > MAX_AUTH_TOKEN_LIFETIME {
            return Err(ConfigError::TokenLifetimeTooLong);
        }

        let broker_url = format!("ssl://{bridge_hostname}:{bridge_port}");
        let client_id = format!(
            "projects/{project_id}/locations/{cloud_region}/registries/{registry_id}/devices/{device_id}"
        );
        let telemetry_topic = format!("/devices/{device_id}/events");
        let device_state_topic = format!("/devices/{device_id}/state");
        let configuration_topic = format!("/devices/{device_id}/config");
        let commands_topic_prefix = format!("/devices/{device_id}/commands");

        Ok(ConnectionParams {
            project_id,
            registry_id,
            device_id,
            cloud_region,
            bridge_hostname,
            bridge_port,
            auth_token_lifetime,
            broker_url,
            client_id,
            telemetry_topic,
            device_state_topic,
            configuration_topic,
            commands_topic_prefix,
        })
    }
}

fn require(field: Option<String>, name: &'static str) -> Result<String, ConfigError> {
    match field {
        Some(value) if !value.is_empty() => Ok(value),
        Some(_) => Err(ConfigError::EmptyField(name)),
        None => Err(ConfigError::MissingParameter(name)),
    }
}

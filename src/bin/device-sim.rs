//! Device simulator: drives a [`DeviceClient`] against a real bridge.
//!
//! Useful for verifying a device registration end to end: connects with the
//! given key, reports a state payload, then publishes periodic telemetry
//! until interrupted. Received configuration and commands are logged.
//!
//! ```text
//! device-sim --config device.toml --ec-key device_key.pem --interval 10
//! ```

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use iotcore_device::{
    logging, ConnectionParams, DeviceClient, DeviceKey, DisconnectReason, Qos, TopicEvent,
};

#[derive(Parser, Debug)]
#[command(name = "device-sim", about = "Simulate a device talking to the cloud IoT bridge")]
struct Args {
    /// TOML file with the device's connection parameters
    #[arg(long)]
    config: PathBuf,

    /// PEM file containing an RSA private key
    #[arg(long, conflicts_with = "ec_key")]
    rsa_key: Option<PathBuf>,

    /// PEM file containing an EC P-256 private key
    #[arg(long)]
    ec_key: Option<PathBuf>,

    /// Seconds between telemetry samples
    #[arg(long, default_value_t = 10)]
    interval: u64,

    /// Device state payload reported after connecting
    #[arg(long, default_value = "online")]
    state: String,
}

struct LogConnectionEvents;

impl iotcore_device::ConnectionCallback for LogConnectionEvents {
    fn on_connected(&self) {
        info!("bridge connection established");
    }

    fn on_disconnected(&self, reason: DisconnectReason) {
        info!(%reason, "bridge connection closed");
    }
}

fn load_key(args: &Args) -> Result<DeviceKey, Box<dyn std::error::Error>> {
    match (&args.rsa_key, &args.ec_key) {
        (Some(path), None) => Ok(DeviceKey::from_rsa_pem(&std::fs::read(path)?)?),
        (None, Some(path)) => Ok(DeviceKey::from_ec_pem(&std::fs::read(path)?)?),
        _ => Err("exactly one of --rsa-key and --ec-key is required".into()),
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let params = ConnectionParams::load_from_file(&args.config)?;
    let key = load_key(&args)?;

    info!(
        broker = %params.broker_url(),
        device = %params.device_id(),
        "starting device simulator"
    );

    let client = DeviceClient::builder()
        .connection_params(params)
        .device_key(key)
        .connection_callback(LogConnectionEvents)
        .on_configuration(|payload: Vec<u8>| {
            info!(len = payload.len(), "configuration received");
        })
        .on_command(|subfolder: &str, payload: Vec<u8>| {
            info!(subfolder, len = payload.len(), "command received");
        })
        .build()?;

    client.connect();
    client.publish_device_state(args.state.as_bytes().to_vec());

    let mut sample = 0u64;
    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sample += 1;
                let payload = format!("{{\"sample\":{sample}}}");
                let queued = client.publish_telemetry(TopicEvent::new(
                    payload.into_bytes(),
                    Some("sim"),
                    Qos::AtLeastOnce,
                ));
                info!(sample, queued, connected = client.is_connected(), "telemetry sample");
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("interrupted, disconnecting");
                client.disconnect();
                break;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    logging::init_logging();
    let args = Args::parse();
    if let Err(err) = run(args).await {
        error!(error = %err, "device simulator failed");
        process::exit(1);
    }
}

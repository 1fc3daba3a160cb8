//! Structured logging setup for binaries and tests.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! the application's choice. `init_logging` wires up the common case:
//!
//! - `RUST_LOG` controls filtering (default `info`, rumqttc capped at warn)
//! - `LOG_FORMAT=json` switches from compact terminal output to JSON

use std::env;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    /// Terminal-friendly compact output.
    Compact,
    /// Machine-readable JSON lines.
    Json,
}

impl LogFormat {
    fn from_env() -> Self {
        match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// Install a global tracing subscriber.
///
/// Does nothing if a subscriber is already installed, so tests can call it
/// repeatedly.
pub fn init_logging() {
    let filter = env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new("info,rumqttc=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    // try_init fails when a subscriber is already installed; keep it.
    let _ = match LogFormat::from_env() {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
    };
}

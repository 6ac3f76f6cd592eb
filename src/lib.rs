//! Witness - tamper-evident screen recordings.
//!
//! This is the client-side core of the Witness recorder. It tracks the
//! recording session lifecycle, bridges the backend's push notifications into
//! a single session store, streams (possibly encrypted) recordings into memory
//! for playback and models two-phase verification reports. Capture,
//! encryption, signing and anchoring all happen in the backend service, which
//! is reached through the traits in [`commands::backend`].

pub mod capture;
pub mod client;
pub mod commands;
pub mod config;
pub mod events;
pub mod playback;
pub mod recorder;
pub mod session;
pub mod utils;
pub mod verification;

#[cfg(test)]
mod testing;

pub use client::WitnessClient;
pub use config::ClientConfig;
pub use utils::error::{ClientError, ClientResult, ErrorResponse};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging.
///
/// `RUST_LOG` takes precedence over `default_filter`. Returns `false` if a
/// global subscriber was already installed.
pub fn init_tracing(default_filter: &str) -> bool {
    let installed = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Starting Witness client v{}", env!("CARGO_PKG_VERSION"));
    }
    installed
}

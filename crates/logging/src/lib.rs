//! Logging setup for applications embedding the relay client.
//!
//! `RUST_LOG` wins over the default filter passed in.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,mterelay=debug";

/// Install a global fmt subscriber.
///
/// Panics if a global subscriber is already set; use [`try_init_logging`]
/// from tests or libraries.
pub fn init_logging(default_filter: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter(default_filter))
        .init();
}

/// Install a global fmt subscriber, returning false if one already exists
pub fn try_init_logging(default_filter: &str) -> bool {
    tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer())
        .with(env_filter(default_filter))
        .try_init()
        .is_ok()
}

fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

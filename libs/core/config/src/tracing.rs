//! Subscriber installation for consumer nodes.

use crate::Environment;
use tracing::{debug, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
///
/// Keeps the consumer core at `info` so subscribe and stop events show up,
/// while straggler and failure warnings are never filtered out.
fn default_filter(environment: &Environment) -> EnvFilter {
    if environment.is_production() {
        EnvFilter::new("warn,queue_consumer=info")
    } else {
        EnvFilter::new("info,queue_consumer=debug")
    }
}

/// Install color-eyre with a project-standard configuration.
///
/// Safe to call multiple times.
pub fn install_color_eyre() {
    let _ = color_eyre::config::HookBuilder::default()
        .display_location_section(true)
        .display_env_section(false)
        .install();
}

/// Initialize tracing for a consumer node.
///
/// - **Production** (`APP_ENV=production`): flattened JSON events without targets
/// - **Development** (default): pretty-printed events
///
/// Both install a `tracing-error` `ErrorLayer` so span traces are captured
/// on errors. `RUST_LOG` overrides the default filter. Calling it again after
/// a subscriber is installed is a no-op.
pub fn init_tracing(environment: &Environment) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(environment));

    let result = if environment.json_logs() {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .with_thread_names(true)
                    .flatten_event(true),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .pretty(),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    };

    match result {
        Ok(_) => info!(environment = ?environment, "Tracing initialized"),
        Err(_) => debug!("Tracing already initialized, skipping re-initialization"),
    }
}

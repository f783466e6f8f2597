//! Tracing initialization.
//!
//! Logs go to stdout through a `fmt` layer. The filter comes from `RUST_LOG` when set and
//! falls back to the configured `log_level`, so
//!
//! ```bash
//! RUST_LOG=larasanic=debug,tower_http=info larasanic serve
//! ```
//!
//! overrides whatever the config file says.

use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Build the filter: `RUST_LOG` if present and valid, else `default_level`.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_telemetry(default_level: &str) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    info!("Telemetry initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_filter_falls_back_to_configured_level() {
        // SAFETY: serialized with every other test that touches RUST_LOG
        unsafe { std::env::remove_var("RUST_LOG") };
        assert_eq!(env_filter("warn").to_string(), "warn");

        unsafe { std::env::set_var("RUST_LOG", "larasanic=debug") };
        assert_eq!(env_filter("warn").to_string(), "larasanic=debug");
        unsafe { std::env::remove_var("RUST_LOG") };
    }
}

//! Log output for applications and tests.
//!
//! The library only emits `tracing` events. [`init`] installs a formatting
//! subscriber filtered by the `AOSOCKET_LOG` environment variable, for
//! example `AOSOCKET_LOG=aosocket=debug`.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "AOSOCKET_LOG";

const DEFAULT_FILTER: &str = "warn";

/// Installs the global subscriber.
///
/// Does nothing if a subscriber is already installed, so tests may call it
/// freely.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

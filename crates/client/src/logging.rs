//! Logging setup and macros.
//!
//! All realtime components log through the `log_*!` macros below so every
//! line carries the `calibra` target and can be filtered as one unit with
//! `RUST_LOG=calibra=debug`.

use tracing_subscriber::EnvFilter;

/// Target shared by every log line emitted from this crate.
pub const TARGET: &str = "calibra";

/// Default filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "calibra=info,calibra_client=info";

/// Initialize the global tracing subscriber.
///
/// Safe to call more than once; later calls are ignored.
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        ::tracing::info!(target: $crate::logging::TARGET, $($arg)*)
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        ::tracing::error!(target: $crate::logging::TARGET, $($arg)*)
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        ::tracing::warn!(target: $crate::logging::TARGET, $($arg)*)
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        ::tracing::debug!(target: $crate::logging::TARGET, $($arg)*)
    };
}

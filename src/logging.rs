//! Logging module.
//!
//! The crate logs through `tracing` under a single target, so embedders can
//! tune realtime chatter with one directive (`RUST_LOG=quipflip_live=debug`)
//! without touching the rest of their app.

use tracing_subscriber::EnvFilter;

/// Target every crate log line is emitted under.
pub const TARGET: &str = "quipflip_live";

#[doc(hidden)]
pub use tracing as __tracing;

/// Install a fmt subscriber.
///
/// `RUST_LOG` wins over `default_filter` when set. Calling this more than once
/// is harmless; later calls are ignored.
pub fn init(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .try_init();
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::__tracing::info!(target: $crate::logging::TARGET, $($arg)*)
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::__tracing::error!(target: $crate::logging::TARGET, $($arg)*)
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::__tracing::warn!(target: $crate::logging::TARGET, $($arg)*)
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::__tracing::debug!(target: $crate::logging::TARGET, $($arg)*)
    };
}

//! Structured logging macros and subscriber setup.
//!
//! Every event carries a `source` field naming the component that emitted
//! it, so the reconfiguration engine, the switch facade and the dataplane
//! can be filtered independently.

use tracing_subscriber::EnvFilter;

/// Per-command and per-table-edit detail.
///
/// ```ignore
/// debug_log!("ReconfigEngine", command = line, "Applied command");
/// ```
#[macro_export]
macro_rules! debug_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::debug!(source = $source, $($arg)*)
    };
}

/// Generation loads and swaps, dataplane start and stop.
///
/// ```ignore
/// info_log!("Switch", context = cxt, generation = number, "Loaded configuration");
/// ```
#[macro_export]
macro_rules! info_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::info!(source = $source, $($arg)*)
    };
}

/// Rejected plans and packets dropped on a dangling edge. The active
/// generation keeps serving when one of these is emitted.
#[macro_export]
macro_rules! warn_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::warn!(source = $source, $($arg)*)
    };
}

/// Failures of the `flexbm` binary itself, such as an unreadable input.
#[macro_export]
macro_rules! error_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::error!(source = $source, $($arg)*)
    };
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set. Returns an error when
/// a subscriber is already installed.
pub fn init_tracing(level: &str, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

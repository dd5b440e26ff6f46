//! Tracing infrastructure for debugging funnel.
//!
//! Enable with `--features tracing`. The crate-internal event macros expand to
//! nothing when the feature is disabled, so queue hot paths carry no logging cost.
//!
//! Filter with `RUST_LOG`, e.g. `RUST_LOG=funnel=debug`. The default is `funnel=trace`.

/// Installs a global subscriber with thread ids and uptime timestamps.
///
/// Safe to call more than once: later calls (or a subscriber installed by the
/// host application) leave the existing one in place.
/// Does nothing if the `tracing` feature is not enabled.
#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("funnel=trace"));

    // Lagging-tail and head-race events come from many producer threads at once.
    let layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(fmt::time::uptime());

    let _ = tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "tracing"))]
pub const fn init_tracing() {}

#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, trace, warn};

#[cfg(not(feature = "tracing"))]
macro_rules! event_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use {event_noop as debug, event_noop as trace, event_noop as warn};

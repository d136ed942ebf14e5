//! Logging and tracing configuration
//!
//! The library only emits `tracing` events; nothing is printed unless the
//! embedding application installs a subscriber. [`init`] installs the one
//! used during development and by tools built on this crate.
//!
//! # Log Levels
//!
//! - `warn`  - recorded checksum errors, substituted chunks, incomplete sets
//! - `info`  - image opened, verification finished
//! - `debug` - per segment and per chunk group events
//! - `trace` - per chunk reads and cache activity
//!
//! # Environment Variable Control
//!
//! ```bash
//! RUST_LOG=ewf_chunks=trace my-tool image.E01
//! RUST_LOG=ewf_chunks::ewf::chunk_table=debug my-tool image.E01
//! ```

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn default_filter() -> EnvFilter {
    // Default: info in release, debug in debug builds or with `debug-logging`
    if cfg!(debug_assertions) || cfg!(feature = "debug-logging") {
        EnvFilter::new("ewf_chunks=debug")
    } else {
        EnvFilter::new("ewf_chunks=info")
    }
}

/// Initialize the logging/tracing system.
/// Does nothing if a global subscriber is already set.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter());

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact(),
    );

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Initialize logging with verbose output (file:line, thread IDs)
pub fn init_verbose() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ewf_chunks=trace"));

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .pretty(),
    );

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Check if debug logging is enabled
/// Can be used to skip expensive debug computations
#[inline]
pub fn is_debug_enabled() -> bool {
    tracing::enabled!(Level::DEBUG)
}

#[inline]
pub fn is_trace_enabled() -> bool {
    tracing::enabled!(Level::TRACE)
}

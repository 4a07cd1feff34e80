//! Shared household chore tracker.
//!
//! Chores are rows, weeks of the year are columns, and each cell records who
//! did the chore that week. Completions live in a document store behind
//! [`store::ChoreStore`]; [`reconcile::Reconciler`] folds them into a
//! [`matrix::CompletionMatrix`], applies toggles optimistically and persists
//! them in the background.

pub mod config;
pub mod error;
pub mod file_store;
pub mod matrix;
pub mod model;
pub mod reconcile;
pub mod store;
pub mod view;
pub mod week;

#[cfg(feature = "desktop")]
pub mod commands;

pub use error::{ErrorCode, ErrorKind, Result, TrackerError};
pub use reconcile::{Reconciler, RefreshOutcome, TrackerEvent};

/// Install the global `tracing` subscriber, filtered by `RUST_LOG`
/// (default `info`). Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

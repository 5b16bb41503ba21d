//! Error types for the watch session.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced to the session's caller.
#[derive(Error, Debug)]
pub enum WatchError {
    /// The path handed to `start` is missing or unreadable.
    #[error("invalid watch target {}: {reason}", path.display())]
    InvalidTarget { path: PathBuf, reason: String },

    /// A session is already active for this slot; starting is a no-op
    /// failure, not a restart.
    #[error("a watch session is already running")]
    AlreadyRunning,

    /// A tracked file could not be stat'ed between polls.
    #[error("cannot stat {}: {source}", path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type WatchResult<T> = Result<T, WatchError>;

//! Error types for script loading and execution.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort the current reload (the session stays running).
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("cannot open script {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("syntax error in {}: {message}", path.display())]
    Syntax { path: PathBuf, message: String },
}

pub type LoadResult<T> = Result<T, LoadError>;

/// A failure raised while executing script code.
///
/// Execution errors never propagate out of a reload; they are formatted onto
/// the error stream by the loader.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ExecError {
    pub message: String,
}

impl ExecError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

//! Error types for scripthost.

use thiserror::Error;

use crate::script::CallError;

/// Common error type for scripthost.
#[derive(Error, Debug)]
pub enum ScriptHostError {
    /// A module build attempt failed.
    ///
    /// Covers bad source, duplicate module names, missing descriptors and
    /// failed post-build wiring. No partial module is retained.
    #[error("build error: {0}")]
    Build(String),

    /// A registration did not occur (duplicate name, access mismatch, ...).
    #[error("registration error: {0}")]
    Registration(String),

    /// Invoking a script function failed.
    #[error("call error: {0}")]
    Call(#[from] CallError),

    /// The script engine collaborator reported an error.
    #[error("engine error: {0}")]
    Engine(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Validation error for caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<mlua::Error> for ScriptHostError {
    fn from(e: mlua::Error) -> Self {
        ScriptHostError::Engine(e.to_string())
    }
}

/// Result type alias for scripthost operations.
pub type Result<T> = std::result::Result<T, ScriptHostError>;

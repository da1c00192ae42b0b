use thiserror::Error; // Import the `Error` derive macro from the `thiserror` crate

// Define an enum to represent everything that can go wrong while building contexts
#[derive(Debug, Error)] // Automatically implement `Debug` and `Error` traits for the enum
pub enum ContextError {
    // The same kind showed up twice in the flattened merge input
    #[error("duplicate context kind: {kind}")]
    DuplicateKind { kind: String },

    // A context whose kind cannot be derived, or whose shape is not an object
    #[error("invalid context: {0}")]
    InvalidContext(String),

    // A verbosity name that is not in the level table
    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    // The subscriber behind a level reload handle is gone
    #[error("could not apply log level {level}: {reason}")]
    LevelReload { level: String, reason: String },

    // Reading an input file failed
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    // Malformed JSON handed to one of the string helpers
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ContextError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ContextError::InvalidContext(msg.into())
    }

    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        ContextError::Io { path: path.into(), source }
    }
}

// Type alias for results that use `ContextError` as the error type
pub type Result<T> = std::result::Result<T, ContextError>;

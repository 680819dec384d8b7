//! Error types for ganglion-core

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// A path or handle resolved to nothing where exactly one target was expected
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unknown field name in direct access
    #[error("Name error: no field '{field}' on class {class}")]
    NameError { field: String, class: String },

    /// Sequence length does not match the addressed vec or element field
    #[error("Shape error: expected {expected} values, got {got} ({context})")]
    ShapeError {
        expected: usize,
        got: usize,
        context: String,
    },

    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    /// Incompatible endpoints or violated length constraints at connect time
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Operation invalid for the current scheduler state
    #[error("State error: {0}")]
    StateError(String),

    /// Handle refers to a slot that has been freed or reused
    #[error("Stale handle: {0}")]
    StaleHandle(String),

    /// Tick binding rejected when it was requested
    #[error("Binding error: {0}")]
    Binding(String),

    #[error("Field '{field}' on class {class} is read-only")]
    ReadOnly { field: String, class: String },

    #[error("Duplicate name '{name}' under {parent}")]
    DuplicateName { name: String, parent: String },

    #[error("Index {index} out of range (len {len})")]
    IndexOutOfRange { index: isize, len: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Integer arithmetic left the i64 range
    #[error("Overflow: {0}")]
    Overflow(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    pub fn type_error(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Error::TypeError {
            expected: expected.into(),
            got: got.into(),
        }
    }

    pub fn shape(expected: usize, got: usize, context: impl Into<String>) -> Self {
        Error::ShapeError {
            expected,
            got,
            context: context.into(),
        }
    }
}

impl From<ron::error::SpannedError> for Error {
    fn from(err: ron::error::SpannedError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<ron::Error> for Error {
    fn from(err: ron::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

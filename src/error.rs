use thiserror::Error;

/// Failures a caller may want to tell apart. Everything else is reported as
/// plain `anyhow` context.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{word} has occurred before in the projection file")]
    DuplicateProjection { word: String },

    #[error("no semantic projection file given (use --semantic or --semantic-fast)")]
    NoProjectionSource,

    #[error("checkpoint does not match the model: {field} is {found}, expected {expected}")]
    CheckpointMismatch {
        field: &'static str,
        expected: String,
        found: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{what}: syntax error on line {line}")]
    Malformed { what: &'static str, line: usize },

    #[error("memory allocation failed for {0}")]
    Allocation(&'static str),
}

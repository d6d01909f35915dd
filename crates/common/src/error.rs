//! Common error types for custody.

use thiserror::Error;

/// Common error type for custody operations.
///
/// Forensic discrepancies (hash mismatches, missing or extra files) are not
/// errors; they are reported through a validation verdict. Variants here are
/// either malformed input from the caller or failures of the surrounding I/O.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid input for {param}: expected {expected}, received {received}")]
    InvalidInput {
        param: String,
        expected: &'static str,
        received: String,
    },

    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    #[error("Invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("Schema validation failed: {0}")]
    SchemaValidation(String),

    #[error("Invalid case number: {0}")]
    InvalidCaseNumber(String),

    #[error("Case not found: {0}")]
    CaseNotFound(String),

    #[error("Case already exists: {0}")]
    CaseExists(String),

    #[error("Image {image} not found in case {case_number}")]
    ImageNotFound { case_number: String, image: String },

    #[error("Integrity check failed for {item}: {summary}")]
    IntegrityViolation { item: String, summary: String },

    #[error("Storage error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build an `InvalidInput` error for a parameter.
    pub fn invalid_input(
        param: impl Into<String>,
        expected: &'static str,
        received: impl Into<String>,
    ) -> Self {
        Error::InvalidInput {
            param: param.into(),
            expected,
            received: received.into(),
        }
    }
}

/// Result type alias using common Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

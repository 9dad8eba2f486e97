//! Error taxonomy shared between the core algorithms and the application.
//!
//! `CoreError` classifies failures by *kind*, per the taxonomy in the
//! specification, so that HTTP handlers and retry policies can branch on
//! `kind()` rather than sniffing message strings.

use thiserror::Error;

/// A classified failure. Each variant corresponds to one of the error
/// kinds in the taxonomy; the application crate maps these to HTTP status
/// codes and machine-readable codes.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("ingestion error: {0}")]
    Ingestion(String),

    #[error("retrieval error: {0}")]
    Retrieval(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("tool error: {0}")]
    Tool(String),

    #[error("safety block: {0}")]
    Safety(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("validation error: {0}")]
    Validation(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Configuration(_) => ErrorKind::Configuration,
            CoreError::Ingestion(_) => ErrorKind::Ingestion,
            CoreError::Retrieval(_) => ErrorKind::Retrieval,
            CoreError::Provider(_) => ErrorKind::Provider,
            CoreError::Tool(_) => ErrorKind::Tool,
            CoreError::Safety(_) => ErrorKind::Safety,
            CoreError::Persistence(_) => ErrorKind::Persistence,
            CoreError::Validation(_) => ErrorKind::Validation,
        }
    }
}

/// The bare kind, without a message — used for status-code mapping and
/// metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Ingestion,
    Retrieval,
    Provider,
    Tool,
    Safety,
    Persistence,
    Validation,
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

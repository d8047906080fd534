//! Error types for AG Suite

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

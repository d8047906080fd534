//! Entitlement error types

use thiserror::Error;

/// Entitlement-specific errors
#[derive(Debug, Error)]
pub enum EntitlementError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Plan not found: {0}")]
    PlanNotFound(String),

    #[error("Plan slug already in use: {0}")]
    DuplicateSlug(String),

    #[error("Email already registered: {0}")]
    DuplicateEmail(String),

    #[error("Company name already in use for this client: {0}")]
    DuplicateName(String),

    #[error("Entitlement limit reached for {resource}: {current} of {cap}")]
    CapExceeded {
        resource: &'static str,
        current: i64,
        cap: i64,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Transient storage error: {0}")]
    Transient(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for EntitlementError {
    fn from(err: sqlx::Error) -> Self {
        if is_transient_sqlx(&err) {
            EntitlementError::Transient(err.to_string())
        } else {
            EntitlementError::Database(err.to_string())
        }
    }
}

impl From<agsuite_shared::SuiteError> for EntitlementError {
    fn from(err: agsuite_shared::SuiteError) -> Self {
        use agsuite_shared::SuiteError;
        match err {
            SuiteError::Validation(msg) => EntitlementError::InvalidInput(msg),
            SuiteError::NotFound(msg) => EntitlementError::NotFound(msg),
            SuiteError::Internal(msg) => EntitlementError::Internal(msg),
        }
    }
}

pub type EntitlementResult<T> = Result<T, EntitlementError>;

/// Whether an error is worth retrying for idempotent operations.
/// Uniqueness and cap violations are never transient.
pub fn is_transient(err: &EntitlementError) -> bool {
    matches!(err, EntitlementError::Transient(_))
}

/// Connection-level failures that may succeed on retry
fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)
}

/// Name of the violated unique constraint, if this is a unique-violation
/// database error (SQLSTATE 23505)
pub(crate) fn unique_violation(err: &sqlx::Error) -> Option<String> {
    if let sqlx::Error::Database(db) = err {
        if db.code().as_deref() == Some("23505") {
            return db.constraint().map(|c| c.to_string());
        }
    }
    None
}

/// Whether this is a foreign-key violation (SQLSTATE 23503), meaning a
/// referenced row does not exist
pub(crate) fn fk_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db) = err {
        return db.code().as_deref() == Some("23503");
    }
    false
}

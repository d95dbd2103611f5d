//! Sync engine error type and failure classification.
//!
//! Phases return `SyncError`; the orchestrator inspects `class()` after each
//! phase instead of relying on sentinel re-throws. Only three conditions
//! abort a whole cycle: missing credential, rate limiting, and persistent
//! local-store authorization failure.

use thiserror::Error;

use crate::error::DatabaseError;
use crate::google::client::ApiError;

#[derive(Debug, Error)]
pub enum SyncError {
    /// No usable Google credential. Aborts the cycle and opens the fixed
    /// auth backoff window.
    #[error("no usable Google credential")]
    CredentialUnavailable,

    /// The provider asked us to slow down. Aborts the cycle and opens the
    /// exponential rate-limit window.
    #[error("rate limited by Google")]
    RateLimited,

    /// Local store failure.
    #[error("local store error: {0}")]
    Store(#[from] DatabaseError),

    /// Remote API failure that is not cycle-aborting.
    #[error(transparent)]
    Api(ApiError),

    #[error("{0}")]
    Fatal(String),
}

impl From<ApiError> for SyncError {
    fn from(e: ApiError) -> Self {
        if matches!(e, ApiError::NoCredential) {
            SyncError::CredentialUnavailable
        } else if e.is_rate_limited() {
            SyncError::RateLimited
        } else {
            SyncError::Api(e)
        }
    }
}

/// Coarse failure classification checked by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    RateLimited,
    CredentialUnavailable,
    Fatal,
}

impl SyncError {
    pub fn class(&self) -> FailureClass {
        match self {
            SyncError::CredentialUnavailable => FailureClass::CredentialUnavailable,
            SyncError::RateLimited => FailureClass::RateLimited,
            SyncError::Fatal(_) => FailureClass::Fatal,
            SyncError::Store(_) | SyncError::Api(_) => FailureClass::Transient,
        }
    }

    /// Whether this is a local-store authorization failure, counted toward
    /// the consecutive-failure cycle abort.
    pub fn is_store_auth(&self) -> bool {
        matches!(self, SyncError::Store(DatabaseError::Unauthorized(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_conversion() {
        let e: SyncError = ApiError::NoCredential.into();
        assert_eq!(e.class(), FailureClass::CredentialUnavailable);

        let e: SyncError = ApiError::Status {
            status: 429,
            reason: None,
            message: String::new(),
        }
        .into();
        assert_eq!(e.class(), FailureClass::RateLimited);

        let e: SyncError = ApiError::Status {
            status: 500,
            reason: None,
            message: String::new(),
        }
        .into();
        assert_eq!(e.class(), FailureClass::Transient);
    }

    #[test]
    fn test_store_auth_detection() {
        let e = SyncError::Store(DatabaseError::Unauthorized("denied".to_string()));
        assert!(e.is_store_auth());
        assert_eq!(e.class(), FailureClass::Transient);

        let e = SyncError::Store(DatabaseError::Locked);
        assert!(!e.is_store_auth());
    }
}

//! Error types for the reservation core.

use thiserror::Error;

use crate::domain::{ProfileId, PropertyId, PropertyStatus, RequestId, RequestStatus};

/// Result type alias using the keyturn error type.
pub type Result<T> = std::result::Result<T, KeyturnError>;

/// Main error type for the reservation core.
///
/// Every business-rule violation is detected inside the engine's transaction
/// and returned as one of these typed, recoverable variants; the transaction
/// is rolled back, so no partial writes can be observed. [`Transient`] is the
/// only variant callers should retry.
///
/// [`Transient`]: KeyturnError::Transient
#[derive(Error, Debug)]
pub enum KeyturnError {
    /// Referenced property does not exist.
    #[error("property not found: {0}")]
    PropertyNotFound(PropertyId),

    /// Referenced request does not exist.
    #[error("request not found: {0}")]
    RequestNotFound(RequestId),

    /// Referenced profile does not exist.
    #[error("profile not found: {0}")]
    ProfileNotFound(ProfileId),

    /// Property was not `available` at lock time. Carries the status the
    /// caller observed after acquiring the property-row lock.
    #[error("property {0} is not available (status '{1}')")]
    PropertyNotAvailable(PropertyId, PropertyStatus),

    /// Buyer and seller are the same identity.
    #[error("seller {0} cannot request their own listing")]
    SelfRequestForbidden(ProfileId),

    /// Buyer already holds a pending request somewhere in the system.
    ///
    /// Expected steady-state outcome under concurrency, not a fault: surfaced
    /// from the partial unique index on `(buyer_id) WHERE status = 'pending'`.
    #[error("buyer {0} already has a pending request")]
    DuplicatePendingRequest(ProfileId),

    /// Caller is not the authorized party (buyer for cancel, seller for
    /// respond).
    #[error("caller {0} is not authorized to modify request {1}")]
    Forbidden(ProfileId, RequestId),

    /// Request is not in a state that permits the attempted transition.
    #[error("invalid state transition: request {0} is in state '{1}', expected 'pending'")]
    InvalidStateTransition(RequestId, RequestStatus),

    /// Malformed parameters (bad decision value, oversized message, nil ids).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unexpected storage-layer fault (connectivity loss, pool exhaustion).
    /// The only retryable kind at the engine level.
    #[error("transient storage failure: {0}")]
    Transient(anyhow::Error),

    /// General error from anyhow.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KeyturnError {
    /// Returns true if the operation may succeed when retried as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KeyturnError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        let transient = KeyturnError::Transient(anyhow::anyhow!("connection reset"));
        assert!(transient.is_retryable());

        let duplicate = KeyturnError::DuplicatePendingRequest(ProfileId::new());
        assert!(!duplicate.is_retryable());

        let forbidden = KeyturnError::Forbidden(ProfileId::new(), RequestId::new());
        assert!(!forbidden.is_retryable());
    }
}

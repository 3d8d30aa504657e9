//! Error types for selkie
//!
//! TigerStyle: Explicit error types with context, using thiserror.

use thiserror::Error;

/// Result type alias for selkie operations
pub type Result<T> = std::result::Result<T, Error>;

/// Selkie error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Policy Mismatch
    // =========================================================================
    #[error("operation not permitted under the adapter's policies: {operation}")]
    WrongPolicy { operation: &'static str },

    // =========================================================================
    // State Conflicts
    // =========================================================================
    #[error("object already active: {id}")]
    ObjectAlreadyActive { id: String },

    #[error("servant already bound to another identity: {id}")]
    ServantAlreadyActive { id: String },

    #[error("object not active: {id}")]
    ObjectNotActive { id: String },

    // =========================================================================
    // Admission Rejections
    // =========================================================================
    /// The governing manager is discarding requests. Transient: the caller
    /// may retry later or elsewhere.
    #[error("request discarded: adapter manager is discarding")]
    RequestDiscarded,

    /// The governing manager is permanently inactive.
    #[error("adapter manager is inactive")]
    AdapterInactive,

    #[error("adapter at capacity: {count} active objects (limit: {limit})")]
    AdapterAtCapacity { count: usize, limit: usize },

    // =========================================================================
    // Invariant Violations (programming faults, not normal error paths)
    // =========================================================================
    #[error("invocation count underflow on entry for {id}")]
    RefcountUnderflow { id: String },

    #[error("entry is destroyed, no further transitions permitted (event: {event})")]
    EntryDestroyed { event: &'static str },

    #[error("illegal entry transition: {event} in state {state}")]
    IllegalTransition {
        state: &'static str,
        event: &'static str,
    },

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("invalid object identity: {reason}")]
    InvalidObjectId { reason: String },

    #[error("invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("internal error: {reason}")]
    Internal { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an object not active error
    pub fn object_not_active(id: impl Into<String>) -> Self {
        Self::ObjectNotActive { id: id.into() }
    }

    /// Create an object already active error
    pub fn object_already_active(id: impl Into<String>) -> Self {
        Self::ObjectAlreadyActive { id: id.into() }
    }

    /// Create a servant already active error
    pub fn servant_already_active(id: impl Into<String>) -> Self {
        Self::ServantAlreadyActive { id: id.into() }
    }

    /// Create a wrong policy error
    pub fn wrong_policy(operation: &'static str) -> Self {
        Self::WrongPolicy { operation }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Check if this error is transient
    ///
    /// Transient errors may succeed on retry against the same or another
    /// target; permanent ones will not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RequestDiscarded)
    }

    /// Check if this error is an internal-consistency violation
    ///
    /// These indicate a bug in the surrounding orchestration, not a
    /// recoverable condition.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::RefcountUnderflow { .. }
                | Self::EntryDestroyed { .. }
                | Self::IllegalTransition { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::object_not_active("04:f2");
        assert!(err.to_string().contains("04:f2"));
    }

    #[test]
    fn test_error_is_transient() {
        assert!(Error::RequestDiscarded.is_transient());
        assert!(!Error::AdapterInactive.is_transient());
        assert!(!Error::wrong_policy("servant_to_id").is_transient());
    }

    #[test]
    fn test_error_is_invariant_violation() {
        assert!(Error::RefcountUnderflow { id: "a".into() }.is_invariant_violation());
        assert!(Error::EntryDestroyed { event: "enter" }.is_invariant_violation());
        assert!(!Error::RequestDiscarded.is_invariant_violation());
    }
}

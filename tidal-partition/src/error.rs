//! Partition processor error types.
//!
//! Failures fall into three classes:
//! - Validation failures (fencing, ranges, limits) become error events or
//!   `false` predicates; the processor keeps running.
//! - Storage failures are fatal to the processor's epoch; the run loop
//!   returns them and the owning supervisor restarts recovery.
//! - Protocol violations (coordinator messages the state machine cannot
//!   account for) are fatal invariant breaks, reported distinctly.

use thiserror::Error;
use tidal_core::TxKey;
use tidal_storage::StorageError;

/// Result type for partition processor operations.
pub type PartitionResult<T> = Result<T, PartitionError>;

/// Errors that can occur in the partition processor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// Session fencing failed: the caller's session or fencing tokens do not
    /// match the consumer's current session.
    #[error("session mismatch for consumer '{consumer}': {reason}")]
    SessionMismatch {
        /// The consumer whose session was contested.
        consumer: String,
        /// What check failed.
        reason: &'static str,
    },

    /// A request carried a malformed or oversized field.
    #[error("bad request: {message}")]
    BadRequest {
        /// What was wrong with the request.
        message: String,
    },

    /// An explicit resource limit was hit.
    #[error("limit exceeded: {what} (limit {limit})")]
    LimitExceeded {
        /// The limited resource.
        what: &'static str,
        /// The configured maximum.
        limit: u32,
    },

    /// The coordinator sent a decision for a transaction the processor
    /// cannot account for. The state machines have diverged; continuing
    /// would corrupt offsets.
    #[error("protocol violation: {message} (tx {key})")]
    ProtocolViolation {
        /// The transaction the decision referred to.
        key: TxKey,
        /// What invariant broke.
        message: &'static str,
    },

    /// The storage layer failed. Fatal to this processor epoch.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The processor task has exited; the handle is dead.
    #[error("partition processor has shut down")]
    ProcessorShutdown,
}

impl PartitionError {
    /// Returns true if the error must terminate the processor's epoch.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. } | Self::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidal_core::{PlanStep, TxId};

    #[test]
    fn test_fatal_classification() {
        let fencing = PartitionError::SessionMismatch {
            consumer: "client".to_string(),
            reason: "session does not match",
        };
        assert!(!fencing.is_fatal());

        let violation = PartitionError::ProtocolViolation {
            key: TxKey::new(PlanStep::new(1), TxId::new(2)),
            message: "commit for unknown transaction",
        };
        assert!(violation.is_fatal());

        let storage = PartitionError::Storage(StorageError::Unavailable {
            message: "down".to_string(),
        });
        assert!(storage.is_fatal());
    }
}

//! Error types for the Outbox engine.

use crate::{OpStatus, OperationId};
use thiserror::Error;

/// All possible errors from the Outbox engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Lifecycle errors
    #[error("invalid status transition for operation {id}: {from} -> {to}")]
    InvalidTransition {
        id: OperationId,
        from: OpStatus,
        to: OpStatus,
    },

    // Data errors
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::InvalidTransition {
            id: "op-1".into(),
            from: OpStatus::Pending,
            to: OpStatus::Synced,
        };
        assert_eq!(
            err.to_string(),
            "invalid status transition for operation op-1: pending -> synced"
        );

        let err = Error::InvalidSnapshot("truncated".into());
        assert_eq!(err.to_string(), "invalid snapshot: truncated");
    }
}

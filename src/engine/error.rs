use ulid::Ulid;

use crate::model::Status;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("not enough capacity: {used} of {ceiling} seats taken, {remaining} remaining")]
    CapacityExceeded { used: u32, remaining: u32, ceiling: u32 },

    #[error("reservation not found: {0}")]
    NotFound(Ulid),

    #[error("reservation {id} is {status}; completed reservations cannot be changed or deleted")]
    FixedState { id: Ulid, status: Status },

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        EngineError::Validation { field, reason: reason.into() }
    }

    /// Storage failures are logged with detail and surfaced to callers as an opaque failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::WalError(_))
    }
}

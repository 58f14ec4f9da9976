//! Failures at the boundary between the synchronous engine and its ports.
//!
//! `thiserror`-derived, mirroring the teacher's `shared/types/errors.rs`/
//! `support/errors.rs` infra-boundary style — as opposed to `domain::error::
//! DomainError`, which stays a plain enum for invariant violations inside the
//! domain model itself.

use crate::support::json_pool::CapacityExceeded;
use crate::support::ocpp_frame::OcppFrameError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("frame error: {0}")]
    Frame(#[from] OcppFrameError),

    #[error("request timed out waiting for a CallResult")]
    Timeout,

    #[error("request queue is full")]
    QueueFull,

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error(transparent)]
    JsonCapacityExceeded(#[from] CapacityExceeded),

    #[error("no active connection")]
    NotConnected,

    #[error("unknown action: {0}")]
    UnknownAction(String),
}

impl EngineError {
    /// Maps an internal failure onto the wire vocabulary used to build a
    /// CallError frame in response to an inbound Call we could not process.
    pub fn call_error_code(&self) -> crate::support::CallErrorCode {
        use crate::support::CallErrorCode::*;
        match self {
            EngineError::Frame(_) => FormationViolation,
            EngineError::Timeout => GenericError,
            EngineError::QueueFull => InternalError,
            EngineError::Persistence(_) => InternalError,
            EngineError::JsonCapacityExceeded(_) => FormationViolation,
            EngineError::NotConnected => GenericError,
            EngineError::UnknownAction(_) => crate::support::CallErrorCode::NotImplemented,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::support::CallErrorCode;

    #[test]
    fn unknown_action_maps_to_not_implemented() {
        let err = EngineError::UnknownAction("Frobnicate".into());
        assert_eq!(err.call_error_code(), CallErrorCode::NotImplemented);
    }
}

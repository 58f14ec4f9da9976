//! Domain-level invariant violations.
//!
//! Grounded on the teacher's `domain/error.rs`: a plain enum with a hand-written
//! `Display`/`Error` impl rather than `thiserror`, reserved for failures surfaced to
//! callers of the public domain API (as opposed to `application::error::EngineError`,
//! which covers protocol/transport/persistence failures inside the engine).

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    ConnectorNotFound(u32),
    TransactionNotFound { connector_id: u32, tx_nr: u32 },
    TransactionAlreadyActive(u32),
    InvalidIdTag(String),
    InvalidStateTransition { from: String, to: String },
    ReservationNotFound(i32),
    ReservationConflict(u32),
    ProfileNotFound(i32),
    ProfileLimitExceeded { installed: usize, max: usize },
    ConfigurationKeyNotFound(String),
    ConfigurationReadonly(String),
    Other(String),
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainError::ConnectorNotFound(id) => write!(f, "connector {id} not found"),
            DomainError::TransactionNotFound {
                connector_id,
                tx_nr,
            } => write!(f, "transaction {connector_id}/{tx_nr} not found"),
            DomainError::TransactionAlreadyActive(id) => {
                write!(f, "connector {id} already has an active transaction")
            }
            DomainError::InvalidIdTag(tag) => write!(f, "invalid idTag: {tag}"),
            DomainError::InvalidStateTransition { from, to } => {
                write!(f, "invalid connector state transition {from} -> {to}")
            }
            DomainError::ReservationNotFound(id) => write!(f, "reservation {id} not found"),
            DomainError::ReservationConflict(id) => {
                write!(f, "connector {id} is not available for reservation")
            }
            DomainError::ProfileNotFound(id) => write!(f, "charging profile {id} not found"),
            DomainError::ProfileLimitExceeded { installed, max } => write!(
                f,
                "charging profile limit exceeded: {installed} installed, max {max}"
            ),
            DomainError::ConfigurationKeyNotFound(key) => {
                write!(f, "configuration key not found: {key}")
            }
            DomainError::ConfigurationReadonly(key) => {
                write!(f, "configuration key is readonly: {key}")
            }
            DomainError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for DomainError {}

pub type DomainResult<T> = Result<T, DomainError>;

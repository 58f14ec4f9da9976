//! Component E: the Operation abstraction and its factory registry.
//!
//! Grounded in design note §9 ("Inheritance of Operations → tagged variant"): a
//! small trait replaces C++-style virtual dispatch, and a name→factory table
//! (`OperationRegistry`) replaces the vtable lookup a server would normally do at
//! the language level. Side effects for CSMS-initiated Calls are applied by the
//! caller (`application::engine`, or a service) downcasting via `as_any_mut` once
//! `process_req` has parsed the payload into the operation's own fields — this
//! keeps the trait object-safe (no generic or `&mut Context` parameters) while
//! still letting each operation own its specific request/response shape.

pub mod configuration;
pub mod core;
pub mod firmware;
pub mod local_auth;
pub mod registry;
pub mod remote_control;
pub mod reservation;
pub mod security;
pub mod smart_charging;

pub use registry::OperationRegistry;

use crate::support::CallErrorCode;
use serde_json::Value;
use std::any::Any;
use std::fmt::Debug;

/// A single OCPP action, decoupled from whether it was initiated locally (we
/// send the Call, parse the CallResult) or by the CSMS (we parse the Call,
/// produce the CallResult).
pub trait Operation: Debug {
    fn action(&self) -> &'static str;

    /// Serialize this operation's request fields into the `payload` slot of an
    /// outgoing `[2, msgId, action, payload]` Call.
    fn create_req(&self) -> Value;

    /// Parse an inbound Call's payload into this operation's own fields. Returns
    /// the CallError code to send back if the payload is structurally invalid.
    fn process_req(&mut self, payload: &Value) -> Result<(), CallErrorCode>;

    /// Serialize this operation's response fields into the `payload` slot of an
    /// outgoing `[3, msgId, payload]` CallResult, once a handler has populated
    /// them via `as_any_mut`.
    fn create_conf(&self) -> Value;

    /// Parse a CallResult's payload into this operation's own fields.
    fn process_conf(&mut self, payload: &Value) -> Result<(), CallErrorCode>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Helper for `process_req`/`process_conf` impls: parse `payload` as `T`,
/// mapping any failure onto `FormationViolation` per `spec.md` §4.F.
pub fn parse_payload<T: serde::de::DeserializeOwned>(payload: &Value) -> Result<T, CallErrorCode> {
    serde_json::from_value(payload.clone()).map_err(|_| CallErrorCode::FormationViolation)
}

/// The shared Accepted/Rejected-shaped response vocabulary used by most
/// CSMS-initiated operations. Grounded on the teacher's `application::ports::
/// outbound::GenericStatus`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenericStatus {
    Accepted,
    Rejected,
    Scheduled,
    NotSupported,
    Faulted,
    Unknown(String),
}

impl GenericStatus {
    pub fn from_str(s: &str) -> Self {
        match s {
            "Accepted" => GenericStatus::Accepted,
            "Rejected" => GenericStatus::Rejected,
            "Scheduled" => GenericStatus::Scheduled,
            "NotSupported" => GenericStatus::NotSupported,
            "Faulted" => GenericStatus::Faulted,
            other => GenericStatus::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            GenericStatus::Accepted => "Accepted",
            GenericStatus::Rejected => "Rejected",
            GenericStatus::Scheduled => "Scheduled",
            GenericStatus::NotSupported => "NotSupported",
            GenericStatus::Faulted => "Faulted",
            GenericStatus::Unknown(s) => s,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, GenericStatus::Accepted)
    }
}

impl std::fmt::Display for GenericStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

//! Connector (EVSE) state: the per-socket status machine that
//! `application::transaction_service` drives.
//!
//! Grounded on the teacher's `domain/charge_point/model.rs::ConnectorStatus`
//! (reused near verbatim — the OCPP 1.6 status set is exact) and `Connector`
//! (`new`, `update_connector_status` generalize into `set_status` here); the
//! teacher's multi-connector-per-charge-point `Vec<Connector>` shape carries over,
//! but transaction ownership changes from an inline field to a stable
//! `(connector_id, tx_nr)` index per the arena/stable-index design note, since the
//! Request Queue must be able to reference the same transaction independently.

use crate::domain::error::DomainError;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectorStatus {
    Available,
    Preparing,
    Charging,
    SuspendedEV,
    SuspendedEVSE,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
}

impl ConnectorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorStatus::Available => "Available",
            ConnectorStatus::Preparing => "Preparing",
            ConnectorStatus::Charging => "Charging",
            ConnectorStatus::SuspendedEV => "SuspendedEV",
            ConnectorStatus::SuspendedEVSE => "SuspendedEVSE",
            ConnectorStatus::Finishing => "Finishing",
            ConnectorStatus::Reserved => "Reserved",
            ConnectorStatus::Unavailable => "Unavailable",
            ConnectorStatus::Faulted => "Faulted",
        }
    }

    /// Whether `to` is a legal direct transition from `self`, per the state
    /// diagram: adjacency is checked so a bug upstream can never silently jump the
    /// connector across intermediate states (invariant P4).
    pub fn can_transition_to(&self, to: ConnectorStatus) -> bool {
        use ConnectorStatus::*;
        if to == Faulted {
            return true; // any state can fault
        }
        if *self == Faulted {
            // Faulted resolves back into whichever family the connector was in.
            return matches!(to, Available | Preparing | Charging | Finishing | Reserved | Unavailable);
        }
        match (*self, to) {
            (Available, Preparing) => true,
            (Available, Reserved) => true,
            (Available, Unavailable) => true,
            (Preparing, Available) => true,
            (Preparing, Charging) => true,
            (Preparing, Reserved) => true,
            (Preparing, Unavailable) => true,
            (Charging, SuspendedEV) => true,
            (Charging, SuspendedEVSE) => true,
            (Charging, Finishing) => true,
            (SuspendedEV, Charging) => true,
            (SuspendedEV, Finishing) => true,
            (SuspendedEVSE, Charging) => true,
            (SuspendedEVSE, Finishing) => true,
            (Finishing, Available) => true,
            (Reserved, Available) => true,
            (Reserved, Preparing) => true,
            (Unavailable, Available) => true,
            (a, b) if a == b => true,
            _ => false,
        }
    }
}

/// OCPP 1.6 `ChargePointErrorCode`, reported alongside a StatusNotification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorErrorCode {
    NoError,
    ConnectorLockFailure,
    EVCommunicationError,
    GroundFailure,
    HighTemperature,
    InternalError,
    LocalListConflict,
    OtherError,
    OverCurrentFailure,
    OverVoltage,
    PowerMeterFailure,
    PowerSwitchFailure,
    ReaderFailure,
    ResetFailure,
    UnderVoltage,
    WeakSignal,
}

impl ConnectorErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorErrorCode::NoError => "NoError",
            ConnectorErrorCode::ConnectorLockFailure => "ConnectorLockFailure",
            ConnectorErrorCode::EVCommunicationError => "EVCommunicationError",
            ConnectorErrorCode::GroundFailure => "GroundFailure",
            ConnectorErrorCode::HighTemperature => "HighTemperature",
            ConnectorErrorCode::InternalError => "InternalError",
            ConnectorErrorCode::LocalListConflict => "LocalListConflict",
            ConnectorErrorCode::OtherError => "OtherError",
            ConnectorErrorCode::OverCurrentFailure => "OverCurrentFailure",
            ConnectorErrorCode::OverVoltage => "OverVoltage",
            ConnectorErrorCode::PowerMeterFailure => "PowerMeterFailure",
            ConnectorErrorCode::PowerSwitchFailure => "PowerSwitchFailure",
            ConnectorErrorCode::ReaderFailure => "ReaderFailure",
            ConnectorErrorCode::ResetFailure => "ResetFailure",
            ConnectorErrorCode::UnderVoltage => "UnderVoltage",
            ConnectorErrorCode::WeakSignal => "WeakSignal",
        }
    }

    pub fn is_fault(&self) -> bool {
        !matches!(self, ConnectorErrorCode::NoError)
    }
}

/// Named sources that can independently hold a connector Unavailable. Composed
/// with `any()` so that clearing one requester does not clear another's hold.
#[derive(Debug, Clone, Default)]
pub struct UnavailableRequesters {
    requesters: HashSet<&'static str>,
}

impl UnavailableRequesters {
    pub fn set(&mut self, source: &'static str) {
        self.requesters.insert(source);
    }

    pub fn clear(&mut self, source: &'static str) {
        self.requesters.remove(source);
    }

    pub fn any(&self) -> bool {
        !self.requesters.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Connector {
    pub id: u32,
    status: ConnectorStatus,
    prior_non_faulted: ConnectorStatus,
    /// Tick at which `status` last changed; used for `MinimumStatusDuration` coalescing.
    pub last_status_change_tick: u64,
    pub error_code: ConnectorErrorCode,
    pub info: Option<String>,
    pub vendor_id: Option<String>,
    pub vendor_error_code: Option<String>,
    /// Stable index into the transaction arena; `None` when idle.
    pub active_tx_nr: Option<u32>,
    pub reservation_id: Option<i32>,
    pub unavailable: UnavailableRequesters,
    pub faulted: UnavailableRequesters,
    /// Open question (b): the more recent of an `UnlockConnectorOnEVSideDisconnect`
    /// auto-unlock and an explicit `UnlockConnector` Call wins.
    pub last_unlock_request_at: Option<u64>,
}

impl Connector {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            status: ConnectorStatus::Available,
            prior_non_faulted: ConnectorStatus::Available,
            last_status_change_tick: 0,
            error_code: ConnectorErrorCode::NoError,
            info: None,
            vendor_id: None,
            vendor_error_code: None,
            active_tx_nr: None,
            reservation_id: None,
            unavailable: UnavailableRequesters::default(),
            faulted: UnavailableRequesters::default(),
            last_unlock_request_at: None,
        }
    }

    pub fn status(&self) -> ConnectorStatus {
        self.status
    }

    pub fn is_available(&self) -> bool {
        self.status == ConnectorStatus::Available
    }

    pub fn is_faulted(&self) -> bool {
        self.status == ConnectorStatus::Faulted
    }

    pub fn is_reserved_for_other(&self, id_tag: &str, reservation_id_tag: Option<&str>) -> bool {
        self.status == ConnectorStatus::Reserved && reservation_id_tag != Some(id_tag)
    }

    /// Enforces adjacency (P4) before mutating. Entering `Faulted` always
    /// remembers the family it came from so a later clear can resume it.
    pub fn set_status(&mut self, to: ConnectorStatus, now_ms: u64) -> Result<(), DomainError> {
        if self.status == to {
            return Ok(());
        }
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        if to != ConnectorStatus::Faulted {
            self.prior_non_faulted = to;
        }
        self.status = to;
        self.last_status_change_tick = now_ms;
        Ok(())
    }

    /// The status to resume to once all faulted-requesters clear.
    pub fn prior_non_faulted(&self) -> ConnectorStatus {
        self.prior_non_faulted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_connector_is_available() {
        let c = Connector::new(1);
        assert_eq!(c.status(), ConnectorStatus::Available);
    }

    #[test]
    fn legal_transition_updates_status_and_tick() {
        let mut c = Connector::new(1);
        c.set_status(ConnectorStatus::Preparing, 100).unwrap();
        assert_eq!(c.status(), ConnectorStatus::Preparing);
        assert_eq!(c.last_status_change_tick, 100);
    }

    #[test]
    fn illegal_jump_is_rejected() {
        let mut c = Connector::new(1);
        let err = c.set_status(ConnectorStatus::Charging, 100).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
    }

    #[test]
    fn fault_remembers_prior_family_for_resume() {
        let mut c = Connector::new(1);
        c.set_status(ConnectorStatus::Preparing, 10).unwrap();
        c.set_status(ConnectorStatus::Faulted, 20).unwrap();
        assert_eq!(c.prior_non_faulted(), ConnectorStatus::Preparing);
        c.set_status(ConnectorStatus::Preparing, 30).unwrap();
        assert_eq!(c.status(), ConnectorStatus::Preparing);
    }

    #[test]
    fn reserve_now_may_target_a_preparing_connector() {
        let mut c = Connector::new(1);
        c.set_status(ConnectorStatus::Preparing, 10).unwrap();
        c.set_status(ConnectorStatus::Reserved, 20).unwrap();
        assert_eq!(c.status(), ConnectorStatus::Reserved);
    }

    #[test]
    fn unavailable_requesters_compose_independently() {
        let mut req = UnavailableRequesters::default();
        req.set("ChangeAvailability");
        req.set("hardware");
        req.clear("ChangeAvailability");
        assert!(req.any());
        req.clear("hardware");
        assert!(!req.any());
    }
}

//! The charging-session record: `spec.md` §3's `Transaction`.
//!
//! Grounded on the teacher's `domain/transaction/model.rs` — `new`/`stop`/
//! `update_meter_data`/`energy_consumed`/`is_active` carry over near verbatim —
//! generalized per `SPEC_FULL.md` §4: `idTag`/`parentIdTag`/`reservationId` and the
//! `{active, authorized, started, stopped, silent}` lifecycle flags are added, the
//! teacher's CSMS-only `external_order_id`/billing `ChargingLimitType` fields are
//! dropped, and identity becomes the on-disk `(connectorId, txNr)` pair rather than
//! a database primary key (the arena/stable-index design note).

use chrono::{DateTime, Utc};

/// Authorization outcome carried on `IdTagInfo.status` (Authorize / StartTransaction
/// responses), per `SPEC_FULL.md` §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Accepted,
    Blocked,
    Expired,
    Invalid,
    ConcurrentTx,
}

impl AuthorizationStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Accepted" => Some(AuthorizationStatus::Accepted),
            "Blocked" => Some(AuthorizationStatus::Blocked),
            "Expired" => Some(AuthorizationStatus::Expired),
            "Invalid" => Some(AuthorizationStatus::Invalid),
            "ConcurrentTx" => Some(AuthorizationStatus::ConcurrentTx),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationStatus::Accepted => "Accepted",
            AuthorizationStatus::Blocked => "Blocked",
            AuthorizationStatus::Expired => "Expired",
            AuthorizationStatus::Invalid => "Invalid",
            AuthorizationStatus::ConcurrentTx => "ConcurrentTx",
        }
    }
}

/// Authorize / StartTransaction response payload shape.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IdTagInfo {
    pub status: String,
    #[serde(rename = "expiryDate", skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(rename = "parentIdTag", skip_serializing_if = "Option::is_none")]
    pub parent_id_tag: Option<String>,
}

/// `Transaction.stopReason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EmergencyStop,
    EVDisconnected,
    HardReset,
    Local,
    Other,
    PowerLoss,
    Reboot,
    Remote,
    SoftReset,
    UnlockCommand,
    DeAuthorized,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::EmergencyStop => "EmergencyStop",
            StopReason::EVDisconnected => "EVDisconnected",
            StopReason::HardReset => "HardReset",
            StopReason::Local => "Local",
            StopReason::Other => "Other",
            StopReason::PowerLoss => "PowerLoss",
            StopReason::Reboot => "Reboot",
            StopReason::Remote => "Remote",
            StopReason::SoftReset => "SoftReset",
            StopReason::UnlockCommand => "UnlockCommand",
            StopReason::DeAuthorized => "DeAuthorized",
        }
    }
}

/// Pending / Accepted / Rejected, mirrors `IdTagInfo.status` narrowed to the
/// three outcomes `beginTransaction` cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Transaction {
    pub connector_id: u32,
    pub tx_nr: u32,
    pub id_tag: String,
    pub parent_id_tag: Option<String>,
    pub reservation_id: Option<i32>,

    pub auth_outcome: AuthOutcomeWire,
    pub active: bool,
    pub authorized: bool,
    pub started: bool,
    pub stopped: bool,
    pub silent: bool,

    /// Monotonic tick at creation, used to reconstruct `begin_timestamp` if the
    /// wall clock was not yet valid (`spec.md` §4.G clock-skew repair).
    pub begin_monotonic_tick: u64,
    pub begin_timestamp: Option<DateTime<Utc>>,
    pub start_timestamp: Option<DateTime<Utc>>,
    /// Monotonic tick at `mark_stopped`, mirroring `begin_monotonic_tick` so a
    /// stop recorded while the wall clock was unset can also be reconstructed.
    pub stop_monotonic_tick: Option<u64>,
    pub stop_timestamp: Option<DateTime<Utc>>,

    /// Assigned by the CSMS in the StartTransaction CallResult.
    pub transaction_id: Option<i32>,
    pub meter_start: Option<i64>,
    pub meter_stop: Option<i64>,
    pub stop_reason: Option<String>,

    pub last_meter_value: Option<i64>,
    pub last_meter_update_tick: Option<u64>,
    /// Monotonic counter for ordering batched MeterValues in `transactionData`.
    pub next_meter_seq: u32,
}

/// Wire-stable spelling of [`AuthOutcome`] for JSON persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AuthOutcomeWire {
    Pending,
    Accepted,
    Rejected,
}

impl From<AuthOutcome> for AuthOutcomeWire {
    fn from(o: AuthOutcome) -> Self {
        match o {
            AuthOutcome::Pending => AuthOutcomeWire::Pending,
            AuthOutcome::Accepted => AuthOutcomeWire::Accepted,
            AuthOutcome::Rejected => AuthOutcomeWire::Rejected,
        }
    }
}

impl Transaction {
    pub fn new(
        connector_id: u32,
        tx_nr: u32,
        id_tag: impl Into<String>,
        parent_id_tag: Option<String>,
        reservation_id: Option<i32>,
        begin_monotonic_tick: u64,
        begin_timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            connector_id,
            tx_nr,
            id_tag: id_tag.into(),
            parent_id_tag,
            reservation_id,
            auth_outcome: AuthOutcomeWire::Pending,
            active: true,
            authorized: false,
            started: false,
            stopped: false,
            silent: false,
            begin_monotonic_tick,
            begin_timestamp,
            start_timestamp: None,
            stop_monotonic_tick: None,
            stop_timestamp: None,
            transaction_id: None,
            meter_start: None,
            meter_stop: None,
            stop_reason: None,
            last_meter_value: None,
            last_meter_update_tick: None,
            next_meter_seq: 0,
        }
    }

    pub fn mark_authorized(&mut self, accepted: bool) {
        self.auth_outcome = if accepted {
            AuthOutcomeWire::Accepted
        } else {
            AuthOutcomeWire::Rejected
        };
        self.authorized = accepted;
        if !accepted {
            self.active = false;
        }
    }

    /// `started ⇒ authorized ∧ ∃ transactionId` (invariant); callers must have
    /// already set `authorized` via `mark_authorized(true)`.
    pub fn mark_started(
        &mut self,
        transaction_id: i32,
        meter_start: i64,
        start_timestamp: DateTime<Utc>,
    ) {
        debug_assert!(self.authorized, "started requires authorized");
        self.started = true;
        self.transaction_id = Some(transaction_id);
        self.meter_start = Some(meter_start);
        self.last_meter_value = Some(meter_start);
        self.start_timestamp = Some(start_timestamp);
    }

    /// `stop_timestamp` is `None` when the wall clock was unset at the moment of
    /// stopping; `stop_monotonic_tick` is recorded regardless, so
    /// `Clock::reconstruct` can repair it once the wall clock validates
    /// (`spec.md` §4.G clock-skew repair).
    pub fn mark_stopped(
        &mut self,
        meter_stop: i64,
        stop_timestamp: Option<DateTime<Utc>>,
        stop_monotonic_tick: u64,
        reason: StopReason,
    ) {
        self.stopped = true;
        self.active = false;
        self.meter_stop = Some(meter_stop);
        self.stop_monotonic_tick = Some(stop_monotonic_tick);
        self.stop_timestamp = stop_timestamp;
        self.stop_reason = Some(reason.as_str().to_string());
    }

    pub fn mark_silent(&mut self) {
        self.silent = true;
    }

    pub fn update_meter_data(&mut self, meter_value: i64, now_tick: u64) {
        self.last_meter_value = Some(meter_value);
        self.last_meter_update_tick = Some(now_tick);
        self.next_meter_seq += 1;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Total energy delivered, available only once the transaction has stopped.
    pub fn energy_consumed(&self) -> Option<i64> {
        match (self.meter_start, self.meter_stop) {
            (Some(start), Some(stop)) => Some(stop - start),
            _ => None,
        }
    }

    /// Energy delivered so far, usable while still charging.
    pub fn live_energy_consumed(&self) -> Option<i64> {
        match (self.meter_start, self.last_meter_value) {
            (Some(start), Some(last)) => Some(last - start),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_tx() -> Transaction {
        Transaction::new(1, 0, "ABCDEF", None, None, 0, Some(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()))
    }

    #[test]
    fn new_transaction_is_pending_and_active() {
        let tx = sample_tx();
        assert!(tx.is_active());
        assert!(!tx.authorized);
        assert!(!tx.started);
    }

    #[test]
    fn mark_authorized_accepted_sets_flag() {
        let mut tx = sample_tx();
        tx.mark_authorized(true);
        assert!(tx.authorized);
        assert!(tx.is_active());
    }

    #[test]
    fn mark_authorized_rejected_deactivates() {
        let mut tx = sample_tx();
        tx.mark_authorized(false);
        assert!(!tx.authorized);
        assert!(!tx.is_active());
    }

    #[test]
    fn mark_started_sets_invariant_fields() {
        let mut tx = sample_tx();
        tx.mark_authorized(true);
        tx.mark_started(42, 1000, Utc::now());
        assert!(tx.started);
        assert_eq!(tx.transaction_id, Some(42));
        assert_eq!(tx.last_meter_value, Some(1000));
    }

    #[test]
    fn energy_consumed_requires_stop() {
        let mut tx = sample_tx();
        tx.mark_authorized(true);
        tx.mark_started(1, 1000, Utc::now());
        assert!(tx.energy_consumed().is_none());
        tx.mark_stopped(1500, Some(Utc::now()), 0, StopReason::Local);
        assert_eq!(tx.energy_consumed(), Some(500));
    }

    #[test]
    fn live_energy_consumed_tracks_last_sample() {
        let mut tx = sample_tx();
        tx.mark_authorized(true);
        tx.mark_started(1, 1000, Utc::now());
        tx.update_meter_data(1200, 5_000);
        assert_eq!(tx.live_energy_consumed(), Some(200));
        assert_eq!(tx.next_meter_seq, 1);
    }

    #[test]
    fn silent_flag_excludes_from_reporting() {
        let mut tx = sample_tx();
        tx.mark_silent();
        assert!(tx.silent);
    }
}

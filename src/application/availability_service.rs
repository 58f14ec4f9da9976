//! Component M: Availability / Reservation.
//!
//! `ChangeAvailability`'s deferred-Inoperative handling and `ReserveNow`/
//! `CancelReservation`'s admission rules have no teacher equivalent — grounded
//! directly in `spec.md` §4.J's stop-condition list ("ChangeAvailability to
//! Inoperative after Finishing") and `SPEC_FULL.md`'s Reservation supplement —
//! but the requester-set/status-blend shape reuses `domain::connector::
//! UnavailableRequesters` exactly as `TransactionService::derive_status` already
//! composes it.

use crate::application::operations::reservation::{CancelReservationStatus, ReservationStatus};
use crate::application::operations::GenericStatus;
use crate::application::transaction_service::TransactionService;
use crate::domain::{ConnectorStatus, Reservation};
use crate::ports::FileStore;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::info;

fn reservation_filename(connector_id: u32) -> String {
    format!("reservation-{connector_id}.jsn")
}

/// Tracks in-flight `ReserveNow` grants and `ChangeAvailability` requests that
/// could not be applied immediately because a transaction was still running.
pub struct AvailabilityService {
    reservations: HashMap<u32, Reservation>,
    pending_inoperative: HashSet<u32>,
}

impl AvailabilityService {
    pub fn new() -> Self {
        Self {
            reservations: HashMap::new(),
            pending_inoperative: HashSet::new(),
        }
    }

    pub fn load<F: FileStore>(&mut self, fs: &F) {
        for path in fs.list_with_prefix("reservation-") {
            match fs.read_json::<Reservation>(&path) {
                Ok(reservation) => {
                    self.reservations.insert(reservation.connector_id, reservation);
                }
                Err(_) => tracing::warn!(path, "discarding unparseable reservation record"),
            }
        }
    }

    pub fn reservation_for(&self, connector_id: u32) -> Option<&Reservation> {
        self.reservations.get(&connector_id)
    }

    /// `ChangeAvailability` to Operative clears any requester hold and any
    /// pending deferral immediately. To Inoperative is deferred
    /// (`GenericStatus::Scheduled`) while a transaction is still active per
    /// `spec.md` §4.J's stop-condition list — applying it immediately would
    /// force `TransactionService::derive_status` to report Unavailable mid-session.
    pub fn apply_change_availability(
        &mut self,
        transactions: &mut TransactionService,
        connector_id: u32,
        operative: bool,
    ) -> GenericStatus {
        let Some(connector) = transactions.connector_mut(connector_id) else {
            return GenericStatus::Rejected;
        };
        if operative {
            self.pending_inoperative.remove(&connector_id);
            connector.unavailable.clear("ChangeAvailability");
            return GenericStatus::Accepted;
        }
        if connector.active_tx_nr.is_some() {
            self.pending_inoperative.insert(connector_id);
            info!(connector_id, "ChangeAvailability to Inoperative deferred until the active transaction ends");
            return GenericStatus::Scheduled;
        }
        connector.unavailable.set("ChangeAvailability");
        GenericStatus::Accepted
    }

    /// Apply any deferred Inoperative request whose transaction has since ended.
    /// Call once per tick.
    pub fn tick(&mut self, transactions: &mut TransactionService) {
        let due: Vec<u32> = self
            .pending_inoperative
            .iter()
            .copied()
            .filter(|id| transactions.connector(*id).map_or(false, |c| c.active_tx_nr.is_none()))
            .collect();
        for connector_id in due {
            self.pending_inoperative.remove(&connector_id);
            if let Some(connector) = transactions.connector_mut(connector_id) {
                connector.unavailable.set("ChangeAvailability");
                info!(connector_id, "deferred ChangeAvailability to Inoperative now applied");
            }
        }
    }

    /// `ReserveNow`: rejected `Occupied` unless the connector is Available or
    /// Preparing, per `SPEC_FULL.md`'s Reservation supplement.
    pub fn reserve_now<F: FileStore>(
        &mut self,
        fs: &mut F,
        transactions: &mut TransactionService,
        reservation: Reservation,
        now_ms: u64,
    ) -> ReservationStatus {
        let connector_id = reservation.connector_id;
        let Some(connector) = transactions.connector_mut(connector_id) else {
            return ReservationStatus::Rejected;
        };
        if !matches!(connector.status(), ConnectorStatus::Available | ConnectorStatus::Preparing) {
            return ReservationStatus::Occupied;
        }
        if connector.set_status(ConnectorStatus::Reserved, now_ms).is_err() {
            return ReservationStatus::Rejected;
        }
        connector.reservation_id = Some(reservation.id);
        if fs.write_json(&reservation_filename(connector_id), &reservation).is_err() {
            return ReservationStatus::Faulted;
        }
        self.reservations.insert(connector_id, reservation);
        ReservationStatus::Accepted
    }

    pub fn cancel_reservation<F: FileStore>(
        &mut self,
        fs: &mut F,
        transactions: &mut TransactionService,
        reservation_id: i32,
        now_ms: u64,
    ) -> CancelReservationStatus {
        let Some(connector_id) = self
            .reservations
            .iter()
            .find(|(_, r)| r.id == reservation_id)
            .map(|(connector_id, _)| *connector_id)
        else {
            return CancelReservationStatus::Rejected;
        };
        self.release(fs, transactions, connector_id, now_ms);
        CancelReservationStatus::Accepted
    }

    /// Consume a matching reservation when the reserved idTag plugs in and
    /// authorizes, returning its `reservationId` for `Transaction::reservation_id`.
    pub fn consume_reservation<F: FileStore>(
        &mut self,
        fs: &mut F,
        transactions: &mut TransactionService,
        connector_id: u32,
        id_tag: &str,
        now_ms: u64,
    ) -> Option<i32> {
        let matches = self.reservations.get(&connector_id).map(|r| r.matches_id_tag(id_tag))?;
        if !matches {
            return None;
        }
        let id = self.reservations.get(&connector_id)?.id;
        self.release(fs, transactions, connector_id, now_ms);
        Some(id)
    }

    /// Drop any reservation past its `expiryDate`. Call once per tick, gated
    /// on wall-clock validity the same way status notifications are.
    pub fn expire_reservations<F: FileStore>(&mut self, fs: &mut F, transactions: &mut TransactionService, now: DateTime<Utc>, now_ms: u64) {
        let expired: Vec<u32> = self
            .reservations
            .iter()
            .filter(|(_, r)| r.is_expired(now))
            .map(|(connector_id, _)| *connector_id)
            .collect();
        for connector_id in expired {
            info!(connector_id, "reservation expired");
            self.release(fs, transactions, connector_id, now_ms);
        }
    }

    fn release<F: FileStore>(&mut self, fs: &mut F, transactions: &mut TransactionService, connector_id: u32, now_ms: u64) {
        self.reservations.remove(&connector_id);
        let _ = fs.remove(&reservation_filename(connector_id));
        if let Some(connector) = transactions.connector_mut(connector_id) {
            connector.reservation_id = None;
            if connector.status() == ConnectorStatus::Reserved {
                let _ = connector.set_status(ConnectorStatus::Available, now_ms);
            }
        }
    }
}

impl Default for AvailabilityService {
    fn default() -> Self {
        Self::new()
    }
}

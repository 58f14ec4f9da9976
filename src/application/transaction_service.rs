//! Component J: the Connector & Transaction Service.
//!
//! Grounded on `domain::connector`/`domain::transaction` for the state machine
//! itself (adjacency-checked `Connector::set_status`, the `Transaction`
//! lifecycle flags), generalized from the teacher's per-session `Vec<Connector>`
//! bookkeeping into the full authorize/start/stop flow of `spec.md` §4.J: the
//! admission policy around a full persistent queue, default-mode vs
//! `TxStartOnPowerPathClosed`-mode start conditions, `ConnectionTimeOut`
//! abandonment in Preparing, `MinimumStatusDuration` notification coalescing,
//! and the `UnlockConnector` poll loop from scenario 6.

use crate::application::engine::Engine;
use crate::application::operations::core::{
    AuthorizeOp, StartTransactionOp, StatusNotificationOp, StopTransactionOp,
};
use crate::application::operations::remote_control::{UnlockConnectorOp, UnlockStatus};
use crate::application::queue::{status_notification_request, Admission, PersistedOpKind, RequestOrigin, RequestQueue};
use crate::domain::{
    AuthorizationStatus, Connector, ConnectorErrorCode, ConnectorStatus, DomainError, DomainResult,
    StopReason, Transaction,
};
use crate::ports::{Connection, FileStore, HardwareInputs, HardwareIo, UnlockPollResult};
use crate::support::Clock;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

pub struct TransactionServiceConfig {
    pub connection_timeout_ms: u64,
    pub minimum_status_duration_ms: u64,
    pub tx_start_on_power_path_closed: bool,
    pub silent_offline_transactions: bool,
    pub default_timeout_ms: u64,
    pub unlock_timeout_ms: u64,
}

impl Default for TransactionServiceConfig {
    fn default() -> Self {
        Self {
            connection_timeout_ms: 30_000,
            minimum_status_duration_ms: 0,
            tx_start_on_power_path_closed: false,
            silent_offline_transactions: false,
            default_timeout_ms: 40_000,
            unlock_timeout_ms: 30_000,
        }
    }
}

fn tx_filename(connector_id: u32, tx_nr: u32) -> String {
    format!("tx-{connector_id}-{tx_nr}.jsn")
}

fn persist_tx<F: FileStore>(fs: &mut F, tx: &Transaction) -> std::io::Result<()> {
    fs.write_json(&tx_filename(tx.connector_id, tx.tx_nr), tx)
}

struct PendingUnlock {
    unique_id: String,
    operation: UnlockConnectorOp,
    started_tick: u64,
}

/// Per-connector/transaction arena plus the derived-status and unlock state
/// machines that drive it.
pub struct TransactionService {
    cfg: TransactionServiceConfig,
    connectors: HashMap<u32, Connector>,
    transactions: HashMap<(u32, u32), Transaction>,
    next_tx_nr: HashMap<u32, u32>,
    /// Tracks which (connectorId, txNr) already had its StartTransaction sent,
    /// distinct from `Transaction::started` (which only flips once the CSMS
    /// assigns a `transactionId`) so the connector can show Charging the moment
    /// the Call goes out, per the state diagram's "Charging (StartTx sent)".
    sent_start: HashSet<(u32, u32)>,
    preparing_since: HashMap<u32, u64>,
    notify_deadline: HashMap<u32, u64>,
    pending_unlocks: HashMap<u32, PendingUnlock>,
    /// Connectors that have had at least one `StatusNotification` scheduled
    /// since startup — without this, a connector that boots straight into
    /// `Available` (its default) never has a status change to trigger on, and
    /// the CSMS never learns it exists (`spec.md` §8 scenario 1).
    announced: HashSet<u32>,
}

impl TransactionService {
    pub fn new(connector_ids: &[u32], cfg: TransactionServiceConfig) -> Self {
        let connectors = connector_ids.iter().map(|&id| (id, Connector::new(id))).collect();
        Self {
            cfg,
            connectors,
            transactions: HashMap::new(),
            next_tx_nr: HashMap::new(),
            sent_start: HashSet::new(),
            preparing_since: HashMap::new(),
            notify_deadline: HashMap::new(),
            pending_unlocks: HashMap::new(),
            announced: HashSet::new(),
        }
    }

    /// Reloads every non-stopped `tx-<c>-*.jsn` record after a restart,
    /// re-occupying its connector and re-seeding `next_tx_nr`.
    pub fn load<F: FileStore>(&mut self, fs: &F, connector_ids: &[u32]) {
        for &connector_id in connector_ids {
            let prefix = format!("tx-{connector_id}-");
            for path in fs.list_with_prefix(&prefix) {
                let Ok(tx): std::io::Result<Transaction> = fs.read_json(&path) else {
                    warn!(path, "discarding unparseable transaction record");
                    continue;
                };
                let next = self.next_tx_nr.entry(connector_id).or_insert(0);
                if tx.tx_nr >= *next {
                    *next = tx.tx_nr + 1;
                }
                if tx.stopped {
                    continue;
                }
                if let Some(connector) = self.connectors.get_mut(&connector_id) {
                    connector.active_tx_nr = Some(tx.tx_nr);
                }
                if tx.started {
                    self.sent_start.insert((connector_id, tx.tx_nr));
                }
                self.transactions.insert((connector_id, tx.tx_nr), tx);
            }
        }
    }

    /// The timeout used for Authorize/StartTransaction/StopTransaction Calls,
    /// exposed so `Context::load` can re-enqueue a recovered persistent record
    /// with the same timeout a freshly built one would get.
    pub fn default_timeout_ms(&self) -> u64 {
        self.cfg.default_timeout_ms
    }

    pub fn connector(&self, connector_id: u32) -> Option<&Connector> {
        self.connectors.get(&connector_id)
    }

    pub fn connector_mut(&mut self, connector_id: u32) -> Option<&mut Connector> {
        self.connectors.get_mut(&connector_id)
    }

    pub fn connectors(&self) -> impl Iterator<Item = &Connector> {
        self.connectors.values()
    }

    pub fn transaction(&self, connector_id: u32, tx_nr: u32) -> Option<&Transaction> {
        self.transactions.get(&(connector_id, tx_nr))
    }

    pub fn active_transaction(&self, connector_id: u32) -> Option<&Transaction> {
        let tx_nr = self.connectors.get(&connector_id)?.active_tx_nr?;
        self.transactions.get(&(connector_id, tx_nr))
    }

    fn fresh_tx_nr(&mut self, connector_id: u32) -> u32 {
        let next = self.next_tx_nr.entry(connector_id).or_insert(0);
        let tx_nr = *next;
        *next += 1;
        tx_nr
    }

    /// Begin a new transaction on `connector_id`. `pre_authorized` skips sending
    /// an `Authorize` Call (the idTag was already validated against a cached
    /// Local Authorization List) and marks the transaction authorized directly.
    /// Returns the assigned `txNr`.
    pub fn begin_transaction<F: FileStore>(
        &mut self,
        fs: &mut F,
        queue: &mut RequestQueue,
        clock: &Clock,
        connector_id: u32,
        id_tag: impl Into<String>,
        reservation_id: Option<i32>,
        pre_authorized: bool,
        now_ms: u64,
    ) -> DomainResult<u32> {
        let id_tag = id_tag.into();
        {
            let connector = self
                .connectors
                .get(&connector_id)
                .ok_or(DomainError::ConnectorNotFound(connector_id))?;
            if connector.active_tx_nr.is_some() {
                return Err(DomainError::TransactionAlreadyActive(connector_id));
            }
        }

        let tx_nr = self.fresh_tx_nr(connector_id);
        let begin_timestamp = clock.wall_now();
        let mut tx = Transaction::new(connector_id, tx_nr, id_tag.clone(), None, reservation_id, now_ms, begin_timestamp);

        match queue.admission(connector_id, self.cfg.silent_offline_transactions) {
            Admission::Admitted => {
                if pre_authorized {
                    tx.mark_authorized(true);
                }
            }
            Admission::Silent => {
                tx.mark_silent();
                tx.mark_authorized(true);
                info!(connector_id, tx_nr, "persistent queue full, admitting transaction silently");
            }
            Admission::Rejected => {
                return Err(DomainError::Other(format!(
                    "connector {connector_id} persistent queue is full"
                )));
            }
        }

        persist_tx(fs, &tx)
            .map_err(|e| DomainError::Other(format!("failed to persist transaction: {e}")))?;

        if let Some(connector) = self.connectors.get_mut(&connector_id) {
            connector.active_tx_nr = Some(tx_nr);
        }
        self.preparing_since.insert(connector_id, now_ms);

        if !tx.silent && !pre_authorized {
            queue.push_volatile(
                RequestOrigin::Authorize { connector_id, tx_nr },
                Box::new(AuthorizeOp::new(id_tag)),
                self.cfg.default_timeout_ms,
            );
        }

        self.transactions.insert((connector_id, tx_nr), tx);
        Ok(tx_nr)
    }

    /// Apply an `Authorize` completion: update the transaction's outcome. The
    /// follow-on `StartTransaction` is triggered by `apply_hardware_tick` once
    /// the physical start conditions are also satisfied.
    pub fn apply_authorize_completion<F: FileStore>(
        &mut self,
        fs: &mut F,
        connector_id: u32,
        tx_nr: u32,
        op: &AuthorizeOp,
    ) {
        let Some(tx) = self.transactions.get_mut(&(connector_id, tx_nr)) else {
            return;
        };
        let accepted = op
            .id_tag_info
            .as_ref()
            .and_then(|info| AuthorizationStatus::from_str(&info.status))
            .map(|status| status == AuthorizationStatus::Accepted)
            .unwrap_or(false);
        tx.mark_authorized(accepted);
        let _ = persist_tx(fs, tx);
        if !accepted {
            if let Some(connector) = self.connectors.get_mut(&connector_id) {
                connector.active_tx_nr = None;
            }
            self.preparing_since.remove(&connector_id);
            info!(connector_id, tx_nr, "authorize rejected, releasing connector");
        }
    }

    /// Apply a `StartTransaction` completion, assigning the CSMS-issued
    /// `transactionId`. If the transaction was already stopped locally while
    /// this confirmation was still outstanding (offline start-then-stop,
    /// `spec.md` §8 scenario 4), the `StopTransaction` already sitting in the
    /// persistent queue was built with a placeholder `transactionId` — fix it
    /// up in place now that the real one is known, the same way
    /// `reconcile_clock` restamps timestamps.
    pub fn apply_start_completion<F: FileStore>(
        &mut self,
        fs: &mut F,
        queue: &mut RequestQueue,
        connector_id: u32,
        tx_nr: u32,
        op: &StartTransactionOp,
    ) {
        let Some(tx) = self.transactions.get_mut(&(connector_id, tx_nr)) else {
            return;
        };
        let Some(transaction_id) = op.transaction_id else {
            return;
        };
        tx.mark_started(transaction_id, tx.meter_start.unwrap_or(op.meter_start), op.timestamp);
        let already_stopped = tx.stopped;
        let _ = persist_tx(fs, tx);

        if already_stopped {
            queue.restamp_persistent(|origin, operation| {
                if let RequestOrigin::StopTransaction { connector_id: c, tx_nr: n } = *origin {
                    if c == connector_id && n == tx_nr {
                        if let Some(stop) = operation.as_any_mut().downcast_mut::<StopTransactionOp>() {
                            stop.transaction_id = transaction_id;
                        }
                    }
                }
            });
        }
    }

    /// Apply a `StopTransaction` completion: the record can finally be
    /// forgotten by the caller (`RequestQueue::remove_persistent_record`, driven
    /// from the completion's `op_nr`).
    pub fn apply_stop_completion<F: FileStore>(&mut self, fs: &mut F, connector_id: u32, tx_nr: u32) {
        let _ = fs.remove(&tx_filename(connector_id, tx_nr));
        self.transactions.remove(&(connector_id, tx_nr));
        self.sent_start.remove(&(connector_id, tx_nr));
    }

    /// Clock-skew repair (`spec.md` §4.G): once the wall clock validates, fill in
    /// every transaction's `begin_timestamp`/`stop_timestamp` that was recorded
    /// while the clock was still unset, from the monotonic tick remembered at the
    /// time, and re-stamp any already-queued StartTransaction/StopTransaction
    /// Request still carrying the `min_time()` placeholder. A begin that cannot be
    /// reconstructed (the monotonic tick origin was lost across a reboot before
    /// the clock ever validated) is discarded together with its matching
    /// StopTransaction, per `spec.md`'s correlation-by-`(connectorId, txNr)` rule.
    /// Call once per tick; a no-op once every live transaction's timestamps are
    /// resolved.
    pub fn reconcile_clock<F: FileStore>(&mut self, fs: &mut F, queue: &mut RequestQueue, clock: &Clock) {
        if !clock.is_wall_clock_valid() {
            return;
        }
        let mut unreconstructable = Vec::new();
        for tx in self.transactions.values_mut() {
            if tx.begin_timestamp.is_none() {
                match clock.reconstruct(tx.begin_monotonic_tick) {
                    Some(ts) => tx.begin_timestamp = Some(ts),
                    None => {
                        unreconstructable.push((tx.connector_id, tx.tx_nr));
                        continue;
                    }
                }
            }
            if tx.stopped && tx.stop_timestamp.is_none() {
                if let Some(tick) = tx.stop_monotonic_tick {
                    if let Some(ts) = clock.reconstruct(tick) {
                        tx.stop_timestamp = Some(ts);
                    }
                }
            }
            let _ = persist_tx(fs, tx);
        }

        for (connector_id, tx_nr) in &unreconstructable {
            self.discard_unreconstructable(fs, queue, *connector_id, *tx_nr);
        }

        let transactions = &self.transactions;
        queue.restamp_persistent(|origin, op| match *origin {
            RequestOrigin::StartTransaction { connector_id, tx_nr } => {
                if let Some(tx) = transactions.get(&(connector_id, tx_nr)) {
                    if let (Some(ts), Some(start)) = (tx.begin_timestamp, op.as_any_mut().downcast_mut::<StartTransactionOp>()) {
                        start.timestamp = ts;
                    }
                }
            }
            RequestOrigin::StopTransaction { connector_id, tx_nr } => {
                if let Some(tx) = transactions.get(&(connector_id, tx_nr)) {
                    if let (Some(ts), Some(stop)) = (tx.stop_timestamp, op.as_any_mut().downcast_mut::<StopTransactionOp>()) {
                        stop.timestamp = ts;
                    }
                }
            }
            _ => {}
        });
    }

    fn discard_unreconstructable<F: FileStore>(&mut self, fs: &mut F, queue: &mut RequestQueue, connector_id: u32, tx_nr: u32) {
        warn!(
            connector_id,
            tx_nr, "begin timestamp unrecoverable across reboot, discarding transaction per clock-skew repair rule"
        );
        queue.discard_persistent_for_tx(fs, connector_id, tx_nr);
        let _ = fs.remove(&tx_filename(connector_id, tx_nr));
        self.transactions.remove(&(connector_id, tx_nr));
        self.sent_start.remove(&(connector_id, tx_nr));
        if let Some(connector) = self.connectors.get_mut(&connector_id) {
            if connector.active_tx_nr == Some(tx_nr) {
                connector.active_tx_nr = None;
            }
        }
    }

    /// Explicit stop (local button, RemoteStopTransaction, UnlockConnector,
    /// deauthorization, …). Enqueues the `StopTransaction` Call unless the
    /// transaction never actually started. `transaction_data` is whatever
    /// `metering_service::MeteringService::take_transaction_data` has accumulated
    /// for this transaction (empty if metering never sampled it).
    pub fn end_transaction<F: FileStore>(
        &mut self,
        fs: &mut F,
        queue: &mut RequestQueue,
        clock: &Clock,
        connector_id: u32,
        reason: StopReason,
        meter_stop: i64,
        transaction_data: Vec<crate::domain::MeterValue>,
        now_ms: u64,
    ) -> DomainResult<()> {
        let tx_nr = self
            .connectors
            .get(&connector_id)
            .and_then(|c| c.active_tx_nr)
            .ok_or(DomainError::ConnectorNotFound(connector_id))?;
        let tx = self
            .transactions
            .get_mut(&(connector_id, tx_nr))
            .ok_or(DomainError::TransactionNotFound { connector_id, tx_nr })?;

        let stop_timestamp = clock.wall_now();
        tx.mark_stopped(meter_stop, stop_timestamp, now_ms, reason);
        persist_tx(fs, tx)
            .map_err(|e| DomainError::Other(format!("failed to persist stopped transaction: {e}")))?;

        // `sent_start`, not `tx.started`, governs whether a StopTransaction is
        // owed: `tx.started` only flips once the CSMS confirms the matching
        // StartTransaction, but an offline Start can sit queued/unconfirmed for
        // a long time (`spec.md` §8 scenario 4) and still needs its Stop sent
        // once the CSMS catches up — `apply_start_completion` fixes up the
        // placeholder `transactionId` below once that confirmation arrives.
        let start_was_queued = self.sent_start.contains(&(connector_id, tx_nr));
        if start_was_queued && !tx.silent {
            let transaction_id = tx.transaction_id.unwrap_or_default();
            let id_tag = tx.id_tag.clone();
            let reason_str = tx.stop_reason.clone();
            // Best-effort wire timestamp; `reconcile_clock` re-stamps this Request
            // in place once the wall clock validates if it is still unset here.
            let timestamp = stop_timestamp.unwrap_or_else(crate::support::clock::min_time);
            let op = StopTransactionOp {
                transaction_id,
                id_tag: Some(id_tag),
                meter_stop,
                timestamp,
                reason: reason_str,
                transaction_data,
                id_tag_info: None,
            };
            let _ = queue.push_persistent(
                fs,
                connector_id,
                tx_nr,
                PersistedOpKind::StopTransaction,
                RequestOrigin::StopTransaction { connector_id, tx_nr },
                Box::new(op),
                self.cfg.default_timeout_ms,
            );
        } else {
            // Never actually started (abandoned in Preparing, or rejected before
            // the CSMS ever saw it) — nothing to report, just forget the record.
            let _ = fs.remove(&tx_filename(connector_id, tx_nr));
            self.transactions.remove(&(connector_id, tx_nr));
        }

        if let Some(connector) = self.connectors.get_mut(&connector_id) {
            connector.active_tx_nr = None;
        }
        self.preparing_since.remove(&connector_id);
        self.sent_start.remove(&(connector_id, tx_nr));
        Ok(())
    }

    fn start_conditions_met(&self, tx: &Transaction, inputs: HardwareInputs) -> bool {
        if !tx.authorized {
            return false;
        }
        if self.cfg.tx_start_on_power_path_closed {
            inputs.plugged && inputs.ev_ready && inputs.evse_ready && inputs.start_tx_ready
        } else {
            inputs.plugged
        }
    }

    fn derive_status(&self, connector: &Connector, tx: Option<&Transaction>, inputs: HardwareInputs) -> ConnectorStatus {
        if connector.faulted.any() {
            return ConnectorStatus::Faulted;
        }
        if connector.unavailable.any() {
            return ConnectorStatus::Unavailable;
        }
        if connector.reservation_id.is_some() && tx.is_none() {
            return ConnectorStatus::Reserved;
        }
        match tx {
            Some(tx) if tx.stopped => ConnectorStatus::Finishing,
            Some(tx) if self.sent_start.contains(&(connector.id, tx.tx_nr)) => ConnectorStatus::Charging,
            Some(_) => ConnectorStatus::Preparing,
            None if inputs.plugged || inputs.occupied => ConnectorStatus::Preparing,
            None => ConnectorStatus::Available,
        }
    }

    /// Apply one tick's worth of hardware inputs for a single connector: fault
    /// tracking, `ConnectionTimeOut` abandonment, the authorize→start handoff,
    /// and `StatusNotification` emission (coalesced by `MinimumStatusDuration`).
    pub fn apply_hardware_tick<F: FileStore>(
        &mut self,
        fs: &mut F,
        queue: &mut RequestQueue,
        clock: &Clock,
        connector_id: u32,
        inputs: HardwareInputs,
        error_code: ConnectorErrorCode,
        now_ms: u64,
    ) {
        let source = "hardware";
        if let Some(connector) = self.connectors.get_mut(&connector_id) {
            if error_code.is_fault() {
                connector.faulted.set(source);
            } else {
                connector.faulted.clear(source);
            }
            connector.error_code = error_code;
        }

        self.expire_connection_timeout(fs, queue, clock, connector_id, now_ms);
        self.advance_start(fs, queue, clock, connector_id, inputs, now_ms);
        self.stop_on_ev_disconnect(fs, queue, clock, connector_id, inputs, now_ms);
        self.update_status(connector_id, inputs, now_ms);
        self.flush_due_notification(queue, clock, connector_id, now_ms);
    }

    /// Stop a running transaction when the EV side goes away: unplug in
    /// default mode, `EvReady` falling under `TxStartOnPowerPathClosed`
    /// (`spec.md` §4.J stop conditions). Only applies once the transaction has
    /// actually started (`sent_start`) — `expire_connection_timeout` already
    /// handles an unplug/abandon while still `Preparing`.
    fn stop_on_ev_disconnect<F: FileStore>(
        &mut self,
        fs: &mut F,
        queue: &mut RequestQueue,
        clock: &Clock,
        connector_id: u32,
        inputs: HardwareInputs,
        now_ms: u64,
    ) {
        let Some(tx_nr) = self.connectors.get(&connector_id).and_then(|c| c.active_tx_nr) else {
            return;
        };
        if !self.sent_start.contains(&(connector_id, tx_nr)) {
            return;
        }
        let Some(tx) = self.transactions.get(&(connector_id, tx_nr)) else {
            return;
        };
        if tx.stopped {
            return;
        }
        let disconnected = if self.cfg.tx_start_on_power_path_closed {
            !inputs.ev_ready && inputs.stop_tx_ready
        } else {
            !inputs.plugged
        };
        if !disconnected {
            return;
        }
        info!(connector_id, "EV side disconnected while charging, ending transaction");
        let _ = self.end_transaction(fs, queue, clock, connector_id, StopReason::EVDisconnected, 0, Vec::new(), now_ms);
    }

    fn expire_connection_timeout<F: FileStore>(
        &mut self,
        fs: &mut F,
        queue: &mut RequestQueue,
        clock: &Clock,
        connector_id: u32,
        now_ms: u64,
    ) {
        let Some(&since) = self.preparing_since.get(&connector_id) else {
            return;
        };
        let still_preparing = self
            .active_transaction(connector_id)
            .map(|tx| !tx.started)
            .unwrap_or(false);
        if !still_preparing {
            self.preparing_since.remove(&connector_id);
            return;
        }
        if now_ms.saturating_sub(since) < self.cfg.connection_timeout_ms {
            return;
        }
        info!(connector_id, "ConnectionTimeOut: abandoning transaction never started");
        let _ = self.end_transaction(fs, queue, clock, connector_id, StopReason::Other, 0, Vec::new(), now_ms);
    }

    fn advance_start<F: FileStore>(
        &mut self,
        fs: &mut F,
        queue: &mut RequestQueue,
        _clock: &Clock,
        connector_id: u32,
        inputs: HardwareInputs,
        now_ms: u64,
    ) {
        let Some(tx_nr) = self.connectors.get(&connector_id).and_then(|c| c.active_tx_nr) else {
            return;
        };
        if self.sent_start.contains(&(connector_id, tx_nr)) {
            return;
        }
        let Some(tx) = self.transactions.get(&(connector_id, tx_nr)) else {
            return;
        };
        if !self.start_conditions_met(tx, inputs) {
            return;
        }
        let meter_start = tx.meter_start.unwrap_or(0);
        // Use the transaction's own begin timestamp (reconstructed from
        // `begin_monotonic_tick` by `reconcile_clock` once the wall clock
        // validates), not a fresh `wall_now()` read at send time — StartTransaction
        // reports when the transaction began, not when the Call happened to go out.
        let timestamp = tx.begin_timestamp.unwrap_or_else(crate::support::clock::min_time);
        let op = StartTransactionOp {
            connector_id,
            id_tag: tx.id_tag.clone(),
            meter_start,
            timestamp,
            reservation_id: tx.reservation_id,
            transaction_id: None,
            id_tag_info: None,
        };
        if queue
            .push_persistent(
                fs,
                connector_id,
                tx_nr,
                PersistedOpKind::StartTransaction,
                RequestOrigin::StartTransaction { connector_id, tx_nr },
                Box::new(op),
                self.cfg.default_timeout_ms,
            )
            .is_ok()
        {
            self.sent_start.insert((connector_id, tx_nr));
            self.preparing_since.remove(&connector_id);
            if let Some(tx) = self.transactions.get_mut(&(connector_id, tx_nr)) {
                tx.meter_start = Some(meter_start);
                let _ = persist_tx(fs, tx);
            }
        }
    }

    fn update_status(&mut self, connector_id: u32, inputs: HardwareInputs, now_ms: u64) {
        let tx_nr = self.connectors.get(&connector_id).and_then(|c| c.active_tx_nr);
        let tx = tx_nr.and_then(|nr| self.transactions.get(&(connector_id, nr)).cloned());
        let (current, target) = {
            let Some(connector) = self.connectors.get(&connector_id) else {
                return;
            };
            (connector.status(), self.derive_status(connector, tx.as_ref(), inputs))
        };
        let first_announcement = self.announced.insert(connector_id);
        if current == target {
            if first_announcement {
                let deadline = now_ms + self.cfg.minimum_status_duration_ms;
                self.notify_deadline.insert(connector_id, deadline);
            }
            return;
        }
        let Some(connector) = self.connectors.get_mut(&connector_id) else {
            return;
        };
        match connector.set_status(target, now_ms) {
            Ok(()) => {
                let deadline = now_ms + self.cfg.minimum_status_duration_ms;
                self.notify_deadline.insert(connector_id, deadline);
            }
            Err(err) => warn!(connector_id, %err, "rejected connector status transition"),
        }
    }

    fn flush_due_notification(&mut self, queue: &mut RequestQueue, clock: &Clock, connector_id: u32, now_ms: u64) {
        let Some(&deadline) = self.notify_deadline.get(&connector_id) else {
            return;
        };
        if now_ms < deadline {
            return;
        }
        let Some(timestamp) = clock.wall_now() else {
            return; // keep the deadline pending until the wall clock validates
        };
        let Some(connector) = self.connectors.get(&connector_id) else {
            self.notify_deadline.remove(&connector_id);
            return;
        };
        let op = StatusNotificationOp {
            connector_id,
            error_code: connector.error_code,
            status: connector.status().as_str().to_string(),
            info: connector.info.clone(),
            timestamp,
            vendor_id: connector.vendor_id.clone(),
            vendor_error_code: connector.vendor_error_code.clone(),
        };
        let (origin, operation) = status_notification_request(op);
        queue.push_volatile(origin, operation, self.cfg.default_timeout_ms);
        self.notify_deadline.remove(&connector_id);
    }

    /// Batch a meter sample into the active transaction's running totals.
    /// Returns the `(connectorId, txNr)` pair for `metering_service` to build a
    /// `MeterValuesOp` against, or `None` if nothing is active to attribute it to.
    pub fn record_meter_sample(&mut self, connector_id: u32, meter_wh: i64, now_ms: u64) -> Option<(u32, u32)> {
        let tx_nr = self.connectors.get(&connector_id)?.active_tx_nr?;
        let tx = self.transactions.get_mut(&(connector_id, tx_nr))?;
        tx.update_meter_data(meter_wh, now_ms);
        Some((connector_id, tx_nr))
    }

    /// Begin tracking a CSMS-initiated `UnlockConnector` Call; the response is
    /// held back until `poll_unlocks` observes a settled result or times out
    /// (`spec.md` §8 scenario 6).
    pub fn begin_unlock(&mut self, unique_id: String, operation: UnlockConnectorOp, now_ms: u64) {
        let connector_id = operation.connector_id;
        if let Some(connector) = self.connectors.get_mut(&connector_id) {
            connector.last_unlock_request_at = Some(now_ms);
        }
        self.pending_unlocks.insert(
            connector_id,
            PendingUnlock {
                unique_id,
                operation,
                started_tick: now_ms,
            },
        );
    }

    /// Drive every outstanding unlock poll one tick forward, responding and
    /// stopping any still-active transaction once the unlock settles.
    pub fn poll_unlocks<C: Connection, H: HardwareIo, F: FileStore>(
        &mut self,
        fs: &mut F,
        clock: &Clock,
        engine: &mut Engine,
        conn: &mut C,
        hardware: &mut H,
        now_ms: u64,
    ) {
        let connector_ids: Vec<u32> = self.pending_unlocks.keys().copied().collect();
        for connector_id in connector_ids {
            let poll = hardware.poll_unlock(connector_id);
            let timed_out = self
                .pending_unlocks
                .get(&connector_id)
                .map(|p| now_ms.saturating_sub(p.started_tick) > self.cfg.unlock_timeout_ms)
                .unwrap_or(false);

            let settled = match poll {
                UnlockPollResult::Pending if !timed_out => None,
                UnlockPollResult::Pending => Some(UnlockStatus::UnlockFailed),
                UnlockPollResult::Unlocked => Some(UnlockStatus::Unlocked),
                UnlockPollResult::UnlockFailed => Some(UnlockStatus::UnlockFailed),
            };
            let Some(status) = settled else {
                continue;
            };
            if let Some(mut pending) = self.pending_unlocks.remove(&connector_id) {
                pending.operation.status = Some(status);
                engine.respond(conn, &pending.unique_id, &pending.operation);
                if status == UnlockStatus::Unlocked {
                    let _ = self.end_transaction(fs, engine.queue_mut(), clock, connector_id, StopReason::UnlockCommand, 0, Vec::new(), now_ms);
                }
            }
        }
    }

    /// Translate a `RemoteStartTransaction` Call into a `begin_transaction`,
    /// returning the status to report back.
    pub fn handle_remote_start<F: FileStore>(
        &mut self,
        fs: &mut F,
        queue: &mut RequestQueue,
        clock: &Clock,
        connector_id: u32,
        id_tag: String,
        now_ms: u64,
    ) -> bool {
        self.begin_transaction(fs, queue, clock, connector_id, id_tag, None, false, now_ms)
            .is_ok()
    }

    /// Translate a `RemoteStopTransaction` Call: finds the connector currently
    /// running `transaction_id` and ends it.
    pub fn handle_remote_stop<F: FileStore>(
        &mut self,
        fs: &mut F,
        queue: &mut RequestQueue,
        clock: &Clock,
        transaction_id: i32,
        transaction_data: Vec<crate::domain::MeterValue>,
        now_ms: u64,
    ) -> bool {
        let target = self
            .transactions
            .values()
            .find(|tx| tx.transaction_id == Some(transaction_id))
            .map(|tx| tx.connector_id);
        let Some(connector_id) = target else {
            return false;
        };
        self.end_transaction(fs, queue, clock, connector_id, StopReason::Remote, 0, transaction_data, now_ms)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::InMemoryFileStore;

    fn svc() -> TransactionService {
        TransactionService::new(&[1], TransactionServiceConfig::default())
    }

    #[test]
    fn begin_transaction_occupies_connector_and_queues_authorize() {
        let mut svc = svc();
        let mut fs = InMemoryFileStore::new();
        let mut queue = RequestQueue::new(4);
        let clock = Clock::new();
        let tx_nr = svc
            .begin_transaction(&mut fs, &mut queue, &clock, 1, "ABCDEF", None, false, 0)
            .unwrap();
        assert_eq!(svc.connector(1).unwrap().active_tx_nr, Some(tx_nr));
        let req = queue.pop_next(true).unwrap();
        assert!(matches!(req.origin, RequestOrigin::Authorize { connector_id: 1, .. }));
    }

    #[test]
    fn double_begin_on_same_connector_is_rejected() {
        let mut svc = svc();
        let mut fs = InMemoryFileStore::new();
        let mut queue = RequestQueue::new(4);
        let clock = Clock::new();
        svc.begin_transaction(&mut fs, &mut queue, &clock, 1, "ABCDEF", None, false, 0)
            .unwrap();
        let err = svc
            .begin_transaction(&mut fs, &mut queue, &clock, 1, "FEDCBA", None, false, 1)
            .unwrap_err();
        assert!(matches!(err, DomainError::TransactionAlreadyActive(1)));
    }

    #[test]
    fn plugging_without_a_transaction_enters_preparing() {
        let mut svc = svc();
        svc.update_status(1, HardwareInputs { plugged: true, ..Default::default() }, 10);
        assert_eq!(svc.connector(1).unwrap().status(), ConnectorStatus::Preparing);
    }

    #[test]
    fn authorized_and_plugged_default_mode_triggers_start_and_charging() {
        let mut svc = svc();
        let mut fs = InMemoryFileStore::new();
        let mut queue = RequestQueue::new(4);
        let clock = Clock::new();
        let tx_nr = svc
            .begin_transaction(&mut fs, &mut queue, &clock, 1, "ABCDEF", None, true, 0)
            .unwrap();
        let inputs = HardwareInputs { plugged: true, ..Default::default() };
        svc.apply_hardware_tick(&mut fs, &mut queue, &clock, 1, inputs, ConnectorErrorCode::NoError, 100);
        assert!(svc.sent_start.contains(&(1, tx_nr)));
        assert_eq!(svc.connector(1).unwrap().status(), ConnectorStatus::Charging);
    }

    #[test]
    fn connection_timeout_abandons_unplugged_transaction() {
        let mut svc = svc();
        svc.cfg.connection_timeout_ms = 50;
        let mut fs = InMemoryFileStore::new();
        let mut queue = RequestQueue::new(4);
        let clock = Clock::new();
        svc.begin_transaction(&mut fs, &mut queue, &clock, 1, "ABCDEF", None, false, 0)
            .unwrap();
        svc.apply_hardware_tick(&mut fs, &mut queue, &clock, 1, HardwareInputs::default(), ConnectorErrorCode::NoError, 100);
        assert!(svc.connector(1).unwrap().active_tx_nr.is_none());
    }

    #[test]
    fn hardware_fault_forces_faulted_status_and_clears_on_recovery() {
        let mut svc = svc();
        let mut fs = InMemoryFileStore::new();
        let mut queue = RequestQueue::new(4);
        let clock = Clock::new();
        svc.apply_hardware_tick(&mut fs, &mut queue, &clock, 1, HardwareInputs::default(), ConnectorErrorCode::GroundFailure, 10);
        assert_eq!(svc.connector(1).unwrap().status(), ConnectorStatus::Faulted);
        svc.apply_hardware_tick(&mut fs, &mut queue, &clock, 1, HardwareInputs::default(), ConnectorErrorCode::NoError, 20);
        assert_eq!(svc.connector(1).unwrap().status(), ConnectorStatus::Available);
    }

    #[test]
    fn unplugging_while_charging_ends_the_transaction_default_mode() {
        let mut svc = svc();
        let mut fs = InMemoryFileStore::new();
        let mut queue = RequestQueue::new(4);
        let clock = Clock::new();
        let tx_nr = svc
            .begin_transaction(&mut fs, &mut queue, &clock, 1, "ABCDEF", None, true, 0)
            .unwrap();
        svc.apply_hardware_tick(
            &mut fs,
            &mut queue,
            &clock,
            1,
            HardwareInputs { plugged: true, ..Default::default() },
            ConnectorErrorCode::NoError,
            100,
        );
        assert!(svc.sent_start.contains(&(1, tx_nr)));

        svc.apply_hardware_tick(&mut fs, &mut queue, &clock, 1, HardwareInputs::default(), ConnectorErrorCode::NoError, 200);

        assert!(svc.connector(1).unwrap().active_tx_nr.is_none(), "unplugging a charging connector must end its transaction");
        let stopped = svc.transactions.get(&(1, tx_nr)).unwrap();
        assert!(stopped.stopped);
        assert_eq!(stopped.stop_reason.as_deref(), Some(StopReason::EVDisconnected.as_str()));
    }

    #[test]
    fn ev_ready_falling_ends_the_transaction_under_power_path_closed_mode() {
        let mut svc = svc();
        svc.cfg.tx_start_on_power_path_closed = true;
        let mut fs = InMemoryFileStore::new();
        let mut queue = RequestQueue::new(4);
        let clock = Clock::new();
        let tx_nr = svc
            .begin_transaction(&mut fs, &mut queue, &clock, 1, "ABCDEF", None, true, 0)
            .unwrap();
        let charging_inputs = HardwareInputs {
            plugged: true,
            ev_ready: true,
            evse_ready: true,
            start_tx_ready: true,
            stop_tx_ready: true,
            ..Default::default()
        };
        svc.apply_hardware_tick(&mut fs, &mut queue, &clock, 1, charging_inputs, ConnectorErrorCode::NoError, 100);
        assert!(svc.sent_start.contains(&(1, tx_nr)));

        let ev_ready_dropped = HardwareInputs { ev_ready: false, stop_tx_ready: true, ..charging_inputs };
        svc.apply_hardware_tick(&mut fs, &mut queue, &clock, 1, ev_ready_dropped, ConnectorErrorCode::NoError, 200);

        assert!(svc.connector(1).unwrap().active_tx_nr.is_none(), "EvReady falling must end the transaction under TxStartOnPowerPathClosed");
    }

    #[test]
    fn minimum_status_duration_holds_notification_until_due() {
        let mut svc = svc();
        svc.cfg.minimum_status_duration_ms = 1_000;
        let mut fs = InMemoryFileStore::new();
        let mut queue = RequestQueue::new(4);
        let mut clock = Clock::new();
        clock.set_wall_clock(chrono::Utc::now());
        svc.apply_hardware_tick(&mut fs, &mut queue, &clock, 1, HardwareInputs { plugged: true, ..Default::default() }, ConnectorErrorCode::NoError, 0);
        assert!(queue.pop_next(true).is_none());
        svc.flush_due_notification(&mut queue, &clock, 1, 1_000);
        assert!(queue.pop_next(true).is_some());
    }
}

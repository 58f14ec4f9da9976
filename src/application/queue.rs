//! Component G: the Request Queue.
//!
//! Grounded on the teacher's `session/manager.rs::SessionManager` for the
//! "named, bounded collection with admission/eviction rules" shape — generalized
//! from "one entry per connected charge point" to "three logical queues per
//! `spec.md` §4.G, strictly ordered PreBoot > persistent-transaction > volatile".
//! Durability follows `spec.md`'s crash-safety note directly: a persistent entry
//! is identified by `(connectorId, opNr)`, written before being considered
//! enqueued, and removed only once its CallResult has been applied.

use crate::application::operations::core::{
    MeterValuesOp, StartTransactionOp, StatusNotificationOp, StopTransactionOp,
};
use crate::application::operations::Operation;
use crate::domain::{MeterValue, Transaction};
use crate::ports::FileStore;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Distinguishes why a `Request` was sent so the completion can be routed back
/// to the service that originated it, without the `Request` itself holding a
/// non-`'static` continuation closure (design note §9: avoid hidden heap
/// allocation from `std::function`-style callbacks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOrigin {
    Boot,
    Heartbeat,
    Authorize { connector_id: u32, tx_nr: u32 },
    StartTransaction { connector_id: u32, tx_nr: u32 },
    StopTransaction { connector_id: u32, tx_nr: u32 },
    MeterValues { connector_id: u32, tx_nr: Option<u32> },
    StatusNotification { connector_id: u32 },
}

impl RequestOrigin {
    pub fn connector_id(&self) -> Option<u32> {
        match self {
            RequestOrigin::Boot | RequestOrigin::Heartbeat => None,
            RequestOrigin::Authorize { connector_id, .. }
            | RequestOrigin::StartTransaction { connector_id, .. }
            | RequestOrigin::StopTransaction { connector_id, .. }
            | RequestOrigin::MeterValues { connector_id, .. }
            | RequestOrigin::StatusNotification { connector_id } => Some(*connector_id),
        }
    }

    /// Whether this origin is backed by a durable `(connectorId, opNr)` record
    /// that must survive a reboot (`spec.md` §4.G's persistent transaction queue).
    pub fn is_persistent(&self) -> bool {
        matches!(
            self,
            RequestOrigin::StartTransaction { .. }
                | RequestOrigin::StopTransaction { .. }
                | RequestOrigin::MeterValues { .. }
        )
    }
}

/// A queued outgoing Call plus its scheduling metadata (`spec.md` §3's `Request`).
pub struct Request {
    pub op_nr: u64,
    pub origin: RequestOrigin,
    pub operation: Box<dyn Operation>,
    pub timeout_ms: u64,
    pub attempt_nr: u32,
    pub last_attempt_tick: Option<u64>,
}

impl Request {
    pub fn new(op_nr: u64, origin: RequestOrigin, operation: Box<dyn Operation>, timeout_ms: u64) -> Self {
        Self {
            op_nr,
            origin,
            operation,
            timeout_ms,
            attempt_nr: 0,
            last_attempt_tick: None,
        }
    }
}

/// The wire-stable record backing one persistent queue entry: `op-<c>-<n>.jsn`.
/// The `Transaction` it refers to (`tx-<c>-<n>.jsn`) carries the business data;
/// this carries only what the queue itself needs to resume a send after reboot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum PersistedOpKind {
    StartTransaction,
    StopTransaction,
    MeterValues,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedOpRecord {
    pub connector_id: u32,
    pub op_nr: u64,
    pub tx_nr: u32,
    pub kind: PersistedOpKind,
    pub attempt_nr: u32,
}

fn op_filename(connector_id: u32, op_nr: u64) -> String {
    format!("op-{connector_id}-{op_nr}.jsn")
}

/// Admission outcome when a connector's persistent queue is at capacity
/// (`spec.md` §4.G admission policies).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected,
    Silent,
}

#[derive(Default)]
struct PerConnectorQueue {
    entries: VecDeque<Request>,
}

/// The three logical queues of `spec.md` §4.G, owned by `application::engine`.
pub struct RequestQueue {
    next_op_nr: u64,
    capacity_per_connector: usize,
    preboot: VecDeque<Request>,
    persistent: HashMap<u32, PerConnectorQueue>,
    volatile: VecDeque<Request>,
}

impl RequestQueue {
    pub fn new(capacity_per_connector: usize) -> Self {
        Self {
            next_op_nr: 1,
            capacity_per_connector,
            preboot: VecDeque::new(),
            persistent: HashMap::new(),
            volatile: VecDeque::new(),
        }
    }

    fn fresh_op_nr(&mut self) -> u64 {
        let op_nr = self.next_op_nr;
        self.next_op_nr += 1;
        op_nr
    }

    /// Enqueue a Request that must go out before boot completes (BootNotification
    /// only, per `spec.md`).
    pub fn push_preboot(&mut self, operation: Box<dyn Operation>, timeout_ms: u64) {
        let op_nr = self.fresh_op_nr();
        self.preboot
            .push_back(Request::new(op_nr, RequestOrigin::Boot, operation, timeout_ms));
    }

    /// Enqueue a non-persistent Request (Heartbeat, StatusNotification, Authorize,
    /// MeterValues with no tx binding).
    pub fn push_volatile(&mut self, origin: RequestOrigin, operation: Box<dyn Operation>, timeout_ms: u64) {
        let op_nr = self.fresh_op_nr();
        self.volatile
            .push_back(Request::new(op_nr, origin, operation, timeout_ms));
    }

    /// Current depth of a connector's persistent queue, for admission checks.
    pub fn persistent_len(&self, connector_id: u32) -> usize {
        self.persistent
            .get(&connector_id)
            .map(|q| q.entries.len())
            .unwrap_or(0)
    }

    pub fn is_persistent_full(&self, connector_id: u32) -> bool {
        self.persistent_len(connector_id) >= self.capacity_per_connector
    }

    /// Admission decision for a new transaction Start on `connector_id`
    /// (`spec.md` §4.G admission policies): a full persistent queue either
    /// rejects the transaction outright or, under `SilentOfflineTransactions`,
    /// admits it locally without ever reporting it to the CSMS.
    pub fn admission(&self, connector_id: u32, silent_offline_transactions: bool) -> Admission {
        if !self.is_persistent_full(connector_id) {
            Admission::Admitted
        } else if silent_offline_transactions {
            Admission::Silent
        } else {
            Admission::Rejected
        }
    }

    /// Admit a persistent (transaction-scoped) Request, writing its durable
    /// record before it is considered enqueued (`spec.md` §4.G crash safety).
    pub fn push_persistent<F: FileStore>(
        &mut self,
        fs: &mut F,
        connector_id: u32,
        tx_nr: u32,
        kind: PersistedOpKind,
        origin: RequestOrigin,
        operation: Box<dyn Operation>,
        timeout_ms: u64,
    ) -> std::io::Result<u64> {
        let op_nr = self.fresh_op_nr();
        let record = PersistedOpRecord {
            connector_id,
            op_nr,
            tx_nr,
            kind,
            attempt_nr: 0,
        };
        fs.write_json(&op_filename(connector_id, op_nr), &record)?;
        self.persistent
            .entry(connector_id)
            .or_default()
            .entries
            .push_back(Request::new(op_nr, origin, operation, timeout_ms));
        Ok(op_nr)
    }

    /// The next Request to send, honoring precedence PreBoot > persistent >
    /// volatile. While `boot_gate_open` is false, only the PreBoot queue yields
    /// anything (`spec.md` §4.I gates all other outgoing traffic).
    pub fn pop_next(&mut self, boot_gate_open: bool) -> Option<Request> {
        if let Some(req) = self.preboot.pop_front() {
            return Some(req);
        }
        if !boot_gate_open {
            return None;
        }
        let mut connector_ids: Vec<u32> = self.persistent.keys().copied().collect();
        connector_ids.sort_unstable();
        for connector_id in connector_ids {
            if let Some(queue) = self.persistent.get_mut(&connector_id) {
                if let Some(req) = queue.entries.pop_front() {
                    return Some(req);
                }
            }
        }
        self.volatile.pop_front()
    }

    /// Re-queue a Request at the front of its origin queue after a transport
    /// failure or a retryable protocol error (`spec.md` §7).
    pub fn requeue_front(&mut self, req: Request) {
        match req.origin {
            RequestOrigin::Boot => self.preboot.push_front(req),
            origin if origin.is_persistent() => {
                if let Some(connector_id) = origin.connector_id() {
                    self.persistent.entry(connector_id).or_default().entries.push_front(req);
                }
            }
            _ => self.volatile.push_front(req),
        }
    }

    /// Remove a persistent entry's durable record once its CallResult has been
    /// applied (`spec.md`: "Removal is only after a CallResult is received and
    /// onConf returns").
    pub fn remove_persistent_record<F: FileStore>(&mut self, fs: &mut F, connector_id: u32, op_nr: u64) {
        let _ = fs.remove(&op_filename(connector_id, op_nr));
    }

    /// Loads every `op-<connector_id>-*.jsn` record for `connector_id`, in FIFO
    /// `op_nr` order, discarding any that fail to parse (partial writes per
    /// `spec.md`'s crash-safety note). Callers reconstruct the matching
    /// `Operation` from the referenced `Transaction` and re-enqueue via
    /// `push_persistent`.
    pub fn load_persistent_records<F: FileStore>(&self, fs: &F, connector_id: u32) -> Vec<PersistedOpRecord> {
        let prefix = format!("op-{connector_id}-");
        let mut records: Vec<PersistedOpRecord> = fs
            .list_with_prefix(&prefix)
            .into_iter()
            .filter_map(|path| fs.read_json::<PersistedOpRecord>(&path).ok())
            .collect();
        records.sort_by_key(|r| r.op_nr);
        records
    }

    /// Re-seeds `next_op_nr` above every known persisted entry so freshly
    /// enqueued requests never collide with a recovered one.
    pub fn observe_op_nr(&mut self, op_nr: u64) {
        if op_nr >= self.next_op_nr {
            self.next_op_nr = op_nr + 1;
        }
    }

    /// Re-inserts a `Request` rebuilt from an `op-<c>-<n>.jsn` record that
    /// already exists on disk from before a reboot (`Context::load`). Unlike
    /// `push_persistent`, this does not write a new record — the file is already
    /// there — but it does call `observe_op_nr` so a freshly built Request never
    /// collides with the recovered `op_nr`.
    pub fn requeue_loaded_persistent(
        &mut self,
        connector_id: u32,
        op_nr: u64,
        origin: RequestOrigin,
        operation: Box<dyn Operation>,
        timeout_ms: u64,
    ) {
        self.observe_op_nr(op_nr);
        self.persistent
            .entry(connector_id)
            .or_default()
            .entries
            .push_back(Request::new(op_nr, origin, operation, timeout_ms));
    }

    pub fn preboot_is_empty(&self) -> bool {
        self.preboot.is_empty()
    }

    /// Gives every already-queued persistent `Request` a chance to update its
    /// own payload in place, keyed by its `RequestOrigin`. Used on boot-accept to
    /// re-stamp a StartTransaction/StopTransaction that was built while the wall
    /// clock was still unset (`spec.md` §4.G clock-skew repair) — the alternative
    /// to rebuilding the Call from scratch, since a `Request` already sitting in
    /// the queue owns its `Box<dyn Operation>` outright.
    pub fn restamp_persistent(&mut self, mut f: impl FnMut(&RequestOrigin, &mut dyn Operation)) {
        for queue in self.persistent.values_mut() {
            for req in queue.entries.iter_mut() {
                f(&req.origin, req.operation.as_mut());
            }
        }
    }

    /// Drops every queued persistent `Request` (and its durable `op-<c>-<n>.jsn`
    /// record) referencing `(connector_id, tx_nr)`. Used when clock-skew repair
    /// finds a transaction whose `beginTimestamp` cannot be reconstructed across
    /// a reboot (`spec.md` §4.G: "discarded together with its matching
    /// StopTransaction").
    pub fn discard_persistent_for_tx<F: FileStore>(&mut self, fs: &mut F, connector_id: u32, tx_nr: u32) {
        let Some(queue) = self.persistent.get_mut(&connector_id) else {
            return;
        };
        let op_nrs_to_remove: Vec<u64> = queue
            .entries
            .iter()
            .filter(|req| origin_matches_tx(&req.origin, tx_nr))
            .map(|req| req.op_nr)
            .collect();
        queue.entries.retain(|req| !origin_matches_tx(&req.origin, tx_nr));
        for op_nr in op_nrs_to_remove {
            fs.remove(&op_filename(connector_id, op_nr)).ok();
        }
    }
}

fn origin_matches_tx(origin: &RequestOrigin, tx_nr: u32) -> bool {
    match origin {
        RequestOrigin::StartTransaction { tx_nr: t, .. } | RequestOrigin::StopTransaction { tx_nr: t, .. } => *t == tx_nr,
        RequestOrigin::MeterValues { tx_nr: Some(t), .. } => *t == tx_nr,
        _ => false,
    }
}

/// Builds the `Operation` to (re-)send for a persisted record, reading the
/// current state of its `Transaction`. Returns `None` if the transaction's
/// flags mean nothing should be sent (e.g. a StopTransaction record whose
/// transaction was never actually started — dropped per the clock-skew repair
/// rule in `spec.md` §4.G).
pub fn operation_for_record(record: &PersistedOpRecord, tx: &Transaction, meter_values: Vec<MeterValue>) -> Option<Box<dyn Operation>> {
    match record.kind {
        PersistedOpKind::StartTransaction => {
            let timestamp = tx.begin_timestamp?;
            Some(Box::new(StartTransactionOp {
                connector_id: record.connector_id,
                id_tag: tx.id_tag.clone(),
                meter_start: tx.meter_start.unwrap_or(0),
                timestamp,
                reservation_id: tx.reservation_id,
                transaction_id: None,
                id_tag_info: None,
            }))
        }
        PersistedOpKind::StopTransaction => {
            let transaction_id = tx.transaction_id?;
            let timestamp = tx.stop_timestamp?;
            Some(Box::new(StopTransactionOp {
                transaction_id,
                id_tag: Some(tx.id_tag.clone()),
                meter_stop: tx.meter_stop.unwrap_or(0),
                timestamp,
                reason: tx.stop_reason.clone(),
                transaction_data: meter_values,
                id_tag_info: None,
            }))
        }
        PersistedOpKind::MeterValues => {
            if meter_values.is_empty() {
                return None;
            }
            Some(Box::new(MeterValuesOp {
                connector_id: record.connector_id,
                transaction_id: tx.transaction_id,
                meter_value: meter_values,
            }))
        }
    }
}

/// Builds a StatusNotification Request, used by `transaction_service` whenever
/// the derived status changes (`spec.md` §4.J).
pub fn status_notification_request(op: StatusNotificationOp) -> (RequestOrigin, Box<dyn Operation>) {
    let connector_id = op.connector_id;
    (RequestOrigin::StatusNotification { connector_id }, Box::new(op))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::operations::core::HeartbeatOp;
    use crate::ports::InMemoryFileStore;

    fn heartbeat() -> Box<dyn Operation> {
        Box::new(HeartbeatOp::default())
    }

    #[test]
    fn preboot_queue_is_served_before_anything_else() {
        let mut q = RequestQueue::new(4);
        q.push_volatile(RequestOrigin::Heartbeat, heartbeat(), 40_000);
        q.push_preboot(heartbeat(), 40_000);
        let next = q.pop_next(false).unwrap();
        assert_eq!(next.origin, RequestOrigin::Boot);
    }

    #[test]
    fn gate_closed_blocks_volatile_and_persistent() {
        let mut q = RequestQueue::new(4);
        q.push_volatile(RequestOrigin::Heartbeat, heartbeat(), 40_000);
        assert!(q.pop_next(false).is_none());
        assert!(q.pop_next(true).is_some());
    }

    #[test]
    fn persistent_queue_respects_capacity() {
        let mut q = RequestQueue::new(2);
        let mut fs = InMemoryFileStore::new();
        q.push_persistent(
            &mut fs,
            1,
            0,
            PersistedOpKind::StartTransaction,
            RequestOrigin::StartTransaction { connector_id: 1, tx_nr: 0 },
            heartbeat(),
            40_000,
        )
        .unwrap();
        q.push_persistent(
            &mut fs,
            1,
            1,
            PersistedOpKind::StartTransaction,
            RequestOrigin::StartTransaction { connector_id: 1, tx_nr: 1 },
            heartbeat(),
            40_000,
        )
        .unwrap();
        assert!(q.is_persistent_full(1));
    }

    #[test]
    fn admission_rejects_when_full_and_not_silent() {
        let mut q = RequestQueue::new(1);
        let mut fs = InMemoryFileStore::new();
        assert_eq!(q.admission(1, false), Admission::Admitted);
        q.push_persistent(
            &mut fs,
            1,
            0,
            PersistedOpKind::StartTransaction,
            RequestOrigin::StartTransaction { connector_id: 1, tx_nr: 0 },
            heartbeat(),
            40_000,
        )
        .unwrap();
        assert_eq!(q.admission(1, false), Admission::Rejected);
        assert_eq!(q.admission(1, true), Admission::Silent);
        assert_eq!(q.admission(2, false), Admission::Admitted, "a different connector's queue is unaffected");
    }

    #[test]
    fn persistent_takes_precedence_over_volatile_once_gate_open() {
        let mut q = RequestQueue::new(4);
        let mut fs = InMemoryFileStore::new();
        q.push_volatile(RequestOrigin::Heartbeat, heartbeat(), 40_000);
        q.push_persistent(
            &mut fs,
            1,
            0,
            PersistedOpKind::StartTransaction,
            RequestOrigin::StartTransaction { connector_id: 1, tx_nr: 0 },
            heartbeat(),
            40_000,
        )
        .unwrap();
        let next = q.pop_next(true).unwrap();
        assert!(matches!(next.origin, RequestOrigin::StartTransaction { .. }));
    }

    #[test]
    fn remove_persistent_record_deletes_file() {
        let mut q = RequestQueue::new(4);
        let mut fs = InMemoryFileStore::new();
        let op_nr = q
            .push_persistent(
                &mut fs,
                1,
                0,
                PersistedOpKind::StartTransaction,
                RequestOrigin::StartTransaction { connector_id: 1, tx_nr: 0 },
                heartbeat(),
                40_000,
            )
            .unwrap();
        assert_eq!(q.load_persistent_records(&fs, 1).len(), 1);
        q.remove_persistent_record(&mut fs, 1, op_nr);
        assert!(q.load_persistent_records(&fs, 1).is_empty());
    }

    #[test]
    fn load_persistent_records_is_fifo_ordered() {
        let mut q = RequestQueue::new(4);
        let mut fs = InMemoryFileStore::new();
        for tx_nr in 0..3u32 {
            q.push_persistent(
                &mut fs,
                1,
                tx_nr,
                PersistedOpKind::StartTransaction,
                RequestOrigin::StartTransaction { connector_id: 1, tx_nr },
                heartbeat(),
                40_000,
            )
            .unwrap();
        }
        let records = q.load_persistent_records(&fs, 1);
        let op_nrs: Vec<u64> = records.iter().map(|r| r.op_nr).collect();
        let mut sorted = op_nrs.clone();
        sorted.sort_unstable();
        assert_eq!(op_nrs, sorted);
    }
}

//! Component K: the Metering Service.
//!
//! Grounded on the teacher's `application/services/heartbeat_monitor.rs` for the
//! "per-tick due-check against a configured interval" shape, generalized from a
//! single global timer to one sample timer and one clock-aligned timer per
//! connector (`spec.md` §4's "Metering hooks" and the `MeterValueSampleInterval`/
//! `ClockAlignedDataInterval` configuration variables). Samples accumulate into a
//! per-transaction buffer so `TransactionService::end_transaction` can attach
//! `transactionData` to the matching `StopTransaction`.

use crate::application::operations::core::MeterValuesOp;
use crate::application::queue::{PersistedOpKind, RequestOrigin, RequestQueue};
use crate::application::transaction_service::TransactionService;
use crate::domain::{MeterValue, SampledValue};
use crate::ports::{FileStore, HardwareIo};
use crate::support::Clock;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct MeteringServiceConfig {
    /// `MeterValueSampleInterval`: how often to sample while a transaction is
    /// active, in milliseconds. `0` disables periodic sampling.
    pub sample_interval_ms: u64,
    /// `ClockAlignedDataInterval`: sample on wall-clock boundaries (e.g. every
    /// hour on the hour) regardless of transaction state. `0` disables it.
    pub clock_aligned_interval_ms: u64,
    pub default_timeout_ms: u64,
}

impl Default for MeteringServiceConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 60_000,
            clock_aligned_interval_ms: 0,
            default_timeout_ms: 30_000,
        }
    }
}

/// Sampled-value collection, MeterValues batching, and per-transaction buffering
/// for `StopTransaction.transactionData` (`spec.md` §4.K, §8 open question (a)).
pub struct MeteringService {
    cfg: MeteringServiceConfig,
    next_sample_due_ms: HashMap<u32, u64>,
    next_aligned_due_ms: HashMap<u32, u64>,
    /// Buffered samples per `(connectorId, txNr)`, drained by `take_transaction_data`.
    transaction_data: HashMap<(u32, u32), Vec<MeterValue>>,
}

impl MeteringService {
    pub fn new(cfg: MeteringServiceConfig) -> Self {
        Self {
            cfg,
            next_sample_due_ms: HashMap::new(),
            next_aligned_due_ms: HashMap::new(),
            transaction_data: HashMap::new(),
        }
    }

    /// Drive one connector's metering for this tick: sample the meter if a
    /// periodic or clock-aligned interval has elapsed, queue a MeterValues Call,
    /// and buffer the sample if a transaction is active on the connector.
    pub fn tick<F: FileStore, H: HardwareIo>(
        &mut self,
        fs: &mut F,
        queue: &mut RequestQueue,
        transactions: &mut TransactionService,
        hardware: &H,
        clock: &Clock,
        connector_id: u32,
    ) {
        let now_ms = clock.now_ms();
        let sample_due = self.cfg.sample_interval_ms > 0 && transactions.connector(connector_id).is_some_and(|c| c.active_tx_nr.is_some()) && now_ms >= *self.next_sample_due_ms.get(&connector_id).unwrap_or(&0);
        let aligned_due = self.cfg.clock_aligned_interval_ms > 0 && now_ms >= *self.next_aligned_due_ms.get(&connector_id).unwrap_or(&0);
        if !sample_due && !aligned_due {
            return;
        }
        let Some(meter_wh) = hardware.meter_value_wh(connector_id) else {
            return;
        };
        if sample_due {
            self.next_sample_due_ms.insert(connector_id, now_ms + self.cfg.sample_interval_ms);
        }
        if aligned_due {
            self.next_aligned_due_ms.insert(connector_id, now_ms + self.cfg.clock_aligned_interval_ms);
        }

        let timestamp = clock.wall_now().unwrap_or_else(crate::support::clock::min_time);
        let context = if aligned_due && !sample_due { "Sample.Clock" } else { "Sample.Periodic" };
        let mut sample = SampledValue::energy_active_import_register(meter_wh);
        sample.context = Some(context.to_string());
        let meter_value = MeterValue { timestamp, sampled_value: vec![sample] };

        let tx_nr = transactions.record_meter_sample(connector_id, meter_wh, now_ms);
        let transaction_id = tx_nr.and_then(|(c, n)| transactions.transaction(c, n)).and_then(|tx| tx.transaction_id);

        match tx_nr {
            Some((c, n)) => {
                self.transaction_data.entry((c, n)).or_default().push(meter_value.clone());
                let op = MeterValuesOp { connector_id, transaction_id, meter_value: vec![meter_value] };
                let _ = queue.push_persistent(
                    fs,
                    connector_id,
                    n,
                    PersistedOpKind::MeterValues,
                    RequestOrigin::MeterValues { connector_id, tx_nr: Some(n) },
                    Box::new(op),
                    self.cfg.default_timeout_ms,
                );
            }
            None => {
                let op = MeterValuesOp { connector_id, transaction_id: None, meter_value: vec![meter_value] };
                queue.push_volatile(
                    RequestOrigin::MeterValues { connector_id, tx_nr: None },
                    Box::new(op),
                    self.cfg.default_timeout_ms,
                );
            }
        }
    }

    /// Drain and return the buffered samples for a transaction, for
    /// `TransactionService::end_transaction`'s `transactionData` argument. The
    /// buffer is forgotten either way: `spec.md` §8 open question (a) leaves the
    /// flush-before-or-after-StopTransaction ordering to the caller, who decides
    /// by calling this either before or after enqueueing the stop.
    pub fn take_transaction_data(&mut self, connector_id: u32, tx_nr: u32) -> Vec<MeterValue> {
        self.transaction_data.remove(&(connector_id, tx_nr)).unwrap_or_default()
    }

    /// Forget any still-buffered samples without returning them, e.g. when a
    /// transaction is discarded without ever being reported (silent / never
    /// started).
    pub fn discard_transaction_data(&mut self, connector_id: u32, tx_nr: u32) {
        self.transaction_data.remove(&(connector_id, tx_nr));
    }
}

impl Default for MeteringService {
    fn default() -> Self {
        Self::new(MeteringServiceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::transaction_service::TransactionServiceConfig;
    use crate::ports::{InMemoryFileStore, NoopHardwareIo};
    use chrono::Utc;

    fn clock_at(ms: u64) -> Clock {
        let mut clock = Clock::new();
        clock.advance_to(ms);
        clock.set_wall_clock(Utc::now());
        clock
    }

    fn charging_transactions() -> TransactionService {
        let mut transactions = TransactionService::new(&[1], TransactionServiceConfig::default());
        let mut fs = InMemoryFileStore::new();
        let mut queue = RequestQueue::new(8);
        let clock = Clock::new();
        transactions
            .begin_transaction(&mut fs, &mut queue, &clock, 1, "TAG", None, true, 0)
            .unwrap();
        transactions
    }

    #[test]
    fn sample_is_buffered_for_the_active_transaction() {
        let mut svc = MeteringService::new(MeteringServiceConfig { sample_interval_ms: 1_000, clock_aligned_interval_ms: 0, default_timeout_ms: 30_000 });
        let mut fs = InMemoryFileStore::new();
        let mut queue = RequestQueue::new(8);
        let mut transactions = charging_transactions();
        let mut hardware = NoopHardwareIo::new();
        hardware.set_meter_wh(1, 500);
        let clock = clock_at(1_000);

        svc.tick(&mut fs, &mut queue, &mut transactions, &hardware, &clock, 1);

        let data = svc.take_transaction_data(1, 0);
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].sampled_value[0].value, "500");
    }

    #[test]
    fn sample_without_an_active_transaction_goes_to_the_volatile_queue() {
        let mut svc = MeteringService::new(MeteringServiceConfig { sample_interval_ms: 0, clock_aligned_interval_ms: 1_000, default_timeout_ms: 30_000 });
        let mut fs = InMemoryFileStore::new();
        let mut queue = RequestQueue::new(8);
        let mut transactions = TransactionService::new(&[1], TransactionServiceConfig::default());
        let mut hardware = NoopHardwareIo::new();
        hardware.set_meter_wh(1, 42);
        let clock = clock_at(1_000);

        svc.tick(&mut fs, &mut queue, &mut transactions, &hardware, &clock, 1);

        let next = queue.pop_next(true).unwrap();
        assert!(matches!(next.origin, RequestOrigin::MeterValues { tx_nr: None, .. }));
        assert!(svc.take_transaction_data(1, 0).is_empty());
    }

    #[test]
    fn sample_is_not_due_before_the_interval_elapses() {
        let mut svc = MeteringService::new(MeteringServiceConfig { sample_interval_ms: 10_000, clock_aligned_interval_ms: 0, default_timeout_ms: 30_000 });
        let mut fs = InMemoryFileStore::new();
        let mut queue = RequestQueue::new(8);
        let mut transactions = charging_transactions();
        let mut hardware = NoopHardwareIo::new();
        hardware.set_meter_wh(1, 10);
        let clock = clock_at(500);

        svc.tick(&mut fs, &mut queue, &mut transactions, &hardware, &clock, 1);

        assert!(queue.pop_next(true).is_none());
        assert!(svc.take_transaction_data(1, 0).is_empty());
    }

    #[test]
    fn take_transaction_data_drains_the_buffer() {
        let mut svc = MeteringService::new(MeteringServiceConfig { sample_interval_ms: 1_000, clock_aligned_interval_ms: 0, default_timeout_ms: 30_000 });
        let mut fs = InMemoryFileStore::new();
        let mut queue = RequestQueue::new(8);
        let mut transactions = charging_transactions();
        let mut hardware = NoopHardwareIo::new();
        hardware.set_meter_wh(1, 100);

        svc.tick(&mut fs, &mut queue, &mut transactions, &hardware, &clock_at(1_000), 1);
        hardware.set_meter_wh(1, 200);
        svc.tick(&mut fs, &mut queue, &mut transactions, &hardware, &clock_at(2_000), 1);

        let data = svc.take_transaction_data(1, 0);
        assert_eq!(data.len(), 2);
        assert!(svc.take_transaction_data(1, 0).is_empty());
    }
}

//! Component I: the Boot Service.
//!
//! Grounded on the teacher's `application/services/heartbeat_monitor.rs`: the
//! same "track last-sent tick, compare against an interval, emit" retry shape,
//! generalized from a liveness sweep over many sessions into the single
//! BootNotification retry timer that gates all other outgoing traffic per
//! `spec.md` §4.I.

use crate::application::operations::core::BootNotificationOp;
use crate::application::queue::RequestQueue;
use crate::domain::{BootStats, RegistrationStatus};
use crate::support::Clock;
use tracing::info;

pub const BOOT_INTERVAL_DEFAULT_S: u64 = 60;
const BOOTSTATS_LONGTIME_MS: u64 = 5 * 60_000;
const BOOT_TIMEOUT_MS: u64 = 40_000;

/// The identity fields a BootNotification reports, independent of the
/// device's own `ConfigurationStore`.
#[derive(Debug, Clone)]
pub struct ChargePointIdentity {
    pub vendor: String,
    pub model: String,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
}

pub struct BootService {
    identity: ChargePointIdentity,
    status: RegistrationStatus,
    retry_interval_s: u64,
    last_sent_tick: Option<u64>,
    boot_stats: BootStats,
    boot_monotonic_tick: Option<u64>,
    pre_boot_transactions: bool,
}

impl BootService {
    pub fn new(identity: ChargePointIdentity, boot_stats: BootStats, pre_boot_transactions: bool) -> Self {
        Self {
            identity,
            status: RegistrationStatus::Pending,
            retry_interval_s: BOOT_INTERVAL_DEFAULT_S,
            last_sent_tick: None,
            boot_stats,
            boot_monotonic_tick: None,
            pre_boot_transactions,
        }
    }

    pub fn status(&self) -> RegistrationStatus {
        self.status
    }

    pub fn is_accepted(&self) -> bool {
        self.status == RegistrationStatus::Accepted
    }

    pub fn boot_stats(&self) -> &BootStats {
        &self.boot_stats
    }

    /// Whether `application::transaction_service` may run Connector tasks while
    /// still Pending (`PreBootTransactions`); their outgoing Start/StopTransaction
    /// still wait in the persistent queue until the gate opens.
    pub fn connector_tasks_allowed(&self) -> bool {
        self.is_accepted() || self.pre_boot_transactions
    }

    /// Whether `RequestQueue::pop_next` should serve anything beyond PreBoot.
    pub fn gate_open(&self) -> bool {
        self.is_accepted()
    }

    /// Drives the retry timer and the boot-stats survival check. Call once per
    /// `Engine::tick`.
    pub fn on_tick(&mut self, now_ms: u64, queue: &mut RequestQueue) {
        let boot_tick = *self.boot_monotonic_tick.get_or_insert(now_ms);
        if !self.boot_stats.survived_previous_boot() && now_ms.saturating_sub(boot_tick) > BOOTSTATS_LONGTIME_MS {
            self.boot_stats.record_success();
            info!(boot_nr = self.boot_stats.boot_nr, "boot survived long enough, recording success");
        }

        if self.is_accepted() || !queue.preboot_is_empty() {
            return;
        }
        let due = match self.last_sent_tick {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.retry_interval_s * 1_000,
        };
        if !due {
            return;
        }
        self.last_sent_tick = Some(now_ms);
        queue.push_preboot(Box::new(self.make_request()), BOOT_TIMEOUT_MS);
    }

    fn make_request(&self) -> BootNotificationOp {
        BootNotificationOp {
            charge_point_vendor: self.identity.vendor.clone(),
            charge_point_model: self.identity.model.clone(),
            charge_point_serial_number: self.identity.serial_number.clone(),
            firmware_version: self.identity.firmware_version.clone(),
            status: None,
            current_time: None,
            interval_s: None,
        }
    }

    /// Apply a settled BootNotification completion (Confirmed only — timeouts and
    /// CallErrors leave `status` untouched and simply retry on the next due tick).
    /// Returns `true` the moment registration transitions into Accepted.
    pub fn apply_completion(&mut self, op: &BootNotificationOp, clock: &mut Clock) -> bool {
        let was_accepted = self.is_accepted();
        if let Some(interval_s) = op.interval_s {
            if interval_s > 0 {
                self.retry_interval_s = interval_s as u64;
            }
        }
        if let Some(status) = op.status.as_deref() {
            self.status = RegistrationStatus::from_str(status);
            info!(status, "BootNotification response");
        }
        if self.is_accepted() {
            if let Some(current_time) = op.current_time {
                clock.set_wall_clock(current_time);
            }
        }
        self.is_accepted() && !was_accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ChargePointIdentity {
        ChargePointIdentity {
            vendor: "Acme".into(),
            model: "test-runner1234".into(),
            serial_number: None,
            firmware_version: None,
        }
    }

    #[test]
    fn first_tick_enqueues_boot_notification() {
        let mut svc = BootService::new(identity(), BootStats::first_boot("1.0.0"), false);
        let mut queue = RequestQueue::new(4);
        svc.on_tick(0, &mut queue);
        assert!(!queue.preboot_is_empty());
    }

    #[test]
    fn does_not_resend_while_preboot_queue_still_holds_the_request() {
        let mut svc = BootService::new(identity(), BootStats::first_boot("1.0.0"), false);
        let mut queue = RequestQueue::new(4);
        svc.on_tick(0, &mut queue);
        svc.on_tick(1, &mut queue);
        assert_eq!(queue.pop_next(false).is_some(), true);
        assert!(queue.pop_next(false).is_none());
    }

    #[test]
    fn accepted_completion_opens_the_gate_and_seeds_wall_clock() {
        let mut svc = BootService::new(identity(), BootStats::first_boot("1.0.0"), false);
        let mut clock = Clock::new();
        let op = BootNotificationOp {
            status: Some("Accepted".into()),
            current_time: Some(chrono::Utc::now()),
            interval_s: Some(300),
            ..Default::default()
        };
        assert!(svc.apply_completion(&op, &mut clock));
        assert!(svc.is_accepted());
        assert!(svc.gate_open());
        assert!(clock.is_wall_clock_valid());
    }

    #[test]
    fn rejected_completion_keeps_gate_closed() {
        let mut svc = BootService::new(identity(), BootStats::first_boot("1.0.0"), false);
        let mut clock = Clock::new();
        let op = BootNotificationOp {
            status: Some("Rejected".into()),
            interval_s: Some(30),
            ..Default::default()
        };
        assert!(!svc.apply_completion(&op, &mut clock));
        assert!(!svc.gate_open());
    }

    #[test]
    fn pre_boot_transactions_flag_unblocks_connector_tasks_while_pending() {
        let svc = BootService::new(identity(), BootStats::first_boot("1.0.0"), true);
        assert!(svc.connector_tasks_allowed());
        assert!(!svc.gate_open());
    }
}

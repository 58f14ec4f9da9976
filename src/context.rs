//! The wiring that turns the individual services into one charge point.
//!
//! Grounded on the teacher's `application/charging/commands/dispatcher.rs` for
//! the "match an action name, downcast, populate response fields" shape, and on
//! `session/manager.rs` for "one tick drains inbound, advances state, and walks
//! every owned session" — here generalized to one connection and N connectors.
//! `Context` is the one place that knows about every service; no service here
//! references another directly unless a lower-numbered component already did.

use crate::application::availability_service::AvailabilityService;
use crate::application::boot_service::{BootService, ChargePointIdentity};
use crate::application::config_store::ConfigurationStore;
use crate::application::engine::{CompletionStatus, Engine};
use crate::application::local_auth_service::LocalAuthService;
use crate::application::metering_service::MeteringService;
use crate::application::operations::configuration::{
    ChangeConfigurationOp, ChangeConfigurationStatus, GetConfigurationOp,
};
use crate::application::operations::core::{
    AuthorizeOp, BootNotificationOp, HeartbeatOp, MeterValuesOp, StartTransactionOp,
    StatusNotificationOp, StopTransactionOp,
};
use crate::application::operations::firmware::{GetDiagnosticsOp, TriggerMessageOp, UpdateFirmwareOp};
use crate::application::operations::local_auth::{GetLocalListVersionOp, SendLocalListOp};
use crate::application::operations::remote_control::{
    AvailabilityType, ChangeAvailabilityOp, RemoteStartTransactionOp, RemoteStopTransactionOp, ResetOp,
    ResetType, UnlockConnectorOp,
};
use crate::application::operations::reservation::{CancelReservationOp, ReserveNowOp};
use crate::application::operations::security::{
    CertificateStatus, DeleteCertificateOp, GetInstalledCertificateIdsOp, InstallCertificateOp,
};
use crate::application::operations::smart_charging::{
    ClearChargingProfileOp, GetCompositeScheduleOp, SetChargingProfileOp,
};
use crate::application::operations::GenericStatus;
use crate::application::queue::{operation_for_record, PersistedOpKind, RequestOrigin};
use crate::application::smart_charging_service::SmartChargingService;
use crate::application::transaction_service::TransactionService;
use crate::domain::{ChargingProfilePurpose, Reservation, StopReason};
use crate::ports::{CertificateHasher, Connection, FileStore, HardwareIo};
use crate::support::Clock;
use tracing::{info, warn};

/// One installed trust-anchor certificate, keyed by its hash (`SPEC_FULL.md`'s
/// Security supplement). Hashing itself is delegated to `ports::CertificateHasher`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct InstalledCertificate {
    certificate_type: String,
    hash: String,
}

fn certificate_filename(hash: &str) -> String {
    format!("cert-{hash}.jsn")
}

/// The fully wired charge point: every service, the engine, and the clock,
/// driven by one `tick()` per the synchronous core design (`spec.md` §5).
pub struct Context {
    config: ConfigurationStore,
    boot: BootService,
    engine: Engine,
    transactions: TransactionService,
    metering: MeteringService,
    smart_charging: SmartChargingService,
    availability: AvailabilityService,
    local_auth: LocalAuthService,
    certificate_hasher: Box<dyn CertificateHasher>,
    clock: Clock,
    connector_ids: Vec<u32>,
}

impl Context {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ConfigurationStore,
        boot: BootService,
        engine: Engine,
        transactions: TransactionService,
        metering: MeteringService,
        smart_charging: SmartChargingService,
        availability: AvailabilityService,
        local_auth: LocalAuthService,
        certificate_hasher: Box<dyn CertificateHasher>,
        connector_ids: Vec<u32>,
    ) -> Self {
        Self {
            config,
            boot,
            engine,
            transactions,
            metering,
            smart_charging,
            availability,
            local_auth,
            certificate_hasher,
            clock: Clock::new(),
            connector_ids,
        }
    }

    /// Reload every piece of persisted state, in the order that makes later
    /// reads consistent: transactions before smart charging (so `connectors()`
    /// is occupied before the limit computation runs), reservations last (they
    /// may need to clear a connector the transaction reload already claimed).
    pub fn load<F: FileStore>(&mut self, fs: &mut F, config_filenames: &[&str]) {
        self.config.load_containers(fs, config_filenames);
        self.transactions.load(fs, &self.connector_ids);
        self.reload_persistent_queue(fs);
        self.smart_charging.load(fs);
        self.local_auth.load(fs);
        self.availability.load(fs);
    }

    /// Re-enqueues every durable `op-<c>-<n>.jsn` record left over from before a
    /// restart (`spec.md` §4.G crash safety, invariant P2: no StartTransaction
    /// without a matching StopTransaction unless it is still active at reboot).
    /// A record whose `Transaction` is gone, or whose timestamp was never
    /// resolved before this reboot (tick origin lost, `spec.md` §4.G clock-skew
    /// repair), cannot be rebuilt and is dropped instead of resent.
    fn reload_persistent_queue<F: FileStore>(&mut self, fs: &mut F) {
        let timeout_ms = self.transactions.default_timeout_ms();
        for connector_id in self.connector_ids.clone() {
            let records = self.engine.queue_mut().load_persistent_records(fs, connector_id);
            for record in records {
                let Some(tx) = self.transactions.transaction(connector_id, record.tx_nr) else {
                    self.engine.queue_mut().remove_persistent_record(fs, connector_id, record.op_nr);
                    continue;
                };
                match operation_for_record(&record, tx, Vec::new()) {
                    Some(operation) => {
                        let origin = match record.kind {
                            PersistedOpKind::StartTransaction => RequestOrigin::StartTransaction { connector_id, tx_nr: record.tx_nr },
                            PersistedOpKind::StopTransaction => RequestOrigin::StopTransaction { connector_id, tx_nr: record.tx_nr },
                            PersistedOpKind::MeterValues => RequestOrigin::MeterValues { connector_id, tx_nr: Some(record.tx_nr) },
                        };
                        self.engine
                            .queue_mut()
                            .requeue_loaded_persistent(connector_id, record.op_nr, origin, operation, timeout_ms);
                    }
                    None => {
                        warn!(connector_id, op_nr = record.op_nr, "discarding unrebuildable persisted record");
                        self.engine.queue_mut().remove_persistent_record(fs, connector_id, record.op_nr);
                    }
                }
            }
        }
    }

    /// Host-callable API (`spec.md`'s `beginTransaction`): a local idTag swipe
    /// that must still clear the remote `Authorize` Call.
    pub fn begin_transaction<F: FileStore>(&mut self, fs: &mut F, connector_id: u32, id_tag: impl Into<String>) -> bool {
        let id_tag = id_tag.into();
        let now_ms = self.clock.now_ms();
        let reservation_id = self
            .availability
            .consume_reservation(fs, &mut self.transactions, connector_id, &id_tag, now_ms);
        let pre_authorized = self.local_auth.pre_authorize(&id_tag);
        self.transactions
            .begin_transaction(fs, self.engine.queue_mut(), &self.clock, connector_id, id_tag, reservation_id, pre_authorized, now_ms)
            .is_ok()
    }

    /// Host-callable API (`spec.md`'s `beginTransaction_authorized`): skips the
    /// remote Authorize entirely, used for a LocalAuth cache hit or an already
    /// vetted idTag.
    pub fn begin_transaction_authorized<F: FileStore>(&mut self, fs: &mut F, connector_id: u32, id_tag: impl Into<String>) -> bool {
        let now_ms = self.clock.now_ms();
        self.transactions
            .begin_transaction(fs, self.engine.queue_mut(), &self.clock, connector_id, id_tag, None, true, now_ms)
            .is_ok()
    }

    /// Host-callable API (`spec.md`'s `endTransaction`): an explicit local stop
    /// (button press, deauthorization, …). `meter_stop` comes from the hardware
    /// meter reading at the moment of the call.
    pub fn end_transaction<F: FileStore>(&mut self, fs: &mut F, connector_id: u32, reason: StopReason, meter_stop: i64) -> bool {
        let tx_nr = self.transactions.connector(connector_id).and_then(|c| c.active_tx_nr);
        let transaction_data = match tx_nr {
            Some(tx_nr) => self.metering.take_transaction_data(connector_id, tx_nr),
            None => Vec::new(),
        };
        let now_ms = self.clock.now_ms();
        self.transactions
            .end_transaction(fs, self.engine.queue_mut(), &self.clock, connector_id, reason, meter_stop, transaction_data, now_ms)
            .is_ok()
    }

    /// Host-callable API (`spec.md`'s `ocppPermitsCharge`): whether the
    /// connector is currently allowed to deliver power, from the OCPP core's
    /// point of view (hardware interlocks are still the host's responsibility).
    /// The current boot-survival counters (`spec.md` §3's `BootStats`), so the
    /// host binary can persist `bootstats.jsn` once the process has run long
    /// enough to count as a successful boot.
    pub fn boot_stats(&self) -> &crate::domain::BootStats {
        self.boot.boot_stats()
    }

    pub fn ocpp_permits_charge(&self, connector_id: u32) -> bool {
        use crate::domain::ConnectorStatus::*;
        self.transactions
            .connector(connector_id)
            .map(|c| matches!(c.status(), Charging | SuspendedEV | SuspendedEVSE))
            .unwrap_or(false)
    }

    /// One full tick of the charge point: drive the boot gate, the engine's
    /// send/receive cycle, every connector's hardware/metering/smart-charging
    /// work, and finally dispatch whatever the engine surfaced this tick.
    pub fn tick<C: Connection, H: HardwareIo, F: FileStore>(
        &mut self,
        conn: &mut C,
        hardware: &mut H,
        fs: &mut F,
        clock_source_now_ms: u64,
    ) {
        self.clock.advance_to(clock_source_now_ms);
        let now_ms = self.clock.now_ms();

        self.boot.on_tick(now_ms, self.engine.queue_mut());
        self.availability.tick(&mut self.transactions);
        if let Some(wall_now) = self.clock.wall_now() {
            self.availability.expire_reservations(fs, &mut self.transactions, wall_now, now_ms);
        }

        let connector_ids = self.connector_ids.clone();
        if self.boot.connector_tasks_allowed() {
            for &connector_id in &connector_ids {
                let inputs = hardware.inputs(connector_id);
                let error_code = hardware.error_code(connector_id);
                self.transactions
                    .apply_hardware_tick(fs, self.engine.queue_mut(), &self.clock, connector_id, inputs, error_code, now_ms);
                self.metering
                    .tick(fs, self.engine.queue_mut(), &mut self.transactions, hardware, &self.clock, connector_id);
                if let Some(wall_now) = self.clock.wall_now() {
                    let active = self.transactions.active_transaction(connector_id);
                    let transaction_id = active.and_then(|tx| tx.transaction_id);
                    let start_of_charging = active.and_then(|tx| tx.start_timestamp);
                    self.smart_charging.tick(hardware, connector_id, wall_now, transaction_id, start_of_charging);
                }
            }
        }

        self.transactions
            .poll_unlocks(fs, &self.clock, &mut self.engine, conn, hardware, now_ms);

        // Apply everything this tick's receive half surfaced — including a
        // BootNotification completion seeding the wall clock — before running
        // clock-skew repair, so a Start/Stop queued earlier this tick (or on a
        // prior, offline tick) is restamped with this tick's clock state before
        // the engine dequeues and sends the next Request (`spec.md` §4.G clock-skew
        // repair, §8 scenario 4): reconcile-then-send, not send-then-reconcile.
        let outcome = self.engine.receive(conn, now_ms);
        for inbound in outcome.inbound_calls {
            self.dispatch_inbound(conn, fs, inbound.unique_id, inbound.operation);
        }
        for completion in outcome.completions {
            self.dispatch_completion(fs, completion);
        }
        self.transactions.reconcile_clock(fs, self.engine.queue_mut(), &self.clock);
        self.engine.send_next(conn, now_ms, self.boot.gate_open());
    }

    fn dispatch_inbound<C: Connection, F: FileStore>(
        &mut self,
        conn: &mut C,
        fs: &mut F,
        unique_id: String,
        mut operation: Box<dyn crate::application::operations::Operation>,
    ) {
        let now_ms = self.clock.now_ms();
        let action = operation.action();

        macro_rules! respond_with {
            ($ty:ty, $body:expr) => {{
                let op = operation.as_any_mut().downcast_mut::<$ty>().expect("registry/action mismatch");
                $body(op);
                self.engine.respond(conn, &unique_id, op);
            }};
        }

        match action {
            "RemoteStartTransaction" => respond_with!(RemoteStartTransactionOp, |op: &mut RemoteStartTransactionOp| {
                let accepted = match op.connector_id {
                    Some(connector_id) => self.begin_transaction_authorized(fs, connector_id, op.id_tag.clone()),
                    None => false,
                };
                op.status = Some(if accepted { GenericStatus::Accepted } else { GenericStatus::Rejected });
            }),
            "RemoteStopTransaction" => respond_with!(RemoteStopTransactionOp, |op: &mut RemoteStopTransactionOp| {
                let tx_nr_and_connector = self
                    .connector_ids
                    .iter()
                    .copied()
                    .find_map(|c| self.transactions.active_transaction(c).filter(|tx| tx.transaction_id == Some(op.transaction_id)).map(|tx| (c, tx.tx_nr)));
                let accepted = match tx_nr_and_connector {
                    Some((connector_id, tx_nr)) => {
                        let transaction_data = self.metering.take_transaction_data(connector_id, tx_nr);
                        self.transactions
                            .handle_remote_stop(fs, self.engine.queue_mut(), &self.clock, op.transaction_id, transaction_data, now_ms)
                    }
                    None => false,
                };
                op.status = Some(if accepted { GenericStatus::Accepted } else { GenericStatus::Rejected });
            }),
            "UnlockConnector" => {
                let op = operation.as_any_mut().downcast_mut::<UnlockConnectorOp>().expect("registry/action mismatch");
                if self.transactions.connector(op.connector_id).is_some() {
                    self.transactions.begin_unlock(unique_id, op.clone(), now_ms);
                } else {
                    op.status = Some(crate::application::operations::remote_control::UnlockStatus::NotSupported);
                    self.engine.respond(conn, &unique_id, op);
                }
            }
            "Reset" => respond_with!(ResetOp, |op: &mut ResetOp| {
                let reason = match op.reset_type {
                    Some(ResetType::Hard) => StopReason::HardReset,
                    _ => StopReason::SoftReset,
                };
                for connector_id in self.connector_ids.clone() {
                    if self.transactions.active_transaction(connector_id).is_some() {
                        let _ =
                            self.transactions
                                .end_transaction(fs, self.engine.queue_mut(), &self.clock, connector_id, reason, 0, Vec::new(), now_ms);
                    }
                }
                info!(reset_type = ?op.reset_type, "Reset requested; ended active transactions, deferring to the host to actually restart");
                op.status = Some(GenericStatus::Accepted);
            }),
            "ChangeAvailability" => respond_with!(ChangeAvailabilityOp, |op: &mut ChangeAvailabilityOp| {
                let operative = matches!(op.availability_type, Some(AvailabilityType::Operative));
                op.status = Some(self.availability.apply_change_availability(&mut self.transactions, op.connector_id, operative));
            }),
            "ReserveNow" => respond_with!(ReserveNowOp, |op: &mut ReserveNowOp| {
                let Some(expiry_date) = op.expiry_date else {
                    op.status = Some(crate::application::operations::reservation::ReservationStatus::Rejected);
                    return;
                };
                let reservation = Reservation {
                    id: op.reservation_id,
                    connector_id: op.connector_id,
                    id_tag: op.id_tag.clone(),
                    parent_id_tag: op.parent_id_tag.clone(),
                    expiry_date,
                };
                op.status = Some(self.availability.reserve_now(fs, &mut self.transactions, reservation, now_ms));
            }),
            "CancelReservation" => respond_with!(CancelReservationOp, |op: &mut CancelReservationOp| {
                op.status = Some(self.availability.cancel_reservation(fs, &mut self.transactions, op.reservation_id, now_ms));
            }),
            "SetChargingProfile" => respond_with!(SetChargingProfileOp, |op: &mut SetChargingProfileOp| {
                let status = match op.profile.take() {
                    Some(profile) => match self.smart_charging.install(fs, profile) {
                        Ok(()) => GenericStatus::Accepted,
                        Err(_) => GenericStatus::Rejected,
                    },
                    None => GenericStatus::Rejected,
                };
                op.status = Some(status);
            }),
            "ClearChargingProfile" => respond_with!(ClearChargingProfileOp, |op: &mut ClearChargingProfileOp| {
                let purpose = op.charging_profile_purpose.as_deref().and_then(parse_charging_profile_purpose);
                let cleared = self.smart_charging.clear(fs, op.id, op.connector_id, purpose, op.stack_level);
                op.status = Some(if cleared > 0 { GenericStatus::Accepted } else { GenericStatus::Unknown(String::new()) });
            }),
            "GetCompositeSchedule" => respond_with!(GetCompositeScheduleOp, |op: &mut GetCompositeScheduleOp| {
                match self.clock.wall_now() {
                    Some(wall_now) => {
                        let transaction_id = self.transactions.active_transaction(op.connector_id).and_then(|tx| tx.transaction_id);
                        let (_rate, _next) = self.smart_charging.compute_limit(op.connector_id, wall_now, transaction_id, None);
                        op.status = Some(GenericStatus::Accepted);
                        op.schedule_start = Some(wall_now);
                    }
                    None => op.status = Some(GenericStatus::Rejected),
                }
            }),
            "GetConfiguration" => respond_with!(GetConfigurationOp, |op: &mut GetConfigurationOp| {
                let (found, unknown) = self.config.key_values(op.keys.as_deref());
                op.configuration_key = found;
                op.unknown_key = unknown;
            }),
            "ChangeConfiguration" => respond_with!(ChangeConfigurationOp, |op: &mut ChangeConfigurationOp| {
                op.status = Some(match self.config.set_from_string(&op.key, &op.value) {
                    Ok(true) => ChangeConfigurationStatus::RebootRequired,
                    Ok(false) => ChangeConfigurationStatus::Accepted,
                    Err(_) => ChangeConfigurationStatus::Rejected,
                });
                let _ = self.config.save(fs);
            }),
            "SendLocalList" => respond_with!(SendLocalListOp, |op: &mut SendLocalListOp| {
                let Some(update_type) = op.update_type else {
                    return;
                };
                op.status = Some(self.local_auth.apply_send_local_list(fs, op.list_version, update_type, std::mem::take(&mut op.local_authorization_list)));
            }),
            "GetLocalListVersion" => respond_with!(GetLocalListVersionOp, |op: &mut GetLocalListVersionOp| {
                op.list_version = self.local_auth.list_version();
            }),
            "UpdateFirmware" => respond_with!(UpdateFirmwareOp, |_op: &mut UpdateFirmwareOp| {
                info!("UpdateFirmware requested; handing off to the firmware-download collaborator");
            }),
            "GetDiagnostics" => respond_with!(GetDiagnosticsOp, |op: &mut GetDiagnosticsOp| {
                info!(location = %op.location, "GetDiagnostics requested; handing off to the diagnostics-upload collaborator");
                op.file_name = None;
            }),
            "TriggerMessage" => respond_with!(TriggerMessageOp, |op: &mut TriggerMessageOp| {
                if op.status.is_some() {
                    return; // already rejected NotSupported by process_req for an unknown message type
                }
                op.status = Some(self.trigger_message(op));
            }),
            "InstallCertificate" => respond_with!(InstallCertificateOp, |op: &mut InstallCertificateOp| {
                let hash = self.certificate_hasher.hash(&op.certificate_pem);
                let record = InstalledCertificate {
                    certificate_type: op.certificate_type.clone().unwrap_or_default(),
                    hash,
                };
                op.status = Some(match fs.write_json(&certificate_filename(&record.hash), &record) {
                    Ok(()) => CertificateStatus::Accepted,
                    Err(_) => CertificateStatus::Failed,
                });
            }),
            "DeleteCertificate" => respond_with!(DeleteCertificateOp, |op: &mut DeleteCertificateOp| {
                op.status = Some(if fs.remove(&certificate_filename(&op.certificate_hash_data)).is_ok() {
                    CertificateStatus::Accepted
                } else {
                    CertificateStatus::NotFound
                });
            }),
            "GetInstalledCertificateIds" => respond_with!(GetInstalledCertificateIdsOp, |op: &mut GetInstalledCertificateIdsOp| {
                op.certificate_hash_data = fs
                    .list_with_prefix("cert-")
                    .into_iter()
                    .filter_map(|path| fs.read_json::<InstalledCertificate>(&path).ok())
                    .map(|cert| cert.hash)
                    .collect();
            }),
            other => {
                warn!(action = other, "known to the registry but not handled by this dispatcher");
            }
        }
    }

    fn trigger_message(&mut self, op: &TriggerMessageOp) -> GenericStatus {
        use crate::application::operations::firmware::TriggerMessageType;
        let Some(requested) = op.requested_message else {
            return GenericStatus::NotSupported;
        };
        match requested {
            TriggerMessageType::Heartbeat => {
                self.engine.queue_mut().push_volatile(RequestOrigin::Heartbeat, Box::new(HeartbeatOp::default()), 30_000);
            }
            TriggerMessageType::BootNotification => {
                // BootNotification is owned entirely by `BootService`'s retry timer;
                // nothing to re-trigger here beyond acknowledging the request.
            }
            TriggerMessageType::StatusNotification => {
                if let Some(connector_id) = op.connector_id {
                    if let Some(connector) = self.transactions.connector(connector_id) {
                        let status_op = StatusNotificationOp {
                            connector_id,
                            error_code: connector.error_code,
                            status: connector.status().as_str().to_string(),
                            info: connector.info.clone(),
                            timestamp: self.clock.wall_now().unwrap_or_else(crate::support::clock::min_time),
                            vendor_id: connector.vendor_id.clone(),
                            vendor_error_code: connector.vendor_error_code.clone(),
                        };
                        self.engine.queue_mut().push_volatile(RequestOrigin::StatusNotification { connector_id }, Box::new(status_op), 30_000);
                    }
                }
            }
            TriggerMessageType::MeterValues => {}
        }
        GenericStatus::Accepted
    }

    fn dispatch_completion<F: FileStore>(&mut self, fs: &mut F, completion: crate::application::engine::Completion) {
        let crate::application::engine::Completion { origin, op_nr, status, mut operation, .. } = completion;

        match origin {
            RequestOrigin::Boot => {
                if let CompletionStatus::Confirmed = status {
                    let op = operation.as_any_mut().downcast_mut::<BootNotificationOp>().expect("origin/type mismatch");
                    self.boot.apply_completion(op, &mut self.clock);
                }
            }
            RequestOrigin::Heartbeat => {
                // Nothing to apply: a successful Heartbeat only refreshes liveness,
                // which the engine/connection layer already tracks independently.
            }
            RequestOrigin::Authorize { connector_id, tx_nr } => {
                if let CompletionStatus::Confirmed = status {
                    let op = operation.as_any_mut().downcast_mut::<AuthorizeOp>().expect("origin/type mismatch");
                    self.transactions.apply_authorize_completion(fs, connector_id, tx_nr, op);
                }
            }
            RequestOrigin::StartTransaction { connector_id, tx_nr } => {
                if let CompletionStatus::Confirmed = status {
                    let op = operation.as_any_mut().downcast_mut::<StartTransactionOp>().expect("origin/type mismatch");
                    self.transactions.apply_start_completion(fs, self.engine.queue_mut(), connector_id, tx_nr, op);
                }
                self.engine.queue_mut().remove_persistent_record(fs, connector_id, op_nr);
            }
            RequestOrigin::StopTransaction { connector_id, tx_nr } => {
                if let CompletionStatus::Confirmed = status {
                    self.transactions.apply_stop_completion(fs, connector_id, tx_nr);
                }
                self.engine.queue_mut().remove_persistent_record(fs, connector_id, op_nr);
            }
            RequestOrigin::MeterValues { connector_id, tx_nr } => {
                if tx_nr.is_some() {
                    self.engine.queue_mut().remove_persistent_record(fs, connector_id, op_nr);
                }
            }
            RequestOrigin::StatusNotification { .. } => {
                // Fire-and-forget: no further state depends on the CallResult.
            }
        }

        if let CompletionStatus::Errored { code, description } = &status {
            warn!(op_nr, code, description, "Call completed with a CallError");
        }
    }
}

fn parse_charging_profile_purpose(wire: &str) -> Option<ChargingProfilePurpose> {
    match wire {
        "ChargePointMaxProfile" => Some(ChargingProfilePurpose::ChargePointMaxProfile),
        "TxDefaultProfile" => Some(ChargingProfilePurpose::TxDefaultProfile),
        "TxProfile" => Some(ChargingProfilePurpose::TxProfile),
        _ => None,
    }
}

/// End-to-end coverage of `spec.md` §8's six scenarios, each driven purely
/// through `Context::tick` and the host-callable API, exactly as the real
/// binary in `main.rs` drives it.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::metering_service::MeteringServiceConfig;
    use crate::application::operations::OperationRegistry;
    use crate::application::queue::RequestQueue;
    use crate::application::smart_charging_service::{SmartChargingService, SmartChargingServiceConfig};
    use crate::application::transaction_service::TransactionServiceConfig;
    use crate::domain::{BootStats, ConnectorStatus};
    use crate::ports::{HardwareInputs, InMemoryFileStore, NoopCertificateHasher, NoopConnection, NoopHardwareIo, UnlockPollResult};
    use crate::support::JsonPool;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn identity() -> ChargePointIdentity {
        ChargePointIdentity {
            vendor: "Acme".to_string(),
            model: "test-runner1234".to_string(),
            serial_number: None,
            firmware_version: None,
        }
    }

    fn build_context(connector_ids: &[u32], tx_cfg: TransactionServiceConfig, pre_boot_transactions: bool, queue_capacity: usize) -> Context {
        let registry = OperationRegistry::new();
        let json_pool = JsonPool::default();
        let queue = RequestQueue::new(queue_capacity);
        let engine = Engine::new(registry, json_pool, queue);
        let boot = BootService::new(identity(), BootStats::first_boot("1.0.0"), pre_boot_transactions);
        let transactions = TransactionService::new(connector_ids, tx_cfg);
        Context::new(
            ConfigurationStore::new(),
            boot,
            engine,
            transactions,
            MeteringService::new(MeteringServiceConfig::default()),
            SmartChargingService::new(SmartChargingServiceConfig::default()),
            AvailabilityService::new(),
            LocalAuthService::new(true, false),
            Box::new(NoopCertificateHasher),
            connector_ids.to_vec(),
        )
    }

    /// Parse the most recently sent frame as a `Call`, returning its `(unique_id, action)`.
    fn last_call_sent(conn: &NoopConnection) -> (String, String) {
        let raw = conn.sent().last().expect("expected a Call to have been sent");
        match OcppFrame::parse(raw).expect("sent frame must parse") {
            OcppFrame::Call { unique_id, action, .. } => (unique_id, action),
            other => panic!("expected a Call, got {other:?}"),
        }
    }

    /// Tick until a new outgoing Call appears, or panic after `max_ticks` —
    /// every scenario below settles well inside this bound.
    fn tick_until_sent<H: HardwareIo>(
        ctx: &mut Context,
        conn: &mut NoopConnection,
        hardware: &mut H,
        fs: &mut InMemoryFileStore,
        mut now_ms: u64,
        max_ticks: u32,
    ) -> u64 {
        let baseline = conn.sent().len();
        for _ in 0..max_ticks {
            ctx.tick(conn, hardware, fs, now_ms);
            now_ms += 1;
            if conn.sent().len() > baseline {
                return now_ms;
            }
        }
        panic!("no new Call sent within {max_ticks} ticks");
    }

    /// Drive the BootNotification round-trip: send it, then fabricate its
    /// `Accepted` CallResult and apply it. Returns the tick after the Accept
    /// was dispatched.
    fn accept_boot(
        ctx: &mut Context,
        conn: &mut NoopConnection,
        hardware: &mut NoopHardwareIo,
        fs: &mut InMemoryFileStore,
        mut now_ms: u64,
        current_time: chrono::DateTime<Utc>,
    ) -> u64 {
        conn.set_online(true);
        ctx.tick(conn, hardware, fs, now_ms);
        now_ms += 1;
        let (unique_id, action) = last_call_sent(conn);
        assert_eq!(action, "BootNotification");
        conn.push_incoming(
            OcppFrame::call_result(unique_id, json!({"status": "Accepted", "currentTime": current_time, "interval": 300}))
                .serialize()
                .unwrap(),
        );
        ctx.tick(conn, hardware, fs, now_ms);
        now_ms += 1;
        now_ms
    }

    fn base_time() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    /// Scenario 1: a charge point with two idle connectors boots and reports
    /// `Available` for both, one StatusNotification at a time.
    #[test]
    fn scenario_1_idle_boot_announces_every_connector() {
        let mut ctx = build_context(&[1, 2], TransactionServiceConfig::default(), false, 8);
        let mut conn = NoopConnection::new();
        let mut hardware = NoopHardwareIo::new();
        let mut fs = InMemoryFileStore::new();

        let now_ms = accept_boot(&mut ctx, &mut conn, &mut hardware, &mut fs, 0, base_time());

        // The tick right after Accept only opens the gate; connector tasks
        // (and their StatusNotifications) start the tick after that.
        let now_ms = tick_until_sent(&mut ctx, &mut conn, &mut hardware, &mut fs, now_ms, 3);
        let (first_id, first_action) = last_call_sent(&conn);
        assert_eq!(first_action, "StatusNotification");
        assert_eq!(conn.sent().len(), 2, "exactly one StatusNotification in flight at a time");

        conn.push_incoming(OcppFrame::call_result(first_id, json!({})).serialize().unwrap());
        let _now_ms = tick_until_sent(&mut ctx, &mut conn, &mut hardware, &mut fs, now_ms, 3);
        let (_second_id, second_action) = last_call_sent(&conn);
        assert_eq!(second_action, "StatusNotification");
        assert_eq!(conn.sent().len(), 3, "Boot + two StatusNotifications, serialized one at a time");

        assert_eq!(ctx.transactions.connector(1).unwrap().status(), ConnectorStatus::Available);
        assert_eq!(ctx.transactions.connector(2).unwrap().status(), ConnectorStatus::Available);
    }

    /// Scenario 2: a local idTag swipe authorizes remotely, then plugging in
    /// starts the transaction and the connector reports Charging immediately
    /// (before the StartTransaction CallResult even arrives).
    #[test]
    fn scenario_2_plug_then_authorize_reaches_charging() {
        let mut ctx = build_context(&[1], TransactionServiceConfig::default(), false, 8);
        let mut conn = NoopConnection::new();
        let mut hardware = NoopHardwareIo::new();
        let mut fs = InMemoryFileStore::new();

        let now_ms = accept_boot(&mut ctx, &mut conn, &mut hardware, &mut fs, 0, base_time());

        // Drain the initial Available announcement so the engine's one
        // in-flight slot is free before Authorize needs it.
        let now_ms = tick_until_sent(&mut ctx, &mut conn, &mut hardware, &mut fs, now_ms, 3);
        let (status_id, status_action) = last_call_sent(&conn);
        assert_eq!(status_action, "StatusNotification");
        conn.push_incoming(OcppFrame::call_result(status_id, json!({})).serialize().unwrap());
        ctx.tick(&mut conn, &mut hardware, &mut fs, now_ms);
        let now_ms = now_ms + 1;

        assert!(ctx.begin_transaction(&mut fs, 1, "TAG1"));
        let now_ms = tick_until_sent(&mut ctx, &mut conn, &mut hardware, &mut fs, now_ms, 3);
        let (authorize_id, action) = last_call_sent(&conn);
        assert_eq!(action, "Authorize");
        conn.push_incoming(OcppFrame::call_result(authorize_id, json!({"idTagInfo": {"status": "Accepted"}})).serialize().unwrap());
        ctx.tick(&mut conn, &mut hardware, &mut fs, now_ms);
        let now_ms = now_ms + 1;
        assert_eq!(ctx.transactions.connector(1).unwrap().status(), ConnectorStatus::Preparing);

        hardware.set_inputs(1, HardwareInputs { plugged: true, ..Default::default() });
        let now_ms = tick_until_sent(&mut ctx, &mut conn, &mut hardware, &mut fs, now_ms, 3);
        let (start_id, action) = last_call_sent(&conn);
        assert_eq!(action, "StartTransaction");
        assert_eq!(ctx.transactions.connector(1).unwrap().status(), ConnectorStatus::Charging);
        assert!(ctx.ocpp_permits_charge(1));

        conn.push_incoming(OcppFrame::call_result(start_id, json!({"transactionId": 777, "idTagInfo": {"status": "Accepted"}})).serialize().unwrap());
        ctx.tick(&mut conn, &mut hardware, &mut fs, now_ms);
        assert_eq!(ctx.transactions.active_transaction(1).unwrap().transaction_id, Some(777));
    }

    /// Scenario 3: an authorized-but-never-plugged connector abandons the
    /// transaction once `ConnectionTimeOut` elapses, with no StartTransaction
    /// ever sent.
    #[test]
    fn scenario_3_connection_timeout_abandons_unplugged_transaction() {
        let cfg = TransactionServiceConfig { connection_timeout_ms: 5_000, ..TransactionServiceConfig::default() };
        let mut ctx = build_context(&[1], cfg, false, 8);
        let mut conn = NoopConnection::new();
        let mut hardware = NoopHardwareIo::new();
        let mut fs = InMemoryFileStore::new();

        let now_ms = accept_boot(&mut ctx, &mut conn, &mut hardware, &mut fs, 0, base_time());
        let mut now_ms = tick_until_sent(&mut ctx, &mut conn, &mut hardware, &mut fs, now_ms, 3);

        assert!(ctx.begin_transaction_authorized(&mut fs, 1, "TAG1"));
        assert!(ctx.transactions.connector(1).unwrap().active_tx_nr.is_some());

        // Never plugs in; nothing is ever owed to the CSMS for this transaction
        // (`sent_start` never gets set), so no new frame is expected here —
        // just run well past `connection_timeout_ms`.
        for _ in 0..10 {
            ctx.tick(&mut conn, &mut hardware, &mut fs, now_ms);
            now_ms += 1_000;
        }

        assert!(ctx.transactions.connector(1).unwrap().active_tx_nr.is_none());
        assert!(conn.sent().iter().all(|frame| !frame.contains("\"StartTransaction\"")));
    }

    /// Scenario 4: a transaction begun and ended entirely offline (`spec.md` §4.G,
    /// §4.I PreBootTransactions) gets both its timestamps and its Stop's
    /// `transactionId` repaired once the wall clock validates — this is the
    /// direct regression test for the reconcile-then-send ordering fix above.
    #[test]
    fn scenario_4_preboot_transaction_is_reconciled_and_drained() {
        let mut ctx = build_context(&[1], TransactionServiceConfig::default(), true, 8);
        let mut conn = NoopConnection::new();
        let mut hardware = NoopHardwareIo::new();
        hardware.set_inputs(1, HardwareInputs { plugged: true, ..Default::default() });
        let mut fs = InMemoryFileStore::new();

        assert!(ctx.begin_transaction_authorized(&mut fs, 1, "TAG1"));
        ctx.tick(&mut conn, &mut hardware, &mut fs, 0);
        // Never confirmed by a CSMS that was never reachable, but already
        // reported as Charging locally — `sent_start`, not `tx.started`, governs.
        assert_eq!(ctx.transactions.connector(1).unwrap().status(), ConnectorStatus::Charging);

        // An hour later (monotonic), still offline, the session stops.
        let one_hour_ms = 60 * 60 * 1_000u64;
        ctx.tick(&mut conn, &mut hardware, &mut fs, one_hour_ms);
        assert!(ctx.end_transaction(&mut fs, 1, StopReason::Local, 500));
        ctx.tick(&mut conn, &mut hardware, &mut fs, one_hour_ms);

        // Nothing could have been sent offline.
        assert!(conn.sent().is_empty());

        // Another hour later, the uplink finally comes up and BootNotification
        // reports `base` as the CSMS's current wall-clock time — two hours
        // after the transaction began, one hour after it stopped.
        let base = base_time();
        let two_hours_ms = 2 * one_hour_ms;
        let now_ms = accept_boot(&mut ctx, &mut conn, &mut hardware, &mut fs, two_hours_ms, base);

        // reconcile-then-send: the Start is dequeued the very tick the gate
        // opens, already carrying its reconstructed (not placeholder) timestamp.
        let (start_id, action) = last_call_sent(&conn);
        assert_eq!(action, "StartTransaction");
        let start_sent = OcppFrame::parse(conn.sent().last().unwrap()).unwrap();
        let OcppFrame::Call { payload: start_payload, .. } = start_sent else { panic!("not a Call") };
        let sent_timestamp: chrono::DateTime<Utc> = serde_json::from_value(start_payload["timestamp"].clone()).unwrap();
        assert!((sent_timestamp - (base - chrono::Duration::hours(2))).num_seconds().abs() < 10);

        conn.push_incoming(OcppFrame::call_result(start_id, json!({"transactionId": 999, "idTagInfo": {"status": "Accepted"}})).serialize().unwrap());
        // Same tick: the Start confirms, restamping the queued Stop's
        // transactionId, and the engine's split send-half dequeues and sends
        // that now-correctly-restamped Stop, all before this call returns.
        ctx.tick(&mut conn, &mut hardware, &mut fs, now_ms);

        let stop_sent = OcppFrame::parse(conn.sent().last().unwrap()).unwrap();
        let OcppFrame::Call { action: stop_action, payload: stop_payload, unique_id: stop_id } = stop_sent else { panic!("not a Call") };
        assert_eq!(stop_action, "StopTransaction");
        assert_eq!(stop_payload["transactionId"].as_i64(), Some(999), "Stop must carry the CSMS-assigned transactionId, not the placeholder 0");
        let stop_timestamp: chrono::DateTime<Utc> = serde_json::from_value(stop_payload["timestamp"].clone()).unwrap();
        assert!((stop_timestamp - (base - chrono::Duration::hours(1))).num_seconds().abs() < 10);

        conn.push_incoming(OcppFrame::call_result(stop_id, json!({})).serialize().unwrap());
        ctx.tick(&mut conn, &mut hardware, &mut fs, now_ms + 1);
        assert!(ctx.transactions.active_transaction(1).is_none());
        assert!(ctx.engine.queue().persistent_len(1) == 0);
    }

    /// Scenario 5: the persistent queue fills up after two full offline
    /// Start/Stop pairs; a third transaction is rejected outright, and once
    /// online, all four queued Requests drain in strict FIFO order.
    #[test]
    fn scenario_5_persistent_queue_full_rejects_then_drains_fifo() {
        let mut ctx = build_context(&[1], TransactionServiceConfig::default(), true, 4);
        let mut conn = NoopConnection::new();
        let mut hardware = NoopHardwareIo::new();
        hardware.set_inputs(1, HardwareInputs { plugged: true, ..Default::default() });
        let mut fs = InMemoryFileStore::new();

        let mut now_ms = 0u64;
        for i in 0..2u32 {
            assert!(ctx.begin_transaction_authorized(&mut fs, 1, format!("TAG{i}")));
            ctx.tick(&mut conn, &mut hardware, &mut fs, now_ms);
            now_ms += 1;
            assert!(ctx.end_transaction(&mut fs, 1, StopReason::Local, 100));
            ctx.tick(&mut conn, &mut hardware, &mut fs, now_ms);
            now_ms += 1;
        }
        assert_eq!(ctx.engine.queue().persistent_len(1), 4);

        assert!(!ctx.begin_transaction_authorized(&mut fs, 1, "TAG_OVERFLOW"));

        now_ms = accept_boot(&mut ctx, &mut conn, &mut hardware, &mut fs, now_ms, base_time());

        let mut next_tx_id = 500i32;
        let mut seen_actions = Vec::new();
        for _ in 0..4 {
            let (unique_id, action) = last_call_sent(&conn);
            seen_actions.push(action.clone());
            let payload = match action.as_str() {
                "StartTransaction" => {
                    let id = next_tx_id;
                    next_tx_id += 1;
                    json!({"transactionId": id, "idTagInfo": {"status": "Accepted"}})
                }
                "StopTransaction" => json!({}),
                other => panic!("unexpected action {other}"),
            };
            conn.push_incoming(OcppFrame::call_result(unique_id, payload).serialize().unwrap());
            now_ms += 1;
            ctx.tick(&mut conn, &mut hardware, &mut fs, now_ms);
        }

        assert_eq!(seen_actions, vec!["StartTransaction", "StopTransaction", "StartTransaction", "StopTransaction"]);
        assert_eq!(ctx.engine.queue().persistent_len(1), 0);
    }

    /// A `HardwareIo` double that never settles an unlock on its own, so
    /// scenario 6 can exercise the timeout path instead of an immediate result.
    struct AlwaysPendingHardware {
        inner: NoopHardwareIo,
    }

    impl HardwareIo for AlwaysPendingHardware {
        fn inputs(&self, connector_id: u32) -> HardwareInputs {
            self.inner.inputs(connector_id)
        }
        fn error_code(&self, connector_id: u32) -> crate::domain::ConnectorErrorCode {
            self.inner.error_code(connector_id)
        }
        fn poll_unlock(&mut self, _connector_id: u32) -> UnlockPollResult {
            UnlockPollResult::Pending
        }
        fn meter_value_wh(&self, connector_id: u32) -> Option<i64> {
            self.inner.meter_value_wh(connector_id)
        }
    }

    /// Scenario 6: an inbound UnlockConnector Call is held back while the
    /// actuator reports `Pending`, then settles to `UnlockFailed` once
    /// `unlock_timeout_ms` elapses, with the correct CallResult finally sent.
    #[test]
    fn scenario_6_unlock_connector_polls_then_times_out() {
        let cfg = TransactionServiceConfig { unlock_timeout_ms: 3_000, ..TransactionServiceConfig::default() };
        let mut ctx = build_context(&[1], cfg, false, 8);
        let mut conn = NoopConnection::new();
        let mut hardware = AlwaysPendingHardware { inner: NoopHardwareIo::new() };
        let mut fs = InMemoryFileStore::new();

        conn.set_online(true);
        conn.push_incoming(OcppFrame::call("unlock-req-1", "UnlockConnector", json!({"connectorId": 1})).serialize().unwrap());

        let mut now_ms = 0u64;
        ctx.tick(&mut conn, &mut hardware, &mut fs, now_ms);
        assert!(conn.sent().is_empty(), "unlock must be held back while still Pending");

        now_ms += 1_000;
        ctx.tick(&mut conn, &mut hardware, &mut fs, now_ms);
        assert!(conn.sent().is_empty(), "still within unlock_timeout_ms");

        now_ms += 3_001;
        ctx.tick(&mut conn, &mut hardware, &mut fs, now_ms);

        let raw = conn.sent().last().expect("unlock response must settle after the timeout");
        match OcppFrame::parse(raw).unwrap() {
            OcppFrame::CallResult { unique_id, payload } => {
                assert_eq!(unique_id, "unlock-req-1");
                assert_eq!(payload["status"].as_str(), Some("UnlockFailed"));
            }
            other => panic!("expected a CallResult, got {other:?}"),
        }
    }

    /// A CSMS-initiated Reset while a transaction is charging must end that
    /// transaction (with the matching `StopReason`) before/while responding
    /// Accepted, per `spec.md` §4.J's stop-condition list.
    #[test]
    fn reset_ends_active_transaction_with_matching_stop_reason() {
        let mut ctx = build_context(&[1], TransactionServiceConfig::default(), true, 8);
        let mut conn = NoopConnection::new();
        let mut hardware = NoopHardwareIo::new();
        hardware.set_inputs(1, HardwareInputs { plugged: true, ..Default::default() });
        let mut fs = InMemoryFileStore::new();

        assert!(ctx.begin_transaction_authorized(&mut fs, 1, "TAG1"));
        ctx.tick(&mut conn, &mut hardware, &mut fs, 0);
        assert_eq!(ctx.transactions.connector(1).unwrap().status(), ConnectorStatus::Charging);

        conn.set_online(true);
        conn.push_incoming(OcppFrame::call("reset-req-1", "Reset", json!({"type": "Hard"})).serialize().unwrap());
        ctx.tick(&mut conn, &mut hardware, &mut fs, 1);

        assert!(ctx.transactions.connector(1).unwrap().active_tx_nr.is_none(), "Reset must end the active transaction");

        let raw = conn.sent().last().expect("Reset must still be answered");
        match OcppFrame::parse(raw).unwrap() {
            OcppFrame::CallResult { unique_id, payload } => {
                assert_eq!(unique_id, "reset-req-1");
                assert_eq!(payload["status"].as_str(), Some("Accepted"));
            }
            other => panic!("expected a CallResult, got {other:?}"),
        }
    }
}

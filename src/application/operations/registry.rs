//! Factory table mapping an inbound Call's `action` string onto a freshly
//! constructed `Operation`. Only CSMS-initiated operations are registered —
//! charge-point-initiated operations (`operations::core`) are only ever
//! constructed locally when we send the Call ourselves, so the registry has
//! no need to build them generically.

use super::configuration::{ChangeConfigurationOp, GetConfigurationOp};
use super::firmware::{GetDiagnosticsOp, TriggerMessageOp, UpdateFirmwareOp};
use super::local_auth::{GetLocalListVersionOp, SendLocalListOp};
use super::remote_control::{
    ChangeAvailabilityOp, RemoteStartTransactionOp, RemoteStopTransactionOp, ResetOp,
    UnlockConnectorOp,
};
use super::reservation::{CancelReservationOp, ReserveNowOp};
use super::security::{DeleteCertificateOp, GetInstalledCertificateIdsOp, InstallCertificateOp};
use super::smart_charging::{ClearChargingProfileOp, GetCompositeScheduleOp, SetChargingProfileOp};
use super::Operation;
use std::collections::HashMap;

type Factory = Box<dyn Fn() -> Box<dyn Operation> + Send + Sync>;

/// Name-keyed construction table for CSMS-initiated `Operation`s, per
/// `spec.md` §4 component E.
pub struct OperationRegistry {
    factories: HashMap<&'static str, Factory>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        let mut registry = OperationRegistry {
            factories: HashMap::new(),
        };
        registry.register::<RemoteStartTransactionOp>();
        registry.register::<RemoteStopTransactionOp>();
        registry.register::<UnlockConnectorOp>();
        registry.register::<ResetOp>();
        registry.register::<ChangeAvailabilityOp>();
        registry.register::<SetChargingProfileOp>();
        registry.register::<ClearChargingProfileOp>();
        registry.register::<GetCompositeScheduleOp>();
        registry.register::<GetConfigurationOp>();
        registry.register::<ChangeConfigurationOp>();
        registry.register::<SendLocalListOp>();
        registry.register::<GetLocalListVersionOp>();
        registry.register::<UpdateFirmwareOp>();
        registry.register::<GetDiagnosticsOp>();
        registry.register::<TriggerMessageOp>();
        registry.register::<InstallCertificateOp>();
        registry.register::<DeleteCertificateOp>();
        registry.register::<GetInstalledCertificateIdsOp>();
        registry.register::<ReserveNowOp>();
        registry.register::<CancelReservationOp>();
        registry
    }

    fn register<T>(&mut self)
    where
        T: Operation + Default + 'static,
    {
        let action = T::default().action();
        self.factories.insert(action, Box::new(|| Box::new(T::default())));
    }

    pub fn create(&self, action: &str) -> Option<Box<dyn Operation>> {
        self.factories.get(action).map(|factory| factory())
    }

    pub fn is_known(&self, action: &str) -> bool {
        self.factories.contains_key(action)
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_registered_operation_by_action_name() {
        let registry = OperationRegistry::new();
        let op = registry.create("RemoteStartTransaction").unwrap();
        assert_eq!(op.action(), "RemoteStartTransaction");
    }

    #[test]
    fn rejects_unknown_action() {
        let registry = OperationRegistry::new();
        assert!(registry.create("SomeVendorExtension").is_none());
        assert!(!registry.is_known("SomeVendorExtension"));
    }

    #[test]
    fn every_factory_constructs_a_fresh_default_instance() {
        let registry = OperationRegistry::new();
        let a = registry.create("Reset").unwrap();
        let b = registry.create("Reset").unwrap();
        assert_eq!(a.action(), b.action());
    }
}

//! The hardware-facing I/O glue (contactor, EV-ready signal, energy meter) is
//! explicitly out of scope per `spec.md` §1 — "only their interfaces are
//! specified". `spec.md` §3/§4.J describes these as per-connector "input
//! closures" (`plugged`, `evReady`, `evseReady`, `occupied`, `startTxReady`,
//! `stopTxReady`, `unlockConnector`); per the design note on `std::function`-style
//! callbacks, they become a single named port trait here rather than boxed
//! closures, since that is how the rest of this crate expresses a host boundary.

use crate::domain::ConnectorErrorCode;

/// Snapshot of a connector's physical inputs for one `tick()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HardwareInputs {
    pub plugged: bool,
    pub ev_ready: bool,
    pub evse_ready: bool,
    pub occupied: bool,
    pub start_tx_ready: bool,
    pub stop_tx_ready: bool,
}

/// Result of polling an in-progress connector unlock (`spec.md` §8 scenario 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockPollResult {
    Pending,
    Unlocked,
    UnlockFailed,
}

/// Host-supplied hardware glue: one instance covers every connector.
pub trait HardwareIo {
    fn inputs(&self, connector_id: u32) -> HardwareInputs;
    fn error_code(&self, connector_id: u32) -> ConnectorErrorCode;

    /// Drive the physical unlock actuator and report its current state. Called
    /// once per tick while an unlock is outstanding; must not block.
    fn poll_unlock(&mut self, connector_id: u32) -> UnlockPollResult;

    /// Current meter reading in Wh for a connector's active session, if metering
    /// hardware is present.
    fn meter_value_wh(&self, connector_id: u32) -> Option<i64>;

    /// Push a newly computed smart-charging limit down to the contactor/charger
    /// electronics. `number_phases` is `None` when the composed profiles never
    /// constrained it. Default no-op, since not every target has a controllable
    /// limit (`spec.md` §4.L publication step).
    fn publish_limit(&mut self, _connector_id: u32, _max_power_w: Option<f64>, _max_current_a: Option<f64>, _number_phases: Option<u8>) {}
}

/// Always-idle, always-available test double, matching the wider corpus's
/// `NoopHal` pattern: no EV ever plugs in, unlocks fail instantly.
#[derive(Debug, Default)]
pub struct NoopHardwareIo {
    pub overrides: std::collections::HashMap<u32, HardwareInputs>,
    pub meter_wh: std::collections::HashMap<u32, i64>,
}

impl NoopHardwareIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_inputs(&mut self, connector_id: u32, inputs: HardwareInputs) {
        self.overrides.insert(connector_id, inputs);
    }

    pub fn set_meter_wh(&mut self, connector_id: u32, wh: i64) {
        self.meter_wh.insert(connector_id, wh);
    }
}

impl HardwareIo for NoopHardwareIo {
    fn inputs(&self, connector_id: u32) -> HardwareInputs {
        self.overrides.get(&connector_id).copied().unwrap_or_default()
    }

    fn error_code(&self, _connector_id: u32) -> ConnectorErrorCode {
        ConnectorErrorCode::NoError
    }

    fn poll_unlock(&mut self, _connector_id: u32) -> UnlockPollResult {
        UnlockPollResult::UnlockFailed
    }

    fn meter_value_wh(&self, connector_id: u32) -> Option<i64> {
        self.meter_wh.get(&connector_id).copied()
    }
}

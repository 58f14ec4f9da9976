//! Thin component-N handlers over external collaborators explicitly out of
//! scope per `spec.md` §1 (firmware-image download mechanics, diagnostics
//! upload mechanics): UpdateFirmware, GetDiagnostics, TriggerMessage.

use super::{parse_payload, GenericStatus, Operation};
use crate::support::CallErrorCode;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Default)]
pub struct UpdateFirmwareOp {
    pub location: String,
    pub retrieve_date: Option<DateTime<Utc>>,
    pub retries: Option<u32>,
    pub retry_interval: Option<u32>,
}

#[derive(Deserialize)]
struct UpdateFirmwareReqWire {
    location: String,
    #[serde(rename = "retrieveDate")]
    retrieve_date: Option<DateTime<Utc>>,
    retries: Option<u32>,
    #[serde(rename = "retryInterval")]
    retry_interval: Option<u32>,
}

impl Operation for UpdateFirmwareOp {
    fn action(&self) -> &'static str {
        "UpdateFirmware"
    }

    fn create_req(&self) -> Value {
        json!({})
    }

    fn process_req(&mut self, payload: &Value) -> Result<(), CallErrorCode> {
        let wire: UpdateFirmwareReqWire = parse_payload(payload)?;
        self.location = wire.location;
        self.retrieve_date = wire.retrieve_date;
        self.retries = wire.retries;
        self.retry_interval = wire.retry_interval;
        Ok(())
    }

    // UpdateFirmware.conf has no payload; a download is handed off to the
    // firmware-download collaborator out of scope per `spec.md` §1.
    fn create_conf(&self) -> Value {
        json!({})
    }

    fn process_conf(&mut self, _payload: &Value) -> Result<(), CallErrorCode> {
        Err(CallErrorCode::NotSupported)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetDiagnosticsOp {
    pub location: String,
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
    pub file_name: Option<String>,
}

#[derive(Deserialize)]
struct GetDiagnosticsReqWire {
    location: String,
    #[serde(rename = "startTime")]
    start_time: Option<DateTime<Utc>>,
    #[serde(rename = "stopTime")]
    stop_time: Option<DateTime<Utc>>,
}

impl Operation for GetDiagnosticsOp {
    fn action(&self) -> &'static str {
        "GetDiagnostics"
    }

    fn create_req(&self) -> Value {
        json!({})
    }

    fn process_req(&mut self, payload: &Value) -> Result<(), CallErrorCode> {
        let wire: GetDiagnosticsReqWire = parse_payload(payload)?;
        self.location = wire.location;
        self.start_time = wire.start_time;
        self.stop_time = wire.stop_time;
        Ok(())
    }

    fn create_conf(&self) -> Value {
        json!({ "fileName": self.file_name })
    }

    fn process_conf(&mut self, _payload: &Value) -> Result<(), CallErrorCode> {
        Err(CallErrorCode::NotSupported)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMessageType {
    BootNotification,
    Heartbeat,
    StatusNotification,
    MeterValues,
}

impl TriggerMessageType {
    fn from_str(s: &str) -> Option<Self> {
        match s {
            "BootNotification" => Some(Self::BootNotification),
            "Heartbeat" => Some(Self::Heartbeat),
            "StatusNotification" => Some(Self::StatusNotification),
            "MeterValues" => Some(Self::MeterValues),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TriggerMessageOp {
    pub requested_message: Option<TriggerMessageType>,
    pub connector_id: Option<u32>,
    pub status: Option<GenericStatus>,
}

#[derive(Deserialize)]
struct TriggerMessageReqWire {
    #[serde(rename = "requestedMessage")]
    requested_message: String,
    #[serde(rename = "connectorId")]
    connector_id: Option<u32>,
}

impl Operation for TriggerMessageOp {
    fn action(&self) -> &'static str {
        "TriggerMessage"
    }

    fn create_req(&self) -> Value {
        json!({})
    }

    fn process_req(&mut self, payload: &Value) -> Result<(), CallErrorCode> {
        let wire: TriggerMessageReqWire = parse_payload(payload)?;
        self.requested_message = TriggerMessageType::from_str(&wire.requested_message);
        if self.requested_message.is_none() {
            self.status = Some(GenericStatus::NotSupported);
        }
        self.connector_id = wire.connector_id;
        Ok(())
    }

    fn create_conf(&self) -> Value {
        json!({ "status": self.status.as_ref().map(GenericStatus::as_str).unwrap_or("Rejected") })
    }

    fn process_conf(&mut self, _payload: &Value) -> Result<(), CallErrorCode> {
        Err(CallErrorCode::NotSupported)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

//! Charge-point-initiated Calls: BootNotification, Heartbeat, Authorize,
//! StartTransaction, StopTransaction, MeterValues, StatusNotification.
//!
//! These are the Calls the Request Queue (component G) carries outbound; the
//! engine parses their CallResult via `process_conf` and the owning service
//! (`boot_service`/`transaction_service`/`metering_service`) downcasts via
//! `as_any` to read the parsed fields back out.

use super::{parse_payload, Operation};
use crate::domain::{ConnectorErrorCode, IdTagInfo, MeterValue};
use crate::support::CallErrorCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Default)]
pub struct BootNotificationOp {
    pub charge_point_vendor: String,
    pub charge_point_model: String,
    pub charge_point_serial_number: Option<String>,
    pub firmware_version: Option<String>,

    pub status: Option<String>,
    pub current_time: Option<DateTime<Utc>>,
    pub interval_s: Option<u32>,
}

#[derive(Deserialize)]
struct BootNotificationConfWire {
    status: String,
    #[serde(rename = "currentTime")]
    current_time: DateTime<Utc>,
    interval: u32,
}

impl Operation for BootNotificationOp {
    fn action(&self) -> &'static str {
        "BootNotification"
    }

    fn create_req(&self) -> Value {
        json!({
            "chargePointVendor": self.charge_point_vendor,
            "chargePointModel": self.charge_point_model,
            "chargePointSerialNumber": self.charge_point_serial_number,
            "firmwareVersion": self.firmware_version,
        })
    }

    fn process_req(&mut self, _payload: &Value) -> Result<(), CallErrorCode> {
        Err(CallErrorCode::NotSupported) // never CSMS-initiated
    }

    fn create_conf(&self) -> Value {
        json!({})
    }

    fn process_conf(&mut self, payload: &Value) -> Result<(), CallErrorCode> {
        let wire: BootNotificationConfWire = parse_payload(payload)?;
        self.status = Some(wire.status);
        self.current_time = Some(wire.current_time);
        self.interval_s = Some(wire.interval);
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct HeartbeatOp {
    pub current_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct HeartbeatConfWire {
    #[serde(rename = "currentTime")]
    current_time: DateTime<Utc>,
}

impl Operation for HeartbeatOp {
    fn action(&self) -> &'static str {
        "Heartbeat"
    }

    fn create_req(&self) -> Value {
        json!({})
    }

    fn process_req(&mut self, _payload: &Value) -> Result<(), CallErrorCode> {
        Err(CallErrorCode::NotSupported)
    }

    fn create_conf(&self) -> Value {
        json!({ "currentTime": self.current_time })
    }

    fn process_conf(&mut self, payload: &Value) -> Result<(), CallErrorCode> {
        let wire: HeartbeatConfWire = parse_payload(payload)?;
        self.current_time = Some(wire.current_time);
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[derive(Debug, Clone)]
pub struct AuthorizeOp {
    pub id_tag: String,
    pub id_tag_info: Option<IdTagInfo>,
}

impl AuthorizeOp {
    pub fn new(id_tag: impl Into<String>) -> Self {
        Self {
            id_tag: id_tag.into(),
            id_tag_info: None,
        }
    }
}

#[derive(Deserialize)]
struct AuthorizeConfWire {
    #[serde(rename = "idTagInfo")]
    id_tag_info: IdTagInfo,
}

impl Operation for AuthorizeOp {
    fn action(&self) -> &'static str {
        "Authorize"
    }

    fn create_req(&self) -> Value {
        json!({ "idTag": self.id_tag })
    }

    fn process_req(&mut self, _payload: &Value) -> Result<(), CallErrorCode> {
        Err(CallErrorCode::NotSupported)
    }

    fn create_conf(&self) -> Value {
        json!({})
    }

    fn process_conf(&mut self, payload: &Value) -> Result<(), CallErrorCode> {
        let wire: AuthorizeConfWire = parse_payload(payload)?;
        self.id_tag_info = Some(wire.id_tag_info);
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[derive(Debug, Clone)]
pub struct StartTransactionOp {
    pub connector_id: u32,
    pub id_tag: String,
    pub meter_start: i64,
    pub timestamp: DateTime<Utc>,
    pub reservation_id: Option<i32>,

    pub transaction_id: Option<i32>,
    pub id_tag_info: Option<IdTagInfo>,
}

#[derive(Serialize)]
struct StartTransactionReqWire<'a> {
    #[serde(rename = "connectorId")]
    connector_id: u32,
    #[serde(rename = "idTag")]
    id_tag: &'a str,
    #[serde(rename = "meterStart")]
    meter_start: i64,
    timestamp: DateTime<Utc>,
    #[serde(rename = "reservationId", skip_serializing_if = "Option::is_none")]
    reservation_id: Option<i32>,
}

#[derive(Deserialize)]
struct StartTransactionConfWire {
    #[serde(rename = "transactionId")]
    transaction_id: i32,
    #[serde(rename = "idTagInfo")]
    id_tag_info: IdTagInfo,
}

impl Operation for StartTransactionOp {
    fn action(&self) -> &'static str {
        "StartTransaction"
    }

    fn create_req(&self) -> Value {
        serde_json::to_value(StartTransactionReqWire {
            connector_id: self.connector_id,
            id_tag: &self.id_tag,
            meter_start: self.meter_start,
            timestamp: self.timestamp,
            reservation_id: self.reservation_id,
        })
        .expect("StartTransaction request always serializes")
    }

    fn process_req(&mut self, _payload: &Value) -> Result<(), CallErrorCode> {
        Err(CallErrorCode::NotSupported)
    }

    fn create_conf(&self) -> Value {
        json!({})
    }

    fn process_conf(&mut self, payload: &Value) -> Result<(), CallErrorCode> {
        let wire: StartTransactionConfWire = parse_payload(payload)?;
        self.transaction_id = Some(wire.transaction_id);
        self.id_tag_info = Some(wire.id_tag_info);
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[derive(Debug, Clone)]
pub struct StopTransactionOp {
    pub transaction_id: i32,
    pub id_tag: Option<String>,
    pub meter_stop: i64,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
    pub transaction_data: Vec<MeterValue>,

    pub id_tag_info: Option<IdTagInfo>,
}

#[derive(Serialize)]
struct StopTransactionReqWire<'a> {
    #[serde(rename = "transactionId")]
    transaction_id: i32,
    #[serde(rename = "idTag", skip_serializing_if = "Option::is_none")]
    id_tag: &'a Option<String>,
    #[serde(rename = "meterStop")]
    meter_stop: i64,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: &'a Option<String>,
    #[serde(rename = "transactionData", skip_serializing_if = "Vec::is_empty")]
    transaction_data: &'a Vec<MeterValue>,
}

#[derive(Deserialize, Default)]
struct StopTransactionConfWire {
    #[serde(rename = "idTagInfo")]
    id_tag_info: Option<IdTagInfo>,
}

impl Operation for StopTransactionOp {
    fn action(&self) -> &'static str {
        "StopTransaction"
    }

    fn create_req(&self) -> Value {
        serde_json::to_value(StopTransactionReqWire {
            transaction_id: self.transaction_id,
            id_tag: &self.id_tag,
            meter_stop: self.meter_stop,
            timestamp: self.timestamp,
            reason: &self.reason,
            transaction_data: &self.transaction_data,
        })
        .expect("StopTransaction request always serializes")
    }

    fn process_req(&mut self, _payload: &Value) -> Result<(), CallErrorCode> {
        Err(CallErrorCode::NotSupported)
    }

    fn create_conf(&self) -> Value {
        json!({})
    }

    fn process_conf(&mut self, payload: &Value) -> Result<(), CallErrorCode> {
        let wire: StopTransactionConfWire = parse_payload(payload)?;
        self.id_tag_info = wire.id_tag_info;
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[derive(Debug, Clone)]
pub struct MeterValuesOp {
    pub connector_id: u32,
    pub transaction_id: Option<i32>,
    pub meter_value: Vec<MeterValue>,
}

#[derive(Serialize)]
struct MeterValuesReqWire<'a> {
    #[serde(rename = "connectorId")]
    connector_id: u32,
    #[serde(rename = "transactionId", skip_serializing_if = "Option::is_none")]
    transaction_id: Option<i32>,
    #[serde(rename = "meterValue")]
    meter_value: &'a Vec<MeterValue>,
}

impl Operation for MeterValuesOp {
    fn action(&self) -> &'static str {
        "MeterValues"
    }

    fn create_req(&self) -> Value {
        serde_json::to_value(MeterValuesReqWire {
            connector_id: self.connector_id,
            transaction_id: self.transaction_id,
            meter_value: &self.meter_value,
        })
        .expect("MeterValues request always serializes")
    }

    fn process_req(&mut self, _payload: &Value) -> Result<(), CallErrorCode> {
        Err(CallErrorCode::NotSupported)
    }

    fn create_conf(&self) -> Value {
        json!({})
    }

    fn process_conf(&mut self, _payload: &Value) -> Result<(), CallErrorCode> {
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[derive(Debug, Clone)]
pub struct StatusNotificationOp {
    pub connector_id: u32,
    pub error_code: ConnectorErrorCode,
    pub status: String,
    pub info: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub vendor_id: Option<String>,
    pub vendor_error_code: Option<String>,
}

#[derive(Serialize)]
struct StatusNotificationReqWire<'a> {
    #[serde(rename = "connectorId")]
    connector_id: u32,
    #[serde(rename = "errorCode")]
    error_code: &'static str,
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    info: &'a Option<String>,
    timestamp: DateTime<Utc>,
    #[serde(rename = "vendorId", skip_serializing_if = "Option::is_none")]
    vendor_id: &'a Option<String>,
    #[serde(rename = "vendorErrorCode", skip_serializing_if = "Option::is_none")]
    vendor_error_code: &'a Option<String>,
}

impl Operation for StatusNotificationOp {
    fn action(&self) -> &'static str {
        "StatusNotification"
    }

    fn create_req(&self) -> Value {
        serde_json::to_value(StatusNotificationReqWire {
            connector_id: self.connector_id,
            error_code: self.error_code.as_str(),
            status: &self.status,
            info: &self.info,
            timestamp: self.timestamp,
            vendor_id: &self.vendor_id,
            vendor_error_code: &self.vendor_error_code,
        })
        .expect("StatusNotification request always serializes")
    }

    fn process_req(&mut self, _payload: &Value) -> Result<(), CallErrorCode> {
        Err(CallErrorCode::NotSupported)
    }

    fn create_conf(&self) -> Value {
        json!({})
    }

    fn process_conf(&mut self, _payload: &Value) -> Result<(), CallErrorCode> {
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

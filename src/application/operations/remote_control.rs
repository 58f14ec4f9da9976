//! CSMS-initiated Calls that act on connectors/transactions directly:
//! RemoteStartTransaction, RemoteStopTransaction, UnlockConnector, Reset,
//! ChangeAvailability.

use super::{parse_payload, GenericStatus, Operation};
use crate::support::CallErrorCode;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Default)]
pub struct RemoteStartTransactionOp {
    pub connector_id: Option<u32>,
    pub id_tag: String,
    pub status: Option<GenericStatus>,
}

#[derive(Deserialize)]
struct RemoteStartReqWire {
    #[serde(rename = "connectorId")]
    connector_id: Option<u32>,
    #[serde(rename = "idTag")]
    id_tag: String,
}

impl Operation for RemoteStartTransactionOp {
    fn action(&self) -> &'static str {
        "RemoteStartTransaction"
    }

    fn create_req(&self) -> Value {
        json!({})
    }

    fn process_req(&mut self, payload: &Value) -> Result<(), CallErrorCode> {
        let wire: RemoteStartReqWire = parse_payload(payload)?;
        self.connector_id = wire.connector_id;
        self.id_tag = wire.id_tag;
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

#[derive(Debug, Clone, Default)]
pub struct RemoteStopTransactionOp {
    pub transaction_id: i32,
    pub status: Option<GenericStatus>,
}

#[derive(Deserialize)]
struct RemoteStopReqWire {
    #[serde(rename = "transactionId")]
    transaction_id: i32,
}

impl Operation for RemoteStopTransactionOp {
    fn action(&self) -> &'static str {
        "RemoteStopTransaction"
    }

    fn create_req(&self) -> Value {
        json!({})
    }

    fn process_req(&mut self, payload: &Value) -> Result<(), CallErrorCode> {
        let wire: RemoteStopReqWire = parse_payload(payload)?;
        self.transaction_id = wire.transaction_id;
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

/// Status reported back to the CSMS once the poll loop (`spec.md` §8 scenario 6)
/// settles, or while it is still in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockStatus {
    Unlocked,
    UnlockFailed,
    NotSupported,
}

impl UnlockStatus {
    fn as_str(&self) -> &'static str {
        match self {
            UnlockStatus::Unlocked => "Unlocked",
            UnlockStatus::UnlockFailed => "UnlockFailed",
            UnlockStatus::NotSupported => "NotSupported",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UnlockConnectorOp {
    pub connector_id: u32,
    pub status: Option<UnlockStatus>,
}

#[derive(Deserialize)]
struct UnlockConnectorReqWire {
    #[serde(rename = "connectorId")]
    connector_id: u32,
}

impl Operation for UnlockConnectorOp {
    fn action(&self) -> &'static str {
        "UnlockConnector"
    }

    fn create_req(&self) -> Value {
        json!({})
    }

    fn process_req(&mut self, payload: &Value) -> Result<(), CallErrorCode> {
        let wire: UnlockConnectorReqWire = parse_payload(payload)?;
        self.connector_id = wire.connector_id;
        Ok(())
    }

    fn create_conf(&self) -> Value {
        json!({ "status": self.status.unwrap_or(UnlockStatus::NotSupported).as_str() })
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
pub enum ResetType {
    Hard,
    Soft,
}

#[derive(Debug, Clone, Default)]
pub struct ResetOp {
    pub reset_type: Option<ResetType>,
    pub status: Option<GenericStatus>,
}

#[derive(Deserialize)]
struct ResetReqWire {
    #[serde(rename = "type")]
    reset_type: String,
}

impl Operation for ResetOp {
    fn action(&self) -> &'static str {
        "Reset"
    }

    fn create_req(&self) -> Value {
        json!({})
    }

    fn process_req(&mut self, payload: &Value) -> Result<(), CallErrorCode> {
        let wire: ResetReqWire = parse_payload(payload)?;
        self.reset_type = Some(match wire.reset_type.as_str() {
            "Hard" => ResetType::Hard,
            "Soft" => ResetType::Soft,
            _ => return Err(CallErrorCode::PropertyConstraintViolation),
        });
        Ok(())
    }

    fn create_conf(&self) -> Value {
        json!({ "status": self.status.as_ref().map(GenericStatus::as_str).unwrap_or("Accepted") })
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
pub enum AvailabilityType {
    Operative,
    Inoperative,
}

#[derive(Debug, Clone, Default)]
pub struct ChangeAvailabilityOp {
    pub connector_id: u32,
    pub availability_type: Option<AvailabilityType>,
    pub status: Option<GenericStatus>,
}

#[derive(Deserialize)]
struct ChangeAvailabilityReqWire {
    #[serde(rename = "connectorId")]
    connector_id: u32,
    #[serde(rename = "type")]
    availability_type: String,
}

impl Operation for ChangeAvailabilityOp {
    fn action(&self) -> &'static str {
        "ChangeAvailability"
    }

    fn create_req(&self) -> Value {
        json!({})
    }

    fn process_req(&mut self, payload: &Value) -> Result<(), CallErrorCode> {
        let wire: ChangeAvailabilityReqWire = parse_payload(payload)?;
        self.connector_id = wire.connector_id;
        self.availability_type = Some(match wire.availability_type.as_str() {
            "Operative" => AvailabilityType::Operative,
            "Inoperative" => AvailabilityType::Inoperative,
            _ => return Err(CallErrorCode::PropertyConstraintViolation),
        });
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

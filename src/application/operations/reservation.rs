//! ReserveNow/CancelReservation (`SPEC_FULL.md`'s Reservation supplement):
//! component M owns the actual admission/conflict rules; these types only
//! carry the wire shapes.

use super::{parse_payload, Operation};
use chrono::{DateTime, Utc};
use crate::support::CallErrorCode;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationStatus {
    Accepted,
    Faulted,
    Occupied,
    Rejected,
    Unavailable,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Accepted => "Accepted",
            ReservationStatus::Faulted => "Faulted",
            ReservationStatus::Occupied => "Occupied",
            ReservationStatus::Rejected => "Rejected",
            ReservationStatus::Unavailable => "Unavailable",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReserveNowOp {
    pub connector_id: u32,
    pub expiry_date: Option<DateTime<Utc>>,
    pub id_tag: String,
    pub parent_id_tag: Option<String>,
    pub reservation_id: i32,
    pub status: Option<ReservationStatus>,
}

#[derive(Deserialize)]
struct ReserveNowReqWire {
    #[serde(rename = "connectorId")]
    connector_id: u32,
    #[serde(rename = "expiryDate")]
    expiry_date: DateTime<Utc>,
    #[serde(rename = "idTag")]
    id_tag: String,
    #[serde(rename = "parentIdTag")]
    parent_id_tag: Option<String>,
    #[serde(rename = "reservationId")]
    reservation_id: i32,
}

impl Operation for ReserveNowOp {
    fn action(&self) -> &'static str {
        "ReserveNow"
    }

    fn create_req(&self) -> Value {
        json!({})
    }

    fn process_req(&mut self, payload: &Value) -> Result<(), CallErrorCode> {
        let wire: ReserveNowReqWire = parse_payload(payload)?;
        self.connector_id = wire.connector_id;
        self.expiry_date = Some(wire.expiry_date);
        self.id_tag = wire.id_tag;
        self.parent_id_tag = wire.parent_id_tag;
        self.reservation_id = wire.reservation_id;
        Ok(())
    }

    fn create_conf(&self) -> Value {
        json!({ "status": self.status.unwrap_or(ReservationStatus::Rejected).as_str() })
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
pub enum CancelReservationStatus {
    Accepted,
    Rejected,
}

impl CancelReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReservationStatus::Accepted => "Accepted",
            CancelReservationStatus::Rejected => "Rejected",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancelReservationOp {
    pub reservation_id: i32,
    pub status: Option<CancelReservationStatus>,
}

#[derive(Deserialize)]
struct CancelReservationReqWire {
    #[serde(rename = "reservationId")]
    reservation_id: i32,
}

impl Operation for CancelReservationOp {
    fn action(&self) -> &'static str {
        "CancelReservation"
    }

    fn create_req(&self) -> Value {
        json!({})
    }

    fn process_req(&mut self, payload: &Value) -> Result<(), CallErrorCode> {
        let wire: CancelReservationReqWire = parse_payload(payload)?;
        self.reservation_id = wire.reservation_id;
        Ok(())
    }

    fn create_conf(&self) -> Value {
        json!({ "status": self.status.unwrap_or(CancelReservationStatus::Rejected).as_str() })
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

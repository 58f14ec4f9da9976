//! CSMS-initiated smart-charging Calls: SetChargingProfile, ClearChargingProfile,
//! GetCompositeSchedule — component L's wire surface.

use super::{parse_payload, GenericStatus, Operation};
use crate::domain::{ChargingProfile, ChargingRateUnit, ChargingSchedule};
use crate::support::CallErrorCode;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Default)]
pub struct SetChargingProfileOp {
    pub connector_id: u32,
    pub profile: Option<ChargingProfile>,
    pub status: Option<GenericStatus>,
}

#[derive(Deserialize)]
struct SetChargingProfileReqWire {
    #[serde(rename = "connectorId")]
    connector_id: u32,
    #[serde(rename = "csChargingProfiles")]
    cs_charging_profiles: ChargingProfile,
}

impl Operation for SetChargingProfileOp {
    fn action(&self) -> &'static str {
        "SetChargingProfile"
    }

    fn create_req(&self) -> Value {
        json!({})
    }

    fn process_req(&mut self, payload: &Value) -> Result<(), CallErrorCode> {
        let wire: SetChargingProfileReqWire = parse_payload(payload)?;
        self.connector_id = wire.connector_id;
        let mut profile = wire.cs_charging_profiles;
        profile.connector_id = wire.connector_id;
        self.profile = Some(profile);
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
pub struct ClearChargingProfileOp {
    pub id: Option<i32>,
    pub connector_id: Option<u32>,
    pub charging_profile_purpose: Option<String>,
    pub stack_level: Option<u32>,
    pub status: Option<GenericStatus>,
}

#[derive(Deserialize, Default)]
struct ClearChargingProfileReqWire {
    id: Option<i32>,
    #[serde(rename = "connectorId")]
    connector_id: Option<u32>,
    #[serde(rename = "chargingProfilePurpose")]
    charging_profile_purpose: Option<String>,
    #[serde(rename = "stackLevel")]
    stack_level: Option<u32>,
}

impl Operation for ClearChargingProfileOp {
    fn action(&self) -> &'static str {
        "ClearChargingProfile"
    }

    fn create_req(&self) -> Value {
        json!({})
    }

    fn process_req(&mut self, payload: &Value) -> Result<(), CallErrorCode> {
        let wire: ClearChargingProfileReqWire = if payload.is_null() {
            ClearChargingProfileReqWire::default()
        } else {
            parse_payload(payload)?
        };
        self.id = wire.id;
        self.connector_id = wire.connector_id;
        self.charging_profile_purpose = wire.charging_profile_purpose;
        self.stack_level = wire.stack_level;
        Ok(())
    }

    fn create_conf(&self) -> Value {
        json!({ "status": self.status.as_ref().map(GenericStatus::as_str).unwrap_or("Unknown") })
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
pub struct GetCompositeScheduleOp {
    pub connector_id: u32,
    pub duration_s: u32,
    pub requested_unit: Option<ChargingRateUnit>,

    pub status: Option<GenericStatus>,
    pub schedule_start: Option<chrono::DateTime<chrono::Utc>>,
    pub composite_schedule: Option<ChargingSchedule>,
}

#[derive(Deserialize)]
struct GetCompositeScheduleReqWire {
    #[serde(rename = "connectorId")]
    connector_id: u32,
    duration: u32,
    #[serde(rename = "chargingRateUnit")]
    charging_rate_unit: Option<ChargingRateUnit>,
}

impl Operation for GetCompositeScheduleOp {
    fn action(&self) -> &'static str {
        "GetCompositeSchedule"
    }

    fn create_req(&self) -> Value {
        json!({})
    }

    fn process_req(&mut self, payload: &Value) -> Result<(), CallErrorCode> {
        let wire: GetCompositeScheduleReqWire = parse_payload(payload)?;
        self.connector_id = wire.connector_id;
        self.duration_s = wire.duration;
        self.requested_unit = wire.charging_rate_unit;
        Ok(())
    }

    fn create_conf(&self) -> Value {
        json!({
            "status": self.status.as_ref().map(GenericStatus::as_str).unwrap_or("Rejected"),
            "connectorId": self.connector_id,
            "scheduleStart": self.schedule_start,
            "chargingSchedule": self.composite_schedule,
        })
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clear_charging_profile_accepts_empty_payload() {
        let mut op = ClearChargingProfileOp::default();
        op.process_req(&Value::Null).unwrap();
        assert_eq!(op.id, None);
    }

    #[test]
    fn get_composite_schedule_parses_duration() {
        let mut op = GetCompositeScheduleOp::default();
        op.process_req(&json!({"connectorId": 1, "duration": 3600})).unwrap();
        assert_eq!(op.duration_s, 3600);
    }
}

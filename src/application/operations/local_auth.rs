//! Local Authorization List Calls (`SPEC_FULL.md`'s Security supplement):
//! SendLocalList, GetLocalListVersion.

use super::{parse_payload, Operation};
use crate::domain::IdTagInfo;
use crate::support::CallErrorCode;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateType {
    Full,
    Differential,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalAuthorizationListEntry {
    #[serde(rename = "idTag")]
    pub id_tag: String,
    #[serde(rename = "idTagInfo")]
    pub id_tag_info: Option<IdTagInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendLocalListStatus {
    Accepted,
    Failed,
    NotSupported,
    VersionMismatch,
}

impl SendLocalListStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendLocalListStatus::Accepted => "Accepted",
            SendLocalListStatus::Failed => "Failed",
            SendLocalListStatus::NotSupported => "NotSupported",
            SendLocalListStatus::VersionMismatch => "VersionMismatch",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SendLocalListOp {
    pub list_version: i32,
    pub update_type: Option<UpdateType>,
    pub local_authorization_list: Vec<LocalAuthorizationListEntry>,
    pub status: Option<SendLocalListStatus>,
}

#[derive(Deserialize)]
struct SendLocalListReqWire {
    #[serde(rename = "listVersion")]
    list_version: i32,
    #[serde(rename = "updateType")]
    update_type: String,
    #[serde(rename = "localAuthorizationList", default)]
    local_authorization_list: Vec<LocalAuthorizationListEntry>,
}

impl Operation for SendLocalListOp {
    fn action(&self) -> &'static str {
        "SendLocalList"
    }

    fn create_req(&self) -> Value {
        json!({})
    }

    fn process_req(&mut self, payload: &Value) -> Result<(), CallErrorCode> {
        let wire: SendLocalListReqWire = parse_payload(payload)?;
        self.list_version = wire.list_version;
        self.update_type = Some(match wire.update_type.as_str() {
            "Full" => UpdateType::Full,
            "Differential" => UpdateType::Differential,
            _ => return Err(CallErrorCode::PropertyConstraintViolation),
        });
        self.local_authorization_list = wire.local_authorization_list;
        Ok(())
    }

    fn create_conf(&self) -> Value {
        json!({ "status": self.status.unwrap_or(SendLocalListStatus::Failed).as_str() })
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
pub struct GetLocalListVersionOp {
    pub list_version: i32,
}

impl Operation for GetLocalListVersionOp {
    fn action(&self) -> &'static str {
        "GetLocalListVersion"
    }

    fn create_req(&self) -> Value {
        json!({})
    }

    fn process_req(&mut self, _payload: &Value) -> Result<(), CallErrorCode> {
        Ok(())
    }

    fn create_conf(&self) -> Value {
        json!({ "listVersion": self.list_version })
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
    fn send_local_list_rejects_unknown_update_type() {
        let mut op = SendLocalListOp::default();
        let err = op
            .process_req(&json!({"listVersion": 1, "updateType": "Partial"}))
            .unwrap_err();
        assert_eq!(err, CallErrorCode::PropertyConstraintViolation);
    }

    #[test]
    fn send_local_list_parses_entries() {
        let mut op = SendLocalListOp::default();
        op.process_req(&json!({
            "listVersion": 2,
            "updateType": "Full",
            "localAuthorizationList": [{"idTag": "AA", "idTagInfo": {"status": "Accepted"}}],
        }))
        .unwrap();
        assert_eq!(op.local_authorization_list.len(), 1);
        assert_eq!(op.local_authorization_list[0].id_tag, "AA");
    }
}

//! CSMS-initiated Calls over component B's `ConfigurationStore`:
//! GetConfiguration, ChangeConfiguration.

use super::{parse_payload, Operation};
use crate::domain::KeyValue;
use crate::support::CallErrorCode;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Default)]
pub struct GetConfigurationOp {
    pub keys: Option<Vec<String>>,
    pub configuration_key: Vec<KeyValue>,
    pub unknown_key: Vec<String>,
}

#[derive(Deserialize, Default)]
struct GetConfigurationReqWire {
    key: Option<Vec<String>>,
}

impl Operation for GetConfigurationOp {
    fn action(&self) -> &'static str {
        "GetConfiguration"
    }

    fn create_req(&self) -> Value {
        json!({})
    }

    fn process_req(&mut self, payload: &Value) -> Result<(), CallErrorCode> {
        let wire: GetConfigurationReqWire = if payload.is_null() {
            GetConfigurationReqWire::default()
        } else {
            parse_payload(payload)?
        };
        self.keys = wire.key;
        Ok(())
    }

    fn create_conf(&self) -> Value {
        json!({
            "configurationKey": self.configuration_key,
            "unknownKey": self.unknown_key,
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

/// `ChangeConfiguration.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeConfigurationStatus {
    Accepted,
    Rejected,
    RebootRequired,
    NotSupported,
}

impl ChangeConfigurationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeConfigurationStatus::Accepted => "Accepted",
            ChangeConfigurationStatus::Rejected => "Rejected",
            ChangeConfigurationStatus::RebootRequired => "RebootRequired",
            ChangeConfigurationStatus::NotSupported => "NotSupported",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChangeConfigurationOp {
    pub key: String,
    pub value: String,
    pub status: Option<ChangeConfigurationStatus>,
}

#[derive(Deserialize)]
struct ChangeConfigurationReqWire {
    key: String,
    value: String,
}

impl Operation for ChangeConfigurationOp {
    fn action(&self) -> &'static str {
        "ChangeConfiguration"
    }

    fn create_req(&self) -> Value {
        json!({})
    }

    fn process_req(&mut self, payload: &Value) -> Result<(), CallErrorCode> {
        let wire: ChangeConfigurationReqWire = parse_payload(payload)?;
        self.key = wire.key;
        self.value = wire.value;
        Ok(())
    }

    fn create_conf(&self) -> Value {
        json!({ "status": self.status.unwrap_or(ChangeConfigurationStatus::Rejected).as_str() })
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
    fn get_configuration_accepts_no_keys() {
        let mut op = GetConfigurationOp::default();
        op.process_req(&Value::Null).unwrap();
        assert!(op.keys.is_none());
    }

    #[test]
    fn change_configuration_parses_key_value() {
        let mut op = ChangeConfigurationOp::default();
        op.process_req(&json!({"key": "HeartbeatInterval", "value": "60"})).unwrap();
        assert_eq!(op.key, "HeartbeatInterval");
        assert_eq!(op.value, "60");
    }
}

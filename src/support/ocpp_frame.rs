//! OCPP-J message framing: `[2,msgId,action,payload]` / `[3,msgId,payload]` /
//! `[4,msgId,errorCode,errorDescription,errorDetails]` over a WebSocket text frame.
//!
//! Grounded directly on the wire-codec shape used throughout the OCPP corpus
//! (array-framed, not object-framed, JSON-RPC-alike messages).

use serde_json::Value;
use std::fmt;
use uuid::Uuid;

pub const MSG_TYPE_CALL: u8 = 2;
pub const MSG_TYPE_CALL_RESULT: u8 = 3;
pub const MSG_TYPE_CALL_ERROR: u8 = 4;

/// A decoded OCPP-J message, before its payload is interpreted as a specific
/// request or response type.
#[derive(Debug, Clone, PartialEq)]
pub enum OcppFrame {
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    CallResult {
        unique_id: String,
        payload: Value,
    },
    CallError {
        unique_id: String,
        error_code: String,
        error_description: String,
        error_details: Value,
    },
}

impl OcppFrame {
    /// Generate a fresh OCPP-J message id for an outbound Call.
    pub fn unique_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn call(unique_id: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        OcppFrame::Call {
            unique_id: unique_id.into(),
            action: action.into(),
            payload,
        }
    }

    pub fn call_result(unique_id: impl Into<String>, payload: Value) -> Self {
        OcppFrame::CallResult {
            unique_id: unique_id.into(),
            payload,
        }
    }

    pub fn error_response(
        unique_id: impl Into<String>,
        error_code: impl Into<String>,
        error_description: impl Into<String>,
    ) -> Self {
        OcppFrame::CallError {
            unique_id: unique_id.into(),
            error_code: error_code.into(),
            error_description: error_description.into(),
            error_details: Value::Object(Default::default()),
        }
    }

    pub fn unique_id_of(&self) -> &str {
        match self {
            OcppFrame::Call { unique_id, .. } => unique_id,
            OcppFrame::CallResult { unique_id, .. } => unique_id,
            OcppFrame::CallError { unique_id, .. } => unique_id,
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, OcppFrame::Call { .. })
    }

    pub fn is_call_result(&self) -> bool {
        matches!(self, OcppFrame::CallResult { .. })
    }

    pub fn is_call_error(&self) -> bool {
        matches!(self, OcppFrame::CallError { .. })
    }

    /// Parse a raw text frame into an [`OcppFrame`].
    pub fn parse(raw: &str) -> Result<Self, OcppFrameError> {
        let parsed: Value =
            serde_json::from_str(raw).map_err(|e| OcppFrameError::InvalidJson(e.to_string()))?;
        let array = parsed.as_array().ok_or(OcppFrameError::NotAnArray)?;
        let msg_type = array
            .first()
            .and_then(Value::as_u64)
            .ok_or(OcppFrameError::MissingMessageTypeId)?;

        match msg_type as u8 {
            MSG_TYPE_CALL => Self::parse_call(array),
            MSG_TYPE_CALL_RESULT => Self::parse_call_result(array),
            MSG_TYPE_CALL_ERROR => Self::parse_call_error(array),
            other => Err(OcppFrameError::UnknownMessageTypeId(other)),
        }
    }

    fn parse_call(array: &[Value]) -> Result<Self, OcppFrameError> {
        if array.len() != 4 {
            return Err(OcppFrameError::WrongArity {
                expected: 4,
                actual: array.len(),
            });
        }
        let unique_id = array[1]
            .as_str()
            .ok_or(OcppFrameError::MissingMessageId)?
            .to_string();
        let action = array[2]
            .as_str()
            .ok_or(OcppFrameError::MissingAction)?
            .to_string();
        Ok(OcppFrame::Call {
            unique_id,
            action,
            payload: array[3].clone(),
        })
    }

    fn parse_call_result(array: &[Value]) -> Result<Self, OcppFrameError> {
        if array.len() != 3 {
            return Err(OcppFrameError::WrongArity {
                expected: 3,
                actual: array.len(),
            });
        }
        let unique_id = array[1]
            .as_str()
            .ok_or(OcppFrameError::MissingMessageId)?
            .to_string();
        Ok(OcppFrame::CallResult {
            unique_id,
            payload: array[2].clone(),
        })
    }

    fn parse_call_error(array: &[Value]) -> Result<Self, OcppFrameError> {
        if array.len() != 5 {
            return Err(OcppFrameError::WrongArity {
                expected: 5,
                actual: array.len(),
            });
        }
        let unique_id = array[1]
            .as_str()
            .ok_or(OcppFrameError::MissingMessageId)?
            .to_string();
        let error_code = array[2]
            .as_str()
            .ok_or(OcppFrameError::MissingErrorCode)?
            .to_string();
        let error_description = array[3].as_str().unwrap_or_default().to_string();
        Ok(OcppFrame::CallError {
            unique_id,
            error_code,
            error_description,
            error_details: array[4].clone(),
        })
    }

    /// Encode this frame back into its wire form.
    pub fn serialize(&self) -> Result<String, OcppFrameError> {
        let value = match self {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => Value::Array(vec![
                Value::from(MSG_TYPE_CALL),
                Value::String(unique_id.clone()),
                Value::String(action.clone()),
                payload.clone(),
            ]),
            OcppFrame::CallResult { unique_id, payload } => Value::Array(vec![
                Value::from(MSG_TYPE_CALL_RESULT),
                Value::String(unique_id.clone()),
                payload.clone(),
            ]),
            OcppFrame::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => Value::Array(vec![
                Value::from(MSG_TYPE_CALL_ERROR),
                Value::String(unique_id.clone()),
                Value::String(error_code.clone()),
                Value::String(error_description.clone()),
                error_details.clone(),
            ]),
        };
        serde_json::to_string(&value).map_err(|e| OcppFrameError::InvalidJson(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcppFrameError {
    InvalidJson(String),
    NotAnArray,
    MissingMessageTypeId,
    UnknownMessageTypeId(u8),
    WrongArity { expected: usize, actual: usize },
    MissingMessageId,
    MissingAction,
    MissingErrorCode,
}

impl fmt::Display for OcppFrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OcppFrameError::InvalidJson(msg) => write!(f, "invalid JSON: {msg}"),
            OcppFrameError::NotAnArray => write!(f, "OCPP-J message must be a JSON array"),
            OcppFrameError::MissingMessageTypeId => write!(f, "missing message type id"),
            OcppFrameError::UnknownMessageTypeId(id) => write!(f, "unknown message type id: {id}"),
            OcppFrameError::WrongArity { expected, actual } => {
                write!(f, "expected {expected} elements, got {actual}")
            }
            OcppFrameError::MissingMessageId => write!(f, "missing or non-string message id"),
            OcppFrameError::MissingAction => write!(f, "missing or non-string action"),
            OcppFrameError::MissingErrorCode => write!(f, "missing or non-string error code"),
        }
    }
}

impl std::error::Error for OcppFrameError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn roundtrips_call() {
        let frame = OcppFrame::call("123", "Heartbeat", json!({}));
        let raw = frame.serialize().unwrap();
        assert_eq!(OcppFrame::parse(&raw).unwrap(), frame);
    }

    #[test]
    fn roundtrips_call_result() {
        let frame = OcppFrame::call_result("123", json!({"currentTime": "2023-01-01T00:00:00Z"}));
        let raw = frame.serialize().unwrap();
        assert_eq!(OcppFrame::parse(&raw).unwrap(), frame);
    }

    #[test]
    fn roundtrips_call_error() {
        let frame = OcppFrame::error_response("123", "NotImplemented", "unsupported action");
        let raw = frame.serialize().unwrap();
        assert_eq!(OcppFrame::parse(&raw).unwrap(), frame);
    }

    #[test]
    fn rejects_wrong_arity() {
        let err = OcppFrame::parse("[2,\"123\",\"Heartbeat\"]").unwrap_err();
        assert_eq!(
            err,
            OcppFrameError::WrongArity {
                expected: 4,
                actual: 3
            }
        );
    }

    #[test]
    fn rejects_unknown_message_type() {
        let err = OcppFrame::parse("[9,\"123\"]").unwrap_err();
        assert_eq!(err, OcppFrameError::UnknownMessageTypeId(9));
    }

    #[test]
    fn rejects_non_array() {
        let err = OcppFrame::parse("{}").unwrap_err();
        assert_eq!(err, OcppFrameError::NotAnArray);
    }

    #[test]
    fn message_ids_are_unique() {
        assert_ne!(OcppFrame::unique_id(), OcppFrame::unique_id());
    }
}

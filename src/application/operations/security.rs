//! Install/Delete/GetInstalledCertificateId (`SPEC_FULL.md`'s Security
//! supplement). Hash computation is delegated to `ports::CertificateHasher`
//! since MbedTLS-based hashing is out of scope per `spec.md` §1.

use super::{parse_payload, Operation};
use crate::support::CallErrorCode;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateStatus {
    Accepted,
    Rejected,
    Failed,
    NotFound,
}

impl CertificateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateStatus::Accepted => "Accepted",
            CertificateStatus::Rejected => "Rejected",
            CertificateStatus::Failed => "Failed",
            CertificateStatus::NotFound => "NotFound",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateType {
    CentralSystemRootCertificate,
    ManufacturerRootCertificate,
}

#[derive(Debug, Clone, Default)]
pub struct InstallCertificateOp {
    pub certificate_type: Option<String>,
    pub certificate_pem: String,
    pub status: Option<CertificateStatus>,
}

#[derive(Deserialize)]
struct InstallCertificateReqWire {
    #[serde(rename = "certificateType")]
    certificate_type: String,
    certificate: String,
}

impl Operation for InstallCertificateOp {
    fn action(&self) -> &'static str {
        "InstallCertificate"
    }

    fn create_req(&self) -> Value {
        json!({})
    }

    fn process_req(&mut self, payload: &Value) -> Result<(), CallErrorCode> {
        let wire: InstallCertificateReqWire = parse_payload(payload)?;
        self.certificate_type = Some(wire.certificate_type);
        self.certificate_pem = wire.certificate;
        Ok(())
    }

    fn create_conf(&self) -> Value {
        json!({ "status": self.status.unwrap_or(CertificateStatus::Rejected).as_str() })
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
pub struct DeleteCertificateOp {
    pub certificate_hash_data: String,
    pub status: Option<CertificateStatus>,
}

#[derive(Deserialize)]
struct DeleteCertificateReqWire {
    #[serde(rename = "certificateHashData")]
    certificate_hash_data: String,
}

impl Operation for DeleteCertificateOp {
    fn action(&self) -> &'static str {
        "DeleteCertificate"
    }

    fn create_req(&self) -> Value {
        json!({})
    }

    fn process_req(&mut self, payload: &Value) -> Result<(), CallErrorCode> {
        let wire: DeleteCertificateReqWire = parse_payload(payload)?;
        self.certificate_hash_data = wire.certificate_hash_data;
        Ok(())
    }

    fn create_conf(&self) -> Value {
        json!({ "status": self.status.unwrap_or(CertificateStatus::NotFound).as_str() })
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
pub struct GetInstalledCertificateIdsOp {
    pub certificate_hash_data: Vec<String>,
}

impl Operation for GetInstalledCertificateIdsOp {
    fn action(&self) -> &'static str {
        "GetInstalledCertificateIds"
    }

    fn create_req(&self) -> Value {
        json!({})
    }

    fn process_req(&mut self, _payload: &Value) -> Result<(), CallErrorCode> {
        Ok(())
    }

    fn create_conf(&self) -> Value {
        json!({ "certificateHashData": self.certificate_hash_data })
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
    fn install_certificate_parses_pem() {
        let mut op = InstallCertificateOp::default();
        op.process_req(&json!({"certificateType": "ManufacturerRootCertificate", "certificate": "-----BEGIN CERTIFICATE-----"}))
            .unwrap();
        assert_eq!(op.certificate_pem, "-----BEGIN CERTIFICATE-----");
    }
}

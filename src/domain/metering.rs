//! `MeterValue`/`SampledValue`: `SPEC_FULL.md` §3's metering payload shapes,
//! backing component K (Metering Service).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampledValue {
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl SampledValue {
    pub fn energy_active_import_register(value_wh: i64) -> Self {
        Self {
            value: value_wh.to_string(),
            context: Some("Sample.Periodic".to_string()),
            format: Some("Raw".to_string()),
            measurand: Some("Energy.Active.Import.Register".to_string()),
            phase: None,
            location: None,
            unit: Some("Wh".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterValue {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "sampledValue")]
    pub sampled_value: Vec<SampledValue>,
}

//! Configuration entry data model: `spec.md` §3's `Configuration entry`.
//!
//! The store that owns these (`application::config_store`) has no teacher
//! equivalent — it's built fresh per `SPEC_FULL.md` §4 — but the entry shape here
//! follows the same enum-with-`Display` style as `domain::error` rather than
//! reaching for `thiserror`, since it's a plain value type, not an error.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigType {
    Bool,
    Int,
    UInt,
    Float,
    String,
}

/// A typed configuration value. `Float` is stored as `f64` but compared/rounded
/// to match the declared type on load so P5 (round-trip bit-exactness) holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
}

impl ConfigValue {
    pub fn type_of(&self) -> ConfigType {
        match self {
            ConfigValue::Bool(_) => ConfigType::Bool,
            ConfigValue::Int(_) => ConfigType::Int,
            ConfigValue::UInt(_) => ConfigType::UInt,
            ConfigValue::Float(_) => ConfigType::Float,
            ConfigValue::String(_) => ConfigType::String,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            ConfigValue::UInt(v) => Some(*v),
            ConfigValue::Int(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "{b}"),
            ConfigValue::Int(v) => write!(f, "{v}"),
            ConfigValue::UInt(v) => write!(f, "{v}"),
            ConfigValue::Float(v) => write!(f, "{v}"),
            ConfigValue::String(s) => write!(f, "{s}"),
        }
    }
}

/// A single declared configuration entry, stored in its container file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: ConfigValue,
    pub readonly: bool,
    pub reboot_required: bool,
    /// Bumped on every write; observers compare against their last-seen value.
    pub revision: u64,
}

impl ConfigEntry {
    pub fn new(key: impl Into<String>, value: ConfigValue, readonly: bool, reboot_required: bool) -> Self {
        Self {
            key: key.into(),
            value,
            readonly,
            reboot_required,
            revision: 0,
        }
    }
}

/// `GetConfiguration`/`ChangeConfiguration` wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub readonly: bool,
    pub value: String,
}

impl From<&ConfigEntry> for KeyValue {
    fn from(entry: &ConfigEntry) -> Self {
        KeyValue {
            key: entry.key.clone(),
            readonly: entry.readonly,
            value: entry.value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_declared_type() {
        assert_eq!(ConfigValue::Bool(true).to_string(), "true");
        assert_eq!(ConfigValue::UInt(30).to_string(), "30");
    }

    #[test]
    fn key_value_projection_stringifies_value() {
        let entry = ConfigEntry::new("HeartbeatInterval", ConfigValue::UInt(86400), false, false);
        let kv = KeyValue::from(&entry);
        assert_eq!(kv.value, "86400");
        assert!(!kv.readonly);
    }
}

//! Component B: typed key/value configuration with per-container persistence.
//!
//! Grounded on `spec.md` §4.B's `declareConfiguration<T>(key, default, filename)`.
//! Container files are JSON objects of `key -> {type, value, readonly, ...}`,
//! one file per `filename` passed to `declare`. `save()` rewrites every
//! container that has at least one entry; `clean_unused()` drops entries that
//! were not re-declared during the current boot, matching the teacher's
//! "stale key" sweep that runs once the configuration has stabilized.

use crate::domain::{ConfigEntry, ConfigType, ConfigValue, KeyValue};
use crate::ports::FileStore;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoredEntry {
    value: ConfigValue,
    readonly: bool,
    reboot_required: bool,
}

impl From<&ConfigEntry> for StoredEntry {
    fn from(entry: &ConfigEntry) -> Self {
        StoredEntry {
            value: entry.value.clone(),
            readonly: entry.readonly,
            reboot_required: entry.reboot_required,
        }
    }
}

#[derive(Debug, Default)]
pub struct ConfigurationStore {
    entries: HashMap<String, ConfigEntry>,
    containers: HashMap<String, String>,
    declared_this_boot: HashSet<String>,
}

impl ConfigurationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `*.cnf` container named in `filenames`, merging entries into
    /// the store. Missing files are treated as empty containers: the first boot
    /// creates them on the first `save()`.
    pub fn load_containers<F: FileStore>(&mut self, fs: &F, filenames: &[&str]) {
        for &filename in filenames {
            let Ok(bytes) = fs.read_to_vec(filename) else {
                continue;
            };
            let Ok(stored): Result<HashMap<String, StoredEntry>, _> = serde_json::from_slice(&bytes)
            else {
                continue;
            };
            for (key, stored_entry) in stored {
                self.entries.insert(
                    key.clone(),
                    ConfigEntry {
                        key: key.clone(),
                        value: stored_entry.value,
                        readonly: stored_entry.readonly,
                        reboot_required: stored_entry.reboot_required,
                        revision: 0,
                    },
                );
                self.containers.insert(key, filename.to_string());
            }
        }
    }

    /// Returns the existing entry for `key` if present (regardless of type),
    /// otherwise creates one from `default` in `filename`. Either way `key` is
    /// marked declared-this-boot so a later `clean_unused` keeps it.
    pub fn declare(&mut self, key: &str, default: ConfigValue, filename: &str) -> &ConfigEntry {
        self.declared_this_boot.insert(key.to_string());
        self.containers
            .entry(key.to_string())
            .or_insert_with(|| filename.to_string());
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| ConfigEntry::new(key, default, false, false))
    }

    pub fn get(&self, key: &str) -> Option<&ConfigEntry> {
        self.entries.get(key)
    }

    pub fn revision(&self, key: &str) -> Option<u64> {
        self.entries.get(key).map(|e| e.revision)
    }

    /// `ChangeConfiguration`: fails if the key is unknown or readonly.
    pub fn set(&mut self, key: &str, value: ConfigValue) -> Result<bool, ConfigStoreError> {
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| ConfigStoreError::UnknownKey(key.to_string()))?;
        if entry.readonly {
            return Err(ConfigStoreError::Readonly(key.to_string()));
        }
        entry.value = value;
        entry.revision += 1;
        Ok(entry.reboot_required)
    }

    /// `ChangeConfiguration` as received over the wire: the new value arrives as
    /// a bare string and must be parsed against the key's already-declared type
    /// before `set` can apply it.
    pub fn set_from_string(&mut self, key: &str, raw: &str) -> Result<bool, ConfigStoreError> {
        let current_type = self
            .entries
            .get(key)
            .ok_or_else(|| ConfigStoreError::UnknownKey(key.to_string()))?
            .value
            .type_of();
        let parse_err = || ConfigStoreError::TypeMismatch(key.to_string());
        let value = match current_type {
            ConfigType::Bool => ConfigValue::Bool(raw.parse().map_err(|_| parse_err())?),
            ConfigType::Int => ConfigValue::Int(raw.parse().map_err(|_| parse_err())?),
            ConfigType::UInt => ConfigValue::UInt(raw.parse().map_err(|_| parse_err())?),
            ConfigType::Float => ConfigValue::Float(raw.parse().map_err(|_| parse_err())?),
            ConfigType::String => ConfigValue::String(raw.to_string()),
        };
        self.set(key, value)
    }

    /// `GetConfiguration`: `None` for `keys` returns every entry; otherwise only
    /// the requested keys, with unresolved ones reported separately.
    pub fn key_values(&self, keys: Option<&[String]>) -> (Vec<KeyValue>, Vec<String>) {
        match keys {
            None => {
                let mut values: Vec<KeyValue> = self.entries.values().map(KeyValue::from).collect();
                values.sort_by(|a, b| a.key.cmp(&b.key));
                (values, Vec::new())
            }
            Some(requested) => {
                let mut found = Vec::new();
                let mut unknown = Vec::new();
                for key in requested {
                    match self.entries.get(key) {
                        Some(entry) => found.push(KeyValue::from(entry)),
                        None => unknown.push(key.clone()),
                    }
                }
                (found, unknown)
            }
        }
    }

    /// Rewrites every container file that currently owns at least one entry.
    pub fn save<F: FileStore>(&self, fs: &mut F) -> std::io::Result<()> {
        let mut by_container: HashMap<&str, HashMap<&str, StoredEntry>> = HashMap::new();
        for (key, filename) in &self.containers {
            if let Some(entry) = self.entries.get(key) {
                by_container
                    .entry(filename.as_str())
                    .or_default()
                    .insert(key.as_str(), StoredEntry::from(entry));
            }
        }
        for (filename, contents) in by_container {
            let encoded = serde_json::to_vec(&contents)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            fs.write_all(filename, &encoded)?;
        }
        Ok(())
    }

    /// Drops entries not re-declared this boot, then persists the result.
    /// Called once after the boot sequence stabilizes (`spec.md` §4.B).
    pub fn clean_unused<F: FileStore>(&mut self, fs: &mut F) -> std::io::Result<()> {
        let stale: Vec<String> = self
            .entries
            .keys()
            .filter(|k| !self.declared_this_boot.contains(*k))
            .cloned()
            .collect();
        for key in &stale {
            self.entries.remove(key);
            self.containers.remove(key);
        }
        self.save(fs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigStoreError {
    UnknownKey(String),
    Readonly(String),
    TypeMismatch(String),
}

impl std::fmt::Display for ConfigStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigStoreError::UnknownKey(k) => write!(f, "unknown configuration key: {k}"),
            ConfigStoreError::Readonly(k) => write!(f, "configuration key is readonly: {k}"),
            ConfigStoreError::TypeMismatch(k) => write!(f, "value does not match declared type for key: {k}"),
        }
    }
}

impl std::error::Error for ConfigStoreError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::InMemoryFileStore;

    #[test]
    fn declare_creates_default_then_returns_existing() {
        let mut store = ConfigurationStore::new();
        store.declare("HeartbeatInterval", ConfigValue::UInt(86400), "arduino-ocpp.cnf");
        assert_eq!(store.get("HeartbeatInterval").unwrap().value.as_uint(), Some(86400));

        store.declare("HeartbeatInterval", ConfigValue::UInt(60), "arduino-ocpp.cnf");
        assert_eq!(store.get("HeartbeatInterval").unwrap().value.as_uint(), Some(86400));
    }

    #[test]
    fn set_bumps_revision_and_rejects_readonly() {
        let mut store = ConfigurationStore::new();
        store.declare("NumberOfConnectors", ConfigValue::UInt(1), "arduino-ocpp.cnf");
        store.entries.get_mut("NumberOfConnectors").unwrap().readonly = true;
        let err = store.set("NumberOfConnectors", ConfigValue::UInt(2)).unwrap_err();
        assert_eq!(err, ConfigStoreError::Readonly("NumberOfConnectors".into()));
    }

    #[test]
    fn save_then_load_round_trips() {
        let mut fs = InMemoryFileStore::new();
        let mut store = ConfigurationStore::new();
        store.declare("HeartbeatInterval", ConfigValue::UInt(86400), "arduino-ocpp.cnf");
        store.set("HeartbeatInterval", ConfigValue::UInt(120)).unwrap();
        store.save(&mut fs).unwrap();

        let mut reloaded = ConfigurationStore::new();
        reloaded.load_containers(&fs, &["arduino-ocpp.cnf"]);
        assert_eq!(
            reloaded.get("HeartbeatInterval").unwrap().value.as_uint(),
            Some(120)
        );
    }

    #[test]
    fn clean_unused_drops_keys_not_declared_this_boot() {
        let mut fs = InMemoryFileStore::new();
        let mut store = ConfigurationStore::new();
        store.declare("A", ConfigValue::UInt(1), "arduino-ocpp.cnf");
        store.declare("B", ConfigValue::UInt(2), "arduino-ocpp.cnf");
        store.save(&mut fs).unwrap();

        let mut reloaded = ConfigurationStore::new();
        reloaded.load_containers(&fs, &["arduino-ocpp.cnf"]);
        reloaded.declare("A", ConfigValue::UInt(1), "arduino-ocpp.cnf");
        reloaded.clean_unused(&mut fs).unwrap();

        assert!(reloaded.get("A").is_some());
        assert!(reloaded.get("B").is_none());
    }

    #[test]
    fn key_values_reports_unknown_keys_separately() {
        let mut store = ConfigurationStore::new();
        store.declare("A", ConfigValue::UInt(1), "arduino-ocpp.cnf");
        let (found, unknown) = store.key_values(Some(&["A".to_string(), "Z".to_string()]));
        assert_eq!(found.len(), 1);
        assert_eq!(unknown, vec!["Z".to_string()]);
    }

    #[test]
    fn set_from_string_parses_against_the_declared_type() {
        let mut store = ConfigurationStore::new();
        store.declare("HeartbeatInterval", ConfigValue::UInt(86400), "arduino-ocpp.cnf");
        store.set_from_string("HeartbeatInterval", "60").unwrap();
        assert_eq!(store.get("HeartbeatInterval").unwrap().value.as_uint(), Some(60));

        let err = store.set_from_string("HeartbeatInterval", "not-a-number").unwrap_err();
        assert_eq!(err, ConfigStoreError::TypeMismatch("HeartbeatInterval".into()));
    }
}

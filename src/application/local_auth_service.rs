//! Local Authorization List / offline authorization (`SPEC_FULL.md`'s Security
//! supplement).
//!
//! Grounded on `application::config_store::ConfigurationStore`'s
//! load/merge/persist shape, generalized from "typed config entries in named
//! containers" to "one cached idTag -> `IdTagInfo` table in a single container,
//! gated by a monotonic `listVersion`" per `spec.md`'s `SendLocalList`/
//! `GetLocalListVersion` pair. `LocalAuthorizeOffline`/`LocalPreAuthorize`
//! (configuration variables named in `spec.md` §6) are resolved per
//! `SPEC_FULL.md` §9: the cache is consulted either as a fallback when the
//! remote `Authorize` Call cannot be sent (offline) or, if `LocalPreAuthorize`
//! is enabled, in place of sending it at all.

use crate::application::operations::local_auth::{LocalAuthorizationListEntry, SendLocalListStatus, UpdateType};
use crate::domain::IdTagInfo;
use crate::ports::FileStore;
use std::collections::HashMap;

const CACHE_FILENAME: &str = "lal.jsn";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
struct PersistedList {
    list_version: i32,
    entries: HashMap<String, IdTagInfo>,
}

/// Cached Local Authorization List plus the offline-consultation policy.
pub struct LocalAuthService {
    list_version: i32,
    entries: HashMap<String, IdTagInfo>,
    pub local_authorize_offline: bool,
    pub local_pre_authorize: bool,
}

impl LocalAuthService {
    pub fn new(local_authorize_offline: bool, local_pre_authorize: bool) -> Self {
        Self {
            list_version: 0,
            entries: HashMap::new(),
            local_authorize_offline,
            local_pre_authorize,
        }
    }

    pub fn load<F: FileStore>(&mut self, fs: &F) {
        if let Ok(stored) = fs.read_json::<PersistedList>(CACHE_FILENAME) {
            self.list_version = stored.list_version;
            self.entries = stored.entries;
        }
    }

    pub fn list_version(&self) -> i32 {
        self.list_version
    }

    /// `SendLocalList`. `Full` replaces the cache wholesale; `Differential`
    /// upserts entries with an `idTagInfo` and deletes ones without. Either
    /// kind is rejected `VersionMismatch` unless `list_version` strictly
    /// increases the cached version, per the OCPP monotonic-version rule.
    pub fn apply_send_local_list<F: FileStore>(
        &mut self,
        fs: &mut F,
        list_version: i32,
        update_type: UpdateType,
        entries: Vec<LocalAuthorizationListEntry>,
    ) -> SendLocalListStatus {
        if list_version <= self.list_version {
            return SendLocalListStatus::VersionMismatch;
        }
        match update_type {
            UpdateType::Full => {
                self.entries = entries
                    .into_iter()
                    .filter_map(|e| e.id_tag_info.map(|info| (e.id_tag, info)))
                    .collect();
            }
            UpdateType::Differential => {
                for entry in entries {
                    match entry.id_tag_info {
                        Some(info) => {
                            self.entries.insert(entry.id_tag, info);
                        }
                        None => {
                            self.entries.remove(&entry.id_tag);
                        }
                    }
                }
            }
        }
        self.list_version = list_version;
        let persisted = PersistedList {
            list_version: self.list_version,
            entries: self.entries.clone(),
        };
        match fs.write_json(CACHE_FILENAME, &persisted) {
            Ok(()) => SendLocalListStatus::Accepted,
            Err(_) => SendLocalListStatus::Failed,
        }
    }

    pub fn lookup(&self, id_tag: &str) -> Option<&IdTagInfo> {
        self.entries.get(id_tag)
    }

    /// `LocalAuthorizeOffline`: consult the cache only as a fallback when the
    /// remote `Authorize` Call could not be sent.
    pub fn authorize_offline(&self, id_tag: &str) -> Option<&IdTagInfo> {
        if !self.local_authorize_offline {
            return None;
        }
        self.lookup(id_tag)
    }

    /// `LocalPreAuthorize`: when enabled, a cache hit authorizes a transaction
    /// without ever sending `Authorize`, per `SPEC_FULL.md` §9's simplification
    /// — the cache acts as a full authorization source, not merely a stopgap.
    pub fn pre_authorize(&self, id_tag: &str) -> bool {
        self.local_pre_authorize && self.lookup(id_tag).map_or(false, |info| info.status == "Accepted")
    }
}

impl Default for LocalAuthService {
    fn default() -> Self {
        Self::new(false, false)
    }
}

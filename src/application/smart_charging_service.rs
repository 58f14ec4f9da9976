//! Component L: the Smart Charging Service.
//!
//! Grounded on `domain::charging_profile` for the schedule evaluation primitives
//! (`ChargingSchedule::period_at`, `ChargeRate::meet`) and on the teacher's
//! `application/services/heartbeat_monitor.rs` for the "recompute every tick,
//! publish only on change" shape; the stacked-profile composition itself
//! (`spec.md` §4.L) has no teacher equivalent and is built fresh against the
//! typed schedule model.

use crate::domain::{ChargeRate, ChargingProfile, ChargingProfileKind, ChargingProfilePurpose, DomainError, DomainResult, RecurrencyKind};
use crate::ports::{FileStore, HardwareIo};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::{info, warn};

pub struct SmartChargingServiceConfig {
    pub max_profiles_installed: usize,
    pub charge_profile_max_stack_level: u32,
    /// Used to convert an Amp-only schedule to a Watt publication for hardware
    /// that only exposes a power callback (`spec.md` §4.L unit normalization).
    pub nominal_voltage: f64,
    pub default_phases: u8,
}

impl Default for SmartChargingServiceConfig {
    fn default() -> Self {
        Self {
            max_profiles_installed: 10,
            charge_profile_max_stack_level: 10,
            nominal_voltage: 230.0,
            default_phases: 3,
        }
    }
}

fn profile_filename(connector_id: u32, stack_level: u32) -> String {
    format!("sc-{connector_id}-{stack_level}.jsn")
}

/// Owns the installed `ChargingProfile` set and evaluates the composed limit.
/// Profiles are keyed `(connectorId, stackLevel)`, matching the persisted
/// layout in `spec.md` §6 — installing at an already-occupied stack level
/// replaces whatever was there, same as the CSMS overwriting via SetChargingProfile.
pub struct SmartChargingService {
    cfg: SmartChargingServiceConfig,
    profiles: HashMap<(u32, u32), ChargingProfile>,
    last_published: HashMap<u32, ChargeRate>,
}

impl SmartChargingService {
    pub fn new(cfg: SmartChargingServiceConfig) -> Self {
        Self {
            cfg,
            profiles: HashMap::new(),
            last_published: HashMap::new(),
        }
    }

    /// Reload every `sc-<c>-<level>.jsn` record at boot. A malformed file is
    /// dropped rather than aborting the load (`spec.md` §4.L Recovery).
    pub fn load<F: FileStore>(&mut self, fs: &F) {
        for path in fs.list_with_prefix("sc-") {
            match fs.read_json::<ChargingProfile>(&path) {
                Ok(mut profile) => {
                    if let Some((connector_id, stack_level)) = parse_profile_filename(&path) {
                        profile.connector_id = connector_id;
                        self.profiles.insert((connector_id, stack_level), profile);
                    } else {
                        warn!(path, "charging profile filename did not match the sc-<c>-<level> layout");
                    }
                }
                Err(_) => warn!(path, "discarding unparseable charging profile"),
            }
        }
    }

    pub fn installed_count(&self) -> usize {
        self.profiles.len()
    }

    pub fn install<F: FileStore>(&mut self, fs: &mut F, profile: ChargingProfile) -> DomainResult<()> {
        if profile.stack_level > self.cfg.charge_profile_max_stack_level {
            return Err(DomainError::Other(format!(
                "stack level {} exceeds ChargeProfileMaxStackLevel",
                profile.stack_level
            )));
        }
        let key = (profile.connector_id, profile.stack_level);
        if !self.profiles.contains_key(&key) && self.profiles.len() >= self.cfg.max_profiles_installed {
            return Err(DomainError::ProfileLimitExceeded {
                installed: self.profiles.len(),
                max: self.cfg.max_profiles_installed,
            });
        }
        fs.write_json(&profile_filename(profile.connector_id, profile.stack_level), &profile)
            .map_err(|e| DomainError::Other(format!("failed to persist charging profile: {e}")))?;
        info!(
            connector_id = profile.connector_id,
            stack_level = profile.stack_level,
            profile_id = profile.charging_profile_id,
            "installed charging profile"
        );
        self.profiles.insert(key, profile);
        Ok(())
    }

    /// `ClearChargingProfile` semantics: every `None` filter matches everything,
    /// so passing no filters at all clears the whole store. Returns the count
    /// cleared.
    pub fn clear<F: FileStore>(
        &mut self,
        fs: &mut F,
        id: Option<i32>,
        connector_id: Option<u32>,
        purpose: Option<ChargingProfilePurpose>,
        stack_level: Option<u32>,
    ) -> usize {
        let mut cleared = 0usize;
        self.profiles.retain(|_, p| {
            let matches = id.map_or(true, |i| p.charging_profile_id == i)
                && connector_id.map_or(true, |c| p.connector_id == c)
                && purpose.map_or(true, |pp| p.purpose == pp)
                && stack_level.map_or(true, |s| p.stack_level == s);
            if matches {
                let _ = fs.remove(&profile_filename(p.connector_id, p.stack_level));
                cleared += 1;
            }
            !matches
        });
        cleared
    }

    /// The time-axis origin a schedule's `startPeriod` offsets are measured
    /// from. `Recurring` origins are computed in O(1) via `rem_euclid` rather
    /// than walking day/week boundaries one at a time.
    fn origin_for(profile: &ChargingProfile, t: DateTime<Utc>, start_of_charging: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match profile.kind {
            ChargingProfileKind::Absolute => profile.schedule.start_schedule,
            ChargingProfileKind::Recurring => {
                let anchor = profile.schedule.start_schedule?;
                let period_s: i64 = match profile.recurrency? {
                    RecurrencyKind::Daily => 86_400,
                    RecurrencyKind::Weekly => 604_800,
                };
                let elapsed = (t - anchor).num_seconds();
                let offset_into_period = elapsed.rem_euclid(period_s);
                Some(t - Duration::seconds(offset_into_period))
            }
            ChargingProfileKind::Relative => start_of_charging,
        }
    }

    /// The highest-stack-level profile of `purpose` that both applies to
    /// `connector_id` at `t` and defines a limit there, plus the absolute time
    /// its output next changes.
    fn winner_for(
        &self,
        connector_id: u32,
        purpose: ChargingProfilePurpose,
        t: DateTime<Utc>,
        transaction_id: Option<i32>,
        start_of_charging: Option<DateTime<Utc>>,
    ) -> Option<(ChargeRate, Option<DateTime<Utc>>)> {
        let mut candidates: Vec<&ChargingProfile> = self
            .profiles
            .values()
            .filter(|p| p.purpose == purpose)
            .filter(|p| p.applies_to_connector(connector_id))
            .filter(|p| p.is_valid_at(t))
            .filter(|p| purpose != ChargingProfilePurpose::TxProfile || p.transaction_id.is_none() || p.transaction_id == transaction_id)
            .collect();
        candidates.sort_unstable_by(|a, b| b.stack_level.cmp(&a.stack_level));

        for profile in candidates {
            let Some(origin) = Self::origin_for(profile, t, start_of_charging) else {
                continue;
            };
            let offset_s = (t - origin).num_seconds();
            let Some((period, next_offset)) = profile.schedule.period_at(offset_s) else {
                continue;
            };
            let rate = ChargeRate::from_period(profile.schedule.charging_rate_unit, period);
            let next_boundary = next_offset.map(|off| origin + Duration::seconds(off as i64));
            let next = [next_boundary, profile.valid_to].into_iter().flatten().min();
            return Some((rate, next));
        }
        None
    }

    /// Compose `ChargePointMaxProfile` against the TxProfile-else-TxDefaultProfile
    /// winner, per `spec.md` §4.L step 2-3.
    pub fn compute_limit(
        &self,
        connector_id: u32,
        t: DateTime<Utc>,
        transaction_id: Option<i32>,
        start_of_charging: Option<DateTime<Utc>>,
    ) -> (ChargeRate, Option<DateTime<Utc>>) {
        let cap = self.winner_for(connector_id, ChargingProfilePurpose::ChargePointMaxProfile, t, transaction_id, start_of_charging);
        let per_tx = self
            .winner_for(connector_id, ChargingProfilePurpose::TxProfile, t, transaction_id, start_of_charging)
            .or_else(|| self.winner_for(connector_id, ChargingProfilePurpose::TxDefaultProfile, t, transaction_id, start_of_charging));

        let (cap_rate, cap_next) = cap.unwrap_or((ChargeRate::unbounded(), None));
        let (tx_rate, tx_next) = per_tx.unwrap_or((ChargeRate::unbounded(), None));
        let rate = cap_rate.meet(tx_rate);
        let next = [cap_next, tx_next].into_iter().flatten().min();
        (rate, next)
    }

    /// Recompute `connector_id`'s limit and publish to hardware only when it
    /// changed since the last publication.
    pub fn tick<H: HardwareIo>(
        &mut self,
        hardware: &mut H,
        connector_id: u32,
        now: DateTime<Utc>,
        transaction_id: Option<i32>,
        start_of_charging: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        let (rate, next_change) = self.compute_limit(connector_id, now, transaction_id, start_of_charging);
        if self.last_published.get(&connector_id) != Some(&rate) {
            let power_w = rate.power_w.or_else(|| rate.to_watts(self.cfg.nominal_voltage, self.cfg.default_phases));
            hardware.publish_limit(connector_id, power_w, rate.current_a, rate.number_phases);
            info!(connector_id, ?rate, "published composed charging limit");
            self.last_published.insert(connector_id, rate);
        }
        next_change
    }
}

fn parse_profile_filename(path: &str) -> Option<(u32, u32)> {
    let name = path.strip_suffix(".jsn")?.strip_prefix("sc-")?;
    let mut parts = name.split('-');
    let connector_id: u32 = parts.next()?.parse().ok()?;
    let stack_level: u32 = parts.next()?.parse().ok()?;
    Some((connector_id, stack_level))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChargingRateUnit, ChargingSchedule, ChargingSchedulePeriod};
    use crate::ports::{InMemoryFileStore, NoopHardwareIo};
    use chrono::TimeZone;

    fn flat_profile(
        id: i32,
        connector_id: u32,
        stack_level: u32,
        purpose: ChargingProfilePurpose,
        limit_w: f64,
    ) -> ChargingProfile {
        ChargingProfile {
            charging_profile_id: id,
            transaction_id: None,
            connector_id,
            stack_level,
            purpose,
            kind: ChargingProfileKind::Absolute,
            recurrency: None,
            valid_from: None,
            valid_to: None,
            schedule: ChargingSchedule {
                duration: None,
                start_schedule: Some(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()),
                charging_rate_unit: ChargingRateUnit::Watt,
                min_charging_rate: None,
                periods: vec![ChargingSchedulePeriod {
                    start_period: 0,
                    limit: limit_w,
                    number_phases: None,
                }],
            },
        }
    }

    #[test]
    fn higher_stack_level_wins_within_a_purpose() {
        let mut svc = SmartChargingService::new(SmartChargingServiceConfig::default());
        let mut fs = InMemoryFileStore::new();
        svc.install(&mut fs, flat_profile(1, 1, 0, ChargingProfilePurpose::TxDefaultProfile, 16_000.0)).unwrap();
        svc.install(&mut fs, flat_profile(2, 1, 1, ChargingProfilePurpose::TxDefaultProfile, 8_000.0)).unwrap();
        let now = Utc.with_ymd_and_hms(2023, 1, 1, 1, 0, 0).unwrap();
        let (rate, _) = svc.compute_limit(1, now, None, None);
        assert_eq!(rate.power_w, Some(8_000.0));
    }

    #[test]
    fn charge_point_max_profile_caps_the_tx_profile() {
        let mut svc = SmartChargingService::new(SmartChargingServiceConfig::default());
        let mut fs = InMemoryFileStore::new();
        svc.install(&mut fs, flat_profile(1, 1, 0, ChargingProfilePurpose::ChargePointMaxProfile, 6_000.0)).unwrap();
        svc.install(&mut fs, flat_profile(2, 1, 0, ChargingProfilePurpose::TxDefaultProfile, 16_000.0)).unwrap();
        let now = Utc.with_ymd_and_hms(2023, 1, 1, 1, 0, 0).unwrap();
        let (rate, _) = svc.compute_limit(1, now, None, None);
        assert_eq!(rate.power_w, Some(6_000.0));
    }

    #[test]
    fn installing_a_lower_or_equal_profile_never_raises_the_limit() {
        let mut svc = SmartChargingService::new(SmartChargingServiceConfig::default());
        let mut fs = InMemoryFileStore::new();
        svc.install(&mut fs, flat_profile(1, 1, 0, ChargingProfilePurpose::TxDefaultProfile, 16_000.0)).unwrap();
        let now = Utc.with_ymd_and_hms(2023, 1, 1, 1, 0, 0).unwrap();
        let (before, _) = svc.compute_limit(1, now, None, None);
        svc.install(&mut fs, flat_profile(2, 1, 0, ChargingProfilePurpose::TxDefaultProfile, 4_000.0)).unwrap();
        let (after, _) = svc.compute_limit(1, now, None, None);
        assert!(after.power_w.unwrap() <= before.power_w.unwrap());
    }

    #[test]
    fn recurring_daily_schedule_wraps_via_rem_euclid() {
        let mut svc = SmartChargingService::new(SmartChargingServiceConfig::default());
        let mut fs = InMemoryFileStore::new();
        let mut profile = flat_profile(1, 1, 0, ChargingProfilePurpose::TxDefaultProfile, 11_000.0);
        profile.kind = ChargingProfileKind::Recurring;
        profile.recurrency = Some(RecurrencyKind::Daily);
        profile.schedule.start_schedule = Some(Utc.with_ymd_and_hms(2023, 1, 1, 22, 0, 0).unwrap());
        profile.schedule.periods = vec![
            ChargingSchedulePeriod { start_period: 0, limit: 11_000.0, number_phases: None },
            ChargingSchedulePeriod { start_period: 6 * 3600, limit: 22_000.0, number_phases: None },
        ];
        svc.install(&mut fs, profile).unwrap();

        // Three days later, 1 AM local to the recurring window: still in the
        // first (0h) period of that day's occurrence.
        let t = Utc.with_ymd_and_hms(2023, 1, 4, 23, 0, 0).unwrap();
        let (rate, _) = svc.compute_limit(1, t, None, None);
        assert_eq!(rate.power_w, Some(11_000.0));
    }

    #[test]
    fn relative_schedule_without_start_of_charging_is_undefined() {
        let mut svc = SmartChargingService::new(SmartChargingServiceConfig::default());
        let mut fs = InMemoryFileStore::new();
        let mut profile = flat_profile(1, 1, 0, ChargingProfilePurpose::TxProfile, 11_000.0);
        profile.kind = ChargingProfileKind::Relative;
        profile.schedule.start_schedule = None;
        svc.install(&mut fs, profile).unwrap();
        let now = Utc.with_ymd_and_hms(2023, 1, 1, 1, 0, 0).unwrap();
        let (rate, _) = svc.compute_limit(1, now, None, None);
        assert_eq!(rate.power_w, None);
    }

    #[test]
    fn clear_without_filters_empties_the_store() {
        let mut svc = SmartChargingService::new(SmartChargingServiceConfig::default());
        let mut fs = InMemoryFileStore::new();
        svc.install(&mut fs, flat_profile(1, 1, 0, ChargingProfilePurpose::TxDefaultProfile, 16_000.0)).unwrap();
        assert_eq!(svc.clear(&mut fs, None, None, None, None), 1);
        assert_eq!(svc.installed_count(), 0);
    }

    #[test]
    fn tick_publishes_only_on_change() {
        let mut svc = SmartChargingService::new(SmartChargingServiceConfig::default());
        let mut fs = InMemoryFileStore::new();
        svc.install(&mut fs, flat_profile(1, 1, 0, ChargingProfilePurpose::TxDefaultProfile, 16_000.0)).unwrap();
        let mut hw = NoopHardwareIo::new();
        let now = Utc.with_ymd_and_hms(2023, 1, 1, 1, 0, 0).unwrap();
        svc.tick(&mut hw, 1, now, None, None);
        svc.tick(&mut hw, 1, now, None, None);
        assert_eq!(svc.last_published.len(), 1);
    }
}

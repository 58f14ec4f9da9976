//! Smart-charging data model: `spec.md` §3's `ChargingProfile`/`ChargingSchedule`
//! and the `⊓` (component-wise minimum) `ChargeRate` composition.
//!
//! Grounded on the teacher's `domain/charging_profile/model.rs` for the envelope
//! fields (`id`, `stack_level`, `purpose`, `kind`, `recurrency_kind`,
//! `valid_from`/`valid_to`) — the teacher stores the schedule itself as an opaque
//! `schedule_json: String` because it never evaluates one; `application::
//! smart_charging_service` has to, so `ChargingSchedule`/`ChargingSchedulePeriod`
//! are typed out here per `SPEC_FULL.md` §4.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingProfilePurpose {
    ChargePointMaxProfile,
    TxDefaultProfile,
    TxProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingProfileKind {
    Absolute,
    Recurring,
    Relative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecurrencyKind {
    Daily,
    Weekly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingRateUnit {
    Watt,
    Amp,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingSchedulePeriod {
    /// Seconds from the schedule's time-axis origin.
    pub start_period: u32,
    pub limit: f64,
    pub number_phases: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingSchedule {
    /// Seconds; `None` means unbounded.
    pub duration: Option<u32>,
    pub start_schedule: Option<DateTime<Utc>>,
    pub charging_rate_unit: ChargingRateUnit,
    pub min_charging_rate: Option<f64>,
    #[serde(rename = "chargingSchedulePeriod")]
    pub periods: Vec<ChargingSchedulePeriod>,
}

impl ChargingSchedule {
    /// The period active `offset_s` seconds after the schedule's origin, and the
    /// offset (seconds from origin) of the next period boundary if any, clamped by
    /// `duration`.
    pub fn period_at(&self, offset_s: i64) -> Option<(&ChargingSchedulePeriod, Option<u32>)> {
        if let Some(duration) = self.duration {
            if offset_s < 0 || offset_s as u32 >= duration {
                return None;
            }
        } else if offset_s < 0 {
            return None;
        }
        let offset_s = offset_s as u32;
        let mut winner: Option<&ChargingSchedulePeriod> = None;
        for period in &self.periods {
            if period.start_period <= offset_s {
                if winner.map_or(true, |w| period.start_period >= w.start_period) {
                    winner = Some(period);
                }
            }
        }
        let winner = winner?;
        let mut next_boundary = self
            .periods
            .iter()
            .map(|p| p.start_period)
            .filter(|&s| s > winner.start_period)
            .min();
        if let Some(duration) = self.duration {
            next_boundary = match next_boundary {
                Some(b) => Some(b.min(duration)),
                None => Some(duration),
            };
        }
        Some((winner, next_boundary))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingProfile {
    pub charging_profile_id: i32,
    pub transaction_id: Option<i32>,
    #[serde(skip)]
    pub connector_id: u32,
    pub stack_level: u32,
    #[serde(rename = "chargingProfilePurpose")]
    pub purpose: ChargingProfilePurpose,
    #[serde(rename = "chargingProfileKind")]
    pub kind: ChargingProfileKind,
    #[serde(rename = "recurrencyKind")]
    pub recurrency: Option<RecurrencyKind>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    #[serde(rename = "chargingSchedule")]
    pub schedule: ChargingSchedule,
}

impl ChargingProfile {
    pub fn is_valid_at(&self, t: DateTime<Utc>) -> bool {
        if let Some(from) = self.valid_from {
            if t < from {
                return false;
            }
        }
        if let Some(to) = self.valid_to {
            if t > to {
                return false;
            }
        }
        true
    }

    pub fn applies_to_connector(&self, connector_id: u32) -> bool {
        self.connector_id == 0 || self.connector_id == connector_id
    }
}

/// The instantaneous output of schedule composition: `{power, current, nphases}`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChargeRate {
    pub power_w: Option<f64>,
    pub current_a: Option<f64>,
    pub number_phases: Option<u8>,
}

impl ChargeRate {
    pub fn unbounded() -> Self {
        Self {
            power_w: None,
            current_a: None,
            number_phases: None,
        }
    }

    pub fn from_period(unit: ChargingRateUnit, period: &ChargingSchedulePeriod) -> Self {
        match unit {
            ChargingRateUnit::Watt => Self {
                power_w: Some(period.limit),
                current_a: None,
                number_phases: period.number_phases,
            },
            ChargingRateUnit::Amp => Self {
                power_w: None,
                current_a: Some(period.limit),
                number_phases: period.number_phases,
            },
        }
    }

    /// `⊓`: component-wise minimum. A side that is unbounded on one operand and
    /// bounded on the other yields the bounded side's value.
    pub fn meet(self, other: ChargeRate) -> ChargeRate {
        fn min_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
            match (a, b) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (None, None) => None,
            }
        }
        ChargeRate {
            power_w: min_opt(self.power_w, other.power_w),
            current_a: min_opt(self.current_a, other.current_a),
            number_phases: match (self.number_phases, other.number_phases) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (None, None) => None,
            },
        }
    }

    /// Convert an Amp limit to Watt using a configured nominal voltage, for
    /// hardware adapters that only expose a power callback.
    pub fn to_watts(self, nominal_voltage: f64, phases_if_unknown: u8) -> Option<f64> {
        if let Some(power) = self.power_w {
            return Some(power);
        }
        let current = self.current_a?;
        let phases = self.number_phases.unwrap_or(phases_if_unknown) as f64;
        Some(current * nominal_voltage * phases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(periods: Vec<(u32, f64)>, duration: Option<u32>) -> ChargingSchedule {
        ChargingSchedule {
            duration,
            start_schedule: None,
            charging_rate_unit: ChargingRateUnit::Watt,
            min_charging_rate: None,
            periods: periods
                .into_iter()
                .map(|(start_period, limit)| ChargingSchedulePeriod {
                    start_period,
                    limit,
                    number_phases: None,
                })
                .collect(),
        }
    }

    #[test]
    fn period_at_picks_latest_applicable_start() {
        let s = schedule(vec![(0, 16_000.0), (3600, 8_000.0)], None);
        let (period, next) = s.period_at(1000).unwrap();
        assert_eq!(period.limit, 16_000.0);
        assert_eq!(next, Some(3600));

        let (period, next) = s.period_at(4000).unwrap();
        assert_eq!(period.limit, 8_000.0);
        assert_eq!(next, None);
    }

    #[test]
    fn period_at_respects_duration_clamp() {
        let s = schedule(vec![(0, 16_000.0)], Some(1800));
        assert!(s.period_at(2000).is_none());
    }

    #[test]
    fn meet_takes_componentwise_minimum() {
        let a = ChargeRate {
            power_w: Some(22_000.0),
            current_a: None,
            number_phases: Some(3),
        };
        let b = ChargeRate {
            power_w: Some(11_000.0),
            current_a: None,
            number_phases: Some(1),
        };
        let m = a.meet(b);
        assert_eq!(m.power_w, Some(11_000.0));
        assert_eq!(m.number_phases, Some(1));
    }

    #[test]
    fn meet_prefers_bounded_side_when_other_unbounded() {
        let bounded = ChargeRate {
            power_w: Some(5_000.0),
            current_a: None,
            number_phases: None,
        };
        let m = ChargeRate::unbounded().meet(bounded);
        assert_eq!(m.power_w, Some(5_000.0));
    }

    #[test]
    fn amp_to_watt_conversion_uses_nominal_voltage() {
        let rate = ChargeRate {
            power_w: None,
            current_a: Some(16.0),
            number_phases: Some(3),
        };
        assert_eq!(rate.to_watts(230.0, 1), Some(16.0 * 230.0 * 3.0));
    }
}

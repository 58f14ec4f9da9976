//! Monotonic ticks and wall-clock UTC, with pre-boot timestamp adjustment.
//!
//! Grounded in `spec.md` §4.G "Clock-skew repair": a device may run for hours with
//! no valid wall clock (no NTP, no BootNotification response yet). Events that
//! happen during that window remember the monotonic tick they occurred at; once the
//! wall clock becomes valid, their absolute timestamp is reconstructed from the
//! offset between "now" (both clocks) and "then" (the remembered tick).

use chrono::{DateTime, TimeZone, Utc};

/// Before this, a wall-clock reading is considered "unset" (startup default).
/// Matches `spec.md`'s `MIN_TIME` guard on `Transaction.beginTimestamp`.
pub fn min_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
}

/// Tracks the monotonic tick (driven by the host's `ClockSource` port) and the
/// wall clock (seeded once by a BootNotification response).
#[derive(Debug, Clone)]
pub struct Clock {
    monotonic_ms: u64,
    /// `None` until a CSMS response seeds it; see `spec.md` §4.I.
    wall_origin: Option<WallOrigin>,
}

/// Anchors wall-clock time to a monotonic tick so that `wall_now()` stays
/// internally consistent even though only `monotonic_ms` advances every tick.
#[derive(Debug, Clone, Copy)]
struct WallOrigin {
    wall_at_origin: DateTime<Utc>,
    monotonic_at_origin: u64,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            monotonic_ms: 0,
            wall_origin: None,
        }
    }

    /// Advance the monotonic tick. Called once per `Engine::tick()` from the
    /// host-provided `ClockSource`.
    pub fn advance_to(&mut self, monotonic_ms: u64) {
        self.monotonic_ms = monotonic_ms;
    }

    pub fn now_ms(&self) -> u64 {
        self.monotonic_ms
    }

    /// Seed (or re-seed) the wall clock from an authoritative CSMS timestamp.
    pub fn set_wall_clock(&mut self, wall_now: DateTime<Utc>) {
        self.wall_origin = Some(WallOrigin {
            wall_at_origin: wall_now,
            monotonic_at_origin: self.monotonic_ms,
        });
    }

    pub fn is_wall_clock_valid(&self) -> bool {
        self.wall_origin.is_some()
    }

    /// Current wall-clock time, or `None` if it was never seeded.
    pub fn wall_now(&self) -> Option<DateTime<Utc>> {
        self.wall_origin.map(|origin| {
            let elapsed_ms = self.monotonic_ms.saturating_sub(origin.monotonic_at_origin);
            origin.wall_at_origin + chrono::Duration::milliseconds(elapsed_ms as i64)
        })
    }

    /// Reconstruct the wall-clock timestamp of a past event recorded at
    /// `event_monotonic_ms`, per `spec.md`'s `absolute = clockNow − (monotonicNow −
    /// monotonicAtEvent)`. Returns `None` if the wall clock is still unset, or if
    /// `event_monotonic_ms` is from a monotonic "epoch" that no longer exists
    /// (e.g. the tick origin was lost across a reboot before the clock validated).
    pub fn reconstruct(&self, event_monotonic_ms: u64) -> Option<DateTime<Utc>> {
        let now = self.wall_now()?;
        if event_monotonic_ms > self.monotonic_ms {
            return None;
        }
        let delta_ms = self.monotonic_ms - event_monotonic_ms;
        Some(now - chrono::Duration::milliseconds(delta_ms as i64))
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

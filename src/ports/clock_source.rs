//! The platform clock/monotonic timer: `spec.md` §6, explicitly out of scope as
//! a concrete implementation (§1) — only the interface lives in the core.

use chrono::{DateTime, Utc};

pub trait ClockSource {
    /// Monotonic milliseconds since an arbitrary, stable origin. Must never go
    /// backwards; `spec.md` §5 says all interval arithmetic is driven by this.
    fn now_ms(&self) -> u64;

    /// Wall-clock UTC, if the host currently has one (e.g. after NTP sync). The
    /// engine's own `Clock` (see `support::clock`) tracks validity independently
    /// from a BootNotification response, so this is consulted only to seed it.
    fn wall_now(&self) -> Option<DateTime<Utc>>;
}

/// A manually-advanced clock for tests: ticks only when told to.
#[derive(Debug, Default)]
pub struct ManualClockSource {
    now_ms: std::cell::Cell<u64>,
    wall_now: std::cell::Cell<Option<DateTime<Utc>>>,
}

impl ManualClockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance_ms(&self, delta_ms: u64) {
        self.now_ms.set(self.now_ms.get() + delta_ms);
    }

    pub fn set_wall_now(&self, wall_now: DateTime<Utc>) {
        self.wall_now.set(Some(wall_now));
    }
}

impl ClockSource for ManualClockSource {
    fn now_ms(&self) -> u64 {
        self.now_ms.get()
    }

    fn wall_now(&self) -> Option<DateTime<Utc>> {
        self.wall_now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_on_demand() {
        let clock = ManualClockSource::new();
        assert_eq!(clock.now_ms(), 0);
        clock.advance_ms(500);
        assert_eq!(clock.now_ms(), 500);
    }
}

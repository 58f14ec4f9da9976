//! The concrete `ports::ClockSource`: `std::time::Instant` for the monotonic
//! tick, `chrono::Utc::now()` for the wall clock. Always considers the wall
//! clock valid — on real hardware without RTC/NTP this would instead return
//! `None` until the platform clock syncs, but a host process always has one.

use crate::ports::ClockSource;
use chrono::{DateTime, Utc};
use std::time::Instant;

pub struct SystemClockSource {
    origin: Instant,
}

impl SystemClockSource {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for SystemClockSource {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn wall_now(&self) -> Option<DateTime<Utc>> {
        Some(Utc::now())
    }
}

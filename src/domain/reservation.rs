//! Reservation record backing component M's Reserved-status blending.
//!
//! Named by the `reservation-<c>.jsn` persisted layout in `spec.md` §6 but left
//! untyped in §3; typed here per `SPEC_FULL.md`'s Reservation supplement, grounded
//! in the same persisted-layout entry and in OCPP 1.6's `ReserveNow` payload shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: i32,
    pub connector_id: u32,
    pub id_tag: String,
    pub parent_id_tag: Option<String>,
    pub expiry_date: DateTime<Utc>,
}

impl Reservation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry_date
    }

    pub fn matches_id_tag(&self, id_tag: &str) -> bool {
        self.id_tag == id_tag
    }
}

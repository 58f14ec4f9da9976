//! A small pool of reusable JSON scratch buffers.
//!
//! Grounded on the size-conscious allocation style of the embedded HAL reference
//! (`orange-dot-mapf-het`'s `hal.rs`, which sizes every buffer up front rather than
//! growing unbounded): the engine serializes and parses payloads every tick, and a
//! bounded device should not let a malformed or oversized message force unbounded
//! heap growth. `JsonPool` hands out `String` buffers capped at a configured byte
//! limit and reclaims them with `release`, so steady-state operation reuses the
//! same handful of allocations instead of allocating fresh `String`s per message.

use std::fmt;

/// Raised when a document would not fit the pool's configured byte ceiling.
/// `application::error::EngineError::JsonCapacityExceeded` wraps this at the
/// engine boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityExceeded;

impl fmt::Display for CapacityExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JSON document exceeded the configured size limit")
    }
}

impl std::error::Error for CapacityExceeded {}

/// Reusable scratch buffers for encoding/decoding OCPP-J payloads.
#[derive(Debug)]
pub struct JsonPool {
    max_document_bytes: usize,
    free: Vec<String>,
}

impl JsonPool {
    /// `max_document_bytes` bounds any single document this pool will hand out;
    /// `preallocate` seeds the free list so the first few ticks don't allocate.
    pub fn new(max_document_bytes: usize, preallocate: usize) -> Self {
        let mut free = Vec::with_capacity(preallocate);
        for _ in 0..preallocate {
            free.push(String::with_capacity(max_document_bytes.min(4096)));
        }
        Self {
            max_document_bytes,
            free,
        }
    }

    pub fn max_document_bytes(&self) -> usize {
        self.max_document_bytes
    }

    /// Take a cleared buffer from the pool, allocating one if none is free.
    pub fn acquire(&mut self) -> String {
        self.free.pop().unwrap_or_default()
    }

    /// Return a buffer for reuse. Buffers that grew past the configured limit
    /// are dropped rather than retained, so one oversized message doesn't
    /// permanently bloat the pool.
    pub fn release(&mut self, mut buf: String) {
        if buf.capacity() <= self.max_document_bytes {
            buf.clear();
            self.free.push(buf);
        }
    }

    /// Serialize `value` into a pooled buffer, rejecting documents over the
    /// configured limit before they are ever put on the wire.
    pub fn serialize<T: serde::Serialize>(&mut self, value: &T) -> Result<String, CapacityExceeded> {
        let mut buf = self.acquire();
        let encoded = serde_json::to_string(value).map_err(|_| CapacityExceeded)?;
        if encoded.len() > self.max_document_bytes {
            self.release(buf);
            return Err(CapacityExceeded);
        }
        buf.push_str(&encoded);
        Ok(buf)
    }

    /// Reject inbound payloads over the configured limit before parsing them.
    pub fn check_capacity(&self, raw: &str) -> Result<(), CapacityExceeded> {
        if raw.len() > self.max_document_bytes {
            Err(CapacityExceeded)
        } else {
            Ok(())
        }
    }
}

impl Default for JsonPool {
    fn default() -> Self {
        Self::new(16 * 1024, 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn acquire_reuses_released_buffers() {
        let mut pool = JsonPool::new(1024, 1);
        let buf = pool.acquire();
        assert!(pool.free.is_empty());
        pool.release(buf);
        assert_eq!(pool.free.len(), 1);
    }

    #[test]
    fn serialize_rejects_oversized_document() {
        let mut pool = JsonPool::new(16, 0);
        let sample = Sample {
            a: 1,
            b: "this payload is far too long for the limit".into(),
        };
        assert!(matches!(pool.serialize(&sample), Err(CapacityExceeded)));
    }

    #[test]
    fn check_capacity_rejects_oversized_inbound() {
        let pool = JsonPool::new(8, 0);
        assert!(pool.check_capacity("{\"a\":12345678901234}").is_err());
        assert!(pool.check_capacity("{}").is_ok());
    }
}

//! # ocpp-station
//!
//! OCPP 1.6-J / 2.0.1 charge-point client core.
//!
//! ## Architecture
//!
//! - **support**: cross-cutting utilities (clock, frame codec, error taxonomy, JSON
//!   document pool).
//! - **domain**: core business entities (Connector, Transaction, ChargingProfile,
//!   ConfigEntry, BootStats, Reservation) — no I/O, no async.
//! - **application**: use-case orchestration — the message engine, request queue,
//!   boot/transaction/metering/smart-charging/availability services, configuration
//!   store. Entirely synchronous: the whole core is driven by a single `tick()`.
//! - **ports**: the trait boundary between the synchronous core and the outside
//!   world (`Connection`, `FileStore`, `ClockSource`, `CertificateHasher`).
//! - **infrastructure**: one concrete implementation of each port, built on
//!   `tokio`/`tokio-tungstenite` and `std::fs`. This is the only place an async
//!   runtime appears; it talks to the synchronous core over bounded channels.

pub mod application;
pub mod context;
pub mod domain;
pub mod infrastructure;
pub mod ports;
pub mod support;

pub use context::Context;

//! The trait boundary between the synchronous core and the outside world.
//!
//! Grounded on the teacher's `domain/ports/inbound.rs` / `application/ports/
//! outbound.rs` split — here collapsed into one `ports` module since the core has
//! a single counterparty (the CSMS over one WebSocket) rather than many inbound
//! adapters fanning into a server.

pub mod certificate;
pub mod clock_source;
pub mod connection;
pub mod filesystem;
pub mod hardware;

pub use certificate::{CertificateHasher, NoopCertificateHasher};
pub use clock_source::{ClockSource, ManualClockSource};
pub use connection::{Connection, NoopConnection};
pub use filesystem::{FileStat, FileStore, InMemoryFileStore};
pub use hardware::{HardwareInputs, HardwareIo, NoopHardwareIo, UnlockPollResult};

//! Concrete implementations of the `ports` traits, plus the binary-level
//! bootstrap configuration. This is the only place the crate depends on an
//! async runtime (`tokio`/`tokio-tungstenite`) or touches the real
//! filesystem/clock — everything in `domain`/`application`/`ports` stays
//! synchronous and I/O-agnostic per `spec.md` §1/§5.

pub mod certificate;
pub mod clock_source;
pub mod config;
pub mod fs_adapter;
pub mod ws_connection;

pub use certificate::Sha256CertificateHasher;
pub use clock_source::SystemClockSource;
pub use config::{AppConfig, ConfigError};
pub use fs_adapter::SandboxedFileStore;
pub use ws_connection::{OcppSubProtocol, WsConnection};

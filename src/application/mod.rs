//! Use-case orchestration: the message engine, request queue, and the
//! boot/transaction/metering/smart-charging/availability services that sit
//! on top of the domain model. Entirely synchronous — see `engine::Engine::tick`.

pub mod availability_service;
pub mod boot_service;
pub mod config_store;
pub mod engine;
pub mod error;
pub mod local_auth_service;
pub mod metering_service;
pub mod operations;
pub mod queue;
pub mod smart_charging_service;
pub mod transaction_service;

pub use config_store::{ConfigStoreError, ConfigurationStore};
pub use engine::Engine;
pub use error::EngineError;
pub use operations::OperationRegistry;

//! Cross-cutting utilities shared by `domain` and `application`.

pub mod clock;
pub mod errors;
pub mod json_pool;
pub mod ocpp_frame;

pub use clock::Clock;
pub use errors::CallErrorCode;
pub use json_pool::{CapacityExceeded, JsonPool};
pub use ocpp_frame::{OcppFrame, OcppFrameError};

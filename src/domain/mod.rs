//! Core business entities: no I/O, no async, no dependency on `ports` or
//! `application`.

pub mod boot;
pub mod charging_profile;
pub mod configuration;
pub mod connector;
pub mod error;
pub mod metering;
pub mod reservation;
pub mod transaction;

pub use boot::{BootStats, RegistrationStatus};
pub use charging_profile::{
    ChargeRate, ChargingProfile, ChargingProfileKind, ChargingProfilePurpose, ChargingRateUnit,
    ChargingSchedule, ChargingSchedulePeriod, RecurrencyKind,
};
pub use configuration::{ConfigEntry, ConfigType, ConfigValue, KeyValue};
pub use connector::{Connector, ConnectorErrorCode, ConnectorStatus, UnavailableRequesters};
pub use error::{DomainError, DomainResult};
pub use metering::{MeterValue, SampledValue};
pub use reservation::Reservation;
pub use transaction::{AuthOutcome, AuthorizationStatus, IdTagInfo, StopReason, Transaction};

//! Beacon Telemetry - logging setup for applications built on Beacon.
//!
//! The bus crate only emits `tracing` events. This crate installs the global
//! subscriber that renders them, with a choice of format and destination.
//!
//! # Example
//!
//! ```rust,no_run
//! use beacon_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), beacon_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_bus_level("debug");
//!
//! setup_logging(&config)?;
//! tracing::info!("logging ready");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileLogConfig, FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging,
    setup_logging,
};

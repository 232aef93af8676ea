//! Operator-side link to a networked DC-DC converter.
//!
//! The converter exposes a small HTTP surface (status probe, set-voltage,
//! set-output, measurement read). This crate keeps the connection state,
//! gates every command on it, and samples the output voltage into a
//! rolling time window while measurement is enabled.

pub mod control;
pub mod error;
pub mod link;
pub mod telemetry;
pub mod validation;

pub use control::{ConfigError, ConverterApi, DeviceLink, LinkConfig};
pub use error::CommandError;
pub use link::{ConnectionState, ConverterController, ConverterTarget, LinkStatus};
pub use telemetry::{Sample, SampleWindow};
pub use validation::{ConverterRatings, VoltageLimits};

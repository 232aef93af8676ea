//! Control module for talking to the converter over its HTTP surface.
//!
//! Four requests make up the whole protocol: a status probe, set-voltage,
//! set-output and a measurement read. `DeviceLink` issues them with reqwest;
//! everything above this module only sees the `ConverterApi` trait.

pub mod client;
pub mod command;
pub mod config;

pub use client::{ConverterApi, DeviceLink};
pub use command::{DeviceCommand, MeasurementReport, Method, OutputPayload, RequestBody, VoltagePayload};
pub use config::{ConfigError, LinkConfig};

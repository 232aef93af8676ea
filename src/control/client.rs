//! HTTP client for communicating with the converter.
//!
//! Every operation collapses transport and protocol failures into its
//! failure result (`false` or `None`). The reason is logged but the caller
//! cannot tell a rejected request from an unreachable device.

use super::{DeviceCommand, LinkConfig, MeasurementReport, Method};
use crate::link::ConverterTarget;
use reqwest::blocking::{Client, Response};
use std::time::Duration;

/// Operations the converter exposes.
///
/// Implementations block the calling thread for at most their timeout and
/// never panic on device or network errors.
pub trait ConverterApi: Send + Sync {
    /// `true` iff the device answered the health check with HTTP 200.
    fn probe(&self) -> bool;
    /// `true` iff the device acknowledged the new setpoint.
    fn set_voltage(&self, voltage: f32) -> bool;
    /// `true` iff the device acknowledged the relay change.
    fn set_output(&self, on: bool) -> bool;
    /// Present output voltage, or `None` if it could not be read.
    fn get_measurement(&self) -> Option<f32>;
}

/// Client bound to a single converter address.
pub struct DeviceLink {
    client: Client,
    base_url: String,
    command_timeout: Duration,
    measurement_timeout: Duration,
}

impl DeviceLink {
    /// Create a new DeviceLink for `target` with the timeouts from `config`.
    pub fn new(target: &ConverterTarget, config: &LinkConfig) -> Result<Self, String> {
        let client = Client::builder()
            .connect_timeout(config.command_timeout())
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: target.base_url(),
            command_timeout: config.command_timeout(),
            measurement_timeout: config.measurement_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a command and return the response if it carried HTTP 200.
    fn send(&self, command: DeviceCommand, timeout: Duration) -> Option<Response> {
        let url = format!("{}{}", self.base_url, command.path());

        let request = match command.method() {
            Method::Get => self.client.get(&url),
            Method::Post => {
                let request = self.client.post(&url).header("Content-Type", "application/json");
                match command.to_payload() {
                    Some(payload) => request.json(&payload),
                    None => request,
                }
            }
        };

        log::debug!("{:?} {}", command.method(), url);

        let response = match request.timeout(timeout).send() {
            Ok(response) => response,
            Err(e) => {
                log::debug!("Network error for {}: {}", url, e);
                return None;
            }
        };

        let status = response.status();
        if status.as_u16() == 200 {
            Some(response)
        } else {
            log::warn!("{} answered with status {}", url, status.as_u16());
            None
        }
    }
}

impl ConverterApi for DeviceLink {
    fn probe(&self) -> bool {
        self.send(DeviceCommand::Status, self.command_timeout).is_some()
    }

    fn set_voltage(&self, voltage: f32) -> bool {
        self.send(DeviceCommand::SetVoltage { voltage }, self.command_timeout).is_some()
    }

    fn set_output(&self, on: bool) -> bool {
        self.send(DeviceCommand::SetOutput { state: on }, self.command_timeout).is_some()
    }

    fn get_measurement(&self) -> Option<f32> {
        let response = self.send(DeviceCommand::GetMeasurement, self.measurement_timeout)?;
        match response.json::<MeasurementReport>() {
            Ok(report) if report.voltage.is_finite() => Some(report.voltage),
            Ok(report) => {
                log::warn!("Discarding non-finite measurement {}", report.voltage);
                None
            }
            Err(e) => {
                log::warn!("Malformed measurement body: {}", e);
                None
            }
        }
    }
}

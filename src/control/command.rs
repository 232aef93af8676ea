//! Request definitions for the converter's HTTP control surface.

use serde::{Deserialize, Serialize};

/// HTTP method used by a device request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Requests understood by the converter firmware.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceCommand {
    /// Read-only health check.
    Status,
    /// Program the output setpoint.
    SetVoltage { voltage: f32 },
    /// Close (`true`) or open (`false`) the output relay.
    SetOutput { state: bool },
    /// Read the live output voltage.
    GetMeasurement,
}

/// JSON body of `POST /setVoltage`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VoltagePayload {
    pub voltage: f32,
}

/// JSON body of `POST /setOutput`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OutputPayload {
    pub state: bool,
}

/// Body of a write request, serialized as the bare payload object.
///
/// Kept typed up to serialization so the setpoint goes out as the `f32` it
/// was quantized to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RequestBody {
    Voltage(VoltagePayload),
    Output(OutputPayload),
}

/// JSON body returned by `GET /getMeasurement`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct MeasurementReport {
    pub voltage: f32,
}

impl DeviceCommand {
    pub fn method(&self) -> Method {
        match self {
            DeviceCommand::Status | DeviceCommand::GetMeasurement => Method::Get,
            DeviceCommand::SetVoltage { .. } | DeviceCommand::SetOutput { .. } => Method::Post,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            DeviceCommand::Status => "/status",
            DeviceCommand::SetVoltage { .. } => "/setVoltage",
            DeviceCommand::SetOutput { .. } => "/setOutput",
            DeviceCommand::GetMeasurement => "/getMeasurement",
        }
    }

    /// Request body of the command, if it carries one.
    pub fn to_payload(&self) -> Option<RequestBody> {
        match self {
            DeviceCommand::SetVoltage { voltage } => Some(RequestBody::Voltage(VoltagePayload { voltage: *voltage })),
            DeviceCommand::SetOutput { state } => Some(RequestBody::Output(OutputPayload { state: *state })),
            DeviceCommand::Status | DeviceCommand::GetMeasurement => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_commands_post_json_bodies() {
        let set = DeviceCommand::SetVoltage { voltage: 24.5 };
        assert_eq!(set.method(), Method::Post);
        assert_eq!(set.path(), "/setVoltage");
        assert_eq!(set.to_payload(), Some(RequestBody::Voltage(VoltagePayload { voltage: 24.5 })));

        let output = DeviceCommand::SetOutput { state: true };
        assert_eq!(output.path(), "/setOutput");
        assert_eq!(output.to_payload(), Some(RequestBody::Output(OutputPayload { state: true })));
        let body = serde_json::to_string(&output.to_payload()).expect("serializable");
        assert_eq!(body, r#"{"state":true}"#);
    }

    #[test]
    fn quantized_setpoint_is_sent_without_widening() {
        let set = DeviceCommand::SetVoltage {
            voltage: crate::validation::format_voltage(100.37),
        };
        let body = serde_json::to_string(&set.to_payload()).expect("serializable");
        assert_eq!(body, r#"{"voltage":100.4}"#);
    }

    #[test]
    fn read_commands_have_no_body() {
        assert_eq!(DeviceCommand::Status.method(), Method::Get);
        assert_eq!(DeviceCommand::Status.to_payload(), None);
        assert_eq!(DeviceCommand::GetMeasurement.path(), "/getMeasurement");
        assert_eq!(DeviceCommand::GetMeasurement.to_payload(), None);
    }

    #[test]
    fn measurement_report_ignores_extra_fields() {
        let report: MeasurementReport = serde_json::from_str(r#"{"voltage": 48.2, "current": 1.1}"#).expect("valid report");
        assert_eq!(report.voltage, 48.2);
        assert!(serde_json::from_str::<MeasurementReport>(r#"{"current": 1.1}"#).is_err());
    }
}

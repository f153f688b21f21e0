//! JSON wire codec
//!
//! Inbound: bytes -> [`CommandEnvelope`]. Outbound: [`Report`] -> bytes, with
//! the `deviceId` stamped next to the record's own fields.

use crate::commands::CommandEnvelope;
use crate::error::DecodeError;
use crate::reports::Report;
use serde::Serialize;

#[derive(Serialize)]
struct Stamped<'a, T: Serialize> {
    #[serde(rename = "deviceId")]
    device_id: &'a str,
    #[serde(flatten)]
    record: &'a T,
}

pub fn decode_envelope(bytes: &[u8]) -> Result<CommandEnvelope, DecodeError> {
    let envelope: CommandEnvelope = serde_json::from_slice(bytes)?;
    if envelope.command_id.trim().is_empty() {
        return Err(DecodeError::EmptyCommandId);
    }
    Ok(envelope)
}

pub fn encode_report(report: &Report, device_id: &str) -> Result<Vec<u8>, serde_json::Error> {
    match report {
        Report::Response(record) => stamp(device_id, record),
        Report::Status(record) => stamp(device_id, record),
        Report::Telemetry(record) => stamp(device_id, record),
        Report::Progress(record) => stamp(device_id, record),
        Report::Error(record) => stamp(device_id, record),
    }
}

fn stamp<T: Serialize>(device_id: &str, record: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&Stamped { device_id, record })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reports::{ErrorReport, Severity, StatusReport, MALFORMED_COMMAND};
    use crate::state::PumpStatus;
    use chrono::Utc;
    use serde_json::Value;

    #[test]
    fn test_decode_envelope() {
        let envelope = decode_envelope(
            br#"{"command":"PAUSE_INFUSION","commandId":"p1","timestamp":"2025-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(envelope.command, "PAUSE_INFUSION");
        assert_eq!(envelope.command_id, "p1");
        assert!(envelope.payload.is_null());
    }

    #[test]
    fn test_decode_rejects_garbage_and_missing_id() {
        assert!(matches!(decode_envelope(b"not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(
            decode_envelope(br#"{"command":"STOP_INFUSION","payload":{}}"#),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode_envelope(br#"{"command":"STOP_INFUSION","commandId":"  "}"#),
            Err(DecodeError::EmptyCommandId)
        ));
    }

    #[test]
    fn test_encode_stamps_device_id() {
        let report = Report::Status(StatusReport {
            status: PumpStatus::Healthy,
            running: false,
            paused: false,
            timestamp: Utc::now(),
        });

        let value: Value = serde_json::from_slice(&encode_report(&report, "PUMP_0001").unwrap()).unwrap();
        assert_eq!(value["deviceId"], "PUMP_0001");
        assert_eq!(value["status"], "healthy");
        assert_eq!(value["isRunning"], false);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_encode_error_report() {
        let report = Report::Error(ErrorReport::new(MALFORMED_COMMAND, "bad json", Severity::Low, Utc::now()));

        let value: Value = serde_json::from_slice(&encode_report(&report, "PUMP_0002").unwrap()).unwrap();
        assert_eq!(value["deviceId"], "PUMP_0002");
        assert_eq!(value["errorCode"], "MALFORMED_COMMAND");
        assert_eq!(value["severity"], "low");
    }
}

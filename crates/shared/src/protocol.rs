//! Realtime feed wire protocol.
//!
//! Every frame is a JSON text message shaped `{ "type": string, "data": object }`.
//! Decoding happens in two steps: the envelope is read first, then `data` is
//! decoded according to `type`. Types we do not know are kept as
//! [`ServerEvent::Unknown`] instead of failing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::models::{
    unix_timestamp_to_utc, AlarmRecord, Coordinates, EntityId, PowerInfo, SensorReading,
    SensorValues,
};

/// Message type names as they appear on the wire.
pub const REAL_TIME_DATA: &str = "REAL_TIME_DATA";
pub const ALARM_UPDATE: &str = "ALARM_UPDATE";
pub const ALARM_STATUS_UPDATE: &str = "ALARM_STATUS_UPDATE";
pub const DEVICE_STATUS: &str = "DEVICE_STATUS";
pub const CALIBRATION_SENSOR_UPDATE: &str = "CALIBRATION_SENSOR_UPDATE";
pub const DEVICE_CONFIG_CONFIRMED: &str = "DEVICE_CONFIG_CONFIRMED";
pub const DEVICE_CONFIG_TIMEOUT: &str = "DEVICE_CONFIG_TIMEOUT";
pub const POWER: &str = "power";

/// Untyped frame envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Point sample pushed by a field device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealTimeData {
    pub dev: EntityId,
    pub gps: Coordinates,
    pub ts: f64,
    #[serde(default)]
    pub sen: SensorValues,
    #[serde(default)]
    pub pwr: Option<PowerInfo>,
}

impl RealTimeData {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        unix_timestamp_to_utc(self.ts)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmUpdate {
    pub device_id: EntityId,
    pub is_in_alarm: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmStatusUpdate {
    pub device_id: EntityId,
    #[serde(default)]
    pub alarms: Vec<AlarmRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatusUpdate {
    #[serde(default)]
    pub offline_device_ids: Vec<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationSensorUpdate {
    pub chamber_id: EntityId,
    pub pattern_id: EntityId,
    pub sensor_id: EntityId,
    pub new_reading: SensorReading,
    #[serde(default)]
    pub last_temperature: Option<f64>,
    #[serde(default)]
    pub last_humidity: Option<f64>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Outcome of a configuration push to a calibration pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfigAck {
    pub pattern_id: EntityId,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    RealTimeData(RealTimeData),
    AlarmUpdate(AlarmUpdate),
    AlarmStatusUpdate(AlarmStatusUpdate),
    DeviceStatus(DeviceStatusUpdate),
    CalibrationSensorUpdate(CalibrationSensorUpdate),
    DeviceConfigConfirmed(DeviceConfigAck),
    DeviceConfigTimeout(DeviceConfigAck),
    /// Power events are recognized but their payload is not interpreted.
    Power(serde_json::Value),
    Unknown { kind: String, data: serde_json::Value },
}

fn payload<T: serde::de::DeserializeOwned>(
    kind: &str,
    data: serde_json::Value,
) -> Result<T, DecodeError> {
    serde_json::from_value(data).map_err(|source| DecodeError::Payload {
        kind: kind.to_string(),
        source,
    })
}

impl ServerEvent {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let frame: RawFrame = serde_json::from_str(text).map_err(DecodeError::Frame)?;
        Self::from_frame(frame)
    }

    pub fn from_frame(frame: RawFrame) -> Result<Self, DecodeError> {
        let RawFrame { kind, data } = frame;
        let event = match kind.as_str() {
            REAL_TIME_DATA => ServerEvent::RealTimeData(payload(&kind, data)?),
            ALARM_UPDATE => ServerEvent::AlarmUpdate(payload(&kind, data)?),
            ALARM_STATUS_UPDATE => ServerEvent::AlarmStatusUpdate(payload(&kind, data)?),
            DEVICE_STATUS => ServerEvent::DeviceStatus(payload(&kind, data)?),
            CALIBRATION_SENSOR_UPDATE => {
                ServerEvent::CalibrationSensorUpdate(payload(&kind, data)?)
            }
            DEVICE_CONFIG_CONFIRMED => ServerEvent::DeviceConfigConfirmed(payload(&kind, data)?),
            DEVICE_CONFIG_TIMEOUT => ServerEvent::DeviceConfigTimeout(payload(&kind, data)?),
            POWER => ServerEvent::Power(data),
            _ => ServerEvent::Unknown { kind, data },
        };
        Ok(event)
    }

    /// The wire `type` of this event.
    pub fn kind(&self) -> &str {
        match self {
            ServerEvent::RealTimeData(_) => REAL_TIME_DATA,
            ServerEvent::AlarmUpdate(_) => ALARM_UPDATE,
            ServerEvent::AlarmStatusUpdate(_) => ALARM_STATUS_UPDATE,
            ServerEvent::DeviceStatus(_) => DEVICE_STATUS,
            ServerEvent::CalibrationSensorUpdate(_) => CALIBRATION_SENSOR_UPDATE,
            ServerEvent::DeviceConfigConfirmed(_) => DEVICE_CONFIG_CONFIRMED,
            ServerEvent::DeviceConfigTimeout(_) => DEVICE_CONFIG_TIMEOUT,
            ServerEvent::Power(_) => POWER,
            ServerEvent::Unknown { kind, .. } => kind,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, ServerEvent::Unknown { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_real_time_data() {
        let text = json!({
            "type": "REAL_TIME_DATA",
            "data": {
                "dev": "dev-1",
                "gps": [19.4, -99.1],
                "ts": 1_704_067_200,
                "sen": { "t": 21.5 },
                "pwr": { "src": "battery" }
            }
        })
        .to_string();

        let ServerEvent::RealTimeData(data) = ServerEvent::decode(&text).unwrap() else {
            panic!("expected REAL_TIME_DATA");
        };
        assert_eq!(data.dev.as_str(), "dev-1");
        assert_eq!(data.pwr.unwrap().src, "battery");
        assert_eq!(data.sen.get("t"), Some(&json!(21.5)));
    }

    #[test]
    fn offline_ids_accept_strings_and_numbers() {
        let event = ServerEvent::decode(
            r#"{"type":"DEVICE_STATUS","data":{"offlineDeviceIds":["a",3]}}"#,
        )
        .unwrap();
        let ServerEvent::DeviceStatus(status) = event else {
            panic!("expected DEVICE_STATUS");
        };
        let ids: Vec<&str> = status.offline_device_ids.iter().map(|id| id.as_str()).collect();
        assert_eq!(ids, ["a", "3"]);
    }

    #[test]
    fn unknown_type_is_kept() {
        let event = ServerEvent::decode(r#"{"type":"FIRMWARE","data":{"v":2}}"#).unwrap();
        assert_eq!(event.kind(), "FIRMWARE");
        assert!(!event.is_known());
    }

    #[test]
    fn missing_data_is_null_for_power() {
        let event = ServerEvent::decode(r#"{"type":"power"}"#).unwrap();
        assert_eq!(event, ServerEvent::Power(serde_json::Value::Null));
    }

    #[test]
    fn garbage_is_a_frame_error() {
        let err = ServerEvent::decode("{not json").unwrap_err();
        assert!(matches!(err, DecodeError::Frame(_)));
        assert!(err.kind().is_none());

        let err = ServerEvent::decode(r#"{"data":{}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Frame(_)));
    }

    #[test]
    fn bad_payload_names_its_type() {
        let err = ServerEvent::decode(r#"{"type":"ALARM_UPDATE","data":{"deviceId":1}}"#)
            .unwrap_err();
        assert_eq!(err.kind(), Some(ALARM_UPDATE));
    }

    #[test]
    fn config_ack_carries_pattern() {
        let event = ServerEvent::decode(
            r#"{"type":"DEVICE_CONFIG_TIMEOUT","data":{"patternId":12}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ServerEvent::DeviceConfigTimeout(DeviceConfigAck {
                pattern_id: EntityId::from(12),
            })
        );
    }
}

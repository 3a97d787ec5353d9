//! Shared data models for the realtime feed and the calibration cache.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// --- Identity ---

/// Identifier of a device, chamber, pattern or sensor.
///
/// The backend sends ids as JSON strings or numbers depending on the
/// message; both are normalized to their string form so that `7` and `"7"`
/// compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawId", into = "String")]
pub struct EntityId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Int(i64),
    Float(f64),
}

impl From<RawId> for EntityId {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => EntityId(s),
            RawId::Int(n) => EntityId(n.to_string()),
            RawId::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                EntityId((f as i64).to_string())
            }
            RawId::Float(f) => EntityId(f.to_string()),
        }
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        EntityId(s)
    }
}

impl From<i64> for EntityId {
    fn from(n: i64) -> Self {
        EntityId(n.to_string())
    }
}

impl EntityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric form of the id, if it is one.
    pub fn as_number(&self) -> Option<i64> {
        self.0.trim().parse().ok()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// --- Devices ---

/// GPS position of a device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl From<[f64; 2]> for Coordinates {
    fn from([lat, lng]: [f64; 2]) -> Self {
        Self { lat, lng }
    }
}

impl From<Coordinates> for [f64; 2] {
    fn from(c: Coordinates) -> Self {
        [c.lat, c.lng]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerInfo {
    pub src: String,
}

/// Raw sensor values reported by a device, keyed by sensor name.
pub type SensorValues = serde_json::Map<String, serde_json::Value>;

/// Convert a unix timestamp of unknown unit into a UTC time.
///
/// Values below 10^11 are read as seconds, anything larger as milliseconds.
pub fn unix_timestamp_to_utc(ts: f64) -> Option<DateTime<Utc>> {
    if !ts.is_finite() {
        return None;
    }
    let millis = if ts.abs() < 1e11 { ts * 1000.0 } else { ts };
    Utc.timestamp_millis_opt(millis as i64).single()
}

// --- Alarms ---

/// Alarm as it arrives in an `ALARM_STATUS_UPDATE` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmRecord {
    pub id: EntityId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_triggered: Option<DateTime<Utc>>,
    /// Fields we do not interpret (thresholds, labels, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// --- Calibration monitoring ---

/// One temperature/humidity sample of a calibration sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,
}

/// A sensor inside a calibration pattern, with its recent history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sensor {
    pub id: EntityId,
    #[serde(default)]
    pub readings: Vec<SensorReading>,
    #[serde(default)]
    pub last_temperature: Option<f64>,
    #[serde(default)]
    pub last_humidity: Option<f64>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

impl Sensor {
    pub fn new(id: impl Into<EntityId>) -> Self {
        Self {
            id: id.into(),
            readings: Vec::new(),
            last_temperature: None,
            last_humidity: None,
            last_seen: None,
        }
    }
}

/// A calibration pattern (reference instrument setup) inside a chamber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pattern {
    pub id: EntityId,
    #[serde(default)]
    pub sensors: Vec<Sensor>,
}

/// A climatic chamber under monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chamber {
    pub id: EntityId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub patterns: Vec<Pattern>,
}

//! Device store: positions, status, last readings and alarms per device.
//!
//! Every mutation goes through [`DeviceStore`] and notifies subscribers on
//! its own. A message that touches several fields produces several
//! notifications, so subscribers may observe the intermediate states.

use std::collections::{BTreeMap, VecDeque};

use calibra_shared::{AlarmRecord, Coordinates, EntityId, RealTimeData, SensorValues};
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::config::DEFAULT_SAMPLE_HISTORY;

/// An active alarm, normalized for display.
#[derive(Clone, PartialEq, Debug)]
pub struct ActiveAlarm {
    pub id: EntityId,
    /// Owning device id as a number; `None` when the id is not numeric.
    pub device_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub last_triggered: Option<DateTime<Utc>>,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ActiveAlarm {
    pub fn from_record(device_id: &EntityId, record: AlarmRecord) -> Self {
        Self {
            id: record.id,
            device_id: device_id.as_number(),
            created_at: record.created_at,
            last_triggered: record.last_triggered,
            extra: record.extra,
        }
    }
}

/// One realtime sample of a device.
#[derive(Clone, PartialEq, Debug)]
pub struct DeviceReading {
    pub device_id: EntityId,
    pub location: Coordinates,
    pub timestamp: DateTime<Utc>,
    pub sensor_values: SensorValues,
    pub power_source: Option<String>,
}

impl DeviceReading {
    /// Build a reading from a `REAL_TIME_DATA` payload. An unreadable `ts`
    /// falls back to the current time.
    pub fn from_payload(payload: &RealTimeData) -> Self {
        Self {
            device_id: payload.dev.clone(),
            location: payload.gps,
            timestamp: payload.timestamp().unwrap_or_else(Utc::now),
            sensor_values: payload.sen.clone(),
            power_source: payload.pwr.as_ref().map(|p| p.src.clone()),
        }
    }
}

/// Everything known about one device.
#[derive(Clone, PartialEq, Debug)]
pub struct DeviceEntry {
    pub id: EntityId,
    pub location: Option<Coordinates>,
    pub last_seen: Option<DateTime<Utc>>,
    /// Sensor values of the latest location update.
    pub sensors: SensorValues,
    pub status: Option<String>,
    pub is_online: bool,
    pub power_source: Option<String>,
    pub in_alarm: bool,
    pub alarms: Vec<ActiveAlarm>,
    /// Recent samples, oldest first.
    pub history: VecDeque<DeviceReading>,
}

impl DeviceEntry {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            location: None,
            last_seen: None,
            sensors: SensorValues::new(),
            status: None,
            is_online: false,
            power_source: None,
            in_alarm: false,
            alarms: Vec::new(),
            history: VecDeque::new(),
        }
    }

    pub fn has_active_alarm(&self) -> bool {
        self.in_alarm || !self.alarms.is_empty()
    }
}

/// Snapshot of the whole store.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct DeviceState {
    pub devices: BTreeMap<EntityId, DeviceEntry>,
    /// Global "there are alarms" flag.
    pub has_alarms: bool,
}

impl DeviceState {
    fn entry(&mut self, id: &EntityId) -> &mut DeviceEntry {
        self.devices
            .entry(id.clone())
            .or_insert_with(|| DeviceEntry::new(id.clone()))
    }
}

pub struct DeviceStore {
    state: watch::Sender<DeviceState>,
    history_capacity: usize,
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_HISTORY)
    }
}

impl DeviceStore {
    pub fn new(history_capacity: usize) -> Self {
        let (state, _) = watch::channel(DeviceState::default());
        Self {
            state,
            history_capacity: history_capacity.max(1),
        }
    }

    pub fn snapshot(&self) -> DeviceState {
        self.state.borrow().clone()
    }

    pub fn device(&self, id: &EntityId) -> Option<DeviceEntry> {
        self.state.borrow().devices.get(id).cloned()
    }

    pub fn has_alarms(&self) -> bool {
        self.state.borrow().has_alarms
    }

    pub fn subscribe(&self) -> watch::Receiver<DeviceState> {
        self.state.subscribe()
    }

    pub fn update_device_location(
        &self,
        id: &EntityId,
        coords: Coordinates,
        timestamp: DateTime<Utc>,
        sensor_snapshot: SensorValues,
    ) {
        self.state.send_modify(|state| {
            let device = state.entry(id);
            device.location = Some(coords);
            device.last_seen = Some(timestamp);
            device.sensors = sensor_snapshot;
        });
    }

    pub fn update_device_status(
        &self,
        id: &EntityId,
        status: &str,
        is_online: bool,
        source: Option<&str>,
    ) {
        self.state.send_modify(|state| {
            let device = state.entry(id);
            device.status = Some(status.to_string());
            device.is_online = is_online;
            if let Some(source) = source {
                device.power_source = Some(source.to_string());
            }
        });
    }

    /// Replace the alarm list of a device.
    pub fn update_device_alarms(&self, id: &EntityId, alarms: Vec<ActiveAlarm>) {
        self.state.send_modify(|state| {
            state.entry(id).alarms = alarms;
        });
    }

    pub fn set_device_in_alarm(&self, id: &EntityId, in_alarm: bool) {
        self.state.send_modify(|state| {
            state.entry(id).in_alarm = in_alarm;
        });
    }

    pub fn set_alarm_flag(&self, has_alarms: bool) {
        self.state.send_if_modified(|state| {
            let changed = state.has_alarms != has_alarms;
            state.has_alarms = has_alarms;
            changed
        });
    }

    /// Whether any device currently reports an alarm.
    pub fn any_alarm_active(&self) -> bool {
        self.state
            .borrow()
            .devices
            .values()
            .any(DeviceEntry::has_active_alarm)
    }

    /// Append a realtime sample to the device history, evicting the oldest
    /// samples beyond the store capacity.
    pub fn append_realtime_sample(&self, payload: &RealTimeData) {
        let reading = DeviceReading::from_payload(payload);
        let capacity = self.history_capacity;
        self.state.send_modify(|state| {
            let history = &mut state.entry(&payload.dev).history;
            history.push_back(reading);
            while history.len() > capacity {
                history.pop_front();
            }
        });
    }

    /// Known device ids.
    pub fn device_ids(&self) -> Vec<EntityId> {
        self.state.borrow().devices.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calibra_shared::PowerInfo;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample(dev: &str, ts: f64) -> RealTimeData {
        RealTimeData {
            dev: EntityId::from(dev),
            gps: Coordinates { lat: 1.0, lng: 2.0 },
            ts,
            sen: json!({ "t": ts }).as_object().cloned().unwrap_or_default(),
            pwr: Some(PowerInfo { src: "grid".into() }),
        }
    }

    #[test]
    fn unknown_devices_are_created() {
        let store = DeviceStore::default();
        let id = EntityId::from("new");
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        store.update_device_location(&id, Coordinates { lat: 3.0, lng: 4.0 }, at, SensorValues::new());

        let device = store.device(&id).unwrap();
        assert_eq!(device.location, Some(Coordinates { lat: 3.0, lng: 4.0 }));
        assert_eq!(device.last_seen, Some(at));
    }

    #[test]
    fn status_keeps_previous_source_when_absent() {
        let store = DeviceStore::default();
        let id = EntityId::from("d");
        store.update_device_status(&id, "online", true, Some("battery"));
        store.update_device_status(&id, "offline", false, None);

        let device = store.device(&id).unwrap();
        assert_eq!(device.status.as_deref(), Some("offline"));
        assert!(!device.is_online);
        assert_eq!(device.power_source.as_deref(), Some("battery"));
    }

    #[test]
    fn sample_history_is_bounded() {
        let store = DeviceStore::new(3);
        for ts in 1..=5 {
            store.append_realtime_sample(&sample("d", 1_700_000_000.0 + ts as f64));
        }
        let history = store.device(&EntityId::from("d")).unwrap().history;
        let kept: Vec<_> = history.iter().map(|r| r.timestamp.timestamp()).collect();
        assert_eq!(kept, [1_700_000_003, 1_700_000_004, 1_700_000_005]);
        assert_eq!(history[0].power_source.as_deref(), Some("grid"));
    }

    #[test]
    fn alarms_are_replaced_wholesale() {
        let store = DeviceStore::default();
        let id = EntityId::from("7");
        let record = |n: i64| AlarmRecord {
            id: EntityId::from(n),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            last_triggered: None,
            extra: Default::default(),
        };

        store.update_device_alarms(
            &id,
            vec![
                ActiveAlarm::from_record(&id, record(1)),
                ActiveAlarm::from_record(&id, record(2)),
            ],
        );
        store.update_device_alarms(&id, vec![ActiveAlarm::from_record(&id, record(3))]);

        let alarms = store.device(&id).unwrap().alarms;
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].id, EntityId::from(3));
        assert_eq!(alarms[0].device_id, Some(7));
        assert!(store.any_alarm_active());

        store.update_device_alarms(&id, Vec::new());
        assert!(!store.any_alarm_active());
    }

    #[tokio::test]
    async fn each_mutation_notifies() {
        let store = DeviceStore::default();
        let mut rx = store.subscribe();
        rx.borrow_and_update();

        store.set_device_in_alarm(&EntityId::from("x"), true);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        store.set_alarm_flag(true);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        // Same value again is not a change.
        store.set_alarm_flag(true);
        assert!(!rx.has_changed().unwrap());
        assert!(store.has_alarms());
    }
}

//! Wires the realtime socket to the stores.
//!
//! [`Pipeline`] turns frames into store mutations and can be driven without a
//! socket. [`RealtimeManager`] owns a pipeline plus the [`WsConnection`] that
//! feeds it.

use std::sync::Arc;

use calibra_shared::ServerEvent;
use tokio::sync::watch;

use super::connection::{ConnectionState, WsConnection, WsHandle};
use super::router::{MessageRouter, RoutedMessage};
use crate::config::ClientConfig;
use crate::notifications::{NotificationPresenter, Notifier};
use crate::storage::Storage;
use crate::stores::{ActiveAlarm, DeviceStore, SensorCache};

/// Status string stored for devices that are sending data.
pub const STATUS_ONLINE: &str = "online";
/// Status string stored for devices reported offline.
pub const STATUS_OFFLINE: &str = "offline";

/// Router plus every consumer of routed messages.
#[derive(Clone)]
pub struct Pipeline {
    pub router: Arc<MessageRouter>,
    pub devices: Arc<DeviceStore>,
    pub sensors: Arc<SensorCache>,
    pub presenter: Arc<NotificationPresenter>,
}

impl Pipeline {
    pub fn new(config: &ClientConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            router: Arc::new(MessageRouter::new()),
            devices: Arc::new(DeviceStore::new(config.sample_history)),
            sensors: Arc::new(SensorCache::new(config.history_window)),
            presenter: Arc::new(NotificationPresenter::new(notifier)),
        }
    }

    /// Route one text frame and apply it. Malformed frames return `None`.
    pub fn handle_frame(&self, text: &str) -> Option<Arc<RoutedMessage>> {
        let message = self.router.route(text)?;
        self.dispatch(&message);
        Some(message)
    }

    /// Apply a routed message to the stores, cache and notifications.
    pub fn dispatch(&self, message: &RoutedMessage) {
        match &message.event {
            ServerEvent::RealTimeData(data) => {
                let timestamp = data.timestamp().unwrap_or(message.received_at);
                let source = data.pwr.as_ref().map(|p| p.src.as_str());
                self.devices
                    .update_device_location(&data.dev, data.gps, timestamp, data.sen.clone());
                self.devices
                    .update_device_status(&data.dev, STATUS_ONLINE, true, source);
                self.devices.append_realtime_sample(data);
            }
            ServerEvent::AlarmUpdate(update) => {
                self.devices
                    .set_device_in_alarm(&update.device_id, update.is_in_alarm);
                self.refresh_alarm_flag();
            }
            ServerEvent::AlarmStatusUpdate(update) => {
                let alarms = update
                    .alarms
                    .iter()
                    .cloned()
                    .map(|record| ActiveAlarm::from_record(&update.device_id, record))
                    .collect();
                self.devices.update_device_alarms(&update.device_id, alarms);
                self.refresh_alarm_flag();
            }
            ServerEvent::DeviceStatus(status) => {
                let mut ids = self.devices.device_ids();
                for id in &status.offline_device_ids {
                    if !ids.contains(id) {
                        ids.push(id.clone());
                    }
                }
                for id in &ids {
                    let offline = status.offline_device_ids.contains(id);
                    let label = if offline { STATUS_OFFLINE } else { STATUS_ONLINE };
                    self.devices.update_device_status(id, label, !offline, None);
                }
            }
            ServerEvent::CalibrationSensorUpdate(_) => {
                self.sensors.apply(message);
            }
            ServerEvent::DeviceConfigConfirmed(_) | ServerEvent::DeviceConfigTimeout(_) => {
                self.presenter.present(message);
            }
            ServerEvent::Power(data) => {
                crate::log_debug!("Power event: {}", data);
            }
            ServerEvent::Unknown { .. } => {}
        }
    }

    fn refresh_alarm_flag(&self) {
        let active = self.devices.any_alarm_active();
        self.devices.set_alarm_flag(active);
    }
}

/// The realtime client: one socket feeding one pipeline.
pub struct RealtimeManager {
    pipeline: Pipeline,
    connection: WsConnection,
}

impl RealtimeManager {
    /// Build the manager. The access token is read from `storage` each time a
    /// socket is opened.
    pub fn new(config: &ClientConfig, storage: Option<Storage>, notifier: Arc<dyn Notifier>) -> Self {
        let pipeline = Pipeline::new(config, notifier);

        let url_config = config.clone();
        let url_builder = move || {
            let token = storage.as_ref().and_then(Storage::access_token);
            if token.is_none() {
                crate::log_warn!("No access token stored, connecting without one");
            }
            url_config
                .socket_url(token.as_deref())
                .map(String::from)
                .map_err(|e| e.to_string())
        };

        let frame_pipeline = pipeline.clone();
        let on_frame = move |text: &str| {
            frame_pipeline.handle_frame(text);
        };

        let connection = WsConnection::new("realtime", config.reconnect.clone(), url_builder, on_frame);

        Self {
            pipeline,
            connection,
        }
    }

    /// Open the socket. No-op while a socket is live.
    pub fn connect(&self) -> bool {
        self.connection.connect()
    }

    /// Close the socket and cancel pending reconnects.
    pub fn shutdown(&self) {
        self.connection.shutdown();
    }

    pub async fn join(&self) {
        self.connection.join().await;
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    pub fn handle(&self) -> WsHandle {
        self.connection.handle()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn devices(&self) -> &DeviceStore {
        &self.pipeline.devices
    }

    pub fn sensors(&self) -> &SensorCache {
        &self.pipeline.sensors
    }

    pub fn router(&self) -> &MessageRouter {
        &self.pipeline.router
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::ToastBoard;
    use calibra_shared::EntityId;
    use serde_json::json;

    fn pipeline() -> (Pipeline, Arc<ToastBoard>) {
        let board = Arc::new(ToastBoard::new());
        (Pipeline::new(&ClientConfig::default(), board.clone()), board)
    }

    #[test]
    fn real_time_data_creates_device() {
        let (pipeline, _) = pipeline();
        let frame = json!({
            "type": "REAL_TIME_DATA",
            "data": { "dev": 42, "gps": [1.5, 2.5], "ts": 1_700_000_000_000u64, "sen": { "h": 30 }, "pwr": { "src": "solar" } }
        });
        pipeline.handle_frame(&frame.to_string()).unwrap();

        let device = pipeline.devices.device(&EntityId::from(42)).unwrap();
        assert!(device.is_online);
        assert_eq!(device.status.as_deref(), Some(STATUS_ONLINE));
        assert_eq!(device.power_source.as_deref(), Some("solar"));
        assert_eq!(device.sensors.get("h"), Some(&json!(30)));
        assert_eq!(device.history.len(), 1);
        assert_eq!(device.last_seen.unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn device_status_marks_offline_and_online() {
        let (pipeline, _) = pipeline();
        for dev in ["a", "b"] {
            let frame = json!({ "type": "REAL_TIME_DATA", "data": { "dev": dev, "gps": [0, 0], "ts": 1 } });
            pipeline.handle_frame(&frame.to_string()).unwrap();
        }

        pipeline
            .handle_frame(r#"{"type":"DEVICE_STATUS","data":{"offlineDeviceIds":["a","ghost"]}}"#)
            .unwrap();

        let devices = pipeline.devices.snapshot().devices;
        assert!(!devices[&EntityId::from("a")].is_online);
        assert!(devices[&EntityId::from("b")].is_online);
        assert_eq!(devices[&EntityId::from("ghost")].status.as_deref(), Some(STATUS_OFFLINE));
    }

    #[test]
    fn alarm_flag_follows_devices() {
        let (pipeline, _) = pipeline();
        pipeline
            .handle_frame(r#"{"type":"ALARM_UPDATE","data":{"deviceId":"3","isInAlarm":true}}"#)
            .unwrap();
        assert!(pipeline.devices.has_alarms());

        pipeline
            .handle_frame(r#"{"type":"ALARM_UPDATE","data":{"deviceId":"3","isInAlarm":false}}"#)
            .unwrap();
        assert!(!pipeline.devices.has_alarms());
    }

    #[test]
    fn config_outcomes_raise_toasts() {
        let (pipeline, board) = pipeline();
        let message = pipeline
            .handle_frame(r#"{"type":"DEVICE_CONFIG_TIMEOUT","data":{"patternId":"p-1"}}"#)
            .unwrap();

        let toasts = board.active(message.received_at);
        assert_eq!(toasts.len(), 1);
        assert!(toasts[0].message.contains("p-1"));

        // Replaying the same routed message does not raise a second toast.
        pipeline.dispatch(&message);
        assert_eq!(board.active(message.received_at).len(), 1);
    }

    #[test]
    fn unknown_and_power_frames_touch_nothing() {
        let (pipeline, board) = pipeline();
        pipeline.handle_frame(r#"{"type":"power","data":{"v":12}}"#).unwrap();
        pipeline.handle_frame(r#"{"type":"NEW_THING","data":{"dev":"1"}}"#).unwrap();

        assert!(pipeline.devices.snapshot().devices.is_empty());
        assert!(board.active(chrono::Utc::now()).is_empty());
        assert_eq!(pipeline.router.last_message().unwrap().event.kind(), "NEW_THING");
    }
}

//! Calibra realtime client
//!
//! Keeps device, alarm and calibration sensor state current from the
//! monitoring backend's WebSocket feed. Consumers subscribe to the stores;
//! nothing here renders.

#[macro_use]
pub mod logging;

pub mod config;
pub mod notifications;
pub mod storage;
pub mod stores;
pub mod ws;

pub use config::{ClientConfig, ConfigError, Environment};
pub use notifications::{NotificationPresenter, Notifier, Toast, ToastBoard, ToastLevel};
pub use storage::Storage;
pub use stores::{DeviceStore, HistoryWindow, SensorCache};
pub use ws::{ConnectionState, Pipeline, RealtimeManager, ReconnectConfig};

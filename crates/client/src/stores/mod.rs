//! Observable client-side state fed by the realtime socket.

pub mod devices;
pub mod sensor_cache;

pub use devices::{ActiveAlarm, DeviceEntry, DeviceReading, DeviceState, DeviceStore};
pub use sensor_cache::{
    splice_sensor_update, ApplyOutcome, ChamberCache, HistoryWindow, SensorCache,
};

//! WebSocket module for the realtime telemetry feed.
//!
//! This module provides:
//! - Connection management with auto-reconnect
//! - Frame decoding and "last message" routing
//! - Direct writes to the stores (consumers read stores, not events)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  RealtimeManager                    │
//! │        (owns the socket and the pipeline)           │
//! └─────────────────────────────────────────────────────┘
//!                         │
//!                         ▼
//!                  ┌────────────┐
//!                  │WsConnection│  text frames
//!                  └────────────┘
//!                         │
//!                         ▼
//!                ┌─────────────────┐
//!                │  MessageRouter  │──▶ last message (watch)
//!                └─────────────────┘
//!                         │ Pipeline::dispatch
//!          ┌──────────────┼──────────────┐
//!          ▼              ▼              ▼
//!   ┌────────────┐ ┌────────────┐ ┌──────────────┐
//!   │DeviceStore │ │SensorCache │ │ Notification │
//!   │            │ │            │ │  Presenter   │
//!   └────────────┘ └────────────┘ └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let manager = RealtimeManager::new(&config, Some(Storage::platform()?), board);
//! manager.connect();
//!
//! let mut devices = manager.devices().subscribe();
//! while devices.changed().await.is_ok() {
//!     let state = devices.borrow_and_update().clone();
//!     // render
//! }
//! ```

mod connection;
mod manager;
mod router;

pub use connection::{ConnectionState, ReconnectConfig, WsConnection, WsHandle};
pub use manager::{Pipeline, RealtimeManager, STATUS_OFFLINE, STATUS_ONLINE};
pub use router::{DedupGuard, MessageRouter, RoutedMessage, RouterStats};

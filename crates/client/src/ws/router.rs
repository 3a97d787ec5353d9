//! Inbound frame decoding and "last message" fan-out.
//!
//! The router is not a queue: subscribers observe the most recent message
//! only. Consumers that must act on every message are driven directly by the
//! pipeline and use a [`DedupGuard`] so replaying the same message is a no-op.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use calibra_shared::ServerEvent;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

/// A decoded frame tagged with its arrival sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedMessage {
    /// Monotonic per-router sequence number, starting at 1.
    pub seq: u64,
    pub received_at: DateTime<Utc>,
    pub event: ServerEvent,
}

/// Counters kept by the router.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub accepted: u64,
    pub dropped: u64,
}

pub struct MessageRouter {
    next_seq: AtomicU64,
    last: watch::Sender<Option<Arc<RoutedMessage>>>,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRouter {
    pub fn new() -> Self {
        let (last, _) = watch::channel(None);
        Self {
            next_seq: AtomicU64::new(1),
            last,
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Decode a text frame and publish it as the last message.
    ///
    /// Malformed frames are logged and dropped; the last message is left as is.
    pub fn route(&self, text: &str) -> Option<Arc<RoutedMessage>> {
        let event = match ServerEvent::decode(text) {
            Ok(event) => event,
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                crate::log_warn!("Dropping inbound frame: {}", e);
                return None;
            }
        };

        if !event.is_known() {
            crate::log_debug!("Unrecognized message type {:?}", event.kind());
        }

        let message = Arc::new(RoutedMessage {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            received_at: Utc::now(),
            event,
        });
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.last.send_replace(Some(message.clone()));
        Some(message)
    }

    pub fn last_message(&self) -> Option<Arc<RoutedMessage>> {
        self.last.borrow().clone()
    }

    /// Subscribe to the last-message value.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<RoutedMessage>>> {
        self.last.subscribe()
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Remembers the last message a consumer processed.
#[derive(Debug, Default)]
pub struct DedupGuard {
    last_seq: Option<u64>,
}

impl DedupGuard {
    /// Returns `true` the first time a sequence number is seen in a row.
    pub fn first_sight(&mut self, seq: u64) -> bool {
        if self.last_seq == Some(seq) {
            return false;
        }
        self.last_seq = Some(seq);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_frames_leave_last_message_alone() {
        let router = MessageRouter::new();
        let first = router
            .route(r#"{"type":"ALARM_UPDATE","data":{"deviceId":"1","isInAlarm":true}}"#)
            .unwrap();

        for garbage in ["", "{", "[]", "42", r#"{"type":5}"#, r#"{"type":"ALARM_UPDATE","data":[]}"#] {
            assert!(router.route(garbage).is_none());
        }

        assert_eq!(router.last_message(), Some(first));
        assert_eq!(router.stats(), RouterStats { accepted: 1, dropped: 6 });
    }

    #[test]
    fn unknown_types_become_last_message() {
        let router = MessageRouter::new();
        let msg = router.route(r#"{"type":"SOMETHING_NEW","data":{}}"#).unwrap();
        assert_eq!(msg.event.kind(), "SOMETHING_NEW");
        assert_eq!(router.last_message().unwrap().seq, msg.seq);
    }

    #[test]
    fn sequence_numbers_increase() {
        let router = MessageRouter::new();
        let a = router.route(r#"{"type":"power","data":{}}"#).unwrap();
        let b = router.route(r#"{"type":"power","data":{}}"#).unwrap();
        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
        assert_eq!(a.event, b.event);
    }

    #[tokio::test]
    async fn late_subscriber_sees_only_latest() {
        let router = MessageRouter::new();
        router.route(r#"{"type":"power","data":{"n":1}}"#);
        router.route(r#"{"type":"power","data":{"n":2}}"#);

        let rx = router.subscribe();
        let latest = rx.borrow().clone().unwrap();
        assert_eq!(latest.seq, 2);
        assert_eq!(latest.event, ServerEvent::Power(serde_json::json!({ "n": 2 })));
    }

    #[test]
    fn guard_skips_repeats_only() {
        let mut guard = DedupGuard::default();
        assert!(guard.first_sight(1));
        assert!(!guard.first_sight(1));
        assert!(guard.first_sight(2));
        assert!(guard.first_sight(1));
    }
}

//! Transient toast notifications for device configuration outcomes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use calibra_shared::ServerEvent;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::ws::{DedupGuard, RoutedMessage};

/// How long a confirmation toast stays up.
pub const CONFIRMED_TOAST_DURATION: Duration = Duration::from_secs(3);
/// How long a timeout toast stays up.
pub const TIMEOUT_TOAST_DURATION: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Success,
    Warning,
}

impl ToastLevel {
    pub fn icon(&self) -> &'static str {
        match self {
            ToastLevel::Success => "✔",
            ToastLevel::Warning => "⚠",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    /// Sequence number of the message that raised it.
    pub id: u64,
    pub level: ToastLevel,
    pub title: String,
    pub message: String,
    pub duration: Duration,
    pub shown_at: DateTime<Utc>,
}

impl Toast {
    pub fn expires_at(&self) -> DateTime<Utc> {
        let duration = chrono::Duration::from_std(self.duration).unwrap_or(chrono::Duration::zero());
        self.shown_at + duration
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// The toast a message raises, if any.
    pub fn for_message(message: &RoutedMessage) -> Option<Self> {
        let (level, title, text, duration) = match &message.event {
            ServerEvent::DeviceConfigConfirmed(ack) => (
                ToastLevel::Success,
                "Configuration applied",
                format!("Pattern {} confirmed the new configuration", ack.pattern_id),
                CONFIRMED_TOAST_DURATION,
            ),
            ServerEvent::DeviceConfigTimeout(ack) => (
                ToastLevel::Warning,
                "Configuration timed out",
                format!("Pattern {} did not confirm the configuration in time", ack.pattern_id),
                TIMEOUT_TOAST_DURATION,
            ),
            _ => return None,
        };
        Some(Self {
            id: message.seq,
            level,
            title: title.to_string(),
            message: text,
            duration,
            shown_at: message.received_at,
        })
    }
}

/// Where toasts are shown.
pub trait Notifier: Send + Sync {
    fn notify(&self, toast: Toast);
}

/// Observable list of toasts currently on screen.
pub struct ToastBoard {
    toasts: watch::Sender<Vec<Toast>>,
}

impl Default for ToastBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl ToastBoard {
    pub fn new() -> Self {
        let (toasts, _) = watch::channel(Vec::new());
        Self { toasts }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Toast>> {
        self.toasts.subscribe()
    }

    /// Toasts still visible at `now`.
    pub fn active(&self, now: DateTime<Utc>) -> Vec<Toast> {
        self.toasts
            .borrow()
            .iter()
            .filter(|t| !t.is_expired(now))
            .cloned()
            .collect()
    }

    /// Remove expired toasts. Returns how many were dismissed.
    pub fn dismiss_expired(&self, now: DateTime<Utc>) -> usize {
        let mut dismissed = 0;
        self.toasts.send_if_modified(|toasts| {
            let before = toasts.len();
            toasts.retain(|t| !t.is_expired(now));
            dismissed = before - toasts.len();
            dismissed > 0
        });
        dismissed
    }
}

impl Notifier for ToastBoard {
    fn notify(&self, toast: Toast) {
        self.toasts.send_modify(|toasts| toasts.push(toast));
    }
}

/// Turns config outcome messages into toasts, once per message.
pub struct NotificationPresenter {
    notifier: Arc<dyn Notifier>,
    guard: Mutex<DedupGuard>,
}

impl NotificationPresenter {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            guard: Mutex::new(DedupGuard::default()),
        }
    }

    /// Show the toast for `message`, if it raises one and was not shown already.
    pub fn present(&self, message: &RoutedMessage) -> Option<Toast> {
        let toast = Toast::for_message(message)?;
        let first = self
            .guard
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .first_sight(message.seq);
        if !first {
            return None;
        }
        crate::log_info!("{} {}: {}", toast.level.icon(), toast.title, toast.message);
        self.notifier.notify(toast.clone());
        Some(toast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calibra_shared::{DeviceConfigAck, EntityId};
    use chrono::TimeZone;

    fn message(seq: u64, event: ServerEvent) -> RoutedMessage {
        RoutedMessage {
            seq,
            received_at: Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
            event,
        }
    }

    fn ack(pattern: i64) -> DeviceConfigAck {
        DeviceConfigAck {
            pattern_id: EntityId::from(pattern),
        }
    }

    #[test]
    fn confirmed_and_timeout_differ() {
        let ok = Toast::for_message(&message(1, ServerEvent::DeviceConfigConfirmed(ack(4)))).unwrap();
        let late = Toast::for_message(&message(2, ServerEvent::DeviceConfigTimeout(ack(4)))).unwrap();

        assert_eq!(ok.level, ToastLevel::Success);
        assert_eq!(late.level, ToastLevel::Warning);
        assert_ne!(ok.level.icon(), late.level.icon());
        assert!(ok.duration < late.duration);
        assert!(ok.message.contains("Pattern 4"));

        assert!(Toast::for_message(&message(3, ServerEvent::Power(serde_json::Value::Null))).is_none());
    }

    #[test]
    fn presenter_shows_each_message_once() {
        let board = Arc::new(ToastBoard::new());
        let presenter = NotificationPresenter::new(board.clone());
        let msg = message(9, ServerEvent::DeviceConfigConfirmed(ack(1)));

        assert!(presenter.present(&msg).is_some());
        assert!(presenter.present(&msg).is_none());
        assert_eq!(board.active(msg.received_at).len(), 1);
    }

    #[test]
    fn toasts_dismiss_themselves() {
        let board = ToastBoard::new();
        let confirmed = Toast::for_message(&message(1, ServerEvent::DeviceConfigConfirmed(ack(1)))).unwrap();
        let timeout = Toast::for_message(&message(2, ServerEvent::DeviceConfigTimeout(ack(1)))).unwrap();
        let start = confirmed.shown_at;
        board.notify(confirmed);
        board.notify(timeout);

        let after_4s = start + chrono::Duration::seconds(4);
        assert_eq!(board.active(after_4s).len(), 1);
        assert_eq!(board.dismiss_expired(after_4s), 1);
        assert_eq!(board.dismiss_expired(after_4s), 0);

        let after_6s = start + chrono::Duration::seconds(6);
        assert!(board.active(after_6s).is_empty());
        assert_eq!(board.dismiss_expired(after_6s), 1);
    }
}

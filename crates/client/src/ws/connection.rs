//! WebSocket connection with state management and auto-reconnect.
//!
//! One [`WsConnection`] owns at most one socket at a time. The socket lives in
//! a background tokio task that walks the state machine:
//!
//! ```text
//! Connecting ──open──▶ Connected ──close──▶ Closed ──delay──▶ Connecting
//!      │                   │
//!      └──────error────────┴──────────────▶ Error (terminal for this run)
//! ```
//!
//! A close schedules a reconnect after [`ReconnectConfig::delay_ms`]. The
//! peer going away counts as a close whether or not it sent a close frame
//! (end of stream, reset without closing handshake, broken pipe). An error
//! (failed handshake or protocol violation) stops the task until
//! [`WsConnection::connect`] is called again.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{error::ProtocolError, Error as WsError, Message};
use uuid::Uuid;

/// Connection state for a WebSocket
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Closed,
    Error { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ConnectionState::Error { .. })
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt, in milliseconds
    pub delay_ms: u64,
    /// Multiplier applied per consecutive attempt (1.0 = fixed delay)
    pub backoff_multiplier: f64,
    /// Upper bound for the delay, in milliseconds
    pub max_delay_ms: u64,
    /// Maximum number of consecutive reconnect attempts (0 = infinite)
    pub max_attempts: u32,
    /// Keep reconnecting after a socket error instead of stopping
    pub retry_after_error: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_ms: 2000,
            backoff_multiplier: 1.0,
            max_delay_ms: 30_000,
            max_attempts: 0,
            retry_after_error: false,
        }
    }
}

impl ReconnectConfig {
    /// Calculate delay for a given attempt number (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt.min(64) as i32);
        let delay = (self.delay_ms as f64 * factor).min(self.max_delay_ms.max(self.delay_ms) as f64);
        Duration::from_millis(delay as u64)
    }

    /// Whether another attempt is allowed after `attempt` consecutive ones
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt < self.max_attempts
    }
}

/// Builds the socket URL; called before every connection attempt.
pub type UrlBuilder = Arc<dyn Fn() -> Result<String, String> + Send + Sync>;

/// Receives every inbound text frame, in arrival order.
pub type FrameHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Handle for sending text frames through a WebSocket connection
#[derive(Clone)]
pub struct WsHandle {
    sender: UnboundedSender<String>,
    pub label: String,
}

impl WsHandle {
    /// Queue a raw text frame. Frames queued while disconnected are sent
    /// after the next successful open.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), String> {
        self.sender
            .unbounded_send(text.into())
            .map_err(|e| format!("Failed to send: {}", e))
    }

    /// Serialize a value to JSON and queue it.
    pub fn send_json<T: serde::Serialize>(&self, value: &T) -> Result<(), String> {
        let json = serde_json::to_string(value).map_err(|e| format!("Serialize failed: {}", e))?;
        self.send_text(json)
    }
}

/// A managed WebSocket connection to the realtime endpoint
pub struct WsConnection {
    /// Name used in log lines
    pub label: String,
    state: watch::Sender<ConnectionState>,
    /// Shutdown flag of the current run; replaced on every `connect`.
    shutdown: Mutex<watch::Sender<bool>>,
    /// Bumped on every `connect`; tasks of older runs stop publishing state.
    generation: Arc<AtomicU64>,
    sender: UnboundedSender<String>,
    receiver: Arc<tokio::sync::Mutex<UnboundedReceiver<String>>>,
    reconnect_config: ReconnectConfig,
    url_builder: UrlBuilder,
    on_frame: FrameHandler,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WsConnection {
    /// Create a connection. Nothing is opened until [`WsConnection::connect`].
    pub fn new(
        label: impl Into<String>,
        reconnect_config: ReconnectConfig,
        url_builder: impl Fn() -> Result<String, String> + Send + Sync + 'static,
        on_frame: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        let (sender, receiver) = unbounded();
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let (shutdown, _) = watch::channel(false);

        Self {
            label: label.into(),
            state,
            shutdown: Mutex::new(shutdown),
            generation: Arc::new(AtomicU64::new(0)),
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            reconnect_config,
            url_builder: Arc::new(url_builder),
            on_frame: Arc::new(on_frame),
            task: Mutex::new(None),
        }
    }

    /// Start the connection task.
    ///
    /// Returns `false` without doing anything when a task is already running
    /// and has not been asked to shut down. A task that is still tearing down
    /// after [`WsConnection::shutdown`] is aborted and replaced.
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) -> bool {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        let mut shutdown = self.shutdown.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(running) = task.as_ref().filter(|t| !t.is_finished()) {
            if !*shutdown.borrow() {
                crate::log_debug!("{}: connect() while a socket is live, ignoring", self.label);
                return false;
            }
            crate::log_debug!("{}: previous socket still shutting down, aborting it", self.label);
            running.abort();
        }

        let (next_shutdown, shutdown_rx) = watch::channel(false);
        *shutdown = next_shutdown;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(ConnectionState::Connecting);

        let ctx = LoopContext {
            label: self.label.clone(),
            state: self.state.clone(),
            generation,
            current_generation: self.generation.clone(),
            shutdown: shutdown_rx,
            receiver: self.receiver.clone(),
            reconnect_config: self.reconnect_config.clone(),
            url_builder: self.url_builder.clone(),
            on_frame: self.on_frame.clone(),
        };
        *task = Some(tokio::spawn(run_connection_loop(ctx)));
        true
    }

    /// Close the socket and cancel any pending reconnect.
    pub fn shutdown(&self) {
        self.shutdown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .send_replace(true);
    }

    /// Wait for the connection task to finish.
    pub async fn join(&self) {
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Subscribe to state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Get a handle for sending frames
    pub fn handle(&self) -> WsHandle {
        WsHandle {
            sender: self.sender.clone(),
            label: self.label.clone(),
        }
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.shutdown
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .send_replace(true);
    }
}

struct LoopContext {
    label: String,
    state: watch::Sender<ConnectionState>,
    generation: u64,
    current_generation: Arc<AtomicU64>,
    shutdown: watch::Receiver<bool>,
    receiver: Arc<tokio::sync::Mutex<UnboundedReceiver<String>>>,
    reconnect_config: ReconnectConfig,
    url_builder: UrlBuilder,
    on_frame: FrameHandler,
}

impl LoopContext {
    /// Publish a state unless a newer run has taken over.
    fn set_state(&self, next: ConnectionState) {
        let generation = self.generation;
        let current = &self.current_generation;
        self.state.send_if_modified(|state| {
            if current.load(Ordering::SeqCst) != generation {
                return false;
            }
            *state = next;
            true
        });
    }
}

/// How one socket instance ended.
enum Outcome {
    Closed,
    Error(String),
    Shutdown,
}

/// Whether a transport error means the peer went away, which is handled as a
/// close rather than an error.
fn is_disconnect(error: &WsError) -> bool {
    match error {
        WsError::ConnectionClosed | WsError::AlreadyClosed => true,
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
        WsError::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::UnexpectedEof
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
        ),
        _ => false,
    }
}

/// Resolves once shutdown is requested or the owning connection is dropped.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn run_connection_loop(mut ctx: LoopContext) {
    let mut attempt = 0u32;

    loop {
        let url = match (ctx.url_builder)() {
            Ok(url) => url,
            Err(reason) => {
                crate::log_error!("{}: cannot build socket url: {}", ctx.label, reason);
                ctx.set_state(ConnectionState::Error { reason });
                return;
            }
        };

        ctx.set_state(ConnectionState::Connecting);
        let connection_id = Uuid::new_v4();
        crate::log_debug!("{}: opening socket {}", ctx.label, connection_id);

        let connected = tokio::select! {
            _ = shutdown_requested(&mut ctx.shutdown) => None,
            result = connect_async(url.as_str()) => Some(result),
        };

        let outcome = match connected {
            None => Outcome::Shutdown,
            Some(Ok((ws_stream, _response))) => {
                attempt = 0;
                ctx.set_state(ConnectionState::Connected);
                crate::log_info!("{}: socket {} connected", ctx.label, connection_id);
                run_socket(&mut ctx, ws_stream, connection_id).await
            }
            Some(Err(e)) => Outcome::Error(e.to_string()),
        };

        match outcome {
            Outcome::Shutdown => {
                crate::log_info!("{}: socket {} shut down", ctx.label, connection_id);
                ctx.set_state(ConnectionState::Closed);
                return;
            }
            Outcome::Error(reason) => {
                crate::log_error!("{}: socket {} error: {}", ctx.label, connection_id, reason);
                ctx.set_state(ConnectionState::Error { reason });
                if !ctx.reconnect_config.retry_after_error {
                    return;
                }
            }
            Outcome::Closed => {
                crate::log_info!("{}: socket {} closed", ctx.label, connection_id);
                ctx.set_state(ConnectionState::Closed);
            }
        }

        if !ctx.reconnect_config.should_retry(attempt) {
            crate::log_warn!(
                "{}: giving up after {} reconnect attempts",
                ctx.label,
                attempt
            );
            return;
        }

        let delay = ctx.reconnect_config.delay_for_attempt(attempt);
        attempt += 1;
        crate::log_info!(
            "{}: reconnecting in {}ms (attempt {})",
            ctx.label,
            delay.as_millis(),
            attempt
        );

        tokio::select! {
            _ = shutdown_requested(&mut ctx.shutdown) => {
                crate::log_info!("{}: reconnect cancelled", ctx.label);
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn run_socket<S>(
    ctx: &mut LoopContext,
    ws_stream: tokio_tungstenite::WebSocketStream<S>,
    connection_id: Uuid,
) -> Outcome
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws_stream.split();
    let receiver = ctx.receiver.clone();
    let mut outbound = receiver.lock().await;
    let mut shutdown = ctx.shutdown.clone();

    loop {
        tokio::select! {
            _ = shutdown_requested(&mut shutdown) => {
                let _ = write.send(Message::Close(None)).await;
                return Outcome::Shutdown;
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    // No dispatch once teardown has begun.
                    if *ctx.shutdown.borrow() {
                        return Outcome::Shutdown;
                    }
                    (ctx.on_frame)(text.as_str());
                }
                Some(Ok(Message::Close(frame))) => {
                    crate::log_debug!("{}: socket {} got close frame {:?}", ctx.label, connection_id, frame);
                    return Outcome::Closed;
                }
                Some(Ok(Message::Ping(data))) => {
                    // Pong is handled automatically by tungstenite
                    crate::log_debug!("Received ping: {:?}", data);
                }
                Some(Ok(_)) => {
                    // Ignore binary, pong, etc.
                }
                Some(Err(e)) if is_disconnect(&e) => {
                    crate::log_debug!("{}: socket {} dropped: {}", ctx.label, connection_id, e);
                    return Outcome::Closed;
                }
                Some(Err(e)) => {
                    let _ = write.close().await;
                    return Outcome::Error(e.to_string());
                }
                None => return Outcome::Closed,
            },
            queued = outbound.next() => match queued {
                Some(text) => {
                    crate::log_debug!("{}: sending {}", ctx.label, text);
                    match write.send(Message::Text(text.into())).await {
                        Ok(()) => {}
                        Err(e) if is_disconnect(&e) => return Outcome::Closed,
                        Err(e) => return Outcome::Error(format!("send failed: {}", e)),
                    }
                }
                // All handles and the connection itself are gone.
                None => return Outcome::Shutdown,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_delay_is_fixed() {
        let config = ReconnectConfig::default();
        for attempt in [0, 1, 5, 100] {
            assert_eq!(config.delay_for_attempt(attempt), Duration::from_millis(2000));
        }
        assert!(config.should_retry(u32::MAX - 1));
    }

    #[test]
    fn backoff_is_capped() {
        let config = ReconnectConfig {
            delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 5000,
            max_attempts: 3,
            retry_after_error: false,
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(4000));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(5000));
        assert!(config.should_retry(2));
        assert!(!config.should_retry(3));
    }

    #[test]
    fn state_predicates() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(ConnectionState::Connecting.is_connecting());
        assert!(ConnectionState::Error { reason: "x".into() }.is_error());
        assert!(!ConnectionState::Closed.is_connected());
    }

    #[tokio::test]
    async fn bad_url_builder_is_terminal() {
        let conn = WsConnection::new(
            "test",
            ReconnectConfig::default(),
            || Err("no endpoint".to_string()),
            |_| {},
        );
        assert!(conn.connect());
        conn.join().await;
        assert_eq!(
            conn.state(),
            ConnectionState::Error {
                reason: "no endpoint".to_string()
            }
        );
    }

    #[test]
    fn peer_going_away_is_a_close() {
        assert!(is_disconnect(&WsError::Protocol(
            ProtocolError::ResetWithoutClosingHandshake
        )));
        assert!(is_disconnect(&WsError::ConnectionClosed));
        assert!(is_disconnect(&WsError::Io(io::Error::from(
            io::ErrorKind::ConnectionReset
        ))));
        assert!(!is_disconnect(&WsError::Protocol(ProtocolError::NonZeroReservedBits)));
        assert!(!is_disconnect(&WsError::Io(io::Error::from(
            io::ErrorKind::PermissionDenied
        ))));
    }

    #[tokio::test]
    async fn connect_right_after_shutdown_starts_a_new_run() {
        // Accepts TCP but never answers the handshake, so the run stays live.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let conn = WsConnection::new(
            "test",
            ReconnectConfig::default(),
            move || Ok(url.clone()),
            |_| {},
        );
        assert!(conn.connect());
        assert!(!conn.connect());

        conn.shutdown();
        assert!(conn.connect());
        assert_eq!(conn.state(), ConnectionState::Connecting);

        conn.shutdown();
        conn.join().await;
    }

    #[tokio::test]
    async fn handle_queues_frames_before_connect() {
        let conn = WsConnection::new("test", ReconnectConfig::default(), || Ok(String::new()), |_| {});
        let handle = conn.handle();
        assert!(handle.send_json(&serde_json::json!({ "type": "PING" })).is_ok());
        assert_eq!(handle.label, "test");
    }
}

//! Calibra realtime client - headless entry point
//!
//! Connects to the realtime feed, keeps the stores current and logs what
//! happens until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use calibra_client::logging::{self, DEFAULT_FILTER};
use calibra_client::{log_info, log_warn};
use calibra_client::{ClientConfig, ConnectionState, RealtimeManager, Storage, ToastBoard};

/// How often expired toasts are swept.
const TOAST_SWEEP_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(DEFAULT_FILTER);

    let config = ClientConfig::from_env().context("invalid configuration")?;
    let endpoint = config.endpoint()?.to_string();
    log_info!(
        "Starting realtime client ({} environment) against {}",
        config.environment.name(),
        endpoint
    );

    let storage = Storage::platform();
    if storage.is_none() {
        log_warn!("No config directory available, connecting without an access token");
    }

    let board = Arc::new(ToastBoard::new());
    spawn_toast_sweeper(board.clone());

    let manager = RealtimeManager::new(&config, storage, board);
    let mut states = manager.subscribe_state();
    manager.connect();

    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log_info!("Interrupted, shutting down");
                break Ok(());
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let state = states.borrow_and_update().clone();
                log_info!("Connection state: {:?}", state);
                if let ConnectionState::Error { reason } = state {
                    if !config.reconnect.retry_after_error {
                        break Err(reason);
                    }
                }
            }
        }
    };

    manager.shutdown();
    manager.join().await;

    let stats = manager.router().stats();
    let devices = manager.devices().snapshot();
    log_info!(
        "Processed {} messages ({} dropped), tracking {} devices",
        stats.accepted,
        stats.dropped,
        devices.devices.len()
    );

    match result {
        Ok(()) => Ok(()),
        Err(reason) => bail!("realtime connection failed: {}", reason),
    }
}

/// Log new toasts and drop them once they expire.
fn spawn_toast_sweeper(board: Arc<ToastBoard>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TOAST_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let dismissed = board.dismiss_expired(chrono::Utc::now());
            if dismissed > 0 {
                calibra_client::log_debug!("Dismissed {} expired toasts", dismissed);
            }
        }
    });
}

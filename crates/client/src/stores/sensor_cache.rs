//! Chamber → pattern → sensor cache with windowed reading history.
//!
//! The cache is seeded from a full fetch (outside this crate) and then kept
//! current by splicing `CALIBRATION_SENSOR_UPDATE` messages into it. Each
//! splice produces a new snapshot; an update that does not match the cache
//! leaves the previous snapshot in place, pointer-equal.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use calibra_shared::{CalibrationSensorUpdate, Chamber, EntityId, SensorReading, ServerEvent};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;

use crate::ws::{DedupGuard, RoutedMessage};

/// Shared, immutable cache snapshot.
pub type ChamberCache = Arc<Vec<Chamber>>;

/// Retention policy for a sensor's reading series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryWindow {
    /// Keep at most N points, newest by arrival.
    LastPoints(usize),
    /// Keep points no older than N minutes.
    LastMinutes(u32),
}

impl Default for HistoryWindow {
    fn default() -> Self {
        HistoryWindow::LastPoints(100)
    }
}

impl HistoryWindow {
    /// Trim `readings` (oldest first) to satisfy the window.
    pub fn trim(&self, readings: &mut Vec<SensorReading>, now: DateTime<Utc>) {
        match *self {
            HistoryWindow::LastPoints(limit) => {
                if readings.len() > limit {
                    readings.drain(..readings.len() - limit);
                }
            }
            HistoryWindow::LastMinutes(minutes) => {
                let cutoff = now - Duration::minutes(i64::from(minutes));
                readings.retain(|r| r.timestamp >= cutoff);
            }
        }
    }
}

impl FromStr for HistoryWindow {
    type Err = String;

    /// Parses `points:N` or `minutes:N`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (mode, bound) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("missing `:` in {:?}", s))?;
        let bound = bound.trim();
        match mode.trim().to_lowercase().as_str() {
            "points" => bound
                .parse()
                .map(HistoryWindow::LastPoints)
                .map_err(|e| format!("bad point count {:?}: {}", bound, e)),
            "minutes" => bound
                .parse()
                .map(HistoryWindow::LastMinutes)
                .map_err(|e| format!("bad minute count {:?}: {}", bound, e)),
            other => Err(format!("unknown window mode {:?}", other)),
        }
    }
}

/// Result of offering a message to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Same message as the one processed last.
    Duplicate,
    /// Chamber, pattern or sensor not in the cache.
    Unmatched,
    /// Not a sensor update.
    Ignored,
}

/// Splice one sensor update into a snapshot.
///
/// Returns the input snapshot unchanged (same `Arc`) when any of the ids is
/// missing.
pub fn splice_sensor_update(
    cache: &ChamberCache,
    update: &CalibrationSensorUpdate,
    window: HistoryWindow,
    now: DateTime<Utc>,
) -> ChamberCache {
    let Some((c, p, s)) = locate(cache, &update.chamber_id, &update.pattern_id, &update.sensor_id)
    else {
        return Arc::clone(cache);
    };

    let mut next = Arc::clone(cache);
    let sensor = &mut Arc::make_mut(&mut next)[c].patterns[p].sensors[s];
    sensor.readings.push(update.new_reading.clone());
    window.trim(&mut sensor.readings, now);

    if let Some(t) = update.last_temperature {
        sensor.last_temperature = Some(t);
    }
    if let Some(h) = update.last_humidity {
        sensor.last_humidity = Some(h);
    }
    if let Some(seen) = update.last_seen {
        sensor.last_seen = Some(seen);
    }
    next
}

fn locate(
    chambers: &[Chamber],
    chamber_id: &EntityId,
    pattern_id: &EntityId,
    sensor_id: &EntityId,
) -> Option<(usize, usize, usize)> {
    let c = chambers.iter().position(|c| &c.id == chamber_id)?;
    let p = chambers[c].patterns.iter().position(|p| &p.id == pattern_id)?;
    let s = chambers[c].patterns[p]
        .sensors
        .iter()
        .position(|s| &s.id == sensor_id)?;
    Some((c, p, s))
}

/// Observable chamber cache kept current from the realtime feed.
pub struct SensorCache {
    cache: watch::Sender<ChamberCache>,
    window: Mutex<HistoryWindow>,
    guard: Mutex<DedupGuard>,
    unmatched: AtomicU64,
}

impl Default for SensorCache {
    fn default() -> Self {
        Self::new(HistoryWindow::default())
    }
}

impl SensorCache {
    pub fn new(window: HistoryWindow) -> Self {
        let (cache, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            cache,
            window: Mutex::new(window),
            guard: Mutex::new(DedupGuard::default()),
            unmatched: AtomicU64::new(0),
        }
    }

    /// Replace the cache with a freshly fetched chamber list.
    pub fn seed(&self, chambers: Vec<Chamber>) {
        self.cache.send_replace(Arc::new(chambers));
    }

    pub fn snapshot(&self) -> ChamberCache {
        self.cache.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChamberCache> {
        self.cache.subscribe()
    }

    pub fn window(&self) -> HistoryWindow {
        *self.window.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Change the retention policy; applies from the next insertion on.
    pub fn set_window(&self, window: HistoryWindow) {
        *self.window.lock().unwrap_or_else(|e| e.into_inner()) = window;
    }

    /// Number of updates dropped because their target was not cached.
    pub fn unmatched_count(&self) -> u64 {
        self.unmatched.load(Ordering::Relaxed)
    }

    pub fn sensor_history(
        &self,
        chamber_id: &EntityId,
        pattern_id: &EntityId,
        sensor_id: &EntityId,
    ) -> Option<Vec<SensorReading>> {
        let cache = self.cache.borrow();
        let (c, p, s) = locate(&cache, chamber_id, pattern_id, sensor_id)?;
        Some(cache[c].patterns[p].sensors[s].readings.clone())
    }

    /// Offer a routed message; only sensor updates are applied, once each.
    pub fn apply(&self, message: &RoutedMessage) -> ApplyOutcome {
        let ServerEvent::CalibrationSensorUpdate(update) = &message.event else {
            return ApplyOutcome::Ignored;
        };
        let first = self
            .guard
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .first_sight(message.seq);
        if !first {
            return ApplyOutcome::Duplicate;
        }
        self.apply_sensor_update_at(update, Utc::now())
    }

    pub fn apply_sensor_update(&self, update: &CalibrationSensorUpdate) -> ApplyOutcome {
        self.apply_sensor_update_at(update, Utc::now())
    }

    /// Apply an update with an explicit clock for the minutes window.
    pub fn apply_sensor_update_at(
        &self,
        update: &CalibrationSensorUpdate,
        now: DateTime<Utc>,
    ) -> ApplyOutcome {
        let window = self.window();
        let applied = self.cache.send_if_modified(|cache| {
            let next = splice_sensor_update(cache, update, window, now);
            if Arc::ptr_eq(&next, cache) {
                return false;
            }
            *cache = next;
            true
        });

        if applied {
            ApplyOutcome::Applied
        } else {
            self.unmatched.fetch_add(1, Ordering::Relaxed);
            crate::log_debug!(
                "No cached sensor {}/{}/{}, update dropped",
                update.chamber_id,
                update.pattern_id,
                update.sensor_id
            );
            ApplyOutcome::Unmatched
        }
    }
}

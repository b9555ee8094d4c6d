//! Stall clock derived from telemetry snapshots.
//!
//! Everything here is synchronous and takes `now` explicitly; the monitor
//! task in [`crate::monitor`] owns a [`MonitorState`] and feeds it poll
//! results and timer ticks.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::types::SensorStatus;

pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_FIRST_LAYER_TIMEOUT_MS: u64 = 8000;

/// Fraction of the active timeout past which a stall is shown as an error.
pub const ALERT_FRACTION: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Warning,
    Error,
}

/// Threshold for the current print phase.
///
/// The first-layer timeout applies only while the printer reports printing
/// and the current layer is known and at most 1.
pub fn active_timeout(status: &SensorStatus) -> u64 {
    let timeout = status
        .settings
        .as_ref()
        .and_then(|s| s.timeout)
        .unwrap_or(DEFAULT_TIMEOUT_MS);
    let first_layer_timeout = status
        .settings
        .as_ref()
        .and_then(|s| s.first_layer_timeout)
        .unwrap_or(DEFAULT_FIRST_LAYER_TIMEOUT_MS);

    let first_layer =
        status.elegoo.is_printing && status.elegoo.current_layer.is_some_and(|layer| layer <= 1);
    if first_layer {
        first_layer_timeout
    } else {
        timeout
    }
}

pub fn severity(stopped: bool, elapsed: Duration, active_timeout_ms: u64) -> Severity {
    if !stopped {
        Severity::Success
    } else if elapsed.as_millis() as f64 > active_timeout_ms as f64 * ALERT_FRACTION {
        Severity::Error
    } else {
        Severity::Warning
    }
}

/// Derived view of the stall clock at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutState {
    pub stopped_since: Instant,
    pub elapsed: Duration,
    pub active_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct MonitorState {
    snapshot: SensorStatus,
    stopped_since: Instant,
    elapsed: Duration,
    loading: bool,
    updated_at: Option<DateTime<Utc>>,
}

impl MonitorState {
    pub fn new(now: Instant) -> Self {
        MonitorState {
            snapshot: SensorStatus::default(),
            stopped_since: now,
            elapsed: Duration::ZERO,
            loading: true,
            updated_at: None,
        }
    }

    pub fn snapshot(&self) -> &SensorStatus {
        &self.snapshot
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// True until the first poll has completed, successfully or not.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Wall-clock time of the last successful poll.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn active_timeout(&self) -> u64 {
        active_timeout(&self.snapshot)
    }

    pub fn severity(&self) -> Severity {
        severity(self.snapshot.stopped, self.elapsed, self.active_timeout())
    }

    pub fn timeout_state(&self) -> TimeoutState {
        TimeoutState {
            stopped_since: self.stopped_since,
            elapsed: self.elapsed,
            active_timeout_ms: self.active_timeout(),
        }
    }

    /// Takes a fresh snapshot, moving the stall baseline on motion edges.
    pub fn apply(&mut self, incoming: SensorStatus, now: Instant) {
        let was_moving = !self.snapshot.stopped;
        let is_moving = !incoming.stopped;

        if incoming.elegoo.is_actively_printing() {
            if was_moving && !is_moving {
                debug!("filament motion stopped while printing");
                self.stopped_since = now;
            } else if !was_moving && is_moving {
                debug!("filament motion resumed");
                self.stopped_since = now;
                self.elapsed = Duration::ZERO;
            }
        } else {
            self.elapsed = Duration::ZERO;
        }

        self.snapshot = incoming;
        self.loading = false;
        self.updated_at = Some(Utc::now());
    }

    /// A poll failed; the previous snapshot stays on display.
    pub fn poll_failed(&mut self) {
        self.loading = false;
    }

    /// Elapsed-timer tick.
    pub fn tick(&mut self, now: Instant) {
        let status = &self.snapshot;
        self.elapsed = if status.stopped && status.elegoo.is_actively_printing() {
            now.saturating_duration_since(self.stopped_since)
        } else {
            Duration::ZERO
        };
    }
}

//! Liveness tracking for a subscription's frame feed.
//!
//! Every inbound frame refreshes the last-seen instant. While the monitor is
//! armed a background task waits for the alarm deadline; if no frame arrives
//! in time a single [`LivenessError`] is emitted for that silence episode. The
//! next frame starts a new episode.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{
    sync::{Notify, mpsc},
    time::{self, Instant},
};
use tracing::{debug, warn};

use crate::error::LivenessError;

/// Missed heartbeats tolerated before the alarm fires.
pub const ALARM_MULTIPLIER: u32 = 3;

#[derive(Debug)]
struct MonitorState {
    last_seen: Instant,
    alarm_after: Option<Duration>,
    armed: bool,
    alarmed: bool,
    closed: bool,
}

impl MonitorState {
    fn deadline(&self) -> Option<Instant> {
        if !self.armed || self.alarmed {
            return None;
        }
        self.alarm_after.map(|after| self.last_seen + after)
    }
}

#[derive(Debug)]
struct MonitorInner {
    state: Mutex<MonitorState>,
    changed: Notify,
}

/// Shared heartbeat monitor for one subscription.
///
/// Cloning yields another handle to the same monitor.
#[derive(Clone, Debug)]
pub struct HeartbeatMonitor {
    inner: Arc<MonitorInner>,
}

impl Default for HeartbeatMonitor {
    fn default() -> Self { Self::new() }
}

impl HeartbeatMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                state: Mutex::new(MonitorState {
                    last_seen: Instant::now(),
                    alarm_after: None,
                    armed: false,
                    alarmed: false,
                    closed: false,
                }),
                changed: Notify::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MonitorState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record that a frame arrived, ending any silence episode.
    pub fn record_frame(&self) {
        let mut state = self.state();
        state.last_seen = Instant::now();
        state.alarmed = false;
        drop(state);
        self.inner.changed.notify_one();
    }

    /// Apply the idle heartbeat requested by the latest pull.
    ///
    /// Returns `true` when heartbeats are enabled. The alarm fires after
    /// [`ALARM_MULTIPLIER`] idle intervals without a frame.
    pub fn configure(&self, idle_heartbeat: Option<Duration>) -> bool {
        let mut state = self.state();
        state.alarm_after = idle_heartbeat.map(|hb| hb * ALARM_MULTIPLIER);
        state.alarm_after.is_some()
    }

    /// Start, or restart from now, the alarm countdown.
    ///
    /// Has no effect while heartbeats are not configured.
    pub fn arm(&self) {
        let mut state = self.state();
        if state.alarm_after.is_none() || state.closed {
            return;
        }
        state.armed = true;
        state.alarmed = false;
        state.last_seen = Instant::now();
        drop(state);
        self.inner.changed.notify_one();
    }

    /// Stop the alarm countdown.
    pub fn disarm(&self) {
        let mut state = self.state();
        state.armed = false;
        drop(state);
        self.inner.changed.notify_one();
    }

    /// Permanently stop the monitor and its background task.
    pub fn shutdown(&self) {
        let mut state = self.state();
        state.armed = false;
        state.closed = true;
        drop(state);
        self.inner.changed.notify_one();
    }

    #[must_use]
    pub fn is_armed(&self) -> bool { self.state().armed }

    #[must_use]
    pub fn alarm_period(&self) -> Option<Duration> { self.state().alarm_after }

    fn check_alarm(&self) -> Option<LivenessError> {
        let mut state = self.state();
        let deadline = state.deadline()?;
        let now = Instant::now();
        if now < deadline {
            return None;
        }
        state.alarmed = true;
        Some(LivenessError {
            silent_for: now.saturating_duration_since(state.last_seen),
        })
    }

    /// Drive the alarm timer until [`HeartbeatMonitor::shutdown`] is called or
    /// the receiving side of `alarms` goes away.
    pub async fn run(self, alarms: mpsc::UnboundedSender<LivenessError>) {
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let state = self.state();
                if state.closed {
                    debug!("heartbeat monitor stopped");
                    return;
                }
                state.deadline()
            };

            let Some(deadline) = deadline else {
                notified.await;
                continue;
            };

            tokio::select! {
                () = &mut notified => {}
                () = time::sleep_until(deadline) => {
                    if let Some(alarm) = self.check_alarm() {
                        warn!(silent_for = ?alarm.silent_for, "heartbeat alarm");
                        if alarms.send(alarm).is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

// Sliding-window admission control for every mutating call to a feed.
//
// At most `max_requests` grants inside any `time_window`. There is no release: a slot
// frees itself once its timestamp ages out of the window.
//
// Blocked callers park on a `Notify` with a timeout equal to the time until the oldest
// grant expires, so nobody polls. All waiters are woken together on reconfiguration and
// each re-checks the window; there is no ticket order, so under heavy contention a
// caller can lose the race repeatedly. That is an accepted limit at the handful of
// feeds this runs with.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Emit one sampled debug line per this many grant/deny events.
const LOG_SAMPLE_EVERY: u64 = 50;

#[derive(Debug, Error, PartialEq)]
pub enum AdmissionError {
    #[error("Invalid limits: {0}")]
    InvalidLimits(String),
}

/// Observability snapshot of one controller.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AdmissionStats {
    pub name: String,
    pub max_requests: usize,
    pub time_window_s: f64,
    pub in_window: usize,
    pub utilization: f64,
    pub total_acquired: u64,
    pub total_denied: u64,
    pub total_time_waited_s: f64,
}

#[derive(Debug)]
struct WindowState {
    max_requests: usize,
    time_window: Duration,
    /// Grant times, oldest first.
    events: VecDeque<Instant>,
    total_acquired: u64,
    total_denied: u64,
    total_waited: Duration,
    log_counter: u64,
}

impl WindowState {
    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.events.front() {
            if now.saturating_duration_since(*oldest) >= self.time_window {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    fn has_room(&self) -> bool {
        self.events.len() < self.max_requests
    }

    /// Time until the oldest in-window grant expires. Call after `prune`.
    fn time_until_slot(&self, now: Instant) -> Duration {
        match self.events.front() {
            Some(oldest) if !self.has_room() => self
                .time_window
                .saturating_sub(now.saturating_duration_since(*oldest)),
            _ => Duration::ZERO,
        }
    }

    fn utilization(&self) -> f64 {
        (self.events.len() as f64 / self.max_requests as f64).min(1.0)
    }

    fn sampled(&mut self) -> bool {
        self.log_counter += 1;
        self.log_counter % LOG_SAMPLE_EVERY == 0
    }
}

fn validate(max_requests: usize, time_window: Duration) -> Result<(), AdmissionError> {
    if max_requests == 0 {
        return Err(AdmissionError::InvalidLimits(
            "max_requests must be >= 1".to_string(),
        ));
    }
    if time_window.is_zero() {
        return Err(AdmissionError::InvalidLimits(
            "time_window must be > 0".to_string(),
        ));
    }
    Ok(())
}

pub struct AdmissionController {
    name: String,
    state: Mutex<WindowState>,
    changed: Notify,
}

impl AdmissionController {
    pub fn new(max_requests: usize, time_window: Duration) -> Result<Self, AdmissionError> {
        Self::named("default", max_requests, time_window)
    }

    pub fn named(
        name: impl Into<String>,
        max_requests: usize,
        time_window: Duration,
    ) -> Result<Self, AdmissionError> {
        validate(max_requests, time_window)?;
        let name = name.into();

        tracing::info!(
            limiter = %name,
            max_requests,
            time_window_s = time_window.as_secs_f64(),
            "Admission controller initialized"
        );

        Ok(Self {
            name,
            state: Mutex::new(WindowState {
                max_requests,
                time_window,
                events: VecDeque::with_capacity(max_requests),
                total_acquired: 0,
                total_denied: 0,
                total_waited: Duration::ZERO,
                log_counter: 0,
            }),
            changed: Notify::new(),
        })
    }

    fn state(&self) -> MutexGuard<'_, WindowState> {
        // The window is always left consistent between statements, so a poisoned lock is usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Try to take one slot.
    ///
    /// Non-blocking: returns immediately. Blocking: waits until a slot frees or `timeout`
    /// elapses (`None` waits indefinitely). The returned future holds no slot until it
    /// resolves to `true`, so dropping it mid-wait (e.g. on shutdown) is safe.
    pub async fn acquire(&self, blocking: bool, timeout: Option<Duration>) -> bool {
        let started = Instant::now();
        // A timeout too large to represent is the same as no timeout.
        let deadline = timeout.and_then(|t| started.checked_add(t));

        loop {
            // Register interest before inspecting state so a wake between the check and the
            // wait is not lost.
            let notified = self.changed.notified();

            let wait_for = {
                let mut state = self.state();
                let now = Instant::now();
                state.prune(now);

                if state.has_room() {
                    state.events.push_back(now);
                    state.total_acquired += 1;
                    let waited = now.saturating_duration_since(started);
                    state.total_waited += waited;
                    if state.sampled() {
                        tracing::debug!(
                            limiter = %self.name,
                            in_window = state.events.len(),
                            waited_s = waited.as_secs_f64(),
                            total_acquired = state.total_acquired,
                            "Admission granted"
                        );
                    }
                    return true;
                }

                if !blocking {
                    state.total_denied += 1;
                    if state.sampled() {
                        tracing::debug!(
                            limiter = %self.name,
                            in_window = state.events.len(),
                            total_denied = state.total_denied,
                            "Admission denied (non-blocking)"
                        );
                    }
                    return false;
                }

                let mut wait_for = state.time_until_slot(now);
                if let Some(deadline) = deadline {
                    let remaining = deadline.saturating_duration_since(now);
                    if remaining.is_zero() {
                        state.total_denied += 1;
                        tracing::info!(
                            limiter = %self.name,
                            in_window = state.events.len(),
                            timeout_s = timeout.map(|t| t.as_secs_f64()),
                            total_denied = state.total_denied,
                            "Admission timed out"
                        );
                        return false;
                    }
                    wait_for = wait_for.min(remaining);
                }

                if wait_for >= Duration::from_secs(1) || state.sampled() {
                    tracing::debug!(
                        limiter = %self.name,
                        in_window = state.events.len(),
                        wait_for_s = wait_for.as_secs_f64(),
                        "Waiting for admission slot"
                    );
                }
                wait_for
            };

            // Either a slot ages out or someone reconfigured us; re-check the window either way.
            let _ = tokio::time::timeout(wait_for, notified).await;
        }
    }

    /// Non-blocking acquire.
    pub async fn try_acquire(&self) -> bool {
        self.acquire(false, None).await
    }

    /// How long until a slot would be granted. Does not consume anything.
    pub fn next_available_in(&self) -> Duration {
        let mut state = self.state();
        let now = Instant::now();
        state.prune(now);
        state.time_until_slot(now)
    }

    /// Replace the limits and wake every waiter so it can recompute its wait.
    pub fn set_limits(
        &self,
        max_requests: usize,
        time_window: Duration,
    ) -> Result<(), AdmissionError> {
        validate(max_requests, time_window)?;

        {
            let mut state = self.state();
            let old_max = state.max_requests;
            let old_window = state.time_window;
            state.max_requests = max_requests;
            state.time_window = time_window;
            state.prune(Instant::now());

            tracing::info!(
                limiter = %self.name,
                old_max_requests = old_max,
                old_time_window_s = old_window.as_secs_f64(),
                max_requests,
                time_window_s = time_window.as_secs_f64(),
                in_window = state.events.len(),
                "Admission controller reconfigured"
            );
        }

        self.changed.notify_waiters();
        Ok(())
    }

    /// Fraction of the window currently used, in `[0, 1]`.
    pub fn utilization(&self) -> f64 {
        let mut state = self.state();
        state.prune(Instant::now());
        state.utilization()
    }

    pub fn stats(&self) -> AdmissionStats {
        let mut state = self.state();
        state.prune(Instant::now());
        AdmissionStats {
            name: self.name.clone(),
            max_requests: state.max_requests,
            time_window_s: state.time_window.as_secs_f64(),
            in_window: state.events.len(),
            utilization: state.utilization(),
            total_acquired: state.total_acquired,
            total_denied: state.total_denied,
            total_time_waited_s: state.total_waited.as_secs_f64(),
        }
    }
}

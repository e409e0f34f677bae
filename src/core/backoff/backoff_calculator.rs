// Retry delays for reconnecting to a feed.
//
// Exponential growth capped at `cap`, then spread by +/- `jitter_ratio` so that
// several feeds failing at once don't all retry in lockstep.
//
// NO I/O here - callers decide how to sleep.

use rand::Rng;
use std::time::Duration;

/// Compute a jittered exponential backoff delay in seconds.
///
/// `attempt` is 1-based; `0` is treated as `1`. The un-jittered delay is
/// `min(cap, base * 2^(attempt - 1))` and the result is drawn uniformly from
/// `[exp * (1 - jitter_ratio), exp * (1 + jitter_ratio)]`, clamped to `>= 0`.
pub fn backoff_delay<R: Rng + ?Sized>(
    attempt: u32,
    base: f64,
    cap: f64,
    jitter_ratio: f64,
    rng: &mut R,
) -> f64 {
    let exponent = attempt.max(1).saturating_sub(1).min(62) as i32;
    let exp = (base.max(0.0) * 2f64.powi(exponent)).min(cap.max(0.0));

    let jitter = exp * jitter_ratio.max(0.0);
    let low = exp - jitter;
    let high = exp + jitter;
    if high <= low {
        return exp.max(0.0);
    }

    rng.gen_range(low..=high).max(0.0)
}

/// Backoff settings bundled so a caller can hold one value instead of three floats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub jitter_ratio: f64,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration, jitter_ratio: f64) -> Self {
        Self {
            base,
            cap,
            jitter_ratio,
        }
    }

    /// Delay for the given attempt using the thread-local RNG.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    /// Delay for the given attempt with an explicit random source (deterministic in tests).
    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let secs = backoff_delay(
            attempt,
            self.base.as_secs_f64(),
            self.cap.as_secs_f64(),
            self.jitter_ratio,
            rng,
        );
        Duration::from_secs_f64(secs)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            jitter_ratio: 0.3,
        }
    }
}

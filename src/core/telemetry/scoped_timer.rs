// Start/finish logging for an operation, with a guaranteed log line on every exit path.
//
// Create it at the top of the operation, call `finish()` on success. Any other way out
// (early `?`, panic unwind, a future dropped by `select!`) hits `Drop` and logs a failure.

use std::fmt::Display;
use tokio::time::Instant;

#[must_use = "dropping the timer immediately logs the operation as failed"]
pub struct ScopedTimer {
    operation: String,
    started: Instant,
    done: bool,
}

impl ScopedTimer {
    pub fn start(operation: impl Into<String>) -> Self {
        let operation = operation.into();
        tracing::debug!("Starting: {}", operation);
        Self {
            operation,
            started: Instant::now(),
            done: false,
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn finish(mut self) {
        self.done = true;
        tracing::info!(
            elapsed_s = self.elapsed_secs(),
            "Completed: {} (took {:.4}s)",
            self.operation,
            self.elapsed_secs()
        );
    }

    pub fn fail(mut self, err: &dyn Display) {
        self.done = true;
        tracing::error!(
            elapsed_s = self.elapsed_secs(),
            "Failed: {} after {:.4}s - {}",
            self.operation,
            self.elapsed_secs(),
            err
        );
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        if !self.done {
            tracing::error!(
                elapsed_s = self.elapsed_secs(),
                "Failed: {} after {:.4}s - did not complete",
                self.operation,
                self.elapsed_secs()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_tracks_clock() {
        let timer = ScopedTimer::start("unit");
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(timer.elapsed_secs() >= 2.0);
        timer.finish();
    }

    #[test]
    fn test_all_exit_paths_are_safe() {
        // finish, fail and plain drop must all be callable without panicking.
        ScopedTimer::start("ok").finish();
        ScopedTimer::start("err").fail(&"boom");
        let _dropped = ScopedTimer::start("dropped");
    }
}

// Stream supervisor - drives one feed through the moderation pipeline.
//
// This service handles:
// - Pulling items off the feed, racing every wait against shutdown
// - Skipping items the dedup store has already seen
// - Running the rule engine and applying the verdict through the admission controller
// - Backing off on transient feed errors, pausing on unexpected ones
//
// One supervisor per feed, each on its own task. The dedup store, admission controller,
// rule engine and metrics are shared by all of them.

use super::feed_port::{Feed, FeedError};
use crate::core::admission::AdmissionController;
use crate::core::backoff::BackoffPolicy;
use crate::core::dedup::DedupStore;
use crate::core::metrics::MetricsCollector;
use crate::core::moderation::{Item, Policy, RuleEngine, RuleOutcome};
use crate::core::shutdown::ShutdownSignal;
use crate::core::telemetry::ScopedTimer;
use std::sync::Arc;
use std::time::Duration;

/// Consecutive transient failures after which the backoff stops growing.
pub const MAX_STREAM_RETRIES: u32 = 4;

const UNEXPECTED_ERROR_DELAY: Duration = Duration::from_secs(5);

/// Reconnect backoff for feeds: short cap so a flapping feed recovers quickly.
pub fn stream_backoff() -> BackoffPolicy {
    BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(30), 0.3)
}

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Connecting,
    Streaming,
    Backoff,
    Stopped,
}

/// Process-wide components every supervisor works against.
#[derive(Clone)]
pub struct Pipeline {
    pub dedup: Arc<DedupStore>,
    pub admission: Arc<AdmissionController>,
    pub engine: Arc<RuleEngine>,
    pub metrics: Arc<MetricsCollector>,
}

enum Flow {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActionResult {
    Done,
    Failed,
    /// Shutdown arrived while waiting for an admission slot.
    Cancelled,
}

enum Action<'a> {
    Approve,
    Remove,
    Reply(&'a str),
}

impl Action<'_> {
    fn label(&self) -> &'static str {
        match self {
            Action::Approve => "approve",
            Action::Remove => "remove",
            Action::Reply(_) => "reply",
        }
    }
}

// ============================================================================
// SUPERVISOR
// ============================================================================

pub struct StreamSupervisor {
    feed: Box<dyn Feed>,
    feed_name: String,
    policy: Policy,
    pipeline: Pipeline,
    shutdown: ShutdownSignal,
    backoff: BackoffPolicy,
    unexpected_delay: Duration,
    state: SupervisorState,
}

impl StreamSupervisor {
    pub fn new(
        feed: Box<dyn Feed>,
        policy: Policy,
        pipeline: Pipeline,
        shutdown: ShutdownSignal,
    ) -> Self {
        let feed_name = feed.name().to_string();
        Self {
            feed,
            feed_name,
            policy,
            pipeline,
            shutdown,
            backoff: stream_backoff(),
            unexpected_delay: UNEXPECTED_ERROR_DELAY,
            state: SupervisorState::Connecting,
        }
    }

    #[allow(dead_code)]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    #[allow(dead_code)]
    pub fn with_unexpected_delay(mut self, delay: Duration) -> Self {
        self.unexpected_delay = delay;
        self
    }

    fn set_state(&mut self, next: SupervisorState) {
        if self.state != next {
            tracing::debug!(feed = %self.feed_name, from = ?self.state, to = ?next, "Supervisor state change");
            self.state = next;
        }
    }

    /// Run until shutdown. Never returns on its own otherwise.
    pub async fn run(mut self) {
        tracing::info!(
            feed = %self.feed_name,
            rules = self.policy.rules.len(),
            "Starting stream supervisor"
        );
        self.set_state(SupervisorState::Connecting);

        let mut failures: u32 = 0;

        loop {
            let next = {
                let feed = &mut self.feed;
                let shutdown = &mut self.shutdown;
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => None,
                    next = feed.next_item() => Some(next),
                }
            };
            let Some(next) = next else { break };

            match next {
                Ok(item) => {
                    failures = 0;
                    self.set_state(SupervisorState::Streaming);
                    if let Some(item) = item {
                        if let Flow::Stop = self.handle_item(item).await {
                            break;
                        }
                    }
                }
                Err(FeedError::Transient(message)) => {
                    self.set_state(SupervisorState::Backoff);
                    self.pipeline
                        .metrics
                        .record_error(format!("{}: {}", self.feed_name, message));

                    failures = (failures + 1).min(MAX_STREAM_RETRIES);
                    if failures == MAX_STREAM_RETRIES {
                        tracing::warn!(
                            feed = %self.feed_name,
                            attempts = failures,
                            "Max retries reached for feed, continuing with the longest delay"
                        );
                    }

                    let delay = self.backoff.delay(failures);
                    tracing::warn!(
                        feed = %self.feed_name,
                        attempt = failures,
                        delay_s = delay.as_secs_f64(),
                        "Transient feed error, backing off: {}",
                        message
                    );
                    if self.shutdown.sleep(delay).await {
                        break;
                    }
                }
                Err(FeedError::Unexpected(message)) => {
                    tracing::error!(
                        feed = %self.feed_name,
                        delay_s = self.unexpected_delay.as_secs_f64(),
                        "Unexpected feed error: {}",
                        message
                    );
                    self.pipeline
                        .metrics
                        .record_error(format!("{}: {}", self.feed_name, message));
                    if self.shutdown.sleep(self.unexpected_delay).await {
                        break;
                    }
                }
            }
        }

        self.set_state(SupervisorState::Stopped);
        tracing::info!(feed = %self.feed_name, "Stream supervisor stopped");
    }

    async fn handle_item(&mut self, item: Item) -> Flow {
        if self.pipeline.dedup.contains(&item.id) {
            tracing::debug!(feed = %self.feed_name, item_id = %item.id, "Skipping already processed item");
            return Flow::Continue;
        }

        let timer = ScopedTimer::start(format!("process item {} on {}", item.id, self.feed_name));

        let Some(author) = item.author.as_ref() else {
            tracing::warn!(
                feed = %self.feed_name,
                item_id = %item.id,
                "Item has no author (deleted account?). No action taken."
            );
            self.mark_processed(&item);
            timer.finish();
            return Flow::Continue;
        };

        if self.policy.is_empty() {
            tracing::warn!(
                feed = %self.feed_name,
                item_id = %item.id,
                "No rules configured for feed. No action taken."
            );
            self.mark_processed(&item);
            timer.finish();
            return Flow::Continue;
        }

        let outcome = self
            .pipeline
            .engine
            .evaluate(&item, author, &self.feed_name, &self.policy);

        let result = match &outcome {
            RuleOutcome::Approved => {
                tracing::info!(feed = %self.feed_name, item_id = %item.id, "Item approved");
                self.perform(&item, Action::Approve).await
            }
            RuleOutcome::Removed { reason, rule_name } => {
                self.pipeline.metrics.record_rule_trigger(rule_name);
                tracing::info!(
                    feed = %self.feed_name,
                    item_id = %item.id,
                    rule = %rule_name,
                    "Removing item. Reason: {}",
                    reason
                );
                match self.perform(&item, Action::Remove).await {
                    ActionResult::Done => self.perform(&item, Action::Reply(reason)).await,
                    other => other,
                }
            }
        };

        if result == ActionResult::Cancelled {
            // Not marked seen: the item gets another look after restart.
            timer.fail(&"shutdown while waiting for admission");
            return Flow::Stop;
        }

        self.mark_processed(&item);
        timer.finish();
        Flow::Continue
    }

    /// Wait for an admission slot, then run one mutation. Failures are logged, not retried.
    async fn perform(&mut self, item: &Item, action: Action<'_>) -> ActionResult {
        let wait = self.pipeline.admission.next_available_in();
        if !wait.is_zero() {
            tracing::debug!(
                feed = %self.feed_name,
                item_id = %item.id,
                action = action.label(),
                wait_s = wait.as_secs_f64(),
                "Admission slot not immediately available"
            );
        }

        let granted = {
            let admission = &self.pipeline.admission;
            let shutdown = &mut self.shutdown;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                granted = admission.acquire(true, None) => Some(granted),
            }
        };

        match granted {
            None => return ActionResult::Cancelled,
            Some(false) => {
                tracing::warn!(
                    feed = %self.feed_name,
                    item_id = %item.id,
                    action = action.label(),
                    "Admission denied, skipping action"
                );
                return ActionResult::Failed;
            }
            Some(true) => {}
        }

        let result = match action {
            Action::Approve => self.feed.approve(item).await,
            Action::Remove => self.feed.remove(item).await,
            Action::Reply(text) => self.feed.reply(item, text).await,
        };

        match result {
            Ok(()) => {
                self.pipeline.metrics.record_action();
                tracing::debug!(feed = %self.feed_name, item_id = %item.id, action = action.label(), "Action applied");
                ActionResult::Done
            }
            Err(e) => {
                tracing::error!(
                    feed = %self.feed_name,
                    item_id = %item.id,
                    action = action.label(),
                    "Action failed: {}",
                    e
                );
                self.pipeline.metrics.record_error(format!(
                    "{} {} failed for {}: {}",
                    self.feed_name,
                    action.label(),
                    item.id,
                    e
                ));
                ActionResult::Failed
            }
        }
    }

    fn mark_processed(&self, item: &Item) {
        self.pipeline.dedup.add(&item.id);
        self.pipeline.metrics.record_item(&self.feed_name, &item.id);
    }
}

// ============================================================================
// TESTS
// ============================================================================

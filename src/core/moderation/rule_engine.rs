// Rule engine - runs a feed's ordered policy against one item.
//
// This service handles:
// - Resolving rule names from the policy file to registered implementations
// - First-match evaluation (the first rule with a reason decides the removal)
// - Containing rule failures according to each rule's fail mode
// - Recording the post in the shared posting history afterwards
//
// NO Reddit dependencies here - just pure domain logic.

use super::moderation_models::{Author, FailMode, Item, Policy, PolicySet, RuleOutcome, RuleParams};
use super::posting_history::{PostingHistory, DEFAULT_RETENTION_HOURS};
use crate::core::metrics::MetricsCollector;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

/// Reason used when a fail-closed rule errors and sets no `reason` of its own.
const FAIL_CLOSED_REASON: &str = "This post could not be verified by the automated checks.";

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Invalid parameter '{param}': {reason}")]
    InvalidParam { param: String, reason: String },

    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Evaluation failed: {0}")]
    Evaluation(String),
}

// ============================================================================
// RULE CONTRACT
// ============================================================================

/// Everything a rule may look at.
pub struct RuleContext<'a> {
    pub item: &'a Item,
    pub author: &'a Author,
    pub feed: &'a str,
    pub history: &'a PostingHistory,
    pub now: DateTime<Utc>,
}

/// A single named check.
///
/// `Ok(Some(reason))` rejects the item, `Ok(None)` has no opinion, `Err` means the rule
/// itself broke and the descriptor's fail mode decides what happens.
pub trait Rule: Send + Sync {
    fn evaluate(&self, ctx: &RuleContext<'_>, params: &RuleParams)
        -> Result<Option<String>, RuleError>;

    /// How far back this rule looks into the posting history with these params, if at all.
    fn history_window(&self, _params: &RuleParams) -> Option<Duration> {
        None
    }
}

/// Result of looking a name up in the registry.
pub enum RuleLookup<'a> {
    Registered(&'a dyn Rule),
    Missing,
}

/// Name -> implementation map, built once at startup.
#[derive(Default)]
pub struct RuleRegistry {
    rules: HashMap<String, Box<dyn Rule>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, rule: impl Rule + 'static) {
        self.rules.insert(name.into(), Box::new(rule));
    }

    pub fn resolve(&self, name: &str) -> RuleLookup<'_> {
        match self.rules.get(name) {
            Some(rule) => RuleLookup::Registered(rule.as_ref()),
            None => RuleLookup::Missing,
        }
    }

    #[allow(dead_code)]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct RuleEngine {
    registry: RuleRegistry,
    history: Arc<PostingHistory>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl RuleEngine {
    pub fn new(registry: RuleRegistry, history: Arc<PostingHistory>) -> Self {
        Self {
            registry,
            history,
            metrics: None,
        }
    }

    /// Report rule failures to `metrics` as the last error.
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[allow(dead_code)]
    pub fn history(&self) -> &PostingHistory {
        &self.history
    }

    /// Evaluate `policy` against `item` and record the post for frequency rules.
    pub fn evaluate(
        &self,
        item: &Item,
        author: &Author,
        feed: &str,
        policy: &Policy,
    ) -> RuleOutcome {
        let now = Utc::now();
        let ctx = RuleContext {
            item,
            author,
            feed,
            history: &self.history,
            now,
        };

        let outcome = self.run_policy(&ctx, policy);

        // Every post counts toward the author's frequency, removed or not.
        self.history.record(author.key(), feed, now);

        outcome
    }

    fn run_policy(&self, ctx: &RuleContext<'_>, policy: &Policy) -> RuleOutcome {
        for descriptor in &policy.rules {
            let rule = match self.registry.resolve(&descriptor.name) {
                RuleLookup::Registered(rule) => rule,
                RuleLookup::Missing => {
                    tracing::error!(
                        feed = %ctx.feed,
                        rule = %descriptor.name,
                        "Rule not found in registry. Skipping."
                    );
                    continue;
                }
            };

            tracing::debug!(feed = %ctx.feed, item_id = %ctx.item.id, rule = %descriptor.name, "Executing rule");

            match run_rule(rule, ctx, &descriptor.params) {
                Ok(Some(reason)) if !reason.is_empty() => {
                    tracing::info!(
                        feed = %ctx.feed,
                        item_id = %ctx.item.id,
                        rule = %descriptor.name,
                        "Rule triggered removal. Reason: {}",
                        reason
                    );
                    return RuleOutcome::Removed {
                        reason,
                        rule_name: descriptor.name.clone(),
                    };
                }
                Ok(_) => {}
                Err(e) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_error(format!(
                            "rule {} on {}: {}",
                            descriptor.name, ctx.item.id, e
                        ));
                    }
                    if descriptor.on_error == FailMode::Closed {
                        tracing::error!(
                            feed = %ctx.feed,
                            item_id = %ctx.item.id,
                            rule = %descriptor.name,
                            "Rule failed, treating as rejection: {}",
                            e
                        );
                        let reason = descriptor
                            .params
                            .get("reason")
                            .and_then(|v| v.as_str())
                            .unwrap_or(FAIL_CLOSED_REASON)
                            .to_string();
                        return RuleOutcome::Removed {
                            reason,
                            rule_name: descriptor.name.clone(),
                        };
                    }
                    tracing::error!(
                        feed = %ctx.feed,
                        item_id = %ctx.item.id,
                        rule = %descriptor.name,
                        "Rule failed, treating as passed: {}",
                        e
                    );
                }
            }
        }

        RuleOutcome::Approved
    }

    /// Longest posting-history window any configured rule needs, defaulting to a day.
    pub fn history_retention(registry: &RuleRegistry, policies: &PolicySet) -> Duration {
        policies
            .feeds
            .values()
            .flat_map(|policy| policy.rules.iter())
            .filter_map(|descriptor| match registry.resolve(&descriptor.name) {
                RuleLookup::Registered(rule) => rule.history_window(&descriptor.params),
                RuleLookup::Missing => None,
            })
            .max()
            .unwrap_or_else(|| Duration::hours(DEFAULT_RETENTION_HOURS))
    }
}

/// Evaluate one rule, turning a panic inside it into an ordinary rule error.
fn run_rule(
    rule: &dyn Rule,
    ctx: &RuleContext<'_>,
    params: &RuleParams,
) -> Result<Option<String>, RuleError> {
    match catch_unwind(AssertUnwindSafe(|| rule.evaluate(ctx, params))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(RuleError::Evaluation(format!("rule panicked: {}", message)))
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::moderation_models::RuleDescriptor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Test rule that counts calls and returns a fixed verdict.
    struct Scripted {
        calls: Arc<AtomicUsize>,
        verdict: Result<Option<&'static str>, &'static str>,
    }

    impl Rule for Scripted {
        fn evaluate(
            &self,
            _ctx: &RuleContext<'_>,
            _params: &RuleParams,
        ) -> Result<Option<String>, RuleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.verdict {
                Ok(reason) => Ok(reason.map(str::to_string)),
                Err(msg) => Err(RuleError::Evaluation(msg.to_string())),
            }
        }
    }

    fn scripted(
        registry: &mut RuleRegistry,
        name: &str,
        verdict: Result<Option<&'static str>, &'static str>,
    ) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        registry.register(
            name,
            Scripted {
                calls: Arc::clone(&calls),
                verdict,
            },
        );
        calls
    }

    fn sample_author() -> Author {
        Author {
            id: Some("t2_author".to_string()),
            name: "author".to_string(),
            created_at: None,
            link_karma: 0,
            comment_karma: 0,
        }
    }

    fn sample_item() -> Item {
        Item {
            id: "item1".to_string(),
            author: Some(sample_author()),
            title: "Title".to_string(),
            body: "Body".to_string(),
            flair: None,
            over_18: false,
            created_at: Utc::now(),
        }
    }

    fn policy(names: &[&str]) -> Policy {
        Policy::new(names.iter().map(|n| RuleDescriptor::new(*n)).collect())
    }

    #[test]
    fn test_first_match_short_circuits() {
        let mut registry = RuleRegistry::new();
        let a = scripted(&mut registry, "A", Ok(None));
        let b = scripted(&mut registry, "B", Ok(Some("B says no")));
        let c = scripted(&mut registry, "C", Ok(Some("C says no")));
        let engine = RuleEngine::new(registry, Arc::new(PostingHistory::default()));

        let outcome = engine.evaluate(&sample_item(), &sample_author(), "rust", &policy(&["A", "B", "C"]));

        assert_eq!(
            outcome,
            RuleOutcome::Removed {
                reason: "B says no".to_string(),
                rule_name: "B".to_string()
            }
        );
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert_eq!(c.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unknown_rule_is_skipped() {
        let mut registry = RuleRegistry::new();
        let after = scripted(&mut registry, "after", Ok(Some("caught")));
        let engine = RuleEngine::new(registry, Arc::new(PostingHistory::default()));

        let outcome = engine.evaluate(
            &sample_item(),
            &sample_author(),
            "rust",
            &policy(&["does_not_exist", "after"]),
        );

        assert!(outcome.is_removed());
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_trigger_approves() {
        let mut registry = RuleRegistry::new();
        scripted(&mut registry, "A", Ok(None));
        scripted(&mut registry, "B", Ok(Some("")));
        let engine = RuleEngine::new(registry, Arc::new(PostingHistory::default()));

        let outcome = engine.evaluate(&sample_item(), &sample_author(), "rust", &policy(&["A", "B"]));
        assert_eq!(outcome, RuleOutcome::Approved);
    }

    #[test]
    fn test_failing_rule_fails_open_by_default() {
        let mut registry = RuleRegistry::new();
        scripted(&mut registry, "broken", Err("kaboom"));
        let next = scripted(&mut registry, "next", Ok(None));
        let engine = RuleEngine::new(registry, Arc::new(PostingHistory::default()));

        let outcome = engine.evaluate(&sample_item(), &sample_author(), "rust", &policy(&["broken", "next"]));

        assert_eq!(outcome, RuleOutcome::Approved);
        assert_eq!(next.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_rule_can_fail_closed() {
        let mut registry = RuleRegistry::new();
        scripted(&mut registry, "broken", Err("kaboom"));
        let next = scripted(&mut registry, "next", Ok(None));
        let engine = RuleEngine::new(registry, Arc::new(PostingHistory::default()));

        let policy = Policy::new(vec![
            RuleDescriptor::new("broken").fail_closed(),
            RuleDescriptor::new("next"),
        ]);
        let outcome = engine.evaluate(&sample_item(), &sample_author(), "rust", &policy);

        match outcome {
            RuleOutcome::Removed { rule_name, reason } => {
                assert_eq!(rule_name, "broken");
                assert_eq!(reason, FAIL_CLOSED_REASON);
            }
            other => panic!("expected removal, got {:?}", other),
        }
        assert_eq!(next.load(Ordering::SeqCst), 0);
    }

    struct Panicking;

    impl Rule for Panicking {
        fn evaluate(
            &self,
            _ctx: &RuleContext<'_>,
            _params: &RuleParams,
        ) -> Result<Option<String>, RuleError> {
            panic!("rule bug")
        }
    }

    #[test]
    fn test_panicking_rule_is_contained_by_fail_mode() {
        let mut registry = RuleRegistry::new();
        registry.register("panics", Panicking);
        let next = scripted(&mut registry, "next", Ok(Some("next says no")));
        let engine = RuleEngine::new(registry, Arc::new(PostingHistory::default()));

        let open = engine.evaluate(&sample_item(), &sample_author(), "rust", &policy(&["panics", "next"]));
        assert_eq!(
            open,
            RuleOutcome::Removed {
                reason: "next says no".to_string(),
                rule_name: "next".to_string()
            }
        );
        assert_eq!(next.load(Ordering::SeqCst), 1);

        let closed = Policy::new(vec![
            RuleDescriptor::new("panics").fail_closed(),
            RuleDescriptor::new("next"),
        ]);
        match engine.evaluate(&sample_item(), &sample_author(), "rust", &closed) {
            RuleOutcome::Removed { rule_name, .. } => assert_eq!(rule_name, "panics"),
            other => panic!("expected removal, got {:?}", other),
        }
        assert_eq!(next.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rule_failures_reach_metrics() {
        let mut registry = RuleRegistry::new();
        scripted(&mut registry, "broken", Err("kaboom"));
        registry.register("panics", Panicking);
        let metrics = Arc::new(MetricsCollector::new());
        let engine = RuleEngine::new(registry, Arc::new(PostingHistory::default()))
            .with_metrics(Arc::clone(&metrics));

        engine.evaluate(&sample_item(), &sample_author(), "rust", &policy(&["broken"]));
        let last = metrics.snapshot().last_error.unwrap().message;
        assert!(last.contains("broken"), "{last}");
        assert!(last.contains("kaboom"), "{last}");

        engine.evaluate(&sample_item(), &sample_author(), "rust", &policy(&["panics"]));
        let last = metrics.snapshot().last_error.unwrap().message;
        assert!(last.contains("rule bug"), "{last}");
    }

    #[test]
    fn test_every_evaluation_is_recorded_in_history() {
        let mut registry = RuleRegistry::new();
        scripted(&mut registry, "no", Ok(Some("nope")));
        let history = Arc::new(PostingHistory::default());
        let engine = RuleEngine::new(registry, Arc::clone(&history));
        let author = sample_author();

        engine.evaluate(&sample_item(), &author, "rust", &policy(&[]));
        engine.evaluate(&sample_item(), &author, "rust", &policy(&["no"]));

        let since = Utc::now() - Duration::minutes(1);
        assert_eq!(history.count_since(author.key(), "rust", since), 2);
    }

    #[test]
    fn test_history_retention_uses_longest_declared_window() {
        struct Windowed;
        impl Rule for Windowed {
            fn evaluate(
                &self,
                _ctx: &RuleContext<'_>,
                _params: &RuleParams,
            ) -> Result<Option<String>, RuleError> {
                Ok(None)
            }
            fn history_window(&self, params: &RuleParams) -> Option<Duration> {
                params.get("hours").and_then(|v| v.as_i64()).map(Duration::hours)
            }
        }

        let mut registry = RuleRegistry::new();
        registry.register("windowed", Windowed);

        let mut set = PolicySet::default();
        set.feeds.insert(
            "a".to_string(),
            Policy::new(vec![RuleDescriptor::new("windowed").with_param("hours", 48.into())]),
        );
        set.feeds.insert(
            "b".to_string(),
            Policy::new(vec![RuleDescriptor::new("windowed").with_param("hours", 72.into())]),
        );

        assert_eq!(RuleEngine::history_retention(&registry, &set), Duration::hours(72));
        assert_eq!(
            RuleEngine::history_retention(&registry, &PolicySet::default()),
            Duration::hours(DEFAULT_RETENTION_HOURS)
        );
    }
}

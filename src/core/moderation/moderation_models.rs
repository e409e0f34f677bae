// Moderation domain models - items coming off a feed, the policy applied to them,
// and the verdict.
//
// These are pure domain types with no Reddit dependencies.
// The infra layer converts API payloads into these.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Free-form rule parameters exactly as written in the policy file.
pub type RuleParams = serde_json::Map<String, serde_json::Value>;

/// Who posted an item.
#[derive(Debug, Clone, PartialEq)]
pub struct Author {
    /// Platform id; may be missing for suspended or shadow-banned accounts
    pub id: Option<String>,
    pub name: String,
    /// When the account was created, if the platform told us
    pub created_at: Option<DateTime<Utc>>,
    pub link_karma: i64,
    pub comment_karma: i64,
}

impl Author {
    /// Stable key for per-author bookkeeping: the id when known, otherwise the name.
    pub fn key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }

    pub fn combined_karma(&self) -> i64 {
        self.link_karma.saturating_add(self.comment_karma)
    }
}

/// One unit of content observed on a feed. Immutable once read.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: String,
    /// `None` when the author deleted their account
    pub author: Option<Author>,
    pub title: String,
    pub body: String,
    pub flair: Option<String>,
    pub over_18: bool,
    pub created_at: DateTime<Utc>,
}

/// What to do when a rule itself fails while evaluating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    /// Treat the failure as "no opinion" and keep going
    #[default]
    Open,
    /// Treat the failure as a rejection by this rule
    Closed,
}

/// One entry of a policy: which rule to run and with what parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDescriptor {
    pub name: String,
    #[serde(default)]
    pub params: RuleParams,
    #[serde(default)]
    pub on_error: FailMode,
}

impl RuleDescriptor {
    #[allow(dead_code)]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: RuleParams::new(),
            on_error: FailMode::Open,
        }
    }

    #[allow(dead_code)]
    pub fn with_param(mut self, key: &str, value: serde_json::Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    #[allow(dead_code)]
    pub fn fail_closed(mut self) -> Self {
        self.on_error = FailMode::Closed;
        self
    }
}

/// Ordered rules for one feed. Order matters: the first rejection wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub rules: Vec<RuleDescriptor>,
}

impl Policy {
    pub fn new(rules: Vec<RuleDescriptor>) -> Self {
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Every feed's policy, as loaded from the rules file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicySet {
    #[serde(default, alias = "subreddits")]
    pub feeds: HashMap<String, Policy>,
}

impl PolicySet {
    /// Policy for `feed`, empty when the feed is not configured.
    pub fn policy_for(&self, feed: &str) -> Policy {
        self.feeds.get(feed).cloned().unwrap_or_default()
    }
}

/// Verdict for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    Approved,
    Removed { reason: String, rule_name: String },
}

impl RuleOutcome {
    #[allow(dead_code)]
    pub fn is_removed(&self) -> bool {
        matches!(self, RuleOutcome::Removed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_author_key_prefers_id() {
        let mut author = Author {
            id: Some("t2_abc".to_string()),
            name: "someone".to_string(),
            created_at: None,
            link_karma: 3,
            comment_karma: 4,
        };
        assert_eq!(author.key(), "t2_abc");
        assert_eq!(author.combined_karma(), 7);

        author.id = None;
        assert_eq!(author.key(), "someone");
    }

    #[test]
    fn test_policy_set_parses_rules_file_shape() {
        let json = r#"{
            "subreddits": {
                "rust": {
                    "rules": [
                        {"name": "require_ad_flair", "params": {"flairs": ["Ad"]}},
                        {"name": "validate_post_format", "on_error": "closed"}
                    ]
                }
            }
        }"#;

        let set: PolicySet = serde_json::from_str(json).unwrap();
        let policy = set.policy_for("rust");
        assert_eq!(policy.rules.len(), 2);
        assert_eq!(policy.rules[0].name, "require_ad_flair");
        assert_eq!(policy.rules[0].on_error, FailMode::Open);
        assert_eq!(policy.rules[1].on_error, FailMode::Closed);
        assert!(policy.rules[1].params.is_empty());

        assert!(set.policy_for("unknown").is_empty());
    }
}

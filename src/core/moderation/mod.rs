// Core moderation module - the rule pipeline applied to every feed item.
// Models, the engine and its registry, posting history, and the built-in rules.

pub mod moderation_models;
pub mod posting_history;
pub mod rule_engine;

#[path = "rules/rules_catalog.rs"]
pub mod rules;

pub use moderation_models::*;
pub use posting_history::PostingHistory;
pub use rule_engine::{Rule, RuleContext, RuleEngine, RuleError, RuleRegistry};

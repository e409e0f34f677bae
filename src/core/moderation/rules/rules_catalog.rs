// Built-in rule catalogue. Names here are the ones the rules file refers to.

#[path = "account_rules.rs"]
mod account_rules;
#[path = "content_rules.rs"]
mod content_rules;
#[path = "format_rules.rs"]
mod format_rules;
#[path = "rule_params.rs"]
mod rule_params;

use crate::core::moderation::rule_engine::RuleRegistry;

pub use account_rules::{AccountRestrictions, PostFrequency};
pub use content_rules::{BannedPatterns, HeatedKeywords, NsfwOrOffensive, RequireInviteLink, RespectPrivacy};
pub use format_rules::{RequireFlair, TitleFormat};

/// Registry with every built-in rule under its policy-file name.
pub fn builtin_registry() -> RuleRegistry {
    let mut registry = RuleRegistry::new();
    registry.register("check_account_restrictions", AccountRestrictions);
    registry.register("enforce_rate_limit", PostFrequency);
    registry.register("disallow_nsfw_and_offensive", NsfwOrOffensive);
    registry.register("require_discord_link", RequireInviteLink);
    registry.register("check_banned_patterns", BannedPatterns);
    registry.register("respect_privacy", RespectPrivacy);
    registry.register("monitor_for_heated_discussion_keywords", HeatedKeywords);
    registry.register("require_ad_flair", RequireFlair);
    registry.register("validate_post_format", TitleFormat);
    registry
}

// Rules about how a post is labelled and titled.

use super::rule_params::{opt_str, reason_or, str_list};
use crate::core::moderation::moderation_models::RuleParams;
use crate::core::moderation::rule_engine::{Rule, RuleContext, RuleError};
use regex::Regex;

/// `require_ad_flair`: the item's flair must be one of `flairs` (case-insensitive).
pub struct RequireFlair;

impl Rule for RequireFlair {
    fn evaluate(
        &self,
        ctx: &RuleContext<'_>,
        params: &RuleParams,
    ) -> Result<Option<String>, RuleError> {
        let flairs = str_list(params, "flairs")?;
        if flairs.is_empty() {
            tracing::warn!(feed = %ctx.feed, "require_ad_flair has no 'flairs' configured. Skipping.");
            return Ok(None);
        }

        let has_required = ctx.item.flair.as_deref().is_some_and(|flair| {
            let flair = flair.to_lowercase();
            flairs.iter().any(|f| f.to_lowercase() == flair)
        });

        if has_required {
            return Ok(None);
        }

        let default = format!(
            "Post must have one of the required flairs: {}",
            flairs.join(", ")
        );
        Ok(Some(reason_or(params, &default)))
    }
}

/// `validate_post_format`: the title must match `title_pattern`.
pub struct TitleFormat;

impl Rule for TitleFormat {
    fn evaluate(
        &self,
        ctx: &RuleContext<'_>,
        params: &RuleParams,
    ) -> Result<Option<String>, RuleError> {
        let Some(pattern) = opt_str(params, "title_pattern")? else {
            tracing::warn!(feed = %ctx.feed, "validate_post_format has no 'title_pattern'. Skipping.");
            return Ok(None);
        };

        let re = Regex::new(pattern)?;
        if re.is_match(&ctx.item.title) {
            Ok(None)
        } else {
            Ok(Some(reason_or(
                params,
                "Post title does not match the required format.",
            )))
        }
    }
}

// Rules about the author rather than the content: account age, karma, posting frequency.

use super::rule_params::{opt_i64, reason_or};
use crate::core::moderation::moderation_models::RuleParams;
use crate::core::moderation::rule_engine::{Rule, RuleContext, RuleError};
use chrono::Duration;

/// `check_account_restrictions`: minimum account age (days) and combined karma.
pub struct AccountRestrictions;

impl Rule for AccountRestrictions {
    fn evaluate(
        &self,
        ctx: &RuleContext<'_>,
        params: &RuleParams,
    ) -> Result<Option<String>, RuleError> {
        let min_age_days = opt_i64(params, "min_account_age_days")?.filter(|d| *d != 0);
        let min_karma = opt_i64(params, "min_combined_karma")?.filter(|k| *k != 0);

        if let Some(min_age_days) = min_age_days {
            match ctx.author.created_at {
                Some(created_at) => {
                    let age_days = (ctx.now - created_at).num_days();
                    if age_days < min_age_days {
                        tracing::debug!(
                            age_days,
                            min_age_days,
                            "Account age is less than required"
                        );
                        return Ok(Some(reason_or(
                            params,
                            "Account does not meet age requirements.",
                        )));
                    }
                }
                None => tracing::warn!(
                    author = %ctx.author.name,
                    "Could not determine account age for author"
                ),
            }
        }

        if let Some(min_karma) = min_karma {
            let karma = ctx.author.combined_karma();
            if karma < min_karma {
                tracing::debug!(karma, min_karma, "Combined karma is less than required");
                return Ok(Some(reason_or(
                    params,
                    "Account does not meet karma requirements.",
                )));
            }
        }

        Ok(None)
    }
}

/// `enforce_rate_limit`: at most `max_posts` per author per feed within the window.
pub struct PostFrequency;

impl PostFrequency {
    /// `(max_posts, window)` or `None` when the rule is effectively disabled.
    fn limits(params: &RuleParams) -> Result<Option<(usize, Duration)>, RuleError> {
        let max_posts = opt_i64(params, "max_posts")?.unwrap_or(0);
        if max_posts < 0 {
            return Err(RuleError::InvalidParam {
                param: "max_posts".to_string(),
                reason: "must not be negative".to_string(),
            });
        }

        // Negative windows are treated as zero.
        let hours = opt_i64(params, "window_hours")?.unwrap_or(0).max(0);
        let minutes = opt_i64(params, "window_minutes")?.unwrap_or(0).max(0);

        if max_posts == 0 || (hours == 0 && minutes == 0) {
            return Ok(None);
        }

        let window = Duration::hours(hours) + Duration::minutes(minutes);
        Ok(Some((max_posts as usize, window)))
    }
}

impl Rule for PostFrequency {
    fn evaluate(
        &self,
        ctx: &RuleContext<'_>,
        params: &RuleParams,
    ) -> Result<Option<String>, RuleError> {
        let Some((max_posts, window)) = Self::limits(params)? else {
            return Ok(None);
        };

        let author_key = ctx.author.key();
        let window_start = ctx.now - window;
        let posts_in_window = ctx.history.count_since(author_key, ctx.feed, window_start);
        let spamming = posts_in_window >= max_posts;

        tracing::info!(
            author = %author_key,
            feed = %ctx.feed,
            max_posts,
            posts_in_window,
            window_start = %window_start,
            result = spamming,
            "Post frequency checked"
        );

        if spamming {
            Ok(Some(reason_or(params, "You are posting too frequently.")))
        } else {
            Ok(None)
        }
    }

    fn history_window(&self, params: &RuleParams) -> Option<Duration> {
        Self::limits(params).ok().flatten().map(|(_, window)| window)
    }
}

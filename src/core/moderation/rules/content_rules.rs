// Rules that look at what was posted: NSFW/offensive wording, invite links, banned
// patterns, privacy violations, heated language.

use super::rule_params::{reason_or, str_list};
use crate::core::moderation::moderation_models::RuleParams;
use crate::core::moderation::rule_engine::{Rule, RuleContext, RuleError};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\w']+").expect("word pattern"));

static INVITE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:https?://)?(?:www\.)?(?:discord\.gg|discord\.com/invite)/[A-Za-z0-9-]+(?:[^\w-]|$)",
    )
    .expect("invite pattern")
});

/// Words that make a post offensive unless they are also in the soft list.
const BLOCKED_WORDS: &[&str] = &[
    "fuck", "fucking", "fucker", "motherfucker", "shit", "bullshit", "bitch", "bastard",
    "cunt", "asshole", "dick", "dickhead", "prick", "whore", "slut", "twat", "wanker",
    "damn", "hell", "crap", "piss", "bloody",
];

/// Mild words tolerated on their own.
const SOFT_WORDS: &[&str] = &["damn", "hell", "crap", "piss", "bloody"];

/// (pattern, negatable). Negatable patterns don't count when directly preceded by "no"/"not".
const PRIVACY_PATTERNS: &[(&str, bool)] = &[
    (r"\bleak(ed|s)?\b", false),
    (r"\bdoxx(ing|ed|es)?\b", false),
    (r"personal info(?:rmation)?", false),
    (r"\bip\s?(address|log)?\b", true),
    (r"\b(real\s)?name\b", false),
    (r"\b(address(es)?|home\saddress|location|coords?)\b", false),
    (r"(discord\s)?user(name|tag)[\s:]*[a-zA-Z0-9#]{5,}", false),
    (r"(snapchat|instagram|twitter|email|phone\s?number|contact info)", false),
    (r"\bface\s?(reveal|pic|photo)?\b", true),
    (r"\birl\b", true),
    (r"\bexposed\b", false),
];

static PRIVACY_RES: Lazy<Vec<(Regex, bool)>> = Lazy::new(|| {
    PRIVACY_PATTERNS
        .iter()
        .map(|(pattern, negatable)| {
            (
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .expect("privacy pattern"),
                *negatable,
            )
        })
        .collect()
});

fn case_insensitive(pattern: &str) -> Result<Regex, RuleError> {
    Ok(RegexBuilder::new(pattern).case_insensitive(true).build()?)
}

/// Keep first/last character, star the rest, so logs never carry the raw word.
fn mask_word(word: &str) -> String {
    let chars: Vec<char> = word.chars().collect();
    match chars.len() {
        0 => String::new(),
        1 | 2 => "*".repeat(chars.len()),
        n => format!("{}{}{}", chars[0], "*".repeat(n - 2), chars[n - 1]),
    }
}

/// True when `text` contains a blocked word that isn't soft.
pub fn is_offensive(text: &str, extra_blocked: &[String], extra_soft: &[String]) -> bool {
    let lowered = text.trim().to_lowercase();
    if lowered.is_empty() {
        return false;
    }

    let blocked: HashSet<&str> = BLOCKED_WORDS
        .iter()
        .copied()
        .chain(extra_blocked.iter().map(String::as_str))
        .collect();
    let soft: HashSet<&str> = SOFT_WORDS
        .iter()
        .copied()
        .chain(extra_soft.iter().map(String::as_str))
        .collect();

    let words: HashSet<&str> = WORD_RE.find_iter(&lowered).map(|m| m.as_str()).collect();
    let flagged: Vec<&str> = words.into_iter().filter(|w| blocked.contains(w)).collect();
    if flagged.is_empty() {
        return false;
    }

    let (soft_hits, hard_hits): (Vec<&str>, Vec<&str>) =
        flagged.iter().partition(|w| soft.contains(**w));
    let offensive = !hard_hits.is_empty();

    tracing::debug!(
        flagged_count = flagged.len(),
        soft_count = soft_hits.len(),
        hard_count = hard_hits.len(),
        sample_hard_masked = ?hard_hits.iter().take(3).map(|w| mask_word(w)).collect::<Vec<_>>(),
        result = offensive,
        "Offensive check result"
    );

    offensive
}

/// Whether the word right before byte offset `start` is "no" or "not".
fn negated(text: &str, start: usize) -> bool {
    let before = text[..start].trim_end();
    let previous = before
        .rsplit(|c: char| !c.is_alphanumeric())
        .next()
        .unwrap_or("");
    previous.eq_ignore_ascii_case("no") || previous.eq_ignore_ascii_case("not")
}

/// `disallow_nsfw_and_offensive`
pub struct NsfwOrOffensive;

impl Rule for NsfwOrOffensive {
    fn evaluate(
        &self,
        ctx: &RuleContext<'_>,
        params: &RuleParams,
    ) -> Result<Option<String>, RuleError> {
        let extra_blocked = str_list(params, "blocked_words")?;
        let extra_soft = str_list(params, "soft_words")?;
        let item = ctx.item;

        if item.over_18
            || is_offensive(&item.title, &extra_blocked, &extra_soft)
            || is_offensive(&item.body, &extra_blocked, &extra_soft)
        {
            return Ok(Some(reason_or(
                params,
                "Post contains NSFW or offensive content.",
            )));
        }
        Ok(None)
    }
}

/// `require_discord_link`
pub struct RequireInviteLink;

impl Rule for RequireInviteLink {
    fn evaluate(
        &self,
        ctx: &RuleContext<'_>,
        params: &RuleParams,
    ) -> Result<Option<String>, RuleError> {
        if INVITE_RE.is_match(&ctx.item.title) || INVITE_RE.is_match(&ctx.item.body) {
            return Ok(None);
        }
        Ok(Some(reason_or(
            params,
            "Post must contain a Discord invite link.",
        )))
    }
}

/// `check_banned_patterns`
pub struct BannedPatterns;

impl Rule for BannedPatterns {
    fn evaluate(
        &self,
        ctx: &RuleContext<'_>,
        params: &RuleParams,
    ) -> Result<Option<String>, RuleError> {
        for pattern in str_list(params, "patterns")? {
            // A bad entry only disables itself; the rest of the list still applies.
            let re = match case_insensitive(&pattern) {
                Ok(re) => re,
                Err(e) => {
                    tracing::error!(feed = %ctx.feed, pattern = %pattern, "Skipping banned pattern: {}", e);
                    continue;
                }
            };
            if re.is_match(&ctx.item.title) || re.is_match(&ctx.item.body) {
                let reason = reason_or(params, "Post contains a banned pattern.");
                return Ok(Some(format!("{} (Matched: '{}')", reason, pattern)));
            }
        }
        Ok(None)
    }
}

/// `respect_privacy`
pub struct RespectPrivacy;

impl Rule for RespectPrivacy {
    fn evaluate(
        &self,
        ctx: &RuleContext<'_>,
        params: &RuleParams,
    ) -> Result<Option<String>, RuleError> {
        let body = &ctx.item.body;
        for (re, negatable) in PRIVACY_RES.iter() {
            let hit = re
                .find_iter(body)
                .any(|m| !*negatable || !negated(body, m.start()));
            if hit {
                return Ok(Some(reason_or(params, "Post violates privacy rules.")));
            }
        }
        Ok(None)
    }
}

/// `monitor_for_heated_discussion_keywords`
pub struct HeatedKeywords;

impl Rule for HeatedKeywords {
    fn evaluate(
        &self,
        ctx: &RuleContext<'_>,
        params: &RuleParams,
    ) -> Result<Option<String>, RuleError> {
        for keyword in str_list(params, "keywords")? {
            let re = case_insensitive(&format!(r"\b{}\b", regex::escape(&keyword)))?;
            if re.is_match(&ctx.item.title) || re.is_match(&ctx.item.body) {
                let default = format!(
                    "Post contains keywords that suggest a heated discussion ('{}'). Please remain civil.",
                    keyword
                );
                return Ok(Some(reason_or(params, &default)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::moderation_models::{Author, Item};
    use crate::core::moderation::posting_history::PostingHistory;
    use chrono::Utc;
    use serde_json::json;

    fn item(title: &str, body: &str) -> Item {
        Item {
            id: "i".to_string(),
            author: None,
            title: title.to_string(),
            body: body.to_string(),
            flair: None,
            over_18: false,
            created_at: Utc::now(),
        }
    }

    fn check(rule: &dyn Rule, item: &Item, p: serde_json::Value) -> Result<Option<String>, RuleError> {
        let author = Author {
            id: None,
            name: "x".to_string(),
            created_at: None,
            link_karma: 0,
            comment_karma: 0,
        };
        let history = PostingHistory::default();
        let ctx = RuleContext {
            item,
            author: &author,
            feed: "testsub",
            history: &history,
            now: Utc::now(),
        };
        rule.evaluate(&ctx, p.as_object().unwrap())
    }

    #[test]
    fn test_nsfw_flag_and_offensive_words() {
        let clean = item("Looking for a raid group", "Friendly folks only");
        assert_eq!(check(&NsfwOrOffensive, &clean, json!({})).unwrap(), None);

        let mut flagged = clean.clone();
        flagged.over_18 = true;
        assert_eq!(
            check(&NsfwOrOffensive, &flagged, json!({"reason": "NSFW content is not allowed."})).unwrap(),
            Some("NSFW content is not allowed.".to_string())
        );

        let rude = item("What the fuck", "");
        assert!(check(&NsfwOrOffensive, &rude, json!({})).unwrap().is_some());
    }

    #[test]
    fn test_soft_words_alone_pass() {
        assert!(!is_offensive("Damn, that boss fight was hell", &[], &[]));
        assert!(is_offensive("damn this shit", &[], &[]));
        assert!(!is_offensive("damn this shit", &[], &["shit".to_string()]));
        assert!(is_offensive("you absolute muppet", &["muppet".to_string()], &[]));
        assert!(!is_offensive("   ", &[], &[]));
    }

    #[test]
    fn test_mask_word() {
        assert_eq!(mask_word("abcd"), "a**d");
        assert_eq!(mask_word("ab"), "**");
        assert_eq!(mask_word(""), "");
    }

    #[test]
    fn test_invite_link_required() {
        let with_link = item("Join us", "https://discord.gg/abc-123 for details");
        assert_eq!(check(&RequireInviteLink, &with_link, json!({})).unwrap(), None);

        let alt_domain = item("Join us at discord.com/invite/XyZ", "");
        assert_eq!(check(&RequireInviteLink, &alt_domain, json!({})).unwrap(), None);

        let without = item("Join us", "DM me");
        assert_eq!(
            check(&RequireInviteLink, &without, json!({})).unwrap(),
            Some("Post must contain a Discord invite link.".to_string())
        );
    }

    #[test]
    fn test_banned_patterns() {
        let giveaway = item("Huge GIVEAWAY tonight", "");
        let result = check(
            &BannedPatterns,
            &giveaway,
            json!({"patterns": [r"\bfree\s+nitro\b", r"\bgiveaway\b"], "reason": "Banned."}),
        )
        .unwrap();
        assert_eq!(result, Some(r"Banned. (Matched: '\bgiveaway\b')".to_string()));

        let fine = item("Weekly thread", "");
        assert_eq!(check(&BannedPatterns, &fine, json!({"patterns": ["giveaway"]})).unwrap(), None);
    }

    #[test]
    fn test_invalid_banned_pattern_is_skipped() {
        let giveaway = item("Huge giveaway tonight", "");
        let result = check(
            &BannedPatterns,
            &giveaway,
            json!({"patterns": ["(unclosed", "giveaway"]}),
        )
        .unwrap();
        assert_eq!(
            result,
            Some("Post contains a banned pattern. (Matched: 'giveaway')".to_string())
        );

        let only_bad = item("x", "y");
        assert_eq!(check(&BannedPatterns, &only_bad, json!({"patterns": ["(unclosed"]})).unwrap(), None);
    }

    #[test]
    fn test_privacy_patterns_and_negation() {
        let doxx = item("", "Here is his home address and phone number");
        assert!(check(&RespectPrivacy, &doxx, json!({})).unwrap().is_some());

        let negated_ip = item("", "We do not ip log anyone");
        assert_eq!(check(&RespectPrivacy, &negated_ip, json!({})).unwrap(), None);

        let ip = item("", "I will grab your ip");
        assert!(check(&RespectPrivacy, &ip, json!({})).unwrap().is_some());

        let benign = item("", "Casual gaming community, all welcome");
        assert_eq!(check(&RespectPrivacy, &benign, json!({})).unwrap(), None);
    }

    #[test]
    fn test_heated_keywords_whole_word() {
        let heated = item("Mods are idiots", "");
        let result = check(&HeatedKeywords, &heated, json!({"keywords": ["idiots"]})).unwrap();
        assert!(result.unwrap().contains("'idiots'"));

        let partial = item("Idiotsyncratic title", "");
        assert_eq!(check(&HeatedKeywords, &partial, json!({"keywords": ["idiots"]})).unwrap(), None);
    }
}

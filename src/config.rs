// Runtime configuration, read from the environment (and `.env` if present).

use crate::core::dedup::DEFAULT_AUTOSAVE_EVERY;
use crate::infra::reddit::RedditCredentials;
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_USER_AGENT: &str = "feed-moderation-bot/0.1";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: '{value}'")]
    Invalid { name: &'static str, value: String },

    #[error("No subreddits configured. Set SUBREDDITS to a comma-separated list.")]
    NoFeeds,
}

pub struct BotConfig {
    pub credentials: RedditCredentials,
    pub feeds: Vec<String>,
    pub rules_path: String,
    pub seen_cache_path: String,
    pub seen_cache_autosave_every: usize,
    pub rate_limit_max_requests: usize,
    pub rate_limit_window: Duration,
    pub health_host: String,
    pub health_port: u16,
    pub poll_interval: Duration,
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any name -> value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| -> Result<String, ConfigError> {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };
        let or_default = |name: &str, default: &str| -> String {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let credentials = RedditCredentials {
            client_id: required("REDDIT_CLIENT_ID")?,
            client_secret: required("REDDIT_CLIENT_SECRET")?,
            username: required("REDDIT_USERNAME")?,
            password: required("REDDIT_PASSWORD")?,
            user_agent: or_default("REDDIT_USER_AGENT", DEFAULT_USER_AGENT),
        };

        let feeds = parse_feed_list(&lookup("SUBREDDITS").unwrap_or_default());
        if feeds.is_empty() {
            return Err(ConfigError::NoFeeds);
        }

        Ok(Self {
            credentials,
            feeds,
            rules_path: or_default("RULES_PATH", "config/subreddit_rules.json"),
            seen_cache_path: or_default("SEEN_CACHE_PATH", "seen_submissions.json"),
            seen_cache_autosave_every: parse_or(
                &lookup,
                "SEEN_CACHE_AUTOSAVE_EVERY",
                DEFAULT_AUTOSAVE_EVERY,
            )?,
            rate_limit_max_requests: parse_or(&lookup, "RATE_LIMIT_MAX_REQUESTS", 100)?,
            rate_limit_window: Duration::from_secs(parse_or(
                &lookup,
                "RATE_LIMIT_WINDOW_SECS",
                60,
            )?),
            health_host: or_default("HEALTH_HOST", "127.0.0.1"),
            health_port: parse_or(&lookup, "HEALTH_PORT", 8520)?,
            poll_interval: Duration::from_secs(parse_or(&lookup, "FEED_POLL_INTERVAL_SECS", 5)?),
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}

/// Split a comma-separated feed list: trimmed, blanks dropped, first occurrence wins.
pub fn parse_feed_list(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.to_string()))
        .map(str::to_string)
        .collect()
}

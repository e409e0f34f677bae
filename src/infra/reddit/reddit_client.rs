use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::core::feed::{Feed, FeedError};
use crate::core::moderation::{Author, Item};

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_BASE: &str = "https://oauth.reddit.com";

/// Refresh this long before Reddit says the token expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// How many recent ids a feed remembers to suppress repeats across polls.
const RECENT_IDS: usize = 301;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub user_agent: String,
}

struct AccessToken {
    value: String,
    refresh_at: Instant,
}

/// Minimal Reddit OAuth client. Only the calls the moderation pipeline needs.
///
/// One instance is shared by every feed so they reuse the token and connection pool.
pub struct RedditApi {
    client: Client,
    credentials: RedditCredentials,
    token: Mutex<Option<AccessToken>>,
    token_url: String,
    api_base: String,
}

impl RedditApi {
    pub fn new(credentials: RedditCredentials) -> Result<Self, FeedError> {
        Self::with_endpoints(credentials, TOKEN_URL, API_BASE)
    }

    fn with_endpoints(
        credentials: RedditCredentials,
        token_url: &str,
        api_base: &str,
    ) -> Result<Self, FeedError> {
        let client = Client::builder()
            .user_agent(credentials.user_agent.clone())
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FeedError::Unexpected(e.to_string()))?;

        Ok(Self {
            client,
            credentials,
            token: Mutex::new(None),
            token_url: token_url.to_string(),
            api_base: api_base.to_string(),
        })
    }

    async fn access_token(&self) -> Result<String, FeedError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let resp = self
            .client
            .post(&self.token_url)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(&[
                ("grant_type", "password"),
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.as_str()),
            ])
            .send()
            .await
            .map_err(map_send_error)?;
        let resp = check_status(resp, "access token")?;

        let body: ApiToken = resp
            .json()
            .await
            .map_err(|e| FeedError::Unexpected(e.to_string()))?;

        // Reddit reports bad credentials as a 200 with an error field.
        let value = match (body.access_token, body.error) {
            (Some(token), _) => token,
            (None, error) => {
                return Err(FeedError::Unexpected(format!(
                    "Reddit refused the token request: {}",
                    error.unwrap_or_else(|| "no access_token in response".to_string())
                )))
            }
        };

        let lifetime = Duration::from_secs(body.expires_in.unwrap_or(3600));
        tracing::info!(expires_in_s = lifetime.as_secs(), "Obtained Reddit access token");

        *cached = Some(AccessToken {
            value: value.clone(),
            refresh_at: Instant::now() + lifetime.saturating_sub(TOKEN_REFRESH_MARGIN),
        });
        Ok(value)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// Send an authorized request and require a success status.
    async fn send(
        &self,
        build: impl FnOnce(&Client) -> RequestBuilder,
        what: &str,
    ) -> Result<Response, FeedError> {
        let resp = self.send_authorized(build, what).await?;
        check_status(resp, what)
    }

    /// Send with the bearer token; a 401 drops the cached token so the next call re-authenticates.
    /// Any other status is left to the caller.
    async fn send_authorized(
        &self,
        build: impl FnOnce(&Client) -> RequestBuilder,
        what: &str,
    ) -> Result<Response, FeedError> {
        let token = self.access_token().await?;
        let resp = build(&self.client)
            .bearer_auth(token)
            .send()
            .await
            .map_err(map_send_error)?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            self.invalidate_token().await;
            return Err(FeedError::Transient(format!(
                "Reddit rejected the access token for {}",
                what
            )));
        }
        Ok(resp)
    }

    async fn newest(&self, feed: &str) -> Result<Vec<ApiPost>, FeedError> {
        let url = format!("{}/r/{}/new", self.api_base, feed);
        let resp = self
            .send(
                |c| c.get(url).query(&[("limit", "100"), ("raw_json", "1")]),
                "listing",
            )
            .await?;

        let listing: ApiListing = resp
            .json()
            .await
            .map_err(|e| FeedError::Unexpected(e.to_string()))?;
        Ok(listing.data.children.into_iter().map(|c| c.data).collect())
    }

    /// Profile for `name`. `Ok(None)` for deleted authors.
    async fn author(&self, name: Option<&str>) -> Result<Option<Author>, FeedError> {
        let name = match name {
            None | Some("[deleted]") | Some("") => return Ok(None),
            Some(name) => name,
        };

        let url = format!("{}/user/{}/about", self.api_base, name);
        let resp = self
            .send_authorized(|c| c.get(url).query(&[("raw_json", "1")]), "author profile")
            .await?;

        // Suspended and shadow-banned accounts have no public profile.
        if resp.status() == StatusCode::NOT_FOUND || resp.status() == StatusCode::FORBIDDEN {
            tracing::debug!(author = %name, status = %resp.status(), "Author profile unavailable");
            return Ok(Some(Author {
                id: None,
                name: name.to_string(),
                created_at: None,
                link_karma: 0,
                comment_karma: 0,
            }));
        }
        let resp = check_status(resp, "author profile")?;

        let about: ApiAbout = resp
            .json()
            .await
            .map_err(|e| FeedError::Unexpected(e.to_string()))?;
        Ok(Some(about.data.into_author(name)))
    }

    async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<(), FeedError> {
        let url = format!("{}{}", self.api_base, path);
        self.send(|c| c.post(url).form(form), path).await?;
        Ok(())
    }
}

fn map_send_error(e: reqwest::Error) -> FeedError {
    if e.is_decode() || e.is_builder() {
        FeedError::Unexpected(e.to_string())
    } else {
        FeedError::Transient(e.to_string())
    }
}

fn classify_status(status: StatusCode, what: &str) -> FeedError {
    let message = format!("Reddit returned {} for {}", status, what);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        FeedError::Transient(message)
    } else {
        FeedError::Unexpected(message)
    }
}

fn check_status(resp: Response, what: &str) -> Result<Response, FeedError> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(classify_status(resp.status(), what))
    }
}

fn fullname(item: &Item) -> String {
    format!("t3_{}", item.id)
}

/// Removal reason plus the standard bot footer pointing at the feed's modmail.
pub fn reply_with_footer(reason: &str, feed: &str) -> String {
    format!(
        "{}\n\n---\n\n*I am a bot, and this action was performed automatically. Please \
         [contact the moderators of this subreddit](/message/compose/?to=/r/{}) if you have \
         any questions or concerns.*",
        reason, feed
    )
}

// ============================================================================
// FEED
// ============================================================================

/// Fixed-size memory of recently yielded ids, oldest evicted first.
struct RecentIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns `false` if `id` was already remembered.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.ids.insert(id.to_string());
        true
    }
}

/// One subreddit's `new` listing, polled and turned into a stream of items.
///
/// The first poll only primes the memory of existing posts; later polls yield what
/// appeared since, oldest first.
pub struct RedditFeed {
    api: Arc<RedditApi>,
    name: String,
    poll_interval: Duration,
    pending: VecDeque<ApiPost>,
    recent: RecentIds,
    primed: bool,
    last_poll: Option<Instant>,
}

impl RedditFeed {
    pub fn new(api: Arc<RedditApi>, name: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            api,
            name: name.into(),
            poll_interval,
            pending: VecDeque::new(),
            recent: RecentIds::new(RECENT_IDS),
            primed: false,
            last_poll: None,
        }
    }

    /// Queue posts not seen before. `posts` is newest first, as Reddit lists them.
    fn absorb(&mut self, posts: Vec<ApiPost>) -> usize {
        let mut queued = 0;
        for post in posts.into_iter().rev() {
            if !self.recent.insert(&post.id) {
                continue;
            }
            if self.primed {
                self.pending.push_back(post);
                queued += 1;
            }
        }
        if !self.primed {
            self.primed = true;
            tracing::info!(feed = %self.name, known = self.recent.order.len(), "Primed feed, skipping existing posts");
        }
        queued
    }

    async fn poll(&mut self) -> Result<(), FeedError> {
        if let Some(last) = self.last_poll {
            tokio::time::sleep_until(last + self.poll_interval).await;
        }
        self.last_poll = Some(Instant::now());

        let posts = self.api.newest(&self.name).await?;
        let queued = self.absorb(posts);
        if queued > 0 {
            tracing::debug!(feed = %self.name, queued, "New posts in listing");
        }
        Ok(())
    }
}

#[async_trait]
impl Feed for RedditFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_item(&mut self) -> Result<Option<Item>, FeedError> {
        if self.pending.is_empty() {
            self.poll().await?;
        }

        let Some(post) = self.pending.pop_front() else {
            return Ok(None);
        };

        let author = self.api.author(post.author.as_deref()).await;
        match author {
            Ok(author) => Ok(Some(post.into_item(author))),
            Err(e) => {
                // Keep the post so it is retried after the supervisor backs off.
                self.pending.push_front(post);
                Err(e)
            }
        }
    }

    async fn approve(&self, item: &Item) -> Result<(), FeedError> {
        let id = fullname(item);
        self.api.post_form("/api/approve", &[("id", id.as_str())]).await
    }

    async fn remove(&self, item: &Item) -> Result<(), FeedError> {
        let id = fullname(item);
        self.api
            .post_form("/api/remove", &[("id", id.as_str()), ("spam", "false")])
            .await
    }

    async fn reply(&self, item: &Item, text: &str) -> Result<(), FeedError> {
        let id = fullname(item);
        let body = reply_with_footer(text, &self.name);
        self.api
            .post_form(
                "/api/comment",
                &[
                    ("api_type", "json"),
                    ("thing_id", id.as_str()),
                    ("text", body.as_str()),
                ],
            )
            .await
    }
}

// ============================================================================
// API PAYLOADS
// ============================================================================

fn from_epoch(secs: Option<f64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| Utc.timestamp_opt(s as i64, 0).single())
}

#[derive(Deserialize)]
struct ApiToken {
    access_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ApiListing {
    data: ApiListingData,
}

#[derive(Deserialize)]
struct ApiListingData {
    #[serde(default)]
    children: Vec<ApiChild>,
}

#[derive(Deserialize)]
struct ApiChild {
    data: ApiPost,
}

#[derive(Deserialize, Debug, Clone)]
struct ApiPost {
    id: String,
    author: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    link_flair_text: Option<String>,
    #[serde(default)]
    over_18: bool,
    created_utc: Option<f64>,
}

impl ApiPost {
    fn into_item(self, author: Option<Author>) -> Item {
        Item {
            id: self.id,
            author,
            title: self.title,
            body: self.selftext,
            flair: self.link_flair_text,
            over_18: self.over_18,
            created_at: from_epoch(self.created_utc).unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Deserialize)]
struct ApiAbout {
    data: ApiUser,
}

#[derive(Deserialize)]
struct ApiUser {
    id: Option<String>,
    name: Option<String>,
    created_utc: Option<f64>,
    #[serde(default)]
    link_karma: i64,
    #[serde(default)]
    comment_karma: i64,
}

impl ApiUser {
    fn into_author(self, fallback_name: &str) -> Author {
        Author {
            id: self.id,
            name: self.name.unwrap_or_else(|| fallback_name.to_string()),
            created_at: from_epoch(self.created_utc),
            link_karma: self.link_karma,
            comment_karma: self.comment_karma,
        }
    }
}

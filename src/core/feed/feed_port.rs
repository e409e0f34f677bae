// The feed port - what the supervisor needs from a content source.
//
// NO Reddit dependencies here. `infra/reddit` implements this against the HTTP API,
// tests implement it with a scripted queue.

use crate::core::moderation::Item;
use async_trait::async_trait;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum FeedError {
    /// Worth reconnecting for: network trouble, throttling, upstream 5xx.
    #[error("Transient feed error: {0}")]
    Transient(String),

    /// Anything else. Logged and waited out, never fatal.
    #[error("Unexpected feed error: {0}")]
    Unexpected(String),
}

// ============================================================================
// FEED TRAIT (PORT)
// ============================================================================

/// A live, resumable stream of items plus the mutations the bot may apply to them.
///
/// Mutations are only called after the admission controller granted a slot.
#[async_trait]
pub trait Feed: Send + Sync {
    /// Feed name as used in the policy file and metrics.
    fn name(&self) -> &str;

    /// Next unseen item, or `Ok(None)` when nothing arrived within one poll.
    ///
    /// Must return within a bounded time; the caller also races it against shutdown,
    /// so implementations must be cancel-safe at their await points.
    async fn next_item(&mut self) -> Result<Option<Item>, FeedError>;

    async fn approve(&self, item: &Item) -> Result<(), FeedError>;

    async fn remove(&self, item: &Item) -> Result<(), FeedError>;

    /// Post a public reply. Implementations may decorate `text` (e.g. a bot footer).
    async fn reply(&self, item: &Item, text: &str) -> Result<(), FeedError>;
}

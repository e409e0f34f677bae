// The infra module contains implementations of core ports and the outside-facing pieces.
// Each integration goes in its own submodule.

#[path = "reddit/reddit_client.rs"]
pub mod reddit;

#[path = "policy/json_policy_store.rs"]
pub mod policy;

#[path = "health/health_server.rs"]
pub mod health;

// This is the entry point of the moderation bot.
//
// **Architecture Overview:**
// - `core/` = Moderation logic and the ports it needs (platform-agnostic)
// - `infra/` = Implementations of those ports (Reddit API, rules file, health endpoint)
//
// This file's job is to:
// 1. Load configuration and set up logging
// 2. Build the shared components (dependency injection)
// 3. Start one stream supervisor per feed plus the health endpoint
// 4. Shut everything down cleanly on Ctrl-C / SIGTERM

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;

mod config;

use crate::config::BotConfig;
use crate::core::admission::AdmissionController;
use crate::core::dedup::DedupStore;
use crate::core::feed::{Pipeline, StreamSupervisor};
use crate::core::metrics::MetricsCollector;
use crate::core::moderation::rules::builtin_registry;
use crate::core::moderation::{PostingHistory, RuleEngine};
use crate::core::shutdown;
use crate::infra::health::{self, HealthState};
use crate::infra::policy::JsonPolicyStore;
use crate::infra::reddit::{RedditApi, RedditFeed};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// How long each task gets to wind down after shutdown is requested.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Resolves on the first Ctrl-C or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl-C. Initiating shutdown."),
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM. Initiating shutdown."),
                }
                return;
            }
            Err(e) => tracing::warn!("Could not install SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
    }
    tracing::info!("Shutdown requested.");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env first so RUST_LOG / LOG_FORMAT from it apply to the subscriber
    dotenv::dotenv().ok();
    init_tracing();

    tracing::info!("Starting the bot...");
    let config = BotConfig::from_env()?;

    // ========================================================================
    // Shared components
    // ========================================================================

    let metrics = Arc::new(MetricsCollector::new());

    let dedup = Arc::new(DedupStore::open_with_metrics(
        config.seen_cache_path.as_str(),
        config.seen_cache_autosave_every,
        Arc::clone(&metrics),
    ));

    let admission = Arc::new(AdmissionController::named(
        "reddit",
        config.rate_limit_max_requests,
        config.rate_limit_window,
    )?);

    let policies = JsonPolicyStore::new(config.rules_path.as_str()).load_or_empty();
    let registry = builtin_registry();
    let retention = RuleEngine::history_retention(&registry, &policies);
    tracing::info!(
        retention_hours = retention.num_hours(),
        "Posting history retention"
    );
    let engine = Arc::new(
        RuleEngine::new(registry, Arc::new(PostingHistory::new(retention)))
            .with_metrics(Arc::clone(&metrics)),
    );

    let api = Arc::new(RedditApi::new(config.credentials.clone())?);
    let (trigger, shutdown_signal) = shutdown::channel();

    // ========================================================================
    // Health endpoint
    // ========================================================================

    let health_state = Arc::new(HealthState {
        metrics: Arc::clone(&metrics),
        admission: Arc::clone(&admission),
    });
    let health_task = match health::bind(&config.health_host, config.health_port).await {
        Ok(listener) => Some(tokio::spawn(health::serve(
            listener,
            health_state,
            shutdown_signal.clone(),
        ))),
        Err(e) => {
            tracing::warn!("Health server failed to start: {}", e);
            None
        }
    };

    // ========================================================================
    // Feed supervisors
    // ========================================================================

    tracing::info!(
        "Starting monitors for: {}",
        config
            .feeds
            .iter()
            .map(|f| format!("r/{}", f))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let pipeline = Pipeline {
        dedup: Arc::clone(&dedup),
        admission: Arc::clone(&admission),
        engine,
        metrics: Arc::clone(&metrics),
    };

    let mut supervisors = Vec::with_capacity(config.feeds.len());
    for feed_name in &config.feeds {
        let feed = RedditFeed::new(Arc::clone(&api), feed_name.clone(), config.poll_interval);
        let supervisor = StreamSupervisor::new(
            Box::new(feed),
            policies.policy_for(feed_name),
            pipeline.clone(),
            shutdown_signal.clone(),
        );
        supervisors.push((feed_name.clone(), tokio::spawn(supervisor.run())));
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    wait_for_signal().await;
    trigger.trigger();

    for (feed_name, handle) in supervisors {
        match tokio::time::timeout(JOIN_TIMEOUT, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(feed = %feed_name, "Supervisor task failed: {}", e),
            Err(_) => tracing::warn!(feed = %feed_name, "Supervisor did not exit cleanly."),
        }
    }

    dedup.shutdown();

    if let Some(handle) = health_task {
        match tokio::time::timeout(JOIN_TIMEOUT, handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::error!("Health server error: {}", e),
            Ok(Err(e)) => tracing::error!("Health server task failed: {}", e),
            Err(_) => tracing::warn!("Health server did not stop in time."),
        }
    }

    tracing::info!("Shutdown complete.");
    Ok(())
}

// The core module contains all moderation logic.
// Nothing in here knows about Reddit, HTTP or the environment; infra/ plugs that in.

#[path = "admission/admission_controller.rs"]
pub mod admission;

#[path = "backoff/backoff_calculator.rs"]
pub mod backoff;

#[path = "dedup/dedup_store.rs"]
pub mod dedup;

#[path = "feed/mod.rs"]
pub mod feed;

#[path = "metrics/metrics_collector.rs"]
pub mod metrics;

#[path = "moderation/mod.rs"]
pub mod moderation;

#[path = "shutdown/shutdown_signal.rs"]
pub mod shutdown;

#[path = "telemetry/scoped_timer.rs"]
pub mod telemetry;

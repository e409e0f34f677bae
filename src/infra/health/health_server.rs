// Read-only JSON endpoint for liveness checks and dashboards.

use crate::core::admission::{AdmissionController, AdmissionStats};
use crate::core::metrics::{MetricsCollector, MetricsSnapshot};
use crate::core::shutdown::ShutdownSignal;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

pub struct HealthState {
    pub metrics: Arc<MetricsCollector>,
    pub admission: Arc<AdmissionController>,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
    pub admission: AdmissionStats,
}

pub async fn report(State(state): State<Arc<HealthState>>) -> Json<HealthReport> {
    Json(HealthReport {
        metrics: state.metrics.snapshot(),
        admission: state.admission.stats(),
    })
}

/// `/`, `/health` and `/metrics` all return the report; anything else is axum's default 404.
pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/", get(report))
        .route("/health", get(report))
        .route("/metrics", get(report))
        .with_state(state)
}

pub async fn bind(host: &str, port: u16) -> Result<TcpListener, HealthError> {
    let addr = format!("{}:{}", host, port);
    TcpListener::bind(&addr)
        .await
        .map_err(|source| HealthError::Bind { addr, source })
}

/// Serve until `shutdown` fires, then finish in-flight requests and return.
pub async fn serve(
    listener: TcpListener,
    state: Arc<HealthState>,
    mut shutdown: ShutdownSignal,
) -> Result<(), HealthError> {
    let addr: Option<SocketAddr> = listener.local_addr().ok();
    if let Some(addr) = addr {
        tracing::info!("Health server running at http://{}/health", addr);
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Health server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shutdown;
    use std::time::Duration;

    fn state() -> Arc<HealthState> {
        let metrics = Arc::new(MetricsCollector::new());
        metrics.record_item("gamingads", "abc");
        metrics.record_rule_trigger("require_ad_flair");
        metrics.record_action();
        Arc::new(HealthState {
            metrics,
            admission: Arc::new(
                AdmissionController::named("reddit", 100, Duration::from_secs(60)).unwrap(),
            ),
        })
    }

    #[tokio::test]
    async fn test_report_merges_metrics_and_admission() {
        let Json(body) = report(State(state())).await;
        let value = serde_json::to_value(&body).unwrap();

        assert_eq!(value["feeds"]["gamingads"]["processed"], 1);
        assert_eq!(value["feeds"]["gamingads"]["last_item_id"], "abc");
        assert_eq!(value["rules_triggered"]["require_ad_flair"], 1);
        assert_eq!(value["actions_taken"], 1);
        assert!(value["uptime_seconds"].is_number());
        assert!(value["admission"].is_object());
    }

    #[tokio::test]
    async fn test_serves_known_paths_and_stops_on_shutdown() {
        let listener = bind("127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (trigger, signal) = shutdown::channel();
        let server = tokio::spawn(serve(listener, state(), signal));

        let client = reqwest::Client::new();
        for path in ["/", "/health", "/metrics"] {
            let resp = client
                .get(format!("http://{}{}", addr, path))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), reqwest::StatusCode::OK, "{path}");
            let body: serde_json::Value = resp.json().await.unwrap();
            assert_eq!(body["actions_taken"], 1);
        }

        let missing = client
            .get(format!("http://{}/nope", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = bind("127.0.0.1", 0).await.unwrap();
        let port = taken.local_addr().unwrap().port();
        assert!(matches!(
            bind("127.0.0.1", port).await,
            Err(HealthError::Bind { .. })
        ));
    }
}

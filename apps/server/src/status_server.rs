//! HTTP health and status endpoints.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use smartflow_alerts::Notifier;
use smartflow_core::TargetClass;
use smartflow_engine::{Poller, StatsSummary};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub const LIVE_TEXT: &str = "Smart Flow is live";

/// Shared state for the status handlers.
pub struct StatusState {
    pub poller: Arc<Poller>,
    pub notifier: Arc<Notifier>,
    pub started_at: Instant,
}

/// Body of `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub targets: BTreeMap<String, usize>,
    pub poller: StatsSummary,
    pub alerts_delivered: u64,
    pub alerts_dropped: u64,
}

/// Create the status router.
pub fn create_status_router(state: Arc<StatusState>) -> Router {
    Router::new()
        .route("/", get(live_handler))
        .route("/status", get(status_handler))
        .with_state(state)
}

async fn live_handler() -> &'static str {
    LIVE_TEXT
}

async fn status_handler(State(state): State<Arc<StatusState>>) -> Json<StatusReport> {
    Json(build_report(&state))
}

fn build_report(state: &StatusState) -> StatusReport {
    let counts = state.poller.registry().counts();
    let targets = TargetClass::ALL
        .iter()
        .map(|class| (class.to_string(), counts.get(class).copied().unwrap_or(0)))
        .collect();
    let (alerts_delivered, alerts_dropped) = state.notifier.counts();

    StatusReport {
        status: "live",
        uptime_secs: state.started_at.elapsed().as_secs(),
        targets,
        poller: state.poller.stats(),
        alerts_delivered,
        alerts_dropped,
    }
}

/// Start the status server in the background until cancelled.
pub async fn start_status_server(
    state: Arc<StatusState>,
    port: u16,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>, std::io::Error> {
    let app = create_status_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Status server listening on http://0.0.0.0:{}", port);

    Ok(tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
            error!("Status server error: {}", e);
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use smartflow_alerts::{DeliveryError, MessageSender, NotifierConfig};
    use smartflow_core::{AlertRule, ChatId, TargetKey};
    use smartflow_engine::{PollerConfig, WatchRegistry};

    struct NullSender;

    #[async_trait]
    impl MessageSender for NullSender {
        async fn send(&self, _chat_id: ChatId, _html: &str) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    fn state() -> Arc<StatusState> {
        let registry = Arc::new(WatchRegistry::default());
        registry.watch(TargetKey::listings(), 1, AlertRule::new_item(None));
        registry.watch(TargetKey::new(TargetClass::Token, "a"), 1, AlertRule::jump(300, 25.0));
        registry.watch(TargetKey::new(TargetClass::Token, "b"), 2, AlertRule::jump(300, 25.0));

        Arc::new(StatusState {
            poller: Arc::new(Poller::new(registry.clone(), PollerConfig::default())),
            notifier: Arc::new(Notifier::new(registry, Arc::new(NullSender), NotifierConfig::default())),
            started_at: Instant::now(),
        })
    }

    #[tokio::test]
    async fn test_live_handler() {
        assert_eq!(live_handler().await, LIVE_TEXT);
    }

    #[tokio::test]
    async fn test_status_report() {
        let Json(report) = status_handler(State(state())).await;
        assert_eq!(report.status, "live");
        assert_eq!(report.targets["listings"], 1);
        assert_eq!(report.targets["token"], 2);
        assert_eq!(report.targets["wallet"], 0);
        assert_eq!(report.poller.ticks, 0);
        assert_eq!(report.alerts_delivered, 0);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["targets"]["token"], 2);
    }
}

//! HTTP Gateway
//!
//! Thin axum surface over the ledger sequencer:
//!
//! - `POST /v1/service/transfer`  submit a transfer
//! - `GET  /v1/service/transfer`  submit the demo transfer
//! - `GET  /v1/service/history`   ledger history
//! - `GET  /v1/service/health`    version, git hash, ledger status
//! - `GET  /docs`                 Swagger UI over `/api-docs/openapi.json`

pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::GatewayConfig;
use state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let service = Router::new()
        .route(
            "/transfer",
            get(handlers::demo_transfer).post(handlers::create_transfer),
        )
        .route("/history", get(handlers::get_history))
        .route("/health", get(handlers::health_check));

    Router::new()
        .nest("/v1/service", service)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
}

/// Serve until `shutdown` resolves, then drain in-flight requests
pub async fn run_server(
    config: &GatewayConfig,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {} (port already in use?)", addr))?;

    info!(%addr, "Gateway listening");
    info!("API Docs: http://{}/docs", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Gateway server error")?;

    info!("Gateway stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::TransactionDetails;
    use crate::sequencer::{
        LaunchError, LedgerHandle, SagaLauncher, SequencerConfig, StartAck,
    };
    use crate::substrate::InMemoryCheckpointStore;
    use async_trait::async_trait;
    use axum::Json;
    use axum::extract::State;
    use axum::http::StatusCode;

    struct AckingLauncher;

    #[async_trait]
    impl SagaLauncher for AckingLauncher {
        async fn launch(
            &self,
            record: crate::core_types::LedgerRecord,
        ) -> Result<StartAck, LaunchError> {
            Ok(StartAck::Started(record.process_id()))
        }
    }

    fn app_state() -> Arc<AppState> {
        let (ledger, _task) = LedgerHandle::spawn(
            SequencerConfig::default(),
            None,
            Arc::new(AckingLauncher),
            Arc::new(InMemoryCheckpointStore::new()),
        )
        .unwrap();
        Arc::new(AppState::new(ledger))
    }

    #[tokio::test]
    async fn test_create_transfer_then_history() {
        let state = app_state();

        let (status, Json(body)) = handlers::create_transfer(
            State(state.clone()),
            Json(TransactionDetails::new("a", "b", 10)),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.code, 0);
        assert_eq!(body.data.unwrap().id, "1");

        let (_, Json(demo)) = handlers::demo_transfer(State(state.clone()))
            .await
            .unwrap();
        let demo = demo.data.unwrap();
        assert_eq!(demo.id, "2");
        assert_eq!(demo.transaction_details.source_account_id, "123");
        assert_eq!(demo.transaction_details.destination_account_id, "456");
        assert_eq!(demo.transaction_details.amount, 42);

        let (_, Json(history)) = handlers::get_history(State(state)).await.unwrap();
        let ids: Vec<String> = history.data.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_empty_account_is_rejected() {
        let state = app_state();
        let err = handlers::create_transfer(
            State(state.clone()),
            Json(TransactionDetails::new("", "b", 10)),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        // nothing was recorded
        let (_, Json(history)) = handlers::get_history(State(state)).await.unwrap();
        assert!(history.data.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_health_reports_ledger_status() {
        let state = app_state();
        handlers::demo_transfer(State(state.clone())).await.unwrap();

        let (_, Json(body)) = handlers::health_check(State(state)).await.unwrap();
        let health = body.data.unwrap();
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(health.ledger.next_id, 2);
        assert_eq!(health.ledger.stats.enqueued, 1);
    }

    #[tokio::test]
    async fn test_stopped_ledger_maps_to_503() {
        // a handle whose actor is gone
        let (ledger, task) = LedgerHandle::spawn(
            SequencerConfig::default(),
            None,
            Arc::new(AckingLauncher),
            Arc::new(InMemoryCheckpointStore::new()),
        )
        .unwrap();
        task.abort();
        let _ = task.await;
        let dead = Arc::new(AppState::new(ledger));

        let err = handlers::get_history(State(dead)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    }
}

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use serde::Deserialize;

use crate::journal::{TradeFilter, TradeJournal};
use crate::supervisor::{
    ControlResponse, StartRequest, StatusRequest, StopRequest, StrategySupervisor,
};
use crate::types::{Environment, StrategyKey, TradeStatus};

/// Shared state for the control-plane router.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<StrategySupervisor>,
    pub journal: Arc<TradeJournal>,
}

/// Serves the supervisor verbs plus the trade/metrics query surface for
/// the platform's outer HTTP layer. Authentication lives in that layer,
/// not here.
pub async fn start_control_server(state: AppState, port: u16) -> anyhow::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/healthz", get(health_check))
        .route("/api/strategies/start", post(post_start))
        .route("/api/strategies/stop", post(post_stop))
        .route("/api/strategies/status", get(get_status))
        .route("/api/strategies/force-resume", post(post_force_resume))
        .route("/api/strategies/metrics", get(get_metrics))
        .route("/api/trades", get(get_trades))
        .layer(cors)
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("control-plane server listening on http://localhost:{}", port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn post_start(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> impl IntoResponse {
    match state.supervisor.start(request).await {
        Ok(message) => Json(ControlResponse::ok(message)),
        Err(error) => Json(ControlResponse::err(&error)),
    }
}

async fn post_stop(
    State(state): State<AppState>,
    Json(request): Json<StopRequest>,
) -> impl IntoResponse {
    match state.supervisor.stop(request).await {
        Ok(message) => Json(ControlResponse::ok(message)),
        Err(error) => Json(ControlResponse::err(&error)),
    }
}

async fn get_status(
    State(state): State<AppState>,
    Query(request): Query<StatusRequest>,
) -> impl IntoResponse {
    match state.supervisor.status(request).await {
        Ok(views) => Json(serde_json::json!({ "success": true, "strategies": views })),
        Err(error) => Json(serde_json::json!({
            "success": false,
            "message": error.to_string(),
        })),
    }
}

async fn post_force_resume(
    State(state): State<AppState>,
    Json(request): Json<StopRequest>,
) -> impl IntoResponse {
    let key = StrategyKey::new(
        &request.user_id,
        &request.strategy_name,
        &request.instrument,
        request.environment,
    );
    match state.supervisor.force_resume(&key).await {
        Ok(()) => Json(ControlResponse::ok(format!("strategy resumed: {}", key))),
        Err(error) => Json(ControlResponse::err(&error)),
    }
}

#[derive(Debug, Deserialize)]
struct MetricsQuery {
    user_id: String,
    strategy_name: String,
    instrument: String,
    environment: Environment,
    #[serde(default)]
    force: bool,
}

async fn get_metrics(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> impl IntoResponse {
    let key = StrategyKey::new(
        &query.user_id,
        &query.strategy_name,
        &query.instrument,
        query.environment,
    );
    match state.supervisor.position_metrics(&key, query.force).await {
        Ok(metrics) => Json(serde_json::json!({ "success": true, "metrics": metrics })),
        Err(error) => Json(serde_json::json!({
            "success": false,
            "message": error.to_string(),
            "code": error.code(),
        })),
    }
}

#[derive(Debug, Deserialize)]
struct TradesQuery {
    user_id: Option<String>,
    instrument: Option<String>,
    status: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn get_trades(
    State(state): State<AppState>,
    Query(query): Query<TradesQuery>,
) -> impl IntoResponse {
    let filter = TradeFilter {
        user_id: query.user_id,
        instrument: query.instrument,
        status: query.status.as_deref().and_then(TradeStatus::parse),
        limit: query.limit,
        offset: query.offset,
    };
    match state.journal.query_trades(&filter).await {
        Ok(trades) => Json(serde_json::json!({ "success": true, "trades": trades })),
        Err(error) => Json(serde_json::json!({
            "success": false,
            "message": error.to_string(),
        })),
    }
}

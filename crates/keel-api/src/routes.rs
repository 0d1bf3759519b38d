use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use keel_core::protocol::{SyncRequest, SyncResponse, SyncStatus};

use crate::auth::{extract_bearer_token, AuthenticatedUser, JwtVerifier};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::processor::SyncProcessor;
use crate::rate_limit::{EndpointRateLimiter, ProtectedEndpoint, RateLimitMetricsSnapshot};
use crate::sessions::SessionRepository;
use crate::store::ServerStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    store: ServerStore,
    processor: SyncProcessor,
    jwt_verifier: Arc<JwtVerifier>,
    endpoint_rate_limiter: Arc<EndpointRateLimiter>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, store: ServerStore) -> Self {
        Self {
            processor: SyncProcessor::new(store.clone(), config.max_operations_per_request),
            jwt_verifier: Arc::new(JwtVerifier::from_config(&config)),
            endpoint_rate_limiter: Arc::new(EndpointRateLimiter::from_config(config.as_ref())),
            store,
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/sync", post(sync))
        .route("/sync/status/{device_id}", get(sync_status))
        .route("/sync/reset/{device_id}", post(sync_reset))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        rate_limit: state.endpoint_rate_limiter.metrics_snapshot(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user = state.jwt_verifier.verify_access_token(token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

async fn sync(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<SyncRequest>,
) -> Result<Json<SyncResponse>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::Sync, &user.user_id)
        .await?;

    let response = state.processor.process(&user, &request).await?;
    Ok(Json(response))
}

async fn sync_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(device_id): Path<String>,
) -> Result<Json<SyncStatus>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::SyncAdmin, &user.user_id)
        .await?;

    let db = state.store.lock().await;
    let session = SessionRepository::new(db.connection())
        .get(&user.user_id, &device_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("no sync session for device {device_id}")))?;

    Ok(Json(SyncStatus {
        last_sync_timestamp: session.last_sync_timestamp,
        sync_in_progress: session.in_progress,
        last_error: session.last_error,
    }))
}

#[derive(Debug, Serialize)]
struct ResetResponse {
    device_id: String,
    reset: bool,
}

async fn sync_reset(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(device_id): Path<String>,
) -> Result<Json<ResetResponse>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::SyncAdmin, &user.user_id)
        .await?;

    let db = state.store.lock().await;
    let reset = SessionRepository::new(db.connection())
        .reset(&user.user_id, &device_id)
        .await?;

    tracing::info!(device_id = %device_id, reset, "Sync session reset requested");
    Ok(Json(ResetResponse { device_id, reset }))
}

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Extension, Path, Query},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use genrelay_jobs::{FailureKind, JobEngine, JobError, JobFailure, PollOutcome, SubmitRequest};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    auth::AuthManager,
    config::{HttpAuthConfig, HttpCorsConfig, ServerConfig},
};

/// Upper bound for `?wait_ms=` long polls.
pub const MAX_WAIT_MS: u64 = 30_000;

#[derive(Clone)]
struct HttpState {
    inner: Arc<HttpStateInner>,
}

struct HttpStateInner {
    engine: Arc<JobEngine>,
    auth: Option<AuthManager>,
    shutdown: CancellationToken,
}

impl HttpState {
    fn new(
        engine: Arc<JobEngine>,
        auth_config: Option<HttpAuthConfig>,
        shutdown: CancellationToken,
    ) -> Self {
        let auth = auth_config.map(|cfg| AuthManager::new(cfg.tokens, cfg.header));
        Self {
            inner: Arc::new(HttpStateInner {
                engine,
                auth,
                shutdown,
            }),
        }
    }

    fn ensure_authorized(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        match &self.inner.auth {
            Some(auth) if !auth.validate(headers) => Err(ApiError::Unauthorized),
            _ => Ok(()),
        }
    }

    fn engine(&self) -> &JobEngine {
        &self.inner.engine
    }
}

#[derive(Debug)]
enum ApiError {
    Unauthorized,
    Job(JobError),
    Failed { job_id: String, failure: JobFailure },
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        Self::Job(err)
    }
}

fn job_error_status(err: &JobError) -> StatusCode {
    match err {
        JobError::Validation(_) => StatusCode::BAD_REQUEST,
        JobError::UnknownJob(_) => StatusCode::NOT_FOUND,
        JobError::FixedPathBusy { .. } => StatusCode::CONFLICT,
        JobError::Read { .. } => StatusCode::SERVICE_UNAVAILABLE,
        JobError::Config(_) | JobError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure_status(kind: FailureKind) -> StatusCode {
    match kind {
        FailureKind::Timeout => StatusCode::REQUEST_TIMEOUT,
        FailureKind::ProcessFailed => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": { "code": "E_UNAUTHORIZED", "message": "unauthorized" } })),
            )
                .into_response(),
            ApiError::Job(err) => {
                let status = job_error_status(&err);
                if status.is_server_error() {
                    tracing::error!(code = err.code(), "request failed: {:#}", err);
                } else {
                    tracing::debug!(code = err.code(), "request rejected: {}", err);
                }
                (
                    status,
                    Json(json!({
                        "error": {
                            "code": err.code(),
                            "message": err.to_string(),
                            "retryable": err.is_retryable(),
                        }
                    })),
                )
                    .into_response()
            }
            ApiError::Failed { job_id, failure } => (
                failure_status(failure.kind),
                Json(json!({
                    "jobId": job_id,
                    "status": "error",
                    "error": {
                        "code": failure.kind.code(),
                        "message": failure.message,
                        "failedAt": failure.failed_at,
                    }
                })),
            )
                .into_response(),
        }
    }
}

/// Routes with auth, CORS and request tracing applied.
pub fn router(
    engine: Arc<JobEngine>,
    auth: Option<HttpAuthConfig>,
    cors: Option<&HttpCorsConfig>,
    shutdown: CancellationToken,
) -> Router {
    let auth_header = auth.as_ref().and_then(|cfg| cfg.header.clone());
    let shared_state = HttpState::new(engine, auth, shutdown);

    Router::new()
        .route("/generate", post(generate))
        .route("/result/:job_id", get(result))
        .route("/jobs/:job_id", get(job_status))
        .route("/health", get(health))
        .layer(Extension(shared_state))
        .layer(build_cors_layer(cors, auth_header.as_deref()))
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(
    engine: Arc<JobEngine>,
    config: &ServerConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = router(
        engine,
        config.auth.clone(),
        config.cors.as_ref(),
        shutdown.clone(),
    );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.host, config.port))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {addr}"))?;

    tracing::info!("genrelay listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP server encountered an unrecoverable error")?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

async fn generate(
    Extension(state): Extension<HttpState>,
    headers: HeaderMap,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    state.ensure_authorized(&headers)?;
    let Json(request) = body.map_err(|rejection| JobError::Validation(rejection.body_text()))?;
    let receipt = state.engine().submit(request).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct ResultQuery {
    wait_ms: Option<u64>,
}

async fn result(
    Extension(state): Extension<HttpState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
    Query(query): Query<ResultQuery>,
) -> Result<Response, ApiError> {
    state.ensure_authorized(&headers)?;

    let outcome = match query.wait_ms.filter(|wait| *wait > 0) {
        Some(wait_ms) => {
            let max_wait = Duration::from_millis(wait_ms.min(MAX_WAIT_MS));
            state
                .engine()
                .wait_for_result(&job_id, max_wait, &state.inner.shutdown)
                .await?
        }
        None => state.engine().poll(&job_id).await?,
    };

    match outcome {
        PollOutcome::Pending => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "jobId": job_id, "status": "pending" })),
        )
            .into_response()),
        PollOutcome::Done(result) => Ok((
            StatusCode::OK,
            Json(json!({ "jobId": job_id, "status": "done", "result": result })),
        )
            .into_response()),
        PollOutcome::Failed(failure) => Err(ApiError::Failed { job_id, failure }),
    }
}

async fn job_status(
    Extension(state): Extension<HttpState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    state.ensure_authorized(&headers)?;
    let job = state
        .engine()
        .snapshot(&job_id)
        .await
        .ok_or_else(|| JobError::UnknownJob(job_id.clone()))?;
    Ok(Json(job).into_response())
}

async fn health(Extension(state): Extension<HttpState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "jobs": state.engine().job_count().await,
    }))
}

fn build_cors_layer(config: Option<&HttpCorsConfig>, auth_header: Option<&str>) -> CorsLayer {
    let mut allowed_headers = vec![AUTHORIZATION, CONTENT_TYPE];
    if let Some(name) = auth_header.and_then(|name| HeaderName::try_from(name).ok()) {
        allowed_headers.push(name);
    }

    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(allowed_headers);

    if let Some(cors) = config {
        let origins: Vec<HeaderValue> = cors
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        if !origins.is_empty() {
            return layer.allow_origin(AllowOrigin::list(origins));
        }
    }

    layer
}

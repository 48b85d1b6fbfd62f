//! HTTP front door for the external scheduler.
use anyhow::Context;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::{self, AuthError};
use crate::config::{self, Config, ConfigError};
use crate::orchestrator::{Orchestrator, RunOptions};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

struct Inner {
    trigger_secret: Result<String, ConfigError>,
    orchestrator: Result<Orchestrator, ConfigError>,
}

impl AppState {
    pub fn new(
        trigger_secret: Result<String, ConfigError>,
        orchestrator: Result<Orchestrator, ConfigError>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                trigger_secret,
                orchestrator,
            }),
        }
    }

    /// A bad configuration does not stop the server; each trigger reports it.
    pub fn from_config(cfg: &Config) -> Self {
        let orchestrator = Orchestrator::from_config(cfg);
        if let Err(err) = &orchestrator {
            warn!(error = %err, "scheduled runs are not configured");
        }
        Self::new(
            cfg.trigger_secret().map(str::to_string),
            orchestrator,
        )
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(_: AuthError) -> Self {
        ApiError::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }
}

impl From<&ConfigError> for ApiError {
    fn from(err: &ConfigError) -> Self {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ScheduledQuery {
    #[serde(default)]
    pub dry_run: bool,
    pub delay: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct AdhocQuery {
    pub raw_csv_url: String,
    #[serde(default = "default_true")]
    pub dry_run: bool,
    pub delay: Option<f64>,
}

fn default_true() -> bool {
    true
}

fn run_options(dry_run: bool, delay: Option<f64>) -> Result<RunOptions, ApiError> {
    let delay = delay
        .map(config::delay_from_secs)
        .transpose()
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(RunOptions { dry_run, delay })
}

/// Check the trigger credential, then hand out the orchestrator.
fn authorized<'a>(state: &'a AppState, headers: &HeaderMap) -> Result<&'a Orchestrator, ApiError> {
    let secret = state.inner.trigger_secret.as_ref().map_err(ApiError::from)?;
    if let Err(err) = auth::authorize(headers, secret) {
        warn!(error = %err, "rejected trigger");
        return Err(err.into());
    }
    state.inner.orchestrator.as_ref().map_err(ApiError::from)
}

pub async fn run_scheduled(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ScheduledQuery>,
) -> Result<Response, ApiError> {
    let orchestrator = authorized(&state, &headers)?;
    let opts = run_options(query.dry_run, query.delay)?;
    let response = orchestrator.run_scheduled(opts).await;
    Ok(Json(response).into_response())
}

pub async fn run_adhoc(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AdhocQuery>,
) -> Result<Response, ApiError> {
    let orchestrator = authorized(&state, &headers)?;
    let opts = run_options(query.dry_run, query.delay)?;
    let response = orchestrator.run_adhoc(&query.raw_csv_url, opts).await;
    Ok(Json(response).into_response())
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/run-scheduled", get(run_scheduled))
        .route("/run", get(run_adhoc))
        .route("/healthz", get(healthz))
        .with_state(state)
}

pub async fn serve(bind_addr: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .context("server error")
}

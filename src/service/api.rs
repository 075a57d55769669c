//! HTTP surface: health, prediction, attribution and sample windows.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, instrument, warn};

use super::attribution::{Attribution, DEFAULT_STEP, gradient_times_input};
use super::context::ServiceContext;
use super::forecaster::Forecast;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct FeaturesRequest {
    pub features: Vec<Vec<f64>>,
    /// Unscaled rows; the service applies the persisted scaler first.
    #[serde(default)]
    pub raw: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SampleQuery {
    pub station: Option<String>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SampleResponse {
    pub station: String,
    pub features: Vec<[f64; 8]>,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        Self::Internal(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::BadRequest(detail) => {
                warn!(%detail, "Rejected request");
                (StatusCode::BAD_REQUEST, detail)
            }
            Self::Internal(error) => {
                error!("Request failed: {error:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{error:#}"))
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

/// Checks that the request holds `seq_length` finite rows of 8 features.
fn validate_window(features: Vec<Vec<f64>>, seq_length: usize) -> Result<Vec<[f64; 8]>, ApiError> {
    if features.len() != seq_length {
        return Err(ApiError::BadRequest(format!(
            "expected {seq_length} timesteps, got {}",
            features.len()
        )));
    }
    features
        .into_iter()
        .enumerate()
        .map(|(i, row)| {
            let row: [f64; 8] = row.try_into().map_err(|row: Vec<f64>| {
                ApiError::BadRequest(format!("row {i} has {} features, expected 8", row.len()))
            })?;
            if row.iter().any(|v| !v.is_finite()) {
                return Err(ApiError::BadRequest(format!("row {i} has a non-finite value")));
            }
            Ok(row)
        })
        .collect()
}

/// Validated, scaled window ready for the forecaster.
async fn model_input(ctx: &ServiceContext, request: FeaturesRequest) -> Result<Vec<[f64; 8]>, ApiError> {
    let window = validate_window(request.features, ctx.seq_length())?;
    if !request.raw {
        return Ok(window);
    }
    let artifacts = ctx.artifacts().await?;
    Ok(artifacts.scale_raw(&window)?)
}

pub async fn health(State(ctx): State<Arc<ServiceContext>>) -> Json<HealthResponse> {
    let model_version = if ctx.is_loaded() {
        ctx.artifacts()
            .await
            .ok()
            .map(|a| a.forecaster.version().to_string())
    } else {
        None
    };
    Json(HealthResponse {
        status: if model_version.is_some() { "active" } else { "loading" },
        model_version,
    })
}

#[instrument(skip_all)]
pub async fn predict(
    State(ctx): State<Arc<ServiceContext>>,
    Json(request): Json<FeaturesRequest>,
) -> Result<Json<Forecast>, ApiError> {
    let window = model_input(&ctx, request).await?;
    let artifacts = ctx.artifacts().await?;
    Ok(Json(artifacts.forecaster.predict(&window)?))
}

#[instrument(skip_all)]
pub async fn explain(
    State(ctx): State<Arc<ServiceContext>>,
    Json(request): Json<FeaturesRequest>,
) -> Result<Json<Attribution>, ApiError> {
    let window = model_input(&ctx, request).await?;
    let artifacts = ctx.artifacts().await?;
    let attribution = gradient_times_input(artifacts.forecaster.as_ref(), &window, DEFAULT_STEP)?;
    Ok(Json(attribution))
}

#[instrument(skip_all)]
pub async fn sample(
    State(ctx): State<Arc<ServiceContext>>,
    Query(query): Query<SampleQuery>,
) -> Result<Json<SampleResponse>, ApiError> {
    let artifacts = ctx.artifacts().await?;
    let (station, features) = artifacts
        .sample(query.station.as_deref(), query.offset, ctx.seq_length())
        .map_err(|e| ApiError::BadRequest(format!("{e:#}")))?;
    Ok(Json(SampleResponse { station, features }))
}

pub fn router(ctx: Arc<ServiceContext>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/predict", post(predict))
        .route("/explain", post(explain))
        .route("/sample", get(sample))
        .with_state(ctx)
        .layer((
            TraceLayer::new_for_http(),
            TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, REQUEST_TIMEOUT),
        ))
}

/// Binds `bind` and serves until Ctrl+C or SIGTERM.
pub async fn serve(bind: &str, ctx: Arc<ServiceContext>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind to {bind}"))?;
    info!(bind, "Serving");
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}

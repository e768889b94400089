use crate::auth::{OwnerId, TokenVerifier};
use crate::blob_store::{filename_of, DEFAULT_CONTENT_TYPE};
use crate::classification::ClassificationResult;
use crate::config::ApiConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::history::{parse_day, parse_timezone_offset, HistoryService};
use crate::images::ImageService;
use crate::orchestrator::Orchestrator;
use crate::record_store::{IdentificationRequest, RecordStore};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, DefaultBodyLimit, FromRef, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub history: Arc<HistoryService>,
    pub images: Arc<ImageService>,
    pub token_verifier: Arc<dyn TokenVerifier>,
    pub record_store: Arc<dyn RecordStore>,
}

impl FromRef<AppState> for Arc<dyn TokenVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.token_verifier.clone()
    }
}

/// Plant identification request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default)]
    pub mime_type: String,
    /// Base64 encoded image
    #[serde(default)]
    pub image_data: String,
}

/// Query parameters for the history list
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Local calendar day, YYYY-MM-DD
    pub day: Option<String>,
    /// Minutes east of UTC
    pub timezone: Option<String>,
}

/// History entry in API responses
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: Uuid,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ClassificationResult>,
}

impl From<IdentificationRequest> for HistoryEntry {
    fn from(r: IdentificationRequest) -> Self {
        Self {
            id: r.id,
            filename: filename_of(&r.image_ref).to_string(),
            created_at: r.created_at,
            updated_at: r.updated_at,
            result: r.result,
        }
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/ping", get(ping))
        .route("/api/identifyPlant", post(identify_plant))
        .route("/api/history", get(list_history))
        .route("/api/images/:filename", get(get_image))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "identify-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.record_store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": format!("{:#}", e)
            })),
        ),
    }
}

async fn ping() -> &'static str {
    "pong"
}

/// Classify an uploaded plant photo
#[instrument(skip_all, fields(owner = %owner))]
async fn identify_plant(
    State(state): State<AppState>,
    owner: OwnerId,
    payload: Result<Json<IdentifyRequest>, JsonRejection>,
) -> ServiceResult<Json<ClassificationResult>> {
    let Json(request) =
        payload.map_err(|e| ServiceError::invalid(format!("Malformed request body: {}", e)))?;

    let result = state
        .orchestrator
        .classify(&owner, &request.mime_type, &request.image_data)
        .await?;

    Ok(Json(result))
}

/// List one local day of the owner's identifications
#[instrument(skip_all, fields(owner = %owner))]
async fn list_history(
    State(state): State<AppState>,
    owner: OwnerId,
    Query(params): Query<HistoryQuery>,
) -> ServiceResult<Json<Vec<HistoryEntry>>> {
    let (Some(day), Some(timezone)) = (params.day.as_deref(), params.timezone.as_deref()) else {
        return Err(ServiceError::invalid(
            "Missing required query parameters: day, timezone",
        ));
    };

    let day = parse_day(day)?;
    let offset = parse_timezone_offset(timezone)?;

    let records = state.history.list_history(&owner, day, offset).await?;

    Ok(Json(records.into_iter().map(HistoryEntry::from).collect()))
}

/// Stream a stored image back to its owner
#[instrument(skip_all, fields(owner = %owner, filename = %filename))]
async fn get_image(
    State(state): State<AppState>,
    owner: OwnerId,
    Path(filename): Path<String>,
) -> ServiceResult<Response> {
    let image = state.images.fetch_image(&owner, &filename).await?;

    let content_type = image
        .content_type
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

    // Headers are already sent when the body fails, so the stream just ends
    let body = image.body.inspect_err(move |e| {
        error!(error = %e, filename = %filename, "Image stream failed");
    });

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type);
    if let Some(length) = image.content_length {
        response = response.header(header::CONTENT_LENGTH, length);
    }

    response
        .body(Body::from_stream(body))
        .context("Failed to build image response")
        .map_err(Into::into)
}

/// Start the identification API server, draining in-flight requests on shutdown
pub async fn start_api_server<F>(state: AppState, config: &ApiConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting identification API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}

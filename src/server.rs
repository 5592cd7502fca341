use crate::decipher::{DecipherOptions, DecipherReport, Decipherer};
use crate::error::AppError;
use crate::metadata::{check_max_attempts, ValidationOutcome};
use crate::variations::generate_url_variations;
use axum::{
    extract::{Query, State},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub decipherer: Decipherer,
}

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(handle_health))
        .route("/api/decipher", axum::routing::post(handle_decipher))
        .route("/api/variations", axum::routing::get(handle_variations))
        .route("/api/validate", axum::routing::post(handle_validate))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct DecipherRequest {
    description: String,
    #[serde(flatten)]
    options: DecipherOptions,
}

#[instrument(skip(state, request))]
async fn handle_decipher(
    State(state): State<SharedState>,
    Json(request): Json<DecipherRequest>,
) -> Result<Json<DecipherReport>, AppError> {
    info!(validate = request.options.validate, "Decipher request received");

    let report = state
        .decipherer
        .decipher(&request.description, &request.options)
        .await?;

    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct VariationsParams {
    url: String,
}

#[derive(Debug, Serialize)]
struct VariationsResponse {
    url: String,
    variations: Vec<String>,
}

#[instrument]
async fn handle_variations(
    Query(params): Query<VariationsParams>,
) -> Result<Json<VariationsResponse>, AppError> {
    let variations = generate_url_variations(&params.url)?;
    Ok(Json(VariationsResponse {
        url: params.url,
        variations,
    }))
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    url: String,
    #[serde(default)]
    max_attempts: Option<usize>,
}

#[instrument(skip(state))]
async fn handle_validate(
    State(state): State<SharedState>,
    Json(request): Json<ValidateRequest>,
) -> Result<Json<ValidationOutcome>, AppError> {
    let max_attempts = check_max_attempts(
        request
            .max_attempts
            .unwrap_or_else(|| state.decipherer.max_attempts()),
    )?;

    let outcome = state
        .decipherer
        .metadata()
        .find_valid_url(&request.url, max_attempts)
        .await?;

    Ok(Json(outcome))
}

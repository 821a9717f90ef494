//! HTTP surface: a single resolution endpoint plus a health probe, behind
//! permissive CORS. Callers always receive a JSON envelope and branch on
//! `success`.
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{instrument, warn};

use crate::config::Limits;
use crate::db::Pool;
use crate::meli::MeliApi;
use crate::resolver;
use crate::token::AppTokenCache;

pub struct AppState {
    pub pool: Pool,
    pub api: Arc<dyn MeliApi>,
    pub app_tokens: AppTokenCache,
    pub default_site: String,
    pub limits: Limits,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub product_id: String,
    pub student_id: Option<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/product-details", post(product_details))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

fn failure(error: impl ToString) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "error": error.to_string() })),
    )
}

#[instrument(skip_all)]
async fn product_details(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ResolveRequest>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            // Rejected before any upstream call; message is distinct from
            // resolution failures.
            return failure(format!("invalid request body: {}", rejection.body_text()));
        }
    };

    match resolver::resolve_product(
        state.api.as_ref(),
        &state.pool,
        &state.app_tokens,
        &state.default_site,
        &state.limits,
        &req.product_id,
        req.student_id.as_deref(),
    )
    .await
    {
        Ok(data) => (
            StatusCode::OK,
            Json(json!({ "success": true, "data": data })),
        ),
        Err(err) => {
            warn!(%err, product_id = %req.product_id, "resolution failed");
            failure(err)
        }
    }
}

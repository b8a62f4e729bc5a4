use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use utoipa::OpenApi;

use crate::error::Result;

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up")
    )
)]
#[axum::debug_handler]
pub async fn health() -> impl IntoResponse {
    let body = json!({
        "status": "ok",
    });
    (StatusCode::OK, Json(body))
}

#[axum::debug_handler]
pub async fn openapi_json() -> Result<impl IntoResponse> {
    let doc = serde_json::to_value(super::ApiDoc::openapi())?;
    Ok(Json(doc))
}

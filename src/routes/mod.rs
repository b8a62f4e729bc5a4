pub mod assignment;
pub mod attempt;
pub mod extract;
pub mod health;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use utoipa::OpenApi;

use crate::middleware::auth::require_identity;
use crate::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        assignment::assign_exam,
        assignment::list_exam_attempts,
        attempt::my_attempts,
        attempt::open_attempt,
        attempt::attempt_status,
        attempt::save_answer,
        attempt::finish_attempt,
        attempt::attempt_result,
        attempt::revoke_attempt,
    ),
    info(title = "Exam attempts API", description = "Timed, randomized exam attempts")
)]
pub struct ApiDoc;

/// Full application router. Everything under `/api` except the OpenAPI
/// document requires a bearer token.
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/exams/:exam_id/assign", post(assignment::assign_exam))
        .route(
            "/api/exams/:exam_id/attempts",
            get(assignment::list_exam_attempts),
        )
        .route("/api/me/attempts", get(attempt::my_attempts))
        .route(
            "/api/attempts/:id",
            get(attempt::open_attempt).delete(attempt::revoke_attempt),
        )
        .route("/api/attempts/:id/status", get(attempt::attempt_status))
        .route("/api/attempts/:id/answers", put(attempt::save_answer))
        .route("/api/attempts/:id/finish", post(attempt::finish_attempt))
        .route("/api/attempts/:id/result", get(attempt::attempt_result))
        .layer(middleware::from_fn_with_state(state.clone(), require_identity));

    Router::new()
        .route("/health", get(health::health))
        .route("/api/openapi.json", get(health::openapi_json))
        .merge(protected)
        .with_state(state)
}

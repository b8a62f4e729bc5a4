use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{assignment_dto::AssignExamRequest, attempt_dto::AttemptListResponse},
    error::Result,
    models::user::Identity,
    routes::extract::{ApiJson, ApiPath},
    utils::time,
    AppState,
};

#[utoipa::path(
    post,
    path = "/api/exams/{exam_id}/assign",
    params(
        ("exam_id" = Uuid, Path, description = "Exam ID")
    ),
    request_body = AssignExamRequest,
    responses(
        (status = 201, description = "Attempts created, with per-student failures", body = crate::services::assignment_service::AssignmentSummary),
        (status = 400, description = "Invalid payload or empty target"),
        (status = 403, description = "Caller is not a teacher or admin"),
        (status = 404, description = "Exam or department not found")
    )
)]
#[axum::debug_handler]
pub async fn assign_exam(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    ApiPath(exam_id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<AssignExamRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let (target, config) = payload.into_parts(state.default_duration_minutes)?;
    let summary = state
        .assignment_service
        .create_attempts(&identity, exam_id, target, config)
        .await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

#[utoipa::path(
    get,
    path = "/api/exams/{exam_id}/attempts",
    params(
        ("exam_id" = Uuid, Path, description = "Exam ID")
    ),
    responses(
        (status = 200, description = "Every attempt created for the exam", body = AttemptListResponse),
        (status = 403, description = "Caller is not a teacher or admin"),
        (status = 404, description = "Exam not found")
    )
)]
#[axum::debug_handler]
pub async fn list_exam_attempts(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    ApiPath(exam_id): ApiPath<Uuid>,
) -> Result<Json<AttemptListResponse>> {
    let list = state
        .attempt_service
        .list_for_exam(&identity, exam_id, time::now())
        .await?;
    Ok(Json(list))
}

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::attempt_dto::{
        AttemptForTakingResponse, AttemptListResponse, AttemptResultResponse,
        AttemptStatusResponse, FinishAttemptResponse, SaveAnswerRequest, SaveAnswerResponse,
    },
    error::Result,
    models::user::Identity,
    routes::extract::{ApiJson, ApiPath},
    utils::time,
    AppState,
};

#[utoipa::path(
    get,
    path = "/api/attempts/{id}",
    params(
        ("id" = Uuid, Path, description = "Attempt ID")
    ),
    responses(
        (status = 200, description = "Attempt opened for taking", body = AttemptForTakingResponse),
        (status = 403, description = "Attempt finished, past its deadline, or not yours"),
        (status = 404, description = "Attempt not found")
    )
)]
#[axum::debug_handler]
pub async fn open_attempt(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<AttemptForTakingResponse>> {
    let view = state.attempt_service.open(&identity, id, time::now()).await?;
    Ok(Json(view))
}

#[utoipa::path(
    get,
    path = "/api/attempts/{id}/status",
    params(
        ("id" = Uuid, Path, description = "Attempt ID")
    ),
    responses(
        (status = 200, description = "Current state and remaining time", body = AttemptStatusResponse),
        (status = 404, description = "Attempt not found")
    )
)]
#[axum::debug_handler]
pub async fn attempt_status(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<AttemptStatusResponse>> {
    let status = state.attempt_service.status(&identity, id, time::now()).await?;
    Ok(Json(status))
}

#[utoipa::path(
    put,
    path = "/api/attempts/{id}/answers",
    params(
        ("id" = Uuid, Path, description = "Attempt ID")
    ),
    request_body = SaveAnswerRequest,
    responses(
        (status = 200, description = "Answer stored", body = SaveAnswerResponse),
        (status = 400, description = "Question or answer not part of the attempt"),
        (status = 403, description = "Attempt finished or out of time")
    )
)]
#[axum::debug_handler]
pub async fn save_answer(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<SaveAnswerRequest>,
) -> Result<Json<SaveAnswerResponse>> {
    req.validate()?;
    let saved = state
        .attempt_service
        .save_answer(&identity, id, req.question_id, req.answer_id, time::now())
        .await?;
    Ok(Json(saved))
}

#[utoipa::path(
    post,
    path = "/api/attempts/{id}/finish",
    params(
        ("id" = Uuid, Path, description = "Attempt ID")
    ),
    responses(
        (status = 200, description = "Attempt scored, or the stored score if already finished", body = FinishAttemptResponse),
        (status = 403, description = "Attempt not started or not yours")
    )
)]
#[axum::debug_handler]
pub async fn finish_attempt(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<FinishAttemptResponse>> {
    let finished = state.attempt_service.finish(&identity, id, time::now()).await?;
    Ok(Json(finished))
}

#[utoipa::path(
    get,
    path = "/api/attempts/{id}/result",
    params(
        ("id" = Uuid, Path, description = "Attempt ID")
    ),
    responses(
        (status = 200, description = "Scored read-only view", body = AttemptResultResponse),
        (status = 403, description = "Attempt not finished yet")
    )
)]
#[axum::debug_handler]
pub async fn attempt_result(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<AttemptResultResponse>> {
    let result = state.attempt_service.result(&identity, id, time::now()).await?;
    Ok(Json(result))
}

#[utoipa::path(
    get,
    path = "/api/me/attempts",
    responses(
        (status = 200, description = "Attempts assigned to the caller", body = AttemptListResponse)
    )
)]
#[axum::debug_handler]
pub async fn my_attempts(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<AttemptListResponse>> {
    let list = state
        .attempt_service
        .list_for_student(&identity, time::now())
        .await?;
    Ok(Json(list))
}

#[utoipa::path(
    delete,
    path = "/api/attempts/{id}",
    params(
        ("id" = Uuid, Path, description = "Attempt ID")
    ),
    responses(
        (status = 204, description = "Attempt removed"),
        (status = 400, description = "Attempt already started"),
        (status = 403, description = "Caller is not staff")
    )
)]
#[axum::debug_handler]
pub async fn revoke_attempt(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<impl IntoResponse> {
    state.attempt_service.revoke(&identity, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

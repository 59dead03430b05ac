use axum::{
    extract::State,
    http::{header, HeaderName, StatusCode},
    routing::get,
    Json, Router,
};
use tracing::{info, instrument, warn};

use super::dto::{CreateShiftRequest, ListShiftsParams, UpdateShiftRequest};
use super::repo_types::{NewShift, Shift};
use super::services::{merge_update, validate_interval};
use crate::{
    auth::AuthUser,
    error::{AppError, StoreError},
    extract::{ApiJson, ApiPath, ApiQuery},
    policy::{require, scope_shift_listing, Action},
    state::AppState,
    store::ShiftStore,
};

pub fn shift_routes() -> Router<AppState> {
    Router::new()
        .route("/shifts", get(list_shifts).post(create_shift))
        .route(
            "/shifts/:id",
            get(get_shift).put(update_shift).delete(delete_shift),
        )
}

/// Logs rejected writes before they become a response.
fn write_error(e: StoreError) -> AppError {
    match &e {
        StoreError::Overlap { conflicting_id } => {
            warn!(%conflicting_id, "shift overlaps an existing shift");
        }
        StoreError::UnknownUser => warn!("shift references unknown user"),
        StoreError::OwnerChanged => warn!("shift reassigned while the update was in flight"),
        _ => {}
    }
    e.into()
}

async fn load(state: &AppState, id: &str) -> Result<Shift, AppError> {
    state
        .store
        .find_shift(id)
        .await?
        .ok_or(AppError::NotFound("shift"))
}

#[instrument(skip(state))]
pub async fn list_shifts(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiQuery(params): ApiQuery<ListShiftsParams>,
) -> Result<Json<Vec<Shift>>, AppError> {
    let owner = scope_shift_listing(&caller, params.user_id.clone())?;

    if let (Some(start), Some(end)) = (params.filter_start, params.filter_end) {
        if start > end {
            return Err(AppError::validation(
                "filter span start time must precede span end time",
            ));
        }
    }

    let shifts = state.store.list_shifts(&params.into_query(owner)).await?;
    Ok(Json(shifts))
}

#[instrument(skip(state))]
pub async fn get_shift(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<String>,
) -> Result<Json<Shift>, AppError> {
    let shift = load(&state, &id).await?;
    require(&caller, Some(&shift.user_id), Action::ReadShift)?;
    Ok(Json(shift))
}

#[instrument(skip(state, payload))]
pub async fn create_shift(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiJson(payload): ApiJson<CreateShiftRequest>,
) -> Result<(StatusCode, [(HeaderName, String); 1], Json<Shift>), AppError> {
    if payload.user_id.is_empty() {
        return Err(AppError::validation("user_id required"));
    }
    let start = payload
        .start
        .ok_or_else(|| AppError::validation("start time required"))?;
    let end = payload
        .end
        .ok_or_else(|| AppError::validation("end time required"))?;
    validate_interval(start, end)?;

    require(&caller, Some(&payload.user_id), Action::WriteShift)?;

    let shift = state
        .store
        .insert_shift(NewShift {
            user_id: payload.user_id,
            start,
            end,
        })
        .await
        .map_err(write_error)?;

    info!(shift_id = %shift.id, user_id = %shift.user_id, "shift created");
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("/api/v1/shifts/{}", shift.id))],
        Json(shift),
    ))
}

#[instrument(skip(state, payload))]
pub async fn update_shift(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(payload): ApiJson<UpdateShiftRequest>,
) -> Result<Json<Shift>, AppError> {
    let existing = load(&state, &id).await?;
    require(&caller, Some(&existing.user_id), Action::WriteShift)?;

    let change = merge_update(&existing, payload);
    if change.user_id != existing.user_id {
        require(&caller, Some(&change.user_id), Action::WriteShift)?;
    }
    validate_interval(change.start, change.end)?;

    let shift = state
        .store
        .update_shift(&id, &existing.user_id, change)
        .await
        .map_err(write_error)?;

    info!(shift_id = %shift.id, user_id = %shift.user_id, "shift updated");
    Ok(Json(shift))
}

#[instrument(skip(state))]
pub async fn delete_shift(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<String>,
) -> Result<StatusCode, AppError> {
    let shift = load(&state, &id).await?;
    require(&caller, Some(&shift.user_id), Action::WriteShift)?;

    state.store.delete_shift(&id).await?;
    info!(shift_id = %id, "shift deleted");
    Ok(StatusCode::NO_CONTENT)
}

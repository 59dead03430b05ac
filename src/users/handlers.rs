use axum::{
    extract::State,
    http::{header, HeaderName, StatusCode},
    routing::get,
    Json, Router,
};
use tracing::{info, instrument, warn};

use super::dto::{CreateUserRequest, UpdateUserRequest, UserListParams};
use super::repo_types::{NewUser, User, UserChanges};
use super::services::{normalize_name, parse_role, validate_password};
use crate::{
    auth::{password::hash_password, AuthUser},
    error::{AppError, StoreError},
    extract::{ApiJson, ApiPath, ApiQuery},
    policy::{require, Action},
    state::AppState,
    store::UserStore,
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
}

fn name_error(e: StoreError) -> AppError {
    if matches!(e, StoreError::NameTaken) {
        warn!("user name already exists");
    }
    e.into()
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiQuery(params): ApiQuery<UserListParams>,
) -> Result<Json<Vec<User>>, AppError> {
    require(&caller, None, Action::ListUsers)?;
    Ok(Json(state.store.list_users(params.limit).await?))
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiJson(payload): ApiJson<CreateUserRequest>,
) -> Result<(StatusCode, [(HeaderName, String); 1], Json<User>), AppError> {
    require(&caller, None, Action::CreateUser)?;

    let name = normalize_name(&payload.name)?;
    validate_password(&payload.password)?;
    let role = parse_role(&payload.role)?;

    let user = state
        .store
        .insert_user(NewUser {
            name,
            password_hash: hash_password(&payload.password)?,
            role,
        })
        .await
        .map_err(name_error)?;

    info!(user_id = %user.id, name = %user.name, role = %user.role, "user created");
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("/api/v1/users/{}", user.id))],
        Json(user),
    ))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<String>,
) -> Result<Json<User>, AppError> {
    require(&caller, Some(&id), Action::ReadUser)?;
    let user = state
        .store
        .find_user(&id)
        .await?
        .ok_or(AppError::NotFound("user"))?;
    Ok(Json(user))
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(payload): ApiJson<UpdateUserRequest>,
) -> Result<Json<User>, AppError> {
    require(&caller, Some(&id), Action::UpdateUser)?;

    let existing = state
        .store
        .find_user(&id)
        .await?
        .ok_or(AppError::NotFound("user"))?;

    let role = payload.role.as_deref().map(parse_role).transpose()?;
    if role.is_some_and(|r| r != existing.role) {
        require(&caller, Some(&id), Action::ChangeRole)?;
    }

    let name = payload.name.as_deref().map(normalize_name).transpose()?;
    let password_hash = match payload.password.as_deref() {
        Some(p) => {
            validate_password(p)?;
            Some(hash_password(p)?)
        }
        None => None,
    };

    let user = state
        .store
        .update_user(&id, UserChanges { name, password_hash, role })
        .await
        .map_err(name_error)?;

    info!(user_id = %user.id, "user updated");
    Ok(Json(user))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<String>,
) -> Result<StatusCode, AppError> {
    require(&caller, None, Action::DeleteUser)?;
    state.store.delete_user(&id).await.map_err(|e| match e {
        StoreError::NotFound => AppError::NotFound("user"),
        other => other.into(),
    })?;
    info!(user_id = %id, "user deleted with their shifts");
    Ok(StatusCode::NO_CONTENT)
}

use axum::{
    extract::{FromRef, State},
    routing::post,
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{JwtKeys, LoginQuery, TokenResponse},
        password::verify_password,
    },
    error::AppError,
    extract::ApiQuery,
    state::AppState,
    store::UserStore,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new().route("/login", post(login))
}

#[instrument(skip(state, params), fields(user = %params.user))]
pub async fn login(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<LoginQuery>,
) -> Result<Json<TokenResponse>, AppError> {
    let name = params.user.trim();
    if name.is_empty() || params.pass.is_empty() {
        return Err(AppError::validation("you must provide valid credentials"));
    }

    let invalid = || AppError::Unauthenticated("Invalid credentials".into());

    let user = match state.store.find_user_by_name(name).await? {
        Some(u) => u,
        None => {
            warn!("login unknown user");
            return Err(invalid());
        }
    };

    if !verify_password(&params.pass, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(invalid());
    }

    let token = JwtKeys::from_ref(&state).sign(&user)?;
    info!(user_id = %user.id, role = %user.role, "user logged in");
    Ok(Json(TokenResponse { token }))
}

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use huddle_core::auth::{AuthError, AuthService, Credentials};
use huddle_core::user::Registration;
use huddle_core::AppState;
use huddle_db::users::UserRow;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::AuthUser;

/// Public view of a user row. `is_online` comes from the live registry, not
/// the persisted flag, which lags behind disconnects.
pub(crate) fn user_to_json(state: &AppState, user: &UserRow) -> Value {
    json!({
        "id": user.id.to_string(),
        "username": user.username,
        "email": user.email,
        "display_name": user.display_name.as_deref().unwrap_or(&user.username),
        "avatar_url": user.avatar_url,
        "is_online": state.presence().is_online(user.id),
        "last_seen": state.presence().last_seen(user.id).or(user.last_seen),
        "created_at": user.created_at,
    })
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<Registration>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.config.registration_enabled {
        return Err(AuthError::RegistrationDisabled.into());
    }

    let user = huddle_core::user::register(&state.db, state.config.worker_id, &body).await?;
    let token = state.auth.issue_token(user.id)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "token": token,
            "user": user_to_json(&state, &user),
        })),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<Credentials>,
) -> Result<Json<Value>, ApiError> {
    let identity = match state.auth.authenticate(&body).await {
        Ok(identity) => identity,
        Err(AuthError::InvalidCredentials) => {
            tracing::info!(login = %body.login.trim(), "login rejected");
            return Err(ApiError::Unauthorized);
        }
        Err(e) => return Err(e.into()),
    };

    let user = huddle_db::users::get_user_by_id(&state.db, identity.id)
        .await?
        .ok_or(ApiError::Unauthorized)?;
    let token = state.auth.issue_token(user.id)?;

    Ok(Json(json!({
        "token": token,
        "user": user_to_json(&state, &user),
    })))
}

pub async fn me(State(state): State<AppState>, auth: AuthUser) -> Result<Json<Value>, ApiError> {
    let user = huddle_db::users::get_user_by_id(&state.db, auth.user_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(user_to_json(&state, &user)))
}

/// Ends every live gateway connection of the caller. Tokens are stateless and
/// stay valid until they expire.
pub async fn logout(State(state): State<AppState>, auth: AuthUser) -> Result<StatusCode, ApiError> {
    huddle_core::user::logout(&state.db, state.presence(), auth.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

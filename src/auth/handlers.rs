use axum::{
    extract::State,
    http::{header::SET_COOKIE, StatusCode},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        cookie::{clear_session_cookie, session_cookie},
        dto::{
            ChangePasswordRequest, CompletePasswordResetRequest, CredentialsRequest, PublicUser,
            ResetPasswordRequest, SessionResponse, VerifyRequest,
        },
        error::AuthError,
        middleware::{allow_unverified, require_verified, CurrentUser},
    },
    error::ApiError,
    state::AppState,
};

/// Routes that need no session.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/api/signup", post(signup))
        .route("/api/login", post(login))
        .route("/api/user/change-password", post(change_password))
        .route("/api/user/reset-password", post(reset_password))
        .route("/api/user/reset-password/complete", post(complete_password_reset))
}

/// Routes an unverified account may still reach.
pub fn unverified_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/api/logout", post(logout))
        .route("/api/user/resend-verification-code", post(resend_verification_code))
        .route("/api/user/verify", post(verify_user))
        .route_layer(from_fn_with_state(state.clone(), allow_unverified))
}

pub fn verified_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/api/me", get(get_me))
        .route_layer(from_fn_with_state(state.clone(), require_verified))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(mut payload): Json<CredentialsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    payload.validate()?;
    let (user, token) = state.users.signup(&payload.email, &payload.password).await?;
    let cookie = session_cookie(&state.config.session, &token).map_err(ApiError::Internal)?;

    Ok((
        StatusCode::CREATED,
        [(SET_COOKIE, cookie)],
        Json(SessionResponse {
            user: user.into(),
            session_token: token,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<CredentialsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    payload.validate()?;
    let (user, token) = state
        .users
        .login(&payload.email, &payload.password)
        .await
        .map_err(|e| match e {
            AuthError::InvalidCredentials => ApiError::LoginFailed,
            other => other.into(),
        })?;
    let cookie = session_cookie(&state.config.session, &token).map_err(ApiError::Internal)?;

    Ok((
        StatusCode::OK,
        [(SET_COOKIE, cookie)],
        Json(SessionResponse {
            user: user.into(),
            session_token: token,
        }),
    ))
}

#[instrument(skip(state, user), fields(user_id = %user.0.id))]
pub async fn logout(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    state.users.logout(user.0.id).await?;
    let cookie = clear_session_cookie(&state.config.session).map_err(ApiError::Internal)?;
    Ok((StatusCode::OK, [(SET_COOKIE, cookie)]))
}

#[instrument(skip(state, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    Json(mut payload): Json<ChangePasswordRequest>,
) -> Result<StatusCode, ApiError> {
    payload.validate()?;
    state
        .users
        .change_password(&payload.email, &payload.old_password, &payload.new_password)
        .await?;
    Ok(StatusCode::OK)
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(mut payload): Json<ResetPasswordRequest>,
) -> Result<StatusCode, ApiError> {
    payload.validate()?;
    state.users.reset_password(&payload.email).await?;
    Ok(StatusCode::OK)
}

#[instrument(skip(state, payload))]
pub async fn complete_password_reset(
    State(state): State<AppState>,
    Json(payload): Json<CompletePasswordResetRequest>,
) -> Result<StatusCode, ApiError> {
    payload.validate()?;
    state
        .users
        .complete_password_reset(&payload.token, &payload.new_password)
        .await?;
    Ok(StatusCode::OK)
}

#[instrument(skip(state, user), fields(user_id = %user.0.id))]
pub async fn resend_verification_code(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<StatusCode, ApiError> {
    state.users.resend_verification_code(user.0.id).await?;
    Ok(StatusCode::OK)
}

#[instrument(skip(state, user, payload), fields(user_id = %user.0.id))]
pub async fn verify_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<VerifyRequest>,
) -> Result<StatusCode, ApiError> {
    payload.validate()?;
    state
        .users
        .verify_user(user.0.id, &payload.verification_code)
        .await?;
    Ok(StatusCode::OK)
}

#[instrument(skip(user), fields(user_id = %user.0.id))]
pub async fn get_me(user: CurrentUser) -> Json<PublicUser> {
    Json(user.0.into())
}

//! Per-request session gate.
//!
//! Resolves the presented session token into a [`User`] and hands it to the
//! handler through request extensions, read back with the [`CurrentUser`]
//! extractor. Outcomes per request:
//!
//! - no usable session: 401
//! - valid session, unverified account, verification required: 403
//! - otherwise: admitted

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::{
    auth::{
        cookie::{extract_session_token, PresentedToken},
        error::{AuthError, AuthResult},
        services::normalize_email,
        tokens::digest,
    },
    error::ApiError,
    state::AppState,
    store::{SessionStore, Stores, User, UserStore},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    RequireVerified,
    AllowUnverified,
}

#[derive(Clone)]
pub struct AuthMiddleware {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
}

impl AuthMiddleware {
    pub fn new(stores: &Stores) -> Self {
        Self {
            users: stores.users.clone(),
            sessions: stores.sessions.clone(),
        }
    }

    pub async fn authenticate(
        &self,
        presented: Option<&PresentedToken>,
        gate: Gate,
    ) -> AuthResult<User> {
        let presented = presented.ok_or(AuthError::Unauthorized)?;
        let session = self
            .sessions
            .find_active_session(&digest(&presented.token), OffsetDateTime::now_utc())
            .await?
            .ok_or(AuthError::Unauthorized)?;
        let user = self
            .users
            .find_by_id(session.user_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;

        if let Some(email) = &presented.email {
            if normalize_email(email) != user.email {
                debug!(user_id = %user.id, "cookie email does not match session owner");
                return Err(AuthError::Unauthorized);
            }
        }

        if gate == Gate::RequireVerified && !user.verified {
            return Err(AuthError::Forbidden);
        }
        Ok(user)
    }
}

/// Authenticated user for the current request.
#[derive(Clone, Debug)]
pub struct CurrentUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(ApiError::Unauthorized)
    }
}

pub async fn require_verified(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    admit(&state, req, next, Gate::RequireVerified).await
}

/// For the verify, resend and logout routes only.
pub async fn allow_unverified(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    admit(&state, req, next, Gate::AllowUnverified).await
}

async fn admit(
    state: &AppState,
    mut req: Request,
    next: Next,
    gate: Gate,
) -> Result<Response, ApiError> {
    let presented = extract_session_token(req.headers());
    let user = match state.auth.authenticate(presented.as_ref(), gate).await {
        Ok(user) => user,
        Err(e) => {
            if !matches!(e, AuthError::Internal(_)) {
                warn!(path = %req.uri().path(), reason = %e, "request rejected");
            }
            return Err(e.into());
        }
    };
    req.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(req).await)
}

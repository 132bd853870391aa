use crate::state::AppState;
use axum::Router;

pub mod cookie;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod notifier;
pub mod password;
pub mod rate_limit;
pub mod services;
pub mod tokens;

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(handlers::public_routes())
        .merge(handlers::unverified_routes(state))
        .merge(handlers::verified_routes(state))
}

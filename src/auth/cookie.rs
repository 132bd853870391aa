//! Session transport: the `Authorization` cookie and bearer header.

use axum::http::{
    header::{AUTHORIZATION, COOKIE},
    HeaderMap, HeaderValue,
};
use base64ct::{Base64, Encoding};

use crate::config::SessionConfig;

pub const SESSION_COOKIE_NAME: &str = "Authorization";

/// Token material presented by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedToken {
    pub token: String,
    /// Set when the client sent the legacy `base64(email:token)` cookie.
    pub email: Option<String>,
}

/// Cookie carrying only the opaque session token.
pub fn session_cookie(config: &SessionConfig, token: &str) -> anyhow::Result<HeaderValue> {
    let max_age = config.session_ttl().whole_seconds();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}"
    );
    if config.cookie_secure {
        cookie.push_str("; Secure");
    }
    Ok(HeaderValue::from_str(&cookie)?)
}

pub fn clear_session_cookie(config: &SessionConfig) -> anyhow::Result<HeaderValue> {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0; \
         Expires=Thu, 01 Jan 1970 00:00:00 GMT"
    );
    if config.cookie_secure {
        cookie.push_str("; Secure");
    }
    Ok(HeaderValue::from_str(&cookie)?)
}

/// Bearer header first, then the cookie.
pub fn extract_session_token(headers: &HeaderMap) -> Option<PresentedToken> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(PresentedToken { token, email: None });
    }
    let value = extract_cookie(headers)?;
    Some(decode_legacy(&value).unwrap_or(PresentedToken {
        token: value,
        email: None,
    }))
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn extract_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == SESSION_COOKIE_NAME)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Opaque tokens are unpadded URL-safe base64 and never decode as padded
/// standard base64, so the two cookie formats cannot be confused.
fn decode_legacy(value: &str) -> Option<PresentedToken> {
    let decoded = Base64::decode_vec(value).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (email, token) = decoded.split_once(':')?;
    if email.is_empty() || token.is_empty() {
        return None;
    }
    Some(PresentedToken {
        token: token.to_string(),
        email: Some(email.to_string()),
    })
}

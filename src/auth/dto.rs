use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{error::ApiError, store::User};

const PASSWORD_MIN: usize = 4;
const PASSWORD_MAX: usize = 32;
const CODE_MAX: usize = 64;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7e).contains(&b))
}

fn normalized_email(email: &mut String) -> Result<(), ApiError> {
    *email = email.trim().to_lowercase();
    if !is_valid_email(email) {
        return Err(ApiError::Validation("Invalid email".into()));
    }
    Ok(())
}

fn check_password(field: &str, password: &str) -> Result<(), ApiError> {
    let len = password.chars().count();
    if !(PASSWORD_MIN..=PASSWORD_MAX).contains(&len) {
        return Err(ApiError::Validation(format!(
            "{field} must be {PASSWORD_MIN} to {PASSWORD_MAX} characters"
        )));
    }
    if !is_printable_ascii(password) {
        return Err(ApiError::Validation(format!("{field} must be printable ASCII")));
    }
    Ok(())
}

/// Request body for signup and login.
#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

impl CredentialsRequest {
    pub fn validate(&mut self) -> Result<(), ApiError> {
        normalized_email(&mut self.email)?;
        check_password("password", &self.password)
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub email: String,
    pub old_password: String,
    pub new_password: String,
}

impl ChangePasswordRequest {
    pub fn validate(&mut self) -> Result<(), ApiError> {
        normalized_email(&mut self.email)?;
        if self.old_password.is_empty() || !is_printable_ascii(&self.old_password) {
            return Err(ApiError::Validation("old_password must be printable ASCII".into()));
        }
        check_password("new_password", &self.new_password)
    }
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
}

impl ResetPasswordRequest {
    pub fn validate(&mut self) -> Result<(), ApiError> {
        normalized_email(&mut self.email)
    }
}

#[derive(Debug, Deserialize)]
pub struct CompletePasswordResetRequest {
    pub token: String,
    pub new_password: String,
}

impl CompletePasswordResetRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let token = self.token.trim();
        if token.is_empty() || token.len() > CODE_MAX || !is_printable_ascii(token) {
            return Err(ApiError::Validation("Invalid token".into()));
        }
        check_password("new_password", &self.new_password)
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub verification_code: String,
}

impl VerifyRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let code = self.verification_code.trim();
        if code.is_empty() || code.len() > CODE_MAX || !is_printable_ascii(code) {
            return Err(ApiError::Validation("Invalid verification code".into()));
        }
        Ok(())
    }
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            verified: user.verified,
            created_at: user.created_at,
        }
    }
}

/// Response returned after signup or login.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub user: PublicUser,
    pub session_token: String,
}

use thiserror::Error;

/// Outcomes of the authentication core that are not plain success.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Bad password, unknown email, or a missing/wrong/expired code or reset token.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("user already exists")]
    UserAlreadyExists,

    /// Missing, unknown, expired or revoked session.
    #[error("unauthorized")]
    Unauthorized,

    /// Valid session, but the account still needs verification.
    #[error("account not verified")]
    Forbidden,

    #[error("too many attempts")]
    RateLimited,

    /// Store, hashing or random-source failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AuthResult<T> = Result<T, AuthError>;

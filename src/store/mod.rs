//! Persistence contracts for users, sessions and password-reset capabilities.
//!
//! Every method that guards a uniqueness or single-use invariant is a single
//! atomic operation against the backing store; callers never read-then-write.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// The stores the service depends on, usually backed by one object.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub resets: Arc<dyn PasswordResetStore>,
    pub credentials: Arc<dyn CredentialStore>,
}

impl Stores {
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            users: store.clone(),
            sessions: store.clone(),
            resets: store.clone(),
            credentials: store,
        }
    }

    pub fn postgres(db: PgPool) -> Self {
        let store = Arc::new(PgStore::new(db));
        Self {
            users: store.clone(),
            sessions: store.clone(),
            resets: store.clone(),
            credentials: store,
        }
    }
}

/// User record as persisted.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,                                       // normalized (trimmed, lowercase)
    pub password_hash: String,                               // argon2 PHC string
    pub verified: bool,
    pub verification_code_hash: Option<Vec<u8>>,            // sha256 of the outstanding code
    pub verification_code_expires_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// Values for a user that does not exist yet.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub verification_code_hash: Vec<u8>,
    pub verification_code_expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

/// Server-side half of a session. Only the token digest is kept.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub token_hash: Vec<u8>,
    pub user_id: Uuid,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl Session {
    pub fn is_active(&self, now: OffsetDateTime) -> bool {
        self.expires_at > now
    }
}

/// Outstanding capability to set a password without knowing the old one.
#[derive(Debug, Clone, FromRow)]
pub struct PasswordReset {
    pub token_hash: Vec<u8>,
    pub user_id: Uuid,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert if no user owns `email` yet. `None` means the email is taken.
    async fn insert_user(&self, user: NewUser) -> anyhow::Result<Option<User>>;

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;

    /// Swap the outstanding verification code of an unverified user.
    /// Returns the updated user, or `None` if the user is unknown or already verified.
    async fn replace_verification_code(
        &self,
        id: Uuid,
        code_hash: Vec<u8>,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<Option<User>>;

    /// Compare-and-clear: marks the user verified and drops the code only if
    /// `code_hash` matches the outstanding, unexpired code.
    async fn consume_verification_code(
        &self,
        id: Uuid,
        code_hash: &[u8],
        now: OffsetDateTime,
    ) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: Session) -> anyhow::Result<()>;

    /// Active (unexpired, unrevoked) session for the digest.
    async fn find_active_session(
        &self,
        token_hash: &[u8],
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<Session>>;

    /// Revoke every session owned by the user. Returns how many were removed.
    async fn revoke_user_sessions(&self, user_id: Uuid) -> anyhow::Result<u64>;

    async fn purge_expired_sessions(&self, now: OffsetDateTime) -> anyhow::Result<u64>;
}

#[async_trait]
pub trait PasswordResetStore: Send + Sync {
    /// Store `reset`, dropping any earlier capability of the same user.
    async fn replace_password_reset(&self, reset: PasswordReset) -> anyhow::Result<()>;

    async fn purge_expired_password_resets(&self, now: OffsetDateTime) -> anyhow::Result<u64>;
}

/// Operations that touch a user's password together with the sessions and
/// reset capabilities derived from it. Each call is all or nothing.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert `session` only while `password_hash` is still the owner's
    /// current hash. Returns false if the password changed in between.
    async fn insert_session_if_current(
        &self,
        session: Session,
        password_hash: &str,
    ) -> anyhow::Result<bool>;

    /// Compare-and-swap the password hash, then revoke every session and
    /// reset capability of the user. Returns false if `current_hash` is stale.
    async fn change_password(
        &self,
        user_id: Uuid,
        current_hash: &str,
        new_hash: &str,
    ) -> anyhow::Result<bool>;

    /// Consume the reset capability, set the new hash, then revoke every
    /// session and reset capability of its owner. Unknown or expired
    /// capabilities yield `None` and change nothing else.
    async fn complete_password_reset(
        &self,
        token_hash: &[u8],
        new_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<Uuid>>;
}

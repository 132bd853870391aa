use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    CredentialStore, NewUser, PasswordReset, PasswordResetStore, Session, SessionStore, User,
    UserStore,
};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    emails: HashMap<String, Uuid>,
    sessions: HashMap<Vec<u8>, Session>,
    resets: HashMap<Vec<u8>, PasswordReset>,
}

impl Inner {
    fn revoke_derived(&mut self, user_id: Uuid) {
        self.sessions.retain(|_, s| s.user_id != user_id);
        self.resets.retain(|_, r| r.user_id != user_id);
    }
}

/// Process-local store. Each operation runs inside a single lock scope, so
/// every mutation is applied completely or not at all.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(&self, user: NewUser) -> anyhow::Result<Option<User>> {
        let mut inner = self.inner.lock().await;
        if inner.emails.contains_key(&user.email) {
            return Ok(None);
        }
        let record = User {
            id: user.id,
            email: user.email.clone(),
            password_hash: user.password_hash,
            verified: false,
            verification_code_hash: Some(user.verification_code_hash),
            verification_code_expires_at: Some(user.verification_code_expires_at),
            created_at: user.created_at,
        };
        inner.emails.insert(user.email, user.id);
        inner.users.insert(user.id, record.clone());
        Ok(Some(record))
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .emails
            .get(email)
            .and_then(|id| inner.users.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.inner.lock().await.users.get(&id).cloned())
    }

    async fn replace_verification_code(
        &self,
        id: Uuid,
        code_hash: Vec<u8>,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let mut inner = self.inner.lock().await;
        match inner.users.get_mut(&id) {
            Some(user) if !user.verified => {
                user.verification_code_hash = Some(code_hash);
                user.verification_code_expires_at = Some(expires_at);
                Ok(Some(user.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn consume_verification_code(
        &self,
        id: Uuid,
        code_hash: &[u8],
        now: OffsetDateTime,
    ) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(user) = inner.users.get_mut(&id) else {
            return Ok(false);
        };
        let matches = match (&user.verification_code_hash, user.verification_code_expires_at) {
            (Some(stored), Some(expires_at)) => {
                !user.verified && expires_at > now && constant_time_eq(stored, code_hash)
            }
            _ => false,
        };
        if matches {
            user.verified = true;
            user.verification_code_hash = None;
            user.verification_code_expires_at = None;
        }
        Ok(matches)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: Session) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.sessions.contains_key(&session.token_hash) {
            anyhow::bail!("duplicate session token");
        }
        inner.sessions.insert(session.token_hash.clone(), session);
        Ok(())
    }

    async fn find_active_session(
        &self,
        token_hash: &[u8],
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<Session>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sessions
            .get(token_hash)
            .filter(|s| s.is_active(now))
            .cloned())
    }

    async fn revoke_user_sessions(&self, user_id: Uuid) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.sessions.len();
        inner.sessions.retain(|_, s| s.user_id != user_id);
        Ok((before - inner.sessions.len()) as u64)
    }

    async fn purge_expired_sessions(&self, now: OffsetDateTime) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.sessions.len();
        inner.sessions.retain(|_, s| s.is_active(now));
        Ok((before - inner.sessions.len()) as u64)
    }
}

#[async_trait]
impl PasswordResetStore for MemoryStore {
    async fn replace_password_reset(&self, reset: PasswordReset) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.resets.retain(|_, r| r.user_id != reset.user_id);
        inner.resets.insert(reset.token_hash.clone(), reset);
        Ok(())
    }

    async fn purge_expired_password_resets(&self, now: OffsetDateTime) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.resets.len();
        inner.resets.retain(|_, r| r.expires_at > now);
        Ok((before - inner.resets.len()) as u64)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn insert_session_if_current(
        &self,
        session: Session,
        password_hash: &str,
    ) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().await;
        let current = inner
            .users
            .get(&session.user_id)
            .is_some_and(|u| u.password_hash == password_hash);
        if !current {
            return Ok(false);
        }
        if inner.sessions.contains_key(&session.token_hash) {
            anyhow::bail!("duplicate session token");
        }
        inner.sessions.insert(session.token_hash.clone(), session);
        Ok(true)
    }

    async fn change_password(
        &self,
        user_id: Uuid,
        current_hash: &str,
        new_hash: &str,
    ) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.users.get_mut(&user_id) {
            Some(user) if user.password_hash == current_hash => {
                user.password_hash = new_hash.to_string();
            }
            _ => return Ok(false),
        }
        inner.revoke_derived(user_id);
        Ok(true)
    }

    async fn complete_password_reset(
        &self,
        token_hash: &[u8],
        new_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<Uuid>> {
        let mut inner = self.inner.lock().await;
        // Expired capabilities are dropped as well; they can never become valid again.
        let Some(user_id) = inner
            .resets
            .remove(token_hash)
            .filter(|r| r.expires_at > now)
            .map(|r| r.user_id)
        else {
            return Ok(None);
        };
        let Some(user) = inner.users.get_mut(&user_id) else {
            return Ok(None);
        };
        user.password_hash = new_hash.to_string();
        inner.revoke_derived(user_id);
        Ok(Some(user_id))
    }
}

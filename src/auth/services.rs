//! Signup, login and the account-recovery flows.
//!
//! Every invariant that must hold under concurrent requests (unique email,
//! single-use codes and reset tokens, session revocation) is delegated to a
//! single atomic store operation. The service itself keeps no shared state.

use std::sync::Arc;

use anyhow::Context;
use time::{Duration, OffsetDateTime};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::{
    auth::{
        error::{AuthError, AuthResult},
        notifier::Notifier,
        password::CredentialHasher,
        rate_limit::{RateLimitAction, RateLimitDecision, RateLimiter},
        tokens::{digest, normalize_code, TokenIssuer},
    },
    config::SessionConfig,
    store::{NewUser, PasswordReset, Session, Stores, User},
};

/// Normalize an email for lookup and uniqueness checks.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub struct UsersSvc {
    stores: Stores,
    hasher: CredentialHasher,
    tokens: TokenIssuer,
    notifier: Arc<dyn Notifier>,
    limiter: Arc<dyn RateLimiter>,
    config: SessionConfig,
}

impl UsersSvc {
    pub fn new(
        stores: Stores,
        hasher: CredentialHasher,
        notifier: Arc<dyn Notifier>,
        limiter: Arc<dyn RateLimiter>,
        config: SessionConfig,
    ) -> Self {
        Self {
            stores,
            hasher,
            tokens: TokenIssuer,
            notifier,
            limiter,
            config,
        }
    }

    #[instrument(skip(self, password))]
    pub async fn signup(&self, email: &str, password: &str) -> AuthResult<(User, String)> {
        let email = normalize_email(email);
        let now = OffsetDateTime::now_utc();
        let password_hash = self.hash_password(password).await?;
        let code = self.tokens.verification_code();

        let new_user = NewUser {
            id: Uuid::new_v4(),
            email,
            password_hash,
            verification_code_hash: digest(&code),
            verification_code_expires_at: now + self.config.verification_code_ttl(),
            created_at: now,
        };
        let Some(user) = self.stores.users.insert_user(new_user).await? else {
            warn!("email already registered");
            return Err(AuthError::UserAlreadyExists);
        };

        let token = self.open_session(user.id, now).await?;

        // The account exists either way; a lost code can be resent.
        if let Err(e) = self.notifier.send_verification_code(&user.email, &code).await {
            error!(error = ?e, user_id = %user.id, "failed to deliver verification code");
        }

        info!(user_id = %user.id, "user signed up");
        Ok((user, token))
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<(User, String)> {
        let email = normalize_email(email);
        let user = self.stores.users.find_by_email(&email).await?;

        let user = match user {
            Some(user) if self.verify_password(password, &user.password_hash).await? => user,
            Some(user) => {
                debug!(user_id = %user.id, "login invalid password");
                return Err(AuthError::InvalidCredentials);
            }
            None => {
                self.verify_dummy(password).await?;
                debug!("login unknown email");
                return Err(AuthError::InvalidCredentials);
            }
        };

        let now = OffsetDateTime::now_utc();
        let token = self.tokens.session_token()?;
        let opened = self
            .stores
            .credentials
            .insert_session_if_current(
                self.session_for(&token, user.id, now),
                &user.password_hash,
            )
            .await?;
        if !opened {
            debug!(user_id = %user.id, "password changed during login");
            return Err(AuthError::InvalidCredentials);
        }
        info!(user_id = %user.id, "user logged in");
        Ok((user, token))
    }

    /// Revokes every session of the user. Calling it again is harmless.
    #[instrument(skip(self))]
    pub async fn logout(&self, user_id: Uuid) -> AuthResult<()> {
        let revoked = self.stores.sessions.revoke_user_sessions(user_id).await?;
        info!(%user_id, revoked, "user logged out");
        Ok(())
    }

    /// Re-authenticates with the old password; no session is required.
    #[instrument(skip(self, old_password, new_password))]
    pub async fn change_password(
        &self,
        email: &str,
        old_password: &str,
        new_password: &str,
    ) -> AuthResult<()> {
        let email = normalize_email(email);
        let user = match self.stores.users.find_by_email(&email).await? {
            Some(user) if self.verify_password(old_password, &user.password_hash).await? => user,
            Some(_) => return Err(AuthError::InvalidCredentials),
            None => {
                self.verify_dummy(old_password).await?;
                return Err(AuthError::InvalidCredentials);
            }
        };

        let password_hash = self.hash_password(new_password).await?;
        let changed = self
            .stores
            .credentials
            .change_password(user.id, &user.password_hash, &password_hash)
            .await?;
        if !changed {
            // Someone else replaced the password after it was checked.
            return Err(AuthError::InvalidCredentials);
        }
        info!(user_id = %user.id, "password changed");
        Ok(())
    }

    /// Accepts a reset request. Lookup, issue and delivery all run off the
    /// request path, so known and unknown emails answer alike.
    #[instrument(skip(self))]
    pub async fn reset_password(&self, email: &str) -> AuthResult<()> {
        let _ = self.spawn_password_reset(email);
        Ok(())
    }

    fn spawn_password_reset(&self, email: &str) -> JoinHandle<()> {
        let email = normalize_email(email);
        let stores = self.stores.clone();
        let notifier = self.notifier.clone();
        let tokens = self.tokens;
        let ttl = self.config.password_reset_ttl();
        tokio::spawn(
            async move {
                let issued =
                    issue_password_reset(&stores, notifier.as_ref(), tokens, ttl, &email).await;
                if let Err(e) = issued {
                    error!(error = ?e, "failed to issue password reset");
                }
            }
            .in_current_span(),
        )
    }

    /// Consumes a reset capability and sets the new password.
    #[instrument(skip(self, token, new_password))]
    pub async fn complete_password_reset(&self, token: &str, new_password: &str) -> AuthResult<()> {
        let password_hash = self.hash_password(new_password).await?;
        let Some(user_id) = self
            .stores
            .credentials
            .complete_password_reset(
                &digest(token.trim()),
                &password_hash,
                OffsetDateTime::now_utc(),
            )
            .await?
        else {
            debug!("unknown or expired reset token");
            return Err(AuthError::InvalidCredentials);
        };

        info!(%user_id, "password reset completed");
        Ok(())
    }

    /// Replaces the outstanding code; the previous one stops verifying.
    #[instrument(skip(self))]
    pub async fn resend_verification_code(&self, user_id: Uuid) -> AuthResult<()> {
        self.throttle(user_id, RateLimitAction::ResendVerification)?;

        let code = self.tokens.verification_code();
        let expires_at = OffsetDateTime::now_utc() + self.config.verification_code_ttl();
        let Some(user) = self
            .stores
            .users
            .replace_verification_code(user_id, digest(&code), expires_at)
            .await?
        else {
            debug!(%user_id, "no verification pending");
            return Ok(());
        };

        self.notifier
            .send_verification_code(&user.email, &code)
            .await
            .context("deliver verification code")?;
        info!(%user_id, "verification code resent");
        Ok(())
    }

    #[instrument(skip(self, code))]
    pub async fn verify_user(&self, user_id: Uuid, code: &str) -> AuthResult<()> {
        self.throttle(user_id, RateLimitAction::VerifyUser)?;

        let code_hash = digest(&normalize_code(code));
        let consumed = self
            .stores
            .users
            .consume_verification_code(user_id, &code_hash, OffsetDateTime::now_utc())
            .await?;
        if !consumed {
            warn!(%user_id, "verification code rejected");
            return Err(AuthError::InvalidCredentials);
        }

        info!(%user_id, "user verified");
        Ok(())
    }

    /// Drop expired sessions and reset capabilities.
    pub async fn purge_expired(&self) -> AuthResult<(u64, u64)> {
        let now = OffsetDateTime::now_utc();
        let sessions = self.stores.sessions.purge_expired_sessions(now).await?;
        let resets = self.stores.resets.purge_expired_password_resets(now).await?;
        Ok((sessions, resets))
    }

    async fn open_session(&self, user_id: Uuid, now: OffsetDateTime) -> AuthResult<String> {
        let token = self.tokens.session_token()?;
        self.stores
            .sessions
            .insert_session(self.session_for(&token, user_id, now))
            .await?;
        Ok(token)
    }

    fn session_for(&self, token: &str, user_id: Uuid, now: OffsetDateTime) -> Session {
        Session {
            token_hash: digest(token),
            user_id,
            created_at: now,
            expires_at: now + self.config.session_ttl(),
        }
    }

    fn throttle(&self, user_id: Uuid, action: RateLimitAction) -> AuthResult<()> {
        match self.limiter.check(user_id, action) {
            RateLimitDecision::Allowed => Ok(()),
            RateLimitDecision::Limited => {
                warn!(%user_id, ?action, "rate limited");
                Err(AuthError::RateLimited)
            }
        }
    }

    async fn hash_password(&self, plain: &str) -> AuthResult<String> {
        let hasher = self.hasher.clone();
        let plain = plain.to_owned();
        let hash = tokio::task::spawn_blocking(move || hasher.hash(&plain))
            .await
            .context("hashing task failed")??;
        Ok(hash)
    }

    async fn verify_password(&self, plain: &str, hash: &str) -> AuthResult<bool> {
        let hasher = self.hasher.clone();
        let (plain, hash) = (plain.to_owned(), hash.to_owned());
        let ok = tokio::task::spawn_blocking(move || hasher.verify(&plain, &hash))
            .await
            .context("verify task failed")??;
        Ok(ok)
    }

    async fn verify_dummy(&self, plain: &str) -> AuthResult<()> {
        let hasher = self.hasher.clone();
        let plain = plain.to_owned();
        tokio::task::spawn_blocking(move || hasher.verify_dummy(&plain))
            .await
            .context("verify task failed")?;
        Ok(())
    }
}

async fn issue_password_reset(
    stores: &Stores,
    notifier: &dyn Notifier,
    tokens: TokenIssuer,
    ttl: Duration,
    email: &str,
) -> anyhow::Result<()> {
    let Some(user) = stores.users.find_by_email(email).await? else {
        debug!("password reset for unknown email");
        return Ok(());
    };

    let token = tokens.reset_token()?;
    let now = OffsetDateTime::now_utc();
    stores
        .resets
        .replace_password_reset(PasswordReset {
            token_hash: digest(&token),
            user_id: user.id,
            created_at: now,
            expires_at: now + ttl,
        })
        .await?;
    notifier
        .send_password_reset(&user.email, &token)
        .await
        .context("deliver password reset")?;

    info!(user_id = %user.id, "password reset issued");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{
            notifier::testing::{latest_code, Notification, RecordingNotifier},
            rate_limit::{NoopRateLimiter, WindowRateLimiter},
        },
        config::{HashingConfig, RateLimitConfig},
        store::{PasswordResetStore, SessionStore},
    };
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        svc: Arc<UsersSvc>,
        stores: Stores,
        rx: UnboundedReceiver<Notification>,
    }

    fn harness_with(config: SessionConfig, limiter: Arc<dyn RateLimiter>) -> Harness {
        harness_over(Stores::memory(), config, limiter)
    }

    fn harness_over(
        stores: Stores,
        config: SessionConfig,
        limiter: Arc<dyn RateLimiter>,
    ) -> Harness {
        let (notifier, rx) = RecordingNotifier::new();
        let hasher = CredentialHasher::new(&HashingConfig::cheap()).expect("cheap params");
        let svc = Arc::new(UsersSvc::new(
            stores.clone(),
            hasher,
            Arc::new(notifier),
            limiter,
            config,
        ));
        Harness { svc, stores, rx }
    }

    fn harness() -> Harness {
        harness_with(SessionConfig::default(), Arc::new(NoopRateLimiter))
    }

    async fn session_active(stores: &Stores, token: &str) -> bool {
        stores
            .sessions
            .find_active_session(&digest(token), OffsetDateTime::now_utc())
            .await
            .unwrap()
            .is_some()
    }

    #[tokio::test]
    async fn signup_creates_unverified_user_with_session_and_code() {
        let mut h = harness();
        let (user, token) = h.svc.signup(" A@X.com ", "pass1234").await.unwrap();

        assert_eq!(user.email, "a@x.com");
        assert!(!user.verified);
        assert_ne!(user.password_hash, "pass1234");
        assert!(session_active(&h.stores, &token).await);
        assert!(latest_code(&mut h.rx).is_some());
    }

    #[tokio::test]
    async fn duplicate_signup_leaves_original_untouched() {
        let mut h = harness();
        let (original, _) = h.svc.signup("a@x.com", "pass1234").await.unwrap();
        let code = latest_code(&mut h.rx).unwrap();

        let err = h.svc.signup("A@x.com", "other-pass").await.unwrap_err();
        assert!(matches!(err, AuthError::UserAlreadyExists));

        let stored = h.stores.users.find_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(stored.id, original.id);
        assert_eq!(stored.password_hash, original.password_hash);
        assert_eq!(stored.verification_code_hash, Some(digest(&code)));
        assert!(latest_code(&mut h.rx).is_none());
    }

    #[tokio::test]
    async fn concurrent_signups_with_same_email_admit_exactly_one() {
        let h = harness();
        let attempts = 16;
        let mut handles = Vec::new();
        for _ in 0..attempts {
            let svc = h.svc.clone();
            handles.push(tokio::spawn(async move {
                svc.signup("race@x.com", "pass1234").await
            }));
        }

        let mut created = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(AuthError::UserAlreadyExists) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(conflicts, attempts - 1);
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let h = harness();
        h.svc.signup("a@x.com", "pass1234").await.unwrap();

        let unknown = h.svc.login("nobody@x.com", "pass1234").await.unwrap_err();
        let wrong = h.svc.login("a@x.com", "wrong-pass").await.unwrap_err();
        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn login_issues_additional_session() {
        let h = harness();
        let (_, first) = h.svc.signup("a@x.com", "pass1234").await.unwrap();
        let (user, second) = h.svc.login("A@X.COM", "pass1234").await.unwrap();

        assert_eq!(user.email, "a@x.com");
        assert_ne!(first, second);
        assert!(session_active(&h.stores, &first).await);
        assert!(session_active(&h.stores, &second).await);
    }

    #[tokio::test]
    async fn logout_revokes_all_sessions_and_is_idempotent() {
        let h = harness();
        let (user, first) = h.svc.signup("a@x.com", "pass1234").await.unwrap();
        let (_, second) = h.svc.login("a@x.com", "pass1234").await.unwrap();

        h.svc.logout(user.id).await.unwrap();
        assert!(!session_active(&h.stores, &first).await);
        assert!(!session_active(&h.stores, &second).await);
        h.svc.logout(user.id).await.unwrap();
    }

    #[tokio::test]
    async fn verify_user_succeeds_exactly_once() {
        let mut h = harness();
        let (user, _) = h.svc.signup("a@x.com", "pass1234").await.unwrap();
        let code = latest_code(&mut h.rx).unwrap();

        let err = h.svc.verify_user(user.id, "WRONGCDE").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        h.svc.verify_user(user.id, &code.to_lowercase()).await.unwrap();
        let err = h.svc.verify_user(user.id, &code).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        let stored = h.stores.users.find_by_id(user.id).await.unwrap().unwrap();
        assert!(stored.verified);
        assert!(stored.verification_code_hash.is_none());
    }

    #[tokio::test]
    async fn concurrent_verifications_admit_exactly_one() {
        let mut h = harness();
        let (user, _) = h.svc.signup("a@x.com", "pass1234").await.unwrap();
        let code = latest_code(&mut h.rx).unwrap();

        let user_id = user.id;
        let mut handles = Vec::new();
        for _ in 0..8 {
            let (svc, code) = (h.svc.clone(), code.clone());
            handles.push(tokio::spawn(async move { svc.verify_user(user_id, &code).await }));
        }
        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => ok += 1,
                Err(AuthError::InvalidCredentials) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn resend_invalidates_previous_code() {
        let mut h = harness();
        let (user, _) = h.svc.signup("a@x.com", "pass1234").await.unwrap();
        let old_code = latest_code(&mut h.rx).unwrap();

        h.svc.resend_verification_code(user.id).await.unwrap();
        let new_code = latest_code(&mut h.rx).unwrap();

        let err = h.svc.verify_user(user.id, &old_code).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        h.svc.verify_user(user.id, &new_code).await.unwrap();
    }

    #[tokio::test]
    async fn resend_for_verified_user_sends_nothing() {
        let mut h = harness();
        let (user, _) = h.svc.signup("a@x.com", "pass1234").await.unwrap();
        let code = latest_code(&mut h.rx).unwrap();
        h.svc.verify_user(user.id, &code).await.unwrap();

        h.svc.resend_verification_code(user.id).await.unwrap();
        assert!(latest_code(&mut h.rx).is_none());
    }

    #[tokio::test]
    async fn expired_code_is_rejected() {
        let config = SessionConfig {
            verification_code_ttl_minutes: 0,
            ..SessionConfig::default()
        };
        let mut h = harness_with(config, Arc::new(NoopRateLimiter));
        let (user, _) = h.svc.signup("a@x.com", "pass1234").await.unwrap();
        let code = latest_code(&mut h.rx).unwrap();

        let err = h.svc.verify_user(user.id, &code).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn resend_is_throttled() {
        let limiter = WindowRateLimiter::new(&RateLimitConfig {
            window_seconds: 3600,
            resend_limit: 1,
            verify_limit: 10,
        });
        let h = harness_with(SessionConfig::default(), Arc::new(limiter));
        let (user, _) = h.svc.signup("a@x.com", "pass1234").await.unwrap();

        h.svc.resend_verification_code(user.id).await.unwrap();
        let err = h.svc.resend_verification_code(user.id).await.unwrap_err();
        assert!(matches!(err, AuthError::RateLimited));
    }

    #[tokio::test]
    async fn change_password_swaps_credentials_and_revokes_sessions() {
        let h = harness();
        let (_, token) = h.svc.signup("a@x.com", "pass1234").await.unwrap();

        let err = h.svc.change_password("a@x.com", "nope", "newpass99").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        let err = h.svc.change_password("nobody@x.com", "pass1234", "newpass99").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        h.svc.change_password("a@x.com", "pass1234", "newpass99").await.unwrap();
        assert!(!session_active(&h.stores, &token).await);

        let err = h.svc.login("a@x.com", "pass1234").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        h.svc.login("a@x.com", "newpass99").await.unwrap();
    }

    #[tokio::test]
    async fn reset_password_for_unknown_email_is_silent() {
        let mut h = harness();
        h.svc.reset_password("nobody@x.com").await.unwrap();
        h.svc.spawn_password_reset("nobody@x.com").await.unwrap();
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reset_password_round_trip_is_single_use() {
        let mut h = harness();
        let (_, session) = h.svc.signup("a@x.com", "pass1234").await.unwrap();
        latest_code(&mut h.rx);

        h.svc.reset_password("A@x.com").await.unwrap();
        let token = match h.rx.recv().await.unwrap() {
            Notification::PasswordReset { email, token } => {
                assert_eq!(email, "a@x.com");
                token
            }
            other => panic!("unexpected notification: {other:?}"),
        };

        h.svc.complete_password_reset(&token, "resetpass1").await.unwrap();
        assert!(!session_active(&h.stores, &session).await);
        h.svc.login("a@x.com", "resetpass1").await.unwrap();

        let err = h.svc.complete_password_reset(&token, "again1234").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn newer_reset_replaces_older_one() {
        let mut h = harness();
        h.svc.signup("a@x.com", "pass1234").await.unwrap();
        latest_code(&mut h.rx);

        let mut tokens = Vec::new();
        for _ in 0..2 {
            h.svc.reset_password("a@x.com").await.unwrap();
            if let Some(Notification::PasswordReset { token, .. }) = h.rx.recv().await {
                tokens.push(token);
            }
        }

        let err = h.svc.complete_password_reset(&tokens[0], "resetpass1").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        h.svc.complete_password_reset(&tokens[1], "resetpass1").await.unwrap();
    }

    /// Delegates to a memory store but stalls every reset write.
    struct SlowResets {
        inner: Stores,
        delay: std::time::Duration,
    }

    #[async_trait::async_trait]
    impl PasswordResetStore for SlowResets {
        async fn replace_password_reset(&self, reset: PasswordReset) -> anyhow::Result<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.resets.replace_password_reset(reset).await
        }

        async fn purge_expired_password_resets(&self, now: OffsetDateTime) -> anyhow::Result<u64> {
            self.inner.resets.purge_expired_password_resets(now).await
        }
    }

    #[tokio::test]
    async fn reset_request_latency_does_not_depend_on_the_account() {
        let memory = Stores::memory();
        let stores = Stores {
            resets: Arc::new(SlowResets {
                inner: memory.clone(),
                delay: std::time::Duration::from_millis(300),
            }),
            ..memory
        };
        let mut h = harness_over(stores, SessionConfig::default(), Arc::new(NoopRateLimiter));
        h.svc.signup("a@x.com", "pass1234").await.unwrap();
        latest_code(&mut h.rx);

        let started = std::time::Instant::now();
        h.svc.reset_password("a@x.com").await.unwrap();
        let known = started.elapsed();

        let started = std::time::Instant::now();
        h.svc.reset_password("nobody@x.com").await.unwrap();
        let unknown = started.elapsed();

        assert!(known < std::time::Duration::from_millis(100), "known took {known:?}");
        assert!(unknown < std::time::Duration::from_millis(100), "unknown took {unknown:?}");

        // The capability is still issued in the background.
        let notification = h.rx.recv().await.unwrap();
        assert!(matches!(notification, Notification::PasswordReset { .. }));
    }

    /// Delegates to a memory store but cannot revoke sessions on its own.
    struct BrokenRevoke {
        inner: Stores,
    }

    #[async_trait::async_trait]
    impl SessionStore for BrokenRevoke {
        async fn insert_session(&self, session: Session) -> anyhow::Result<()> {
            self.inner.sessions.insert_session(session).await
        }

        async fn find_active_session(
            &self,
            token_hash: &[u8],
            now: OffsetDateTime,
        ) -> anyhow::Result<Option<Session>> {
            self.inner.sessions.find_active_session(token_hash, now).await
        }

        async fn revoke_user_sessions(&self, _user_id: Uuid) -> anyhow::Result<u64> {
            anyhow::bail!("sessions table unavailable")
        }

        async fn purge_expired_sessions(&self, now: OffsetDateTime) -> anyhow::Result<u64> {
            self.inner.sessions.purge_expired_sessions(now).await
        }
    }

    #[tokio::test]
    async fn password_change_and_session_revocation_apply_together() {
        let memory = Stores::memory();
        let stores = Stores {
            sessions: Arc::new(BrokenRevoke {
                inner: memory.clone(),
            }),
            ..memory
        };
        let h = harness_over(stores, SessionConfig::default(), Arc::new(NoopRateLimiter));
        let (_, token) = h.svc.signup("a@x.com", "pass1234").await.unwrap();

        h.svc.change_password("a@x.com", "pass1234", "newpass99").await.unwrap();

        assert!(!session_active(&h.stores, &token).await);
        let err = h.svc.login("a@x.com", "pass1234").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        h.svc.login("a@x.com", "newpass99").await.unwrap();
    }

    #[tokio::test]
    async fn stale_password_check_cannot_overwrite_a_newer_password() {
        let h = harness();
        let (user, _) = h.svc.signup("a@x.com", "pass1234").await.unwrap();
        let checked_hash = user.password_hash.clone();

        h.svc.change_password("a@x.com", "pass1234", "newpass99").await.unwrap();

        // A second change that verified against the old hash before the first landed.
        let changed = h
            .stores
            .credentials
            .change_password(user.id, &checked_hash, "other-hash")
            .await
            .unwrap();
        assert!(!changed);
        h.svc.login("a@x.com", "newpass99").await.unwrap();
    }

    #[tokio::test]
    async fn expired_reset_token_is_rejected() {
        let config = SessionConfig {
            password_reset_ttl_minutes: 0,
            ..SessionConfig::default()
        };
        let mut h = harness_with(config, Arc::new(NoopRateLimiter));
        let (_, session) = h.svc.signup("a@x.com", "pass1234").await.unwrap();
        latest_code(&mut h.rx);

        h.svc.spawn_password_reset("a@x.com").await.unwrap();
        let token = match h.rx.try_recv().unwrap() {
            Notification::PasswordReset { token, .. } => token,
            other => panic!("unexpected notification: {other:?}"),
        };

        let err = h.svc.complete_password_reset(&token, "resetpass1").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert!(session_active(&h.stores, &session).await);
        h.svc.login("a@x.com", "pass1234").await.unwrap();
    }

    #[tokio::test]
    async fn purge_expired_removes_dead_sessions() {
        let config = SessionConfig {
            ttl_minutes: 0,
            ..SessionConfig::default()
        };
        let h = harness_with(config, Arc::new(NoopRateLimiter));
        let (_, token) = h.svc.signup("a@x.com", "pass1234").await.unwrap();

        assert!(!session_active(&h.stores, &token).await);
        let (sessions, _) = h.svc.purge_expired().await.unwrap();
        assert_eq!(sessions, 1);
    }
}

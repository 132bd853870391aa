use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    CredentialStore, NewUser, PasswordReset, PasswordResetStore, Session, SessionStore, User,
    UserStore,
};

const USER_COLUMNS: &str = "id, email, password_hash, verified, verification_code_hash, \
                            verification_code_expires_at, created_at";

/// Postgres-backed implementation of every store contract.
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

async fn revoke_derived(tx: &mut Transaction<'_, Postgres>, user_id: Uuid) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM sessions WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM password_resets WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[async_trait]
impl UserStore for PgStore {
    async fn insert_user(&self, user: NewUser) -> anyhow::Result<Option<User>> {
        // ON CONFLICT keeps the uniqueness check and the insert in one statement.
        let row = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, email, password_hash, verified,
                               verification_code_hash, verification_code_expires_at, created_at)
            VALUES ($1, $2, $3, FALSE, $4, $5, $6)
            ON CONFLICT (email) DO NOTHING
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.verification_code_hash)
        .bind(user.verification_code_expires_at)
        .bind(user.created_at)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn replace_verification_code(
        &self,
        id: Uuid,
        code_hash: Vec<u8>,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET verification_code_hash = $2, verification_code_expires_at = $3
            WHERE id = $1 AND verified = FALSE
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(code_hash)
        .bind(expires_at)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn consume_verification_code(
        &self,
        id: Uuid,
        code_hash: &[u8],
        now: OffsetDateTime,
    ) -> anyhow::Result<bool> {
        // Concurrent attempts serialize on the row lock; the loser re-evaluates
        // the WHERE clause against the cleared code and matches nothing.
        let row: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE users
            SET verified = TRUE,
                verification_code_hash = NULL,
                verification_code_expires_at = NULL
            WHERE id = $1
              AND verified = FALSE
              AND verification_code_hash = $2
              AND verification_code_expires_at > $3
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(code_hash)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn insert_session(&self, session: Session) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (token_hash, user_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&session.token_hash)
        .bind(session.user_id)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find_active_session(
        &self,
        token_hash: &[u8],
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            SELECT token_hash, user_id, created_at, expires_at
            FROM sessions
            WHERE token_hash = $1 AND expires_at > $2
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        Ok(session)
    }

    async fn revoke_user_sessions(&self, user_id: Uuid) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge_expired_sessions(&self, now: OffsetDateTime) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PasswordResetStore for PgStore {
    async fn replace_password_reset(&self, reset: PasswordReset) -> anyhow::Result<()> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM password_resets WHERE user_id = $1")
            .bind(reset.user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO password_resets (token_hash, user_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&reset.token_hash)
        .bind(reset.user_id)
        .bind(reset.created_at)
        .bind(reset.expires_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn purge_expired_password_resets(&self, now: OffsetDateTime) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM password_resets WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

// Dropping an uncommitted transaction rolls it back, so every early return
// below leaves the database untouched.
#[async_trait]
impl CredentialStore for PgStore {
    async fn insert_session_if_current(
        &self,
        session: Session,
        password_hash: &str,
    ) -> anyhow::Result<bool> {
        let mut tx = self.db.begin().await?;
        // FOR SHARE waits for a concurrent password change to commit and then
        // sees the new hash.
        let current: Option<(String,)> =
            sqlx::query_as("SELECT password_hash FROM users WHERE id = $1 FOR SHARE")
                .bind(session.user_id)
                .fetch_optional(&mut *tx)
                .await?;
        if !matches!(current, Some((hash,)) if hash == password_hash) {
            return Ok(false);
        }
        sqlx::query(
            r#"
            INSERT INTO sessions (token_hash, user_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&session.token_hash)
        .bind(session.user_id)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn change_password(
        &self,
        user_id: Uuid,
        current_hash: &str,
        new_hash: &str,
    ) -> anyhow::Result<bool> {
        let mut tx = self.db.begin().await?;
        let updated = sqlx::query(
            "UPDATE users SET password_hash = $3 WHERE id = $1 AND password_hash = $2",
        )
        .bind(user_id)
        .bind(current_hash)
        .bind(new_hash)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() != 1 {
            return Ok(false);
        }
        revoke_derived(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn complete_password_reset(
        &self,
        token_hash: &[u8],
        new_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<Uuid>> {
        let mut tx = self.db.begin().await?;
        let row: Option<(Uuid, OffsetDateTime)> = sqlx::query_as(
            "DELETE FROM password_resets WHERE token_hash = $1 RETURNING user_id, expires_at",
        )
        .bind(token_hash)
        .fetch_optional(&mut *tx)
        .await?;
        let user_id = match row {
            Some((user_id, expires_at)) if expires_at > now => user_id,
            Some(_) => {
                // Expired capabilities are deleted as well; they can never become valid again.
                tx.commit().await?;
                return Ok(None);
            }
            None => return Ok(None),
        };

        let updated = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(user_id)
            .bind(new_hash)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() != 1 {
            return Ok(None);
        }
        revoke_derived(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(Some(user_id))
    }
}

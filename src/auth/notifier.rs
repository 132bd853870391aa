//! Outbound delivery of verification codes and reset links.

use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_verification_code(&self, email: &str, code: &str) -> anyhow::Result<()>;
    async fn send_password_reset(&self, email: &str, token: &str) -> anyhow::Result<()>;
}

/// Writes deliveries to the log. Development only: secrets end up in the output.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_verification_code(&self, email: &str, code: &str) -> anyhow::Result<()> {
        info!(%email, %code, "verification code issued");
        Ok(())
    }

    async fn send_password_reset(&self, email: &str, token: &str) -> anyhow::Result<()> {
        info!(%email, %token, "password reset issued");
        Ok(())
    }
}

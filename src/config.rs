use serde::Deserialize;
use time::Duration;

/// Argon2 work factor.
#[derive(Debug, Clone, Deserialize)]
pub struct HashingConfig {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for HashingConfig {
    fn default() -> Self {
        // argon2 crate defaults (OWASP minimums for argon2id)
        Self {
            m_cost: 19 * 1024,
            t_cost: 2,
            p_cost: 1,
        }
    }
}

#[cfg(test)]
impl HashingConfig {
    pub fn cheap() -> Self {
        Self {
            m_cost: 8,
            t_cost: 1,
            p_cost: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub window_seconds: u64,
    pub resend_limit: u32,
    pub verify_limit: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_seconds: 60 * 60,
            resend_limit: 5,
            verify_limit: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub ttl_minutes: i64,
    pub verification_code_ttl_minutes: i64,
    pub password_reset_ttl_minutes: i64,
    pub cookie_secure: bool,
}

impl SessionConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::minutes(self.ttl_minutes)
    }

    pub fn verification_code_ttl(&self) -> Duration {
        Duration::minutes(self.verification_code_ttl_minutes)
    }

    pub fn password_reset_ttl(&self) -> Duration {
        Duration::minutes(self.password_reset_ttl_minutes)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: 60 * 24 * 7,
            verification_code_ttl_minutes: 60 * 24,
            password_reset_ttl_minutes: 30,
            cookie_secure: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Without a database the service keeps everything in memory.
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub request_timeout_seconds: u64,
    pub purge_interval_seconds: u64,
    pub session: SessionConfig,
    pub hashing: HashingConfig,
    pub rate_limit: RateLimitConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            host: "0.0.0.0".into(),
            port: 8080,
            request_timeout_seconds: 10,
            purge_interval_seconds: 300,
            session: SessionConfig::default(),
            hashing: HashingConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());
        let session = SessionConfig {
            ttl_minutes: env_or("SESSION_TTL_MINUTES", defaults.session.ttl_minutes),
            verification_code_ttl_minutes: env_or(
                "VERIFICATION_CODE_TTL_MINUTES",
                defaults.session.verification_code_ttl_minutes,
            ),
            password_reset_ttl_minutes: env_or(
                "PASSWORD_RESET_TTL_MINUTES",
                defaults.session.password_reset_ttl_minutes,
            ),
            cookie_secure: env_or("COOKIE_SECURE", defaults.session.cookie_secure),
        };
        let hashing = HashingConfig {
            m_cost: env_or("ARGON2_M_COST", defaults.hashing.m_cost),
            t_cost: env_or("ARGON2_T_COST", defaults.hashing.t_cost),
            p_cost: env_or("ARGON2_P_COST", defaults.hashing.p_cost),
        };
        let rate_limit = RateLimitConfig {
            window_seconds: env_or("RATE_LIMIT_WINDOW_SECONDS", defaults.rate_limit.window_seconds),
            resend_limit: env_or("RESEND_LIMIT_PER_WINDOW", defaults.rate_limit.resend_limit),
            verify_limit: env_or("VERIFY_ATTEMPTS_PER_WINDOW", defaults.rate_limit.verify_limit),
        };

        if session.ttl_minutes <= 0 {
            anyhow::bail!("SESSION_TTL_MINUTES must be positive");
        }

        Ok(Self {
            database_url,
            host: std::env::var("APP_HOST").unwrap_or(defaults.host),
            port: env_or("APP_PORT", defaults.port),
            request_timeout_seconds: env_or(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
            purge_interval_seconds: env_or("PURGE_INTERVAL_SECONDS", defaults.purge_interval_seconds),
            session,
            hashing,
            rate_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert!(config.database_url.is_none());
        assert_eq!(config.session.session_ttl(), Duration::days(7));
        assert_eq!(config.session.verification_code_ttl(), Duration::hours(24));
        assert_eq!(config.session.password_reset_ttl(), Duration::minutes(30));
    }

    #[test]
    fn env_or_falls_back_on_garbage() {
        std::env::set_var("GATEKEEPER_TEST_NUMBER", "not-a-number");
        assert_eq!(env_or("GATEKEEPER_TEST_NUMBER", 42u32), 42);
        std::env::set_var("GATEKEEPER_TEST_NUMBER", "7");
        assert_eq!(env_or("GATEKEEPER_TEST_NUMBER", 42u32), 7);
        std::env::remove_var("GATEKEEPER_TEST_NUMBER");
    }
}

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::{
    auth::{
        middleware::AuthMiddleware,
        notifier::{LogNotifier, Notifier},
        password::CredentialHasher,
        rate_limit::{RateLimiter, WindowRateLimiter},
        services::UsersSvc,
    },
    config::AppConfig,
    store::Stores,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<UsersSvc>,
    pub auth: AuthMiddleware,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let stores = match &config.database_url {
            Some(url) => {
                let db = PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await?;
                sqlx::migrate!("./migrations").run(&db).await?;
                info!("connected to postgres, migrations applied");
                Stores::postgres(db)
            }
            None => {
                warn!("DATABASE_URL not set; using in-memory store, data is lost on restart");
                Stores::memory()
            }
        };

        let limiter = Arc::new(WindowRateLimiter::new(&config.rate_limit));
        Self::from_parts(config, stores, Arc::new(LogNotifier), limiter)
    }

    pub fn from_parts(
        config: AppConfig,
        stores: Stores,
        notifier: Arc<dyn Notifier>,
        limiter: Arc<dyn RateLimiter>,
    ) -> anyhow::Result<Self> {
        let hasher = CredentialHasher::new(&config.hashing)?;
        let auth = AuthMiddleware::new(&stores);
        let users = Arc::new(UsersSvc::new(
            stores,
            hasher,
            notifier,
            limiter,
            config.session.clone(),
        ));
        Ok(Self {
            config: Arc::new(config),
            users,
            auth,
        })
    }
}

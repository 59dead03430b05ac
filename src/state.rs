use crate::config::{AppConfig, JwtConfig};
use crate::db::PgStore;
use crate::memory::MemoryStore;
use crate::store::Store;
use std::sync::Arc;
use tracing::{info, warn};

/// Postgres when a database URL is configured, otherwise the in-memory store.
/// Startup fails if the database is unreachable or its migrations do not apply.
pub async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn Store>> {
    match &config.database_url {
        Some(url) => {
            let pg = PgStore::connect(url, config.max_connections).await?;
            pg.migrate().await?;
            info!("using postgres store");
            Ok(Arc::new(pg))
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory store, data is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn Store>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);
        let store = open_store(&config).await?;
        Ok(Self { config, store })
    }

    pub fn from_parts(config: Arc<AppConfig>, store: Arc<dyn Store>) -> Self {
        Self { config, store }
    }

    /// In-memory state with a fixed test configuration.
    pub fn fake() -> Self {
        let config = Arc::new(AppConfig {
            database_url: None,
            max_connections: 1,
            host: "127.0.0.1".into(),
            port: 0,
            seed_demo_data: false,
            request_timeout_secs: 10,
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
            },
        });
        Self::from_parts(config, Arc::new(MemoryStore::new()))
    }
}

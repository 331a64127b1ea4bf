use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use api::{
    config::{ApiConfig, StoreKind},
    routes,
    state::AppState,
};
use catalog::{MemoryStore, PgStore, VideoStore};
use common::database::{DatabaseConfig, health_check, init_pool, run_migrations};

async fn open_store(config: &ApiConfig) -> Result<Arc<dyn VideoStore>> {
    match config.store {
        StoreKind::Memory => {
            info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreKind::Postgres => {
            let db_config = DatabaseConfig::from_env()?;
            let pool = init_pool(&db_config).await?;

            if health_check(&pool).await? {
                info!("Database connection successful");
            } else {
                anyhow::bail!("Failed to connect to database");
            }

            if config.run_migrations {
                run_migrations(&pool).await?;
            }
            Ok(Arc::new(PgStore::new(pool)))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting video catalog API");

    let config = ApiConfig::from_env()?;
    let store = open_store(&config).await?;
    let state = AppState::new(store).with_write_attempts(config.write_attempts);
    let app = routes::create_router(state);

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("Video catalog API listening on {}", address);

    axum::serve(listener, app).await?;

    Ok(())
}

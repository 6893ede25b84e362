use crate::config::Config;
use crate::error::AppError;
use crate::store::StoreError;
use deadpool_postgres::tokio_postgres::{Config as PgConfig, NoTls};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tracing::info;

/// Schema migrations, applied in order at startup. Each one is idempotent.
const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_create_messages",
    include_str!("../migrations/0001_create_messages.sql"),
)];

pub fn create_pool(cfg: &Config) -> Result<Pool, AppError> {
    let pg_config: PgConfig = cfg
        .database_url
        .parse()
        .map_err(|e| AppError::Config(format!("DATABASE_URL: {e}")))?;

    let mgr = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );

    Pool::builder(mgr)
        .max_size(cfg.db_max_connections)
        .runtime(Runtime::Tokio1)
        .wait_timeout(Some(cfg.store_timeout))
        .create_timeout(Some(cfg.store_timeout))
        .build()
        .map_err(|e| AppError::StartServer(format!("db pool: {e}")))
}

pub async fn run_migrations(pool: &Pool) -> Result<(), StoreError> {
    let client = pool.get().await?;
    for (name, sql) in MIGRATIONS {
        client.batch_execute(sql).await?;
        info!(migration = name, "Applied migration");
    }
    Ok(())
}

/// Build the pool, check connectivity and bring the schema up to date.
pub async fn init_pool(cfg: &Config) -> Result<Pool, AppError> {
    let pool = create_pool(cfg)?;
    run_migrations(&pool)
        .await
        .map_err(|e| AppError::StartServer(format!("db: {e}")))?;
    info!(
        max_connections = cfg.db_max_connections,
        "Connected to PostgreSQL"
    );
    Ok(pool)
}

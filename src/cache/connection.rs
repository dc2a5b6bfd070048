use anyhow::{anyhow, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Row, SqlitePool,
};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub struct CacheConnection {
    pool: SqlitePool,
}

impl CacheConnection {
    pub async fn new(db_path: &str) -> Result<Self> {
        info!("Opening metadata cache: {}", db_path);

        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| anyhow!("Failed to create cache directory {:?}: {}", parent, e))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| anyhow!("Failed to open cache database: {}", e))?;

        let connection = Self { pool };
        connection.health_check().await?;
        connection.run_migrations().await?;
        Ok(connection)
    }

    /// Single-connection in-memory database, mostly for tests.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| anyhow!("Failed to open in-memory cache: {}", e))?;

        let connection = Self { pool };
        connection.run_migrations().await?;
        Ok(connection)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let row = sqlx::query("SELECT 1 as test")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| anyhow!("Cache health check failed: {}", e))?;

        let test_value: i32 = row.try_get("test")?;
        if test_value != 1 {
            return Err(anyhow!("Cache health check returned unexpected value"));
        }

        Ok(())
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                k TEXT PRIMARY KEY,
                v TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to create kv_store table: {}", e))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_kv_store_expires_at ON kv_store(expires_at)")
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!("Failed to create expires_at index: {}", e))?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Metadata cache closed");
    }
}

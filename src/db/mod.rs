use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

pub mod cache;
pub mod redis;
pub mod users;

pub use cache::{CacheError, CacheStore, MemoryStore};
pub use self::redis::RedisStore;
pub use users::{SqliteUserStore, StoreError, UserStore};

pub async fn create_db_pool(db_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready");

    Ok(pool)
}

/// Single-connection in-memory database; every connection to `sqlite::memory:`
/// would otherwise see its own empty database.
pub async fn create_memory_pool() -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use paylink_core::config::DatabaseConfig;

pub type DbPool = sqlx::SqlitePool;

/// Opens the SQLite pool described by `config`. Every connection gets the
/// pragmas the pipeline relies on: enforced foreign keys, WAL journaling,
/// and a busy timeout so concurrent webhook and callback writes queue
/// instead of failing.
pub async fn connect(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .acquire_timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(&config.url)
        .await
}

#[cfg(test)]
pub(crate) fn memory_config() -> DatabaseConfig {
    DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        timeout_secs: 30,
    }
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use paylink_core::config::DatabaseConfig;

    use super::{connect, memory_config};

    #[tokio::test]
    async fn connections_get_the_session_pragmas() {
        let pool = connect(&memory_config()).await.expect("connect");

        let foreign_keys: i64 = sqlx::query("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("read pragma")
            .get(0);
        assert_eq!(foreign_keys, 1);
    }

    #[tokio::test]
    async fn zero_pool_settings_are_clamped_to_usable_minimums() {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 0,
            timeout_secs: 0,
        };
        let pool = connect(&config).await.expect("connect");

        sqlx::query("SELECT 1").execute(&pool).await.expect("pool is usable");
    }
}

pub mod requests;

use formsync_common::error::{FormsyncError, FormsyncResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};

/// Create a Postgres connection pool from a database URL.
///
/// Every connection runs in UTC so plain `timestamp` columns compare against
/// bound checkpoints the same way they are decoded.
pub async fn create_pool(database_url: &str) -> FormsyncResult<PgPool> {
    tracing::info!("connecting to database");
    PgPoolOptions::new()
        .max_connections(5)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET TIME ZONE 'UTC'").await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
        .map_err(|e| FormsyncError::Database(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_pool_fails_with_invalid_url() {
        let result = create_pool("postgres://invalid:5432/nonexistent").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn sessions_run_in_utc() {
        let url = match std::env::var("TEST_DATABASE_URL") {
            Ok(url) => url,
            Err(_) => return,
        };
        let pool = create_pool(&url).await.expect("db should connect");

        let zone: String = sqlx::query_scalar("select current_setting('TimeZone')")
            .fetch_one(&pool)
            .await
            .expect("query time zone");
        assert_eq!(zone, "UTC");
    }
}

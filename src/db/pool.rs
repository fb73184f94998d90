use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Acquire timeout stays above the credit lock timeout so lock contention
/// surfaces as a lock error rather than a pool timeout.
pub async fn create_pool(database_url: &str, credit_lock_timeout_ms: u64) -> PgPool {
    let acquire = Duration::from_millis(credit_lock_timeout_ms).max(Duration::from_secs(5));
    PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(acquire)
        .connect(database_url)
        .await
        .expect("Failed to create database pool")
}

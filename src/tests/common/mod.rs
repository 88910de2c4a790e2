// Common test utilities and helpers

use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::sync::Arc;
use std::time::Duration;

use crate::services::cache_service::CacheService;
use crate::services::monitor::CacheMonitor;
use crate::services::registry_service::RegistryService;

/// Create an in-memory SQLite database for testing
pub async fn create_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(3))
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// Quiet monitor for tests
pub fn create_test_monitor() -> Arc<CacheMonitor> {
    Arc::new(CacheMonitor::new(true, 100, false))
}

/// Cache service with the default TTL and confidence threshold
pub fn create_cache_service(pool: &SqlitePool) -> Arc<CacheService> {
    Arc::new(CacheService::new(pool.clone(), 365, 0.7, create_test_monitor()))
}

pub fn create_registry(pool: &SqlitePool) -> Arc<RegistryService> {
    Arc::new(RegistryService::new(pool.clone()))
}

//! Cache Maintenance Task
//!
//! Background job keeping the mapping cache healthy: sweeps rows past their
//! expiry and, when a sweep actually removed something, refreshes transitive
//! derivations so chains that lost an input are rebuilt from the rows that
//! remain.

use crate::services::cache_service::CacheService;
use crate::services::transitivity::TransitivityBuilder;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Periodic maintenance over the mapping cache
///
/// This task:
/// 1. Runs periodically (default: every hour)
/// 2. Deletes every mapping whose TTL has elapsed
/// 3. After a sweep that removed rows, optionally re-runs the transitivity
///    builder, since expired rows may have been derivation inputs
pub struct CacheMaintenanceTask {
    cache: Arc<CacheService>,
    /// When present, derivations are refreshed after a non-empty sweep
    transitivity: Option<Arc<TransitivityBuilder>>,
    /// Shutdown flag
    shutdown: Arc<AtomicBool>,
    /// Completed maintenance rounds, for observability and tests
    sweeps_completed: Arc<AtomicU64>,
}

impl CacheMaintenanceTask {
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self {
            cache,
            transitivity: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            sweeps_completed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Refresh transitive derivations after sweeps that removed rows
    pub fn with_transitivity(mut self, builder: Arc<TransitivityBuilder>) -> Self {
        self.transitivity = Some(builder);
        self
    }

    /// Get shutdown handle
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Counter of completed maintenance rounds
    pub fn sweep_counter(&self) -> Arc<AtomicU64> {
        self.sweeps_completed.clone()
    }

    /// Execute one maintenance round
    async fn execute(&self) {
        match self.cache.delete_expired().await {
            Ok(0) => {
                info!("Cache maintenance: nothing expired");
            },
            Ok(deleted) => {
                info!("Cache maintenance removed {} expired mappings", deleted);

                if let Some(builder) = &self.transitivity {
                    match builder.build_transitive_mappings().await {
                        Ok(created) if created > 0 => {
                            info!(
                                "Cache maintenance derived {} mappings after sweep",
                                created
                            );
                        },
                        Ok(_) => {},
                        Err(e) => {
                            warn!("Transitive refresh after sweep failed: {}", e);
                        },
                    }
                }
            },
            Err(e) => {
                warn!("Cache expiry sweep failed: {}", e);
            },
        }

        self.sweeps_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Drive the maintenance loop until the shutdown flag is raised
    pub async fn run(self, interval: Duration) {
        info!("Cache maintenance running with interval: {:?}", interval);

        loop {
            tokio::time::sleep(interval).await;

            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            self.execute().await;
        }

        info!("Cache maintenance stopped");
    }
}

// ============================================================================
// Factory Function
// ============================================================================

/// Create and start the cache maintenance task
///
/// # Arguments
/// * `cache` - Cache service to sweep
/// * `transitivity` - Optional builder for the post-sweep derivation refresh
/// * `interval_secs` - Sweep interval in seconds (default: 3600 = 1 hour)
///
/// # Returns
/// Shutdown handle for stopping the task
pub fn start_cache_maintenance_task(
    cache: Arc<CacheService>,
    transitivity: Option<Arc<TransitivityBuilder>>,
    interval_secs: u64,
) -> Arc<AtomicBool> {
    let mut task = CacheMaintenanceTask::new(cache);
    if let Some(builder) = transitivity {
        task = task.with_transitivity(builder);
    }
    let shutdown_handle = task.shutdown_handle();

    tokio::spawn(async move {
        task.run(Duration::from_secs(interval_secs)).await;
    });

    info!("Cache maintenance task started with interval: {}s", interval_secs);

    shutdown_handle
}

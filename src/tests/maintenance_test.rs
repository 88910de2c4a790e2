use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::models::AddMappingRequest;
use crate::services::maintenance::CacheMaintenanceTask;
use crate::services::transitivity::TransitivityBuilder;
use crate::tests::common::{create_cache_service, create_test_db};

async fn wait_for_sweeps(counter: &std::sync::atomic::AtomicU64, rounds: u64) {
    for _ in 0..200 {
        if counter.load(Ordering::Relaxed) >= rounds {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Maintenance task never completed {} rounds", rounds);
}

#[tokio::test]
async fn test_maintenance_sweeps_expired_rows() {
    let pool = create_test_db().await;
    let cache = create_cache_service(&pool);

    cache
        .add_mapping(&AddMappingRequest::new("old", "chebi", "B", "hmdb").unidirectional())
        .await
        .unwrap();
    sqlx::query("UPDATE entity_mappings SET expires_at = ?")
        .bind(Utc::now() - ChronoDuration::days(1))
        .execute(&pool)
        .await
        .unwrap();

    let task = CacheMaintenanceTask::new(Arc::clone(&cache));
    let shutdown = task.shutdown_handle();
    let sweeps = task.sweep_counter();

    let handle = tokio::spawn(task.run(Duration::from_millis(20)));
    wait_for_sweeps(&sweeps, 1).await;

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entity_mappings")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);

    // The loop honors the shutdown flag on its next wake-up
    shutdown.store(true, Ordering::Relaxed);
    handle.await.expect("Maintenance task panicked");
}

#[tokio::test]
async fn test_maintenance_refreshes_derivations_after_sweep() {
    let pool = create_test_db().await;
    let cache = create_cache_service(&pool);

    // A chain worth deriving, plus one expired row to make the sweep non-empty
    for (source_id, source_type, target_id, target_type) in [
        ("A", "t1", "B", "t2"),
        ("B", "t2", "C", "t3"),
        ("stale", "x", "gone", "y"),
    ] {
        cache
            .add_mapping(
                &AddMappingRequest::new(source_id, source_type, target_id, target_type)
                    .with_confidence(0.9)
                    .unidirectional(),
            )
            .await
            .unwrap();
    }
    sqlx::query("UPDATE entity_mappings SET expires_at = ? WHERE source_id = 'stale'")
        .bind(Utc::now() - ChronoDuration::days(1))
        .execute(&pool)
        .await
        .unwrap();

    let builder =
        Arc::new(TransitivityBuilder::new(pool.clone(), Arc::clone(&cache), 0.5, 2, 0.9));
    let task = CacheMaintenanceTask::new(Arc::clone(&cache)).with_transitivity(builder);
    let shutdown = task.shutdown_handle();
    let sweeps = task.sweep_counter();

    let handle = tokio::spawn(task.run(Duration::from_millis(20)));
    wait_for_sweeps(&sweeps, 1).await;

    shutdown.store(true, Ordering::Relaxed);
    handle.await.expect("Maintenance task panicked");

    let (stale_count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM entity_mappings WHERE source_id = 'stale'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(stale_count, 0);

    // The post-sweep refresh derived A -> C from the surviving chain
    let (derived_count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM entity_mappings
         WHERE source_id = 'A' AND target_id = 'C' AND is_derived = 1",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(derived_count, 1);
}

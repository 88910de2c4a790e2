use crate::config::Config;
use crate::models::AddMappingRequest;
use crate::services::dispatcher::DispatchOptions;
use crate::tests::common::create_test_db;
use crate::{CACHE_RESOURCE_NAME, MapperEngine};

#[tokio::test]
async fn test_engine_serves_cached_mappings_through_dispatcher() {
    let pool = create_test_db().await;
    let config = Config::default();

    let engine = MapperEngine::new(pool.clone(), &config)
        .await
        .expect("Engine wiring failed");
    engine
        .cache_service
        .add_mapping(
            &AddMappingRequest::new("glucose", "name", "CHEBI:17234", "chebi")
                .with_confidence(0.95)
                .with_source("manual"),
        )
        .await
        .expect("Failed to add mapping");

    // Rebuild so the cache resource's coverage reflects the cached types
    let engine = MapperEngine::new(pool.clone(), &config)
        .await
        .expect("Engine rebuild failed");

    let resource = engine
        .registry_service
        .get_resource(CACHE_RESOURCE_NAME)
        .await
        .unwrap()
        .expect("Cache resource not registered");
    assert_eq!(resource.priority, 10);

    let result = engine
        .dispatcher
        .map_entity("glucose", "name", "chebi", &DispatchOptions::default())
        .await
        .expect("Dispatch failed")
        .expect("Expected a cached mapping");

    assert_eq!(result.target_id.as_deref(), Some("CHEBI:17234"));
    assert_eq!(result.mapping_source, "cache:manual");
    assert_eq!(
        result.metadata.get("resource").map(String::as_str),
        Some(CACHE_RESOURCE_NAME)
    );
    assert_eq!(result.metadata.get("cache_hit").map(String::as_str), Some("true"));
}

#[tokio::test]
async fn test_engine_reports_miss_as_none() {
    let pool = create_test_db().await;
    let config = Config::default();

    let engine = MapperEngine::new(pool.clone(), &config)
        .await
        .expect("Engine wiring failed");

    // Nothing cached, no coverage: the ranked order is empty
    let result = engine
        .dispatcher
        .map_entity("unknown", "name", "chebi", &DispatchOptions::default())
        .await
        .expect("Dispatch failed");
    assert!(result.is_none());
}

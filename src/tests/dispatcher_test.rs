use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::models::{MapOptions, MappingResult, OperationStatus, OperationType, ResourceType, SupportLevel};
use crate::services::adapters::ResourceAdapter;
use crate::services::dispatcher::{DispatchOptions, MappingDispatcher};
use crate::services::registry_service::RegistryService;
use crate::tests::common::{create_registry, create_test_db};
use crate::utils::{BiomapperError, Result};

/// Scripted adapter behaviors for dispatcher tests
enum Behavior {
    Miss,
    Hit { target_id: &'static str, confidence: f64 },
    Fail,
    Sleep(Duration),
}

struct ScriptedAdapter {
    name: String,
    behavior: Behavior,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedAdapter {
    fn new(name: &str, behavior: Behavior, calls: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self { name: name.to_string(), behavior, calls })
    }
}

#[async_trait]
impl ResourceAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn map_entity(
        &self,
        source_id: &str,
        _source_type: &str,
        target_type: &str,
        _opts: &MapOptions,
    ) -> Result<Option<MappingResult>> {
        self.calls.lock().unwrap().push(self.name.clone());
        match &self.behavior {
            Behavior::Miss => Ok(None),
            Behavior::Hit { target_id, confidence } => Ok(Some(MappingResult {
                source_id: source_id.to_string(),
                target_id: Some(target_id.to_string()),
                target_type: target_type.to_string(),
                confidence: *confidence,
                mapping_source: self.name.clone(),
                metadata: HashMap::new(),
            })),
            Behavior::Fail => Err(BiomapperError::adapter(&self.name, "backend exploded")),
            Behavior::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(None)
            },
        }
    }
}

/// Register two resources, cache at priority 10 and api at priority 1,
/// covering the foo/bar type pair
async fn seed_registry(registry: &RegistryService) {
    registry
        .register_resource("cache", ResourceType::Cache, None, 10, true)
        .await
        .unwrap();
    registry
        .register_resource("api", ResourceType::Api, None, 1, true)
        .await
        .unwrap();
    for resource in ["cache", "api"] {
        for ontology in ["foo", "bar"] {
            registry
                .register_ontology_coverage(resource, ontology, SupportLevel::Full, None)
                .await
                .unwrap();
        }
    }
}

async fn fetch_logs(pool: &sqlx::SqlitePool) -> Vec<(String, String, Option<String>, Option<i64>)> {
    sqlx::query_as(
        "SELECT rm.resource_name, ol.status, ol.error_message, ol.response_time_ms
         FROM operation_logs ol JOIN resource_metadata rm ON rm.id = ol.resource_id
         ORDER BY ol.id",
    )
    .fetch_all(pool)
    .await
    .expect("Failed to fetch operation logs")
}

#[tokio::test]
async fn test_fallback_to_next_resource() {
    let pool = create_test_db().await;
    let registry = create_registry(&pool);
    seed_registry(&registry).await;

    let calls = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = MappingDispatcher::new(Arc::clone(&registry));
    dispatcher.register_adapter(ScriptedAdapter::new("cache", Behavior::Miss, Arc::clone(&calls)));
    dispatcher.register_adapter(ScriptedAdapter::new(
        "api",
        Behavior::Hit { target_id: "Y", confidence: 0.8 },
        Arc::clone(&calls),
    ));

    let result = dispatcher
        .map_entity("X", "foo", "bar", &DispatchOptions::default())
        .await
        .expect("Dispatch failed")
        .expect("Expected a mapping");

    assert_eq!(result.target_id.as_deref(), Some("Y"));
    assert_eq!(result.metadata.get("resource").map(String::as_str), Some("api"));
    assert!(result.metadata.contains_key("response_time_ms"));

    // Candidates were tried strictly in registry-ranked order
    assert_eq!(*calls.lock().unwrap(), vec!["cache".to_string(), "api".to_string()]);

    let logs = fetch_logs(&pool).await;
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].0, "cache");
    assert_eq!(logs[0].1, "success");
    assert_eq!(logs[0].2.as_deref(), Some("No mapping found"));
    assert_eq!(logs[1].0, "api");
    assert_eq!(logs[1].1, "success");
    assert_eq!(logs[1].2, None);
}

#[tokio::test]
async fn test_timeout_moves_to_next_candidate() {
    let pool = create_test_db().await;
    let registry = create_registry(&pool);
    seed_registry(&registry).await;

    let calls = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = MappingDispatcher::new(Arc::clone(&registry));
    dispatcher.register_adapter(ScriptedAdapter::new(
        "cache",
        Behavior::Sleep(Duration::from_secs(10)),
        Arc::clone(&calls),
    ));
    dispatcher.register_adapter(ScriptedAdapter::new(
        "api",
        Behavior::Hit { target_id: "Y", confidence: 0.8 },
        Arc::clone(&calls),
    ));

    let options = DispatchOptions {
        timeout: Some(Duration::from_millis(100)),
        ..Default::default()
    };
    let result = dispatcher
        .map_entity("X", "foo", "bar", &options)
        .await
        .expect("Dispatch failed")
        .expect("Expected a mapping");
    assert_eq!(result.metadata.get("resource").map(String::as_str), Some("api"));

    let logs = fetch_logs(&pool).await;
    assert_eq!(logs[0].0, "cache");
    assert_eq!(logs[0].1, "timeout");
    assert_eq!(logs[0].3, Some(100));
}

#[tokio::test]
async fn test_adapter_error_is_logged_and_skipped() {
    let pool = create_test_db().await;
    let registry = create_registry(&pool);
    seed_registry(&registry).await;

    let calls = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = MappingDispatcher::new(Arc::clone(&registry));
    dispatcher.register_adapter(ScriptedAdapter::new("cache", Behavior::Fail, Arc::clone(&calls)));
    dispatcher.register_adapter(ScriptedAdapter::new(
        "api",
        Behavior::Hit { target_id: "Y", confidence: 0.8 },
        Arc::clone(&calls),
    ));

    let result = dispatcher
        .map_entity("X", "foo", "bar", &DispatchOptions::default())
        .await
        .expect("Dispatch failed");
    assert!(result.is_some());

    let logs = fetch_logs(&pool).await;
    assert_eq!(logs[0].1, "error");
    assert!(logs[0].2.as_deref().unwrap().contains("backend exploded"));
}

#[tokio::test]
async fn test_no_fallback_propagates_error() {
    let pool = create_test_db().await;
    let registry = create_registry(&pool);
    seed_registry(&registry).await;

    let calls = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = MappingDispatcher::new(Arc::clone(&registry));
    dispatcher.register_adapter(ScriptedAdapter::new("cache", Behavior::Fail, Arc::clone(&calls)));
    dispatcher.register_adapter(ScriptedAdapter::new(
        "api",
        Behavior::Hit { target_id: "Y", confidence: 0.8 },
        Arc::clone(&calls),
    ));

    let options = DispatchOptions { no_fallback: true, ..Default::default() };
    let result = dispatcher.map_entity("X", "foo", "bar", &options).await;
    assert!(result.is_err());
    assert_eq!(calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_exhaustion_returns_none() {
    let pool = create_test_db().await;
    let registry = create_registry(&pool);
    seed_registry(&registry).await;

    let calls = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = MappingDispatcher::new(Arc::clone(&registry));
    dispatcher.register_adapter(ScriptedAdapter::new("cache", Behavior::Miss, Arc::clone(&calls)));
    dispatcher.register_adapter(ScriptedAdapter::new("api", Behavior::Miss, Arc::clone(&calls)));

    let result = dispatcher
        .map_entity("X", "foo", "bar", &DispatchOptions::default())
        .await
        .expect("Dispatch failed");
    assert!(result.is_none());
}

#[tokio::test]
async fn test_explicit_resource_must_be_registered() {
    let pool = create_test_db().await;
    let registry = create_registry(&pool);
    seed_registry(&registry).await;

    let dispatcher = MappingDispatcher::new(Arc::clone(&registry));

    let options = DispatchOptions {
        resource_name: Some("ghost".to_string()),
        ..Default::default()
    };
    let result = dispatcher.map_entity("X", "foo", "bar", &options).await;
    assert!(matches!(result, Err(BiomapperError::UnknownResource { .. })));
}

#[tokio::test]
async fn test_explicit_resource_bypasses_ranking() {
    let pool = create_test_db().await;
    let registry = create_registry(&pool);
    seed_registry(&registry).await;

    let calls = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = MappingDispatcher::new(Arc::clone(&registry));
    dispatcher.register_adapter(ScriptedAdapter::new(
        "cache",
        Behavior::Hit { target_id: "C", confidence: 1.0 },
        Arc::clone(&calls),
    ));
    dispatcher.register_adapter(ScriptedAdapter::new(
        "api",
        Behavior::Hit { target_id: "Y", confidence: 0.8 },
        Arc::clone(&calls),
    ));

    let options = DispatchOptions {
        resource_name: Some("api".to_string()),
        ..Default::default()
    };
    let result = dispatcher
        .map_entity("X", "foo", "bar", &options)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.target_id.as_deref(), Some("Y"));
    assert_eq!(*calls.lock().unwrap(), vec!["api".to_string()]);
}

#[tokio::test]
async fn test_metrics_reflect_dispatcher_attempts() {
    let pool = create_test_db().await;
    let registry = create_registry(&pool);
    seed_registry(&registry).await;

    let calls = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = MappingDispatcher::new(Arc::clone(&registry));
    dispatcher.register_adapter(ScriptedAdapter::new("cache", Behavior::Fail, Arc::clone(&calls)));
    dispatcher.register_adapter(ScriptedAdapter::new(
        "api",
        Behavior::Hit { target_id: "Y", confidence: 0.8 },
        Arc::clone(&calls),
    ));

    dispatcher
        .map_entity("X", "foo", "bar", &DispatchOptions::default())
        .await
        .unwrap();

    let cache_metrics = registry
        .get_performance_metrics(Some("cache"), Some(OperationType::Map), Some("foo"), Some("bar"))
        .await
        .unwrap();
    assert_eq!(cache_metrics[0].sample_count, 1);
    assert!((cache_metrics[0].success_rate.unwrap() - 0.0).abs() < 1e-9);

    let api_metrics = registry
        .get_performance_metrics(Some("api"), Some(OperationType::Map), Some("foo"), Some("bar"))
        .await
        .unwrap();
    assert_eq!(api_metrics[0].sample_count, 1);
    assert!((api_metrics[0].success_rate.unwrap() - 1.0).abs() < 1e-9);

    let performance = dispatcher
        .get_resource_performance(Some("foo"), Some("bar"))
        .await
        .unwrap();
    assert!(performance.contains_key("cache"));
    assert!(performance.contains_key("api"));
}

#[tokio::test]
async fn test_batch_results_align_to_input_order() {
    let pool = create_test_db().await;
    let registry = create_registry(&pool);
    seed_registry(&registry).await;

    let calls = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = MappingDispatcher::new(Arc::clone(&registry));
    // Only the api resource answers, and only for one of the inputs
    struct Selective {
        calls: Arc<Mutex<Vec<String>>>,
    }
    #[async_trait]
    impl ResourceAdapter for Selective {
        fn name(&self) -> &str {
            "api"
        }
        async fn map_entity(
            &self,
            source_id: &str,
            _source_type: &str,
            target_type: &str,
            _opts: &MapOptions,
        ) -> Result<Option<MappingResult>> {
            self.calls.lock().unwrap().push(source_id.to_string());
            if source_id == "known" {
                Ok(Some(MappingResult {
                    source_id: source_id.to_string(),
                    target_id: Some("K1".to_string()),
                    target_type: target_type.to_string(),
                    confidence: 0.9,
                    mapping_source: "api".to_string(),
                    metadata: HashMap::new(),
                }))
            } else {
                Ok(None)
            }
        }
    }
    dispatcher.register_adapter(Arc::new(Selective { calls: Arc::clone(&calls) }));

    let entities = vec![
        ("unknown".to_string(), "foo".to_string()),
        ("known".to_string(), "foo".to_string()),
    ];
    let results = dispatcher
        .batch_map_entities(&entities, "bar", &DispatchOptions::default())
        .await
        .expect("Batch failed");

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].source_id, "unknown");
    assert!(results[0].result.is_none());
    assert_eq!(results[1].source_id, "known");
    assert_eq!(
        results[1].result.as_ref().unwrap().target_id.as_deref(),
        Some("K1")
    );
}

#[tokio::test]
async fn test_dispatcher_ignores_unregistered_ranked_resources() {
    let pool = create_test_db().await;
    let registry = create_registry(&pool);
    seed_registry(&registry).await;

    // Only api has an adapter; the ranked cache entry is skipped
    let calls = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = MappingDispatcher::new(Arc::clone(&registry));
    dispatcher.register_adapter(ScriptedAdapter::new(
        "api",
        Behavior::Hit { target_id: "Y", confidence: 0.8 },
        Arc::clone(&calls),
    ));

    let result = dispatcher
        .map_entity("X", "foo", "bar", &DispatchOptions::default())
        .await
        .unwrap();
    assert!(result.is_some());
    assert_eq!(*calls.lock().unwrap(), vec!["api".to_string()]);

    let logs = fetch_logs(&pool).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].1, OperationStatus::Success.as_str());
}

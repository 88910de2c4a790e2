use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{MapOptions, MappingResult, ResourceType, SupportLevel};
use crate::services::adapters::ResourceAdapter;
use crate::services::dispatcher::MappingDispatcher;
use crate::services::strategy::{
    default_action_registry, Endpoint, ExecutionContext, Strategy, StrategyRunner, StrategyStep,
    LAST_MAPPING_RESULTS_KEY,
};
use crate::tests::common::{create_registry, create_test_db};
use crate::utils::Result;

/// Adapter with a fixed identifier table and per-row confidences
struct TableAdapter {
    table: HashMap<&'static str, (&'static str, f64)>,
}

#[async_trait]
impl ResourceAdapter for TableAdapter {
    fn name(&self) -> &str {
        "table"
    }

    async fn map_entity(
        &self,
        source_id: &str,
        _source_type: &str,
        target_type: &str,
        _opts: &MapOptions,
    ) -> Result<Option<MappingResult>> {
        Ok(self.table.get(source_id).map(|(target_id, confidence)| MappingResult {
            source_id: source_id.to_string(),
            target_id: Some(target_id.to_string()),
            target_type: target_type.to_string(),
            confidence: *confidence,
            mapping_source: "table".to_string(),
            metadata: HashMap::new(),
        }))
    }
}

async fn build_runner(pool: &sqlx::SqlitePool) -> StrategyRunner {
    let registry = create_registry(pool);
    registry
        .register_resource("table", ResourceType::Dataset, None, 1, true)
        .await
        .unwrap();
    for ontology in ["name", "chebi"] {
        registry
            .register_ontology_coverage("table", ontology, SupportLevel::Full, None)
            .await
            .unwrap();
    }

    let dispatcher = Arc::new(MappingDispatcher::new(registry));
    let mut table = HashMap::new();
    table.insert("glucose", ("CHEBI:17234", 0.95));
    table.insert("lactate", ("CHEBI:24996", 0.4));
    dispatcher.register_adapter(Arc::new(TableAdapter { table }));

    StrategyRunner::new(default_action_registry(dispatcher))
}

fn endpoints() -> (Endpoint, Endpoint) {
    (
        Endpoint { name: "source_dataset".to_string(), primary_ontology: Some("name".to_string()) },
        Endpoint { name: "target_dataset".to_string(), primary_ontology: Some("chebi".to_string()) },
    )
}

#[tokio::test]
async fn test_strategy_maps_and_filters() {
    let pool = create_test_db().await;
    let runner = build_runner(&pool).await;
    let (source, target) = endpoints();

    let strategy = Strategy {
        name: "name_to_chebi".to_string(),
        steps: vec![
            StrategyStep {
                action: "map_identifiers".to_string(),
                params: serde_json::json!({"target_type": "chebi"}),
            },
            StrategyStep {
                action: "filter_by_confidence".to_string(),
                params: serde_json::json!({"min_confidence": 0.5}),
            },
        ],
    };

    let mut context = ExecutionContext::new();
    let outcome = runner
        .execute_strategy(
            &strategy,
            vec!["glucose".to_string(), "lactate".to_string(), "unknown".to_string()],
            "name",
            &source,
            &target,
            &mut context,
        )
        .await
        .expect("Strategy failed");

    // glucose survives the filter, lactate is below it, unknown never mapped
    assert_eq!(outcome.final_identifiers, vec!["CHEBI:17234".to_string()]);
    assert_eq!(outcome.final_ontology_type, "chebi");
    assert_eq!(outcome.steps_executed, 2);

    // Intermediate results were left in the shared context
    assert!(context.get_dataset(LAST_MAPPING_RESULTS_KEY).is_some());
    assert!(context.get_dataset("step:0:map_identifiers").is_some());
    assert!(context.get_dataset("step:1:filter_by_confidence").is_some());
}

#[tokio::test]
async fn test_unknown_action_aborts_run() {
    let pool = create_test_db().await;
    let runner = build_runner(&pool).await;
    let (source, target) = endpoints();

    let strategy = Strategy {
        name: "broken".to_string(),
        steps: vec![StrategyStep {
            action: "does_not_exist".to_string(),
            params: serde_json::Value::Null,
        }],
    };

    let mut context = ExecutionContext::new();
    let result = runner
        .execute_strategy(&strategy, vec![], "name", &source, &target, &mut context)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_filter_requires_preceding_map_step() {
    let pool = create_test_db().await;
    let runner = build_runner(&pool).await;
    let (source, target) = endpoints();

    let strategy = Strategy {
        name: "filter_first".to_string(),
        steps: vec![StrategyStep {
            action: "filter_by_confidence".to_string(),
            params: serde_json::json!({"min_confidence": 0.5}),
        }],
    };

    let mut context = ExecutionContext::new();
    let result = runner
        .execute_strategy(
            &strategy,
            vec!["glucose".to_string()],
            "name",
            &source,
            &target,
            &mut context,
        )
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_map_identifiers_requires_target_type() {
    let pool = create_test_db().await;
    let runner = build_runner(&pool).await;
    let (source, target) = endpoints();

    let strategy = Strategy {
        name: "missing_param".to_string(),
        steps: vec![StrategyStep {
            action: "map_identifiers".to_string(),
            params: serde_json::json!({}),
        }],
    };

    let mut context = ExecutionContext::new();
    let result = runner
        .execute_strategy(
            &strategy,
            vec!["glucose".to_string()],
            "name",
            &source,
            &target,
            &mut context,
        )
        .await;
    assert!(result.is_err());
}

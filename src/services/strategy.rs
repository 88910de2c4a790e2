//! Strategy runner
//!
//! A strategy is a named sequence of steps; each step names an action and its
//! parameters. Actions share a mutable execution context whose string-keyed
//! dataset map passes intermediate results from step to step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::models::MapOptions;
use crate::services::dispatcher::{DispatchOptions, MappingDispatcher};
use crate::utils::{BiomapperError, Result};

/// A dataset endpoint a strategy reads from or writes to
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub primary_ontology: Option<String>,
}

/// Shared state threaded through a strategy run
#[derive(Debug, Default)]
pub struct ExecutionContext {
    datasets: HashMap<String, serde_json::Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_dataset(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.datasets.insert(key.into(), value);
    }

    pub fn get_dataset(&self, key: &str) -> Option<&serde_json::Value> {
        self.datasets.get(key)
    }

    pub fn dataset_keys(&self) -> Vec<&str> {
        self.datasets.keys().map(String::as_str).collect()
    }
}

/// Result of one executed step
#[derive(Debug, Clone)]
pub struct StepResult {
    pub output_identifiers: Vec<String>,
    pub output_ontology_type: String,
    pub details: HashMap<String, String>,
}

/// One action in the name-to-action registry
#[async_trait]
pub trait StrategyAction: Send + Sync {
    async fn execute(
        &self,
        current_identifiers: &[String],
        current_ontology_type: &str,
        params: &serde_json::Value,
        source_endpoint: &Endpoint,
        target_endpoint: &Endpoint,
        context: &mut ExecutionContext,
    ) -> Result<StepResult>;
}

/// Name-to-action registry populated at startup
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn StrategyAction>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, action: Arc<dyn StrategyAction>) {
        let name = name.into();
        tracing::debug!("Registered strategy action '{}'", name);
        self.actions.insert(name, action);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StrategyAction>> {
        self.actions.get(name).cloned()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyStep {
    pub action: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub name: String,
    pub steps: Vec<StrategyStep>,
}

/// Final state after a strategy run
#[derive(Debug, Clone)]
pub struct StrategyOutcome {
    pub final_identifiers: Vec<String>,
    pub final_ontology_type: String,
    pub steps_executed: usize,
}

pub struct StrategyRunner {
    registry: ActionRegistry,
}

impl StrategyRunner {
    pub fn new(registry: ActionRegistry) -> Self {
        Self { registry }
    }

    /// Execute a strategy end to end
    ///
    /// Identifiers and ontology type flow from step to step; each step's
    /// output is also recorded in the context under `step:<index>:<action>`.
    /// An unknown action name aborts the run.
    pub async fn execute_strategy(
        &self,
        strategy: &Strategy,
        initial_identifiers: Vec<String>,
        initial_ontology_type: &str,
        source_endpoint: &Endpoint,
        target_endpoint: &Endpoint,
        context: &mut ExecutionContext,
    ) -> Result<StrategyOutcome> {
        tracing::info!(
            "Executing strategy '{}' with {} steps over {} identifiers",
            strategy.name,
            strategy.steps.len(),
            initial_identifiers.len()
        );

        let mut identifiers = initial_identifiers;
        let mut ontology_type = initial_ontology_type.to_string();

        for (index, step) in strategy.steps.iter().enumerate() {
            let action = self.registry.get(&step.action).ok_or_else(|| {
                BiomapperError::validation(format!("Unknown strategy action '{}'", step.action))
            })?;

            tracing::debug!("Strategy '{}' step {}: {}", strategy.name, index, step.action);

            let result = action
                .execute(
                    &identifiers,
                    &ontology_type,
                    &step.params,
                    source_endpoint,
                    target_endpoint,
                    context,
                )
                .await?;

            context.set_dataset(
                format!("step:{}:{}", index, step.action),
                serde_json::json!({
                    "identifiers": result.output_identifiers,
                    "ontology_type": result.output_ontology_type,
                    "details": result.details,
                }),
            );

            identifiers = result.output_identifiers;
            ontology_type = result.output_ontology_type;
        }

        Ok(StrategyOutcome {
            final_identifiers: identifiers,
            final_ontology_type: ontology_type,
            steps_executed: strategy.steps.len(),
        })
    }
}

// ========================================
// Built-in actions
// ========================================

/// Dataset key under which `map_identifiers` leaves its full results
pub const LAST_MAPPING_RESULTS_KEY: &str = "last_mapping_results";

/// Map every current identifier to a target ontology via the dispatcher
///
/// Params: `{"target_type": "...", "min_confidence"?: 0.x}`. Unmapped
/// identifiers are dropped; full results land in the context under
/// [`LAST_MAPPING_RESULTS_KEY`] for downstream steps.
pub struct MapIdentifiersAction {
    dispatcher: Arc<MappingDispatcher>,
}

impl MapIdentifiersAction {
    pub fn new(dispatcher: Arc<MappingDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl StrategyAction for MapIdentifiersAction {
    async fn execute(
        &self,
        current_identifiers: &[String],
        current_ontology_type: &str,
        params: &serde_json::Value,
        _source_endpoint: &Endpoint,
        _target_endpoint: &Endpoint,
        context: &mut ExecutionContext,
    ) -> Result<StepResult> {
        let target_type = params
            .get("target_type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                BiomapperError::validation("map_identifiers requires a target_type parameter")
            })?;

        let map_options = MapOptions {
            min_confidence: params.get("min_confidence").and_then(|v| v.as_f64()),
            extras: HashMap::new(),
        };
        let options = DispatchOptions { map_options, ..Default::default() };

        let mut mapped = Vec::new();
        let mut results = Vec::new();
        let mut unmapped = 0usize;

        for identifier in current_identifiers {
            match self
                .dispatcher
                .map_entity(identifier, current_ontology_type, target_type, &options)
                .await?
            {
                Some(result) => {
                    if let Some(target_id) = &result.target_id {
                        mapped.push(target_id.clone());
                    }
                    results.push(result);
                },
                None => unmapped += 1,
            }
        }

        context.set_dataset(LAST_MAPPING_RESULTS_KEY, serde_json::to_value(&results)?);

        let mut details = HashMap::new();
        details.insert("mapped".to_string(), mapped.len().to_string());
        details.insert("unmapped".to_string(), unmapped.to_string());

        Ok(StepResult {
            output_identifiers: mapped,
            output_ontology_type: target_type.to_string(),
            details,
        })
    }
}

/// Filter the previous mapping step's results by confidence
///
/// Params: `{"min_confidence": 0.x}`. Reads [`LAST_MAPPING_RESULTS_KEY`]
/// from the context and keeps the target identifiers of results at or above
/// the floor.
pub struct FilterByConfidenceAction;

#[async_trait]
impl StrategyAction for FilterByConfidenceAction {
    async fn execute(
        &self,
        current_identifiers: &[String],
        current_ontology_type: &str,
        params: &serde_json::Value,
        _source_endpoint: &Endpoint,
        _target_endpoint: &Endpoint,
        context: &mut ExecutionContext,
    ) -> Result<StepResult> {
        let min_confidence = params
            .get("min_confidence")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| {
                BiomapperError::validation(
                    "filter_by_confidence requires a min_confidence parameter",
                )
            })?;

        let Some(dataset) = context.get_dataset(LAST_MAPPING_RESULTS_KEY) else {
            return Err(BiomapperError::validation(
                "filter_by_confidence requires a preceding map_identifiers step",
            ));
        };

        let results: Vec<crate::models::MappingResult> =
            serde_json::from_value(dataset.clone())?;

        // One target can satisfy several sources; keep its first occurrence
        let mut seen = HashSet::new();
        let kept: Vec<String> = results
            .iter()
            .filter(|result| result.confidence >= min_confidence)
            .filter_map(|result| result.target_id.clone())
            .filter(|target_id| seen.insert(target_id.clone()))
            .collect();

        let mut details = HashMap::new();
        details.insert("kept".to_string(), kept.len().to_string());
        details.insert(
            "dropped".to_string(),
            current_identifiers.len().saturating_sub(kept.len()).to_string(),
        );

        Ok(StepResult {
            output_identifiers: kept,
            output_ontology_type: current_ontology_type.to_string(),
            details,
        })
    }
}

/// Build the default action registry wired to the engine
pub fn default_action_registry(dispatcher: Arc<MappingDispatcher>) -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    registry.register("map_identifiers", Arc::new(MapIdentifiersAction::new(dispatcher)));
    registry.register("filter_by_confidence", Arc::new(FilterByConfidenceAction));
    registry
}

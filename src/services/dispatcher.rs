//! Mapping dispatcher
//!
//! Routes each mapping request across the registered resource adapters in
//! registry-ranked order, with sequential fallback, optional per-resource
//! timeouts, and operation logging into the registry. Dispatcher state is
//! immutable per request; concurrent requests are independent tasks.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::{MapOptions, MappingResult, OperationStatus, OperationType};
use crate::services::adapters::ResourceAdapter;
use crate::services::registry_service::RegistryService;
use crate::utils::{BiomapperError, Result};

/// Per-request dispatch options
#[derive(Clone, Default)]
pub struct DispatchOptions {
    /// Route to this resource only, skipping the ranked order
    pub resource_name: Option<String>,
    /// Try further candidates after a failure (on by default)
    pub no_fallback: bool,
    /// Drop resources whose recorded success rate is below this
    pub min_success_rate: Option<f64>,
    /// Per-resource deadline
    pub timeout: Option<Duration>,
    /// Options forwarded to adapters
    pub map_options: MapOptions,
}

/// One entry of a batch mapping response, aligned to the input order
#[derive(Debug, Clone)]
pub struct BatchMapEntry {
    pub source_id: String,
    pub source_type: String,
    pub target_type: String,
    pub result: Option<MappingResult>,
}

pub struct MappingDispatcher {
    registry: Arc<RegistryService>,
    resources: DashMap<String, Arc<dyn ResourceAdapter>>,
}

impl MappingDispatcher {
    pub fn new(registry: Arc<RegistryService>) -> Self {
        Self { registry, resources: DashMap::new() }
    }

    /// Register an adapter under its stable name
    pub fn register_adapter(&self, adapter: Arc<dyn ResourceAdapter>) {
        let name = adapter.name().to_string();
        self.resources.insert(name.clone(), adapter);
        tracing::info!("Registered resource '{}' with dispatcher", name);
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.resources.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Map an entity using the optimal resource path
    ///
    /// Candidates are tried strictly in registry-ranked order; every attempt
    /// is logged. Exhaustion is a `None` result, not an error. Adapter
    /// failures only propagate when fallback is disabled; registry failures
    /// always do.
    pub async fn map_entity(
        &self,
        source_id: &str,
        source_type: &str,
        target_type: &str,
        options: &DispatchOptions,
    ) -> Result<Option<MappingResult>> {
        let candidates = self
            .candidate_order(source_type, target_type, options)
            .await?;

        let mut errors: Vec<String> = Vec::new();

        for name in &candidates {
            let Some(adapter) = self.resources.get(name).map(|entry| Arc::clone(entry.value()))
            else {
                continue;
            };

            let start = Instant::now();
            let call = adapter.map_entity(source_id, source_type, target_type, &options.map_options);

            let outcome = match options.timeout {
                Some(budget) => match tokio::time::timeout(budget, call).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        let budget_ms = budget.as_millis() as i64;
                        self.registry
                            .log_operation(
                                name,
                                OperationType::Map,
                                Some(source_type),
                                Some(target_type),
                                Some(source_id),
                                Some(budget_ms),
                                OperationStatus::Timeout,
                                Some("Operation timed out"),
                            )
                            .await?;
                        errors.push(format!("Resource '{}' timed out after {}ms", name, budget_ms));
                        continue;
                    },
                },
                None => call.await,
            };

            let response_time_ms = start.elapsed().as_millis() as i64;

            match outcome {
                Ok(Some(mut result)) => {
                    self.registry
                        .log_operation(
                            name,
                            OperationType::Map,
                            Some(source_type),
                            Some(target_type),
                            Some(source_id),
                            Some(response_time_ms),
                            OperationStatus::Success,
                            None,
                        )
                        .await?;

                    result.insert_metadata("resource", name.clone());
                    result.insert_metadata("response_time_ms", response_time_ms.to_string());
                    return Ok(Some(result));
                },
                Ok(None) => {
                    // A clean miss is a successful call; the message marks it
                    // as not-found for later analysis
                    self.registry
                        .log_operation(
                            name,
                            OperationType::Map,
                            Some(source_type),
                            Some(target_type),
                            Some(source_id),
                            Some(response_time_ms),
                            OperationStatus::Success,
                            Some("No mapping found"),
                        )
                        .await?;
                },
                Err(e) => {
                    let message = e.to_string();
                    self.registry
                        .log_operation(
                            name,
                            OperationType::Map,
                            Some(source_type),
                            Some(target_type),
                            Some(source_id),
                            Some(response_time_ms),
                            OperationStatus::Error,
                            Some(&message),
                        )
                        .await?;

                    errors.push(format!("Resource '{}' error: {}", name, message));

                    if options.no_fallback {
                        return Err(e);
                    }
                },
            }
        }

        if errors.is_empty() {
            tracing::info!(
                "No mapping found for {}:{} to {}",
                source_type,
                source_id,
                target_type
            );
        } else {
            tracing::warn!(
                "Failed to map {}:{} to {} using {} resources: {}",
                source_type,
                source_id,
                target_type,
                candidates.len(),
                errors.join("; ")
            );
        }

        Ok(None)
    }

    /// Map multiple entities sequentially; results align to the input order
    pub async fn batch_map_entities(
        &self,
        entities: &[(String, String)],
        target_type: &str,
        options: &DispatchOptions,
    ) -> Result<Vec<BatchMapEntry>> {
        let mut results = Vec::with_capacity(entities.len());

        for (source_id, source_type) in entities {
            let result = self
                .map_entity(source_id, source_type, target_type, options)
                .await?;
            results.push(BatchMapEntry {
                source_id: source_id.clone(),
                source_type: source_type.clone(),
                target_type: target_type.to_string(),
                result,
            });
        }

        Ok(results)
    }

    /// Performance metrics for the registered resources, grouped by name
    pub async fn get_resource_performance(
        &self,
        source_type: Option<&str>,
        target_type: Option<&str>,
    ) -> Result<std::collections::HashMap<String, Vec<crate::models::PerformanceMetrics>>> {
        let mut by_resource = self
            .registry
            .get_resource_performance(source_type, target_type)
            .await?;
        by_resource.retain(|name, _| self.resources.contains_key(name));
        Ok(by_resource)
    }

    /// Candidate resource names for one request, in try order
    ///
    /// The registry ranking is consulted exactly once per request and
    /// intersected with the adapters actually registered here.
    async fn candidate_order(
        &self,
        source_type: &str,
        target_type: &str,
        options: &DispatchOptions,
    ) -> Result<Vec<String>> {
        if let Some(name) = &options.resource_name {
            if !self.resources.contains_key(name) {
                return Err(BiomapperError::unknown_resource(name));
            }
            return Ok(vec![name.clone()]);
        }

        let ranked = self
            .registry
            .get_preferred_resource_order(
                source_type,
                target_type,
                OperationType::Map,
                options.min_success_rate,
            )
            .await?;

        Ok(ranked
            .into_iter()
            .filter(|name| self.resources.contains_key(name))
            .collect())
    }
}

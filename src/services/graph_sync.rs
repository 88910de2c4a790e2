//! Graph-to-cache synchronization
//!
//! Pulls identifier mappings out of a knowledge graph and writes them into
//! the mapping cache, optionally chasing new transitive relationships
//! afterwards. Failures are collected per entity rather than aborting the
//! sync run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::models::AddMappingRequest;
use crate::services::adapters::{GraphClient, infer_ontology_type};
use crate::services::cache_service::CacheService;
use crate::services::monitor::{CacheEventType, CacheMonitor};
use crate::services::registry_service::RegistryService;
use crate::services::transitivity::TransitivityBuilder;
use crate::utils::Result;

/// Configuration for graph-to-cache synchronization
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Graph field names mapped to cache ontology types; unmapped fields go
    /// through the inference heuristic
    pub field_type_map: HashMap<String, String>,
    /// Confidence assigned to synced mappings (default: 0.9)
    pub default_confidence: f64,
    /// Mappings below this confidence are not written (default: 0.7)
    pub min_confidence_threshold: f64,
    /// Entity types excluded from bulk syncs
    pub excluded_entity_types: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            field_type_map: HashMap::new(),
            default_confidence: 0.9,
            min_confidence_threshold: 0.7,
            excluded_entity_types: Vec::new(),
        }
    }
}

/// Outcome of one entity synchronization
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub entity_id: String,
    pub entity_type: String,
    pub graph_mappings_found: usize,
    pub mappings_added_to_cache: usize,
    pub transitive_mappings_created: usize,
    pub errors: Vec<String>,
    pub duration_ms: f64,
}

/// Aggregate outcome of a multi-entity synchronization
#[derive(Debug, Clone, Default)]
pub struct BulkSyncReport {
    pub entities_processed: usize,
    pub mappings_added_to_cache: usize,
    pub transitive_mappings_created: usize,
    pub errors: Vec<String>,
    pub duration_ms: f64,
}

pub struct GraphCacheSync {
    client: Arc<dyn GraphClient>,
    cache: Arc<CacheService>,
    registry: Arc<RegistryService>,
    monitor: Arc<CacheMonitor>,
    transitivity: Arc<TransitivityBuilder>,
    resource_name: String,
    config: SyncConfig,
}

impl GraphCacheSync {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn GraphClient>,
        cache: Arc<CacheService>,
        registry: Arc<RegistryService>,
        monitor: Arc<CacheMonitor>,
        transitivity: Arc<TransitivityBuilder>,
        resource_name: impl Into<String>,
        config: SyncConfig,
    ) -> Self {
        Self {
            client,
            cache,
            registry,
            monitor,
            transitivity,
            resource_name: resource_name.into(),
            config,
        }
    }

    /// Synchronize the graph's mappings for one entity into the cache
    ///
    /// Reads the entity's node, turns every other ontology field on it into
    /// a cache mapping, and optionally runs the transitivity builder over
    /// the result. The registry's last-sync timestamp is advanced on
    /// success.
    pub async fn sync_entity_mappings(
        &self,
        entity_id: &str,
        entity_type: &str,
        build_transitive: bool,
    ) -> SyncReport {
        let start = Instant::now();
        let mut report = SyncReport {
            entity_id: entity_id.to_string(),
            entity_type: entity_type.to_string(),
            ..Default::default()
        };

        let node = match self
            .monitor
            .track_operation(
                CacheEventType::ApiCall,
                Some(entity_type),
                Some(HashMap::from([(
                    "operation".to_string(),
                    "graph_fetch".to_string(),
                )])),
                self.client.find_node(entity_type, entity_id),
            )
            .await
        {
            Ok(Some(node)) => node,
            Ok(None) => {
                report.duration_ms = start.elapsed().as_secs_f64() * 1000.0;
                return report;
            },
            Err(e) => {
                report.errors.push(format!("Graph fetch failed: {}", e));
                report.duration_ms = start.elapsed().as_secs_f64() * 1000.0;
                return report;
            },
        };

        let schema_fields = match self.ontology_fields_for(&node.node_type).await {
            Ok(fields) => fields,
            Err(e) => {
                report.errors.push(format!("Schema analysis failed: {}", e));
                report.duration_ms = start.elapsed().as_secs_f64() * 1000.0;
                return report;
            },
        };

        let mut requests = Vec::new();
        for field in &schema_fields {
            let Some(target_id) = node.properties.get(field) else {
                continue;
            };
            let target_type = self.cache_type_for(field);
            if target_type == entity_type {
                continue;
            }

            report.graph_mappings_found += 1;

            if self.config.default_confidence < self.config.min_confidence_threshold {
                continue;
            }

            requests.push(
                AddMappingRequest::new(entity_id, entity_type, target_id.clone(), target_type)
                    .with_confidence(self.config.default_confidence)
                    .with_source("graph_sync")
                    .with_metadata(HashMap::from([
                        ("node_type".to_string(), node.node_type.clone()),
                        ("graph_field".to_string(), field.clone()),
                    ])),
            );
        }

        match self.cache.bulk_add_mappings(&requests).await {
            Ok(added) => report.mappings_added_to_cache = added,
            Err(e) => report.errors.push(format!("Cache write failed: {}", e)),
        }

        if build_transitive && report.mappings_added_to_cache > 0 {
            match self.transitivity.build_transitive_mappings().await {
                Ok(created) => report.transitive_mappings_created = created,
                Err(e) => report.errors.push(format!("Transitivity pass failed: {}", e)),
            }
        }

        if report.errors.is_empty()
            && let Err(e) = self.registry.update_resource_sync(&self.resource_name).await
        {
            report.errors.push(format!("Sync timestamp update failed: {}", e));
        }

        report.duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        report
    }

    /// Synchronize a list of entities, skipping excluded types
    ///
    /// The transitivity pass, when requested, runs once at the end rather
    /// than per entity.
    pub async fn sync_entities(
        &self,
        entities: &[(String, String)],
        build_transitive: bool,
    ) -> BulkSyncReport {
        let start = Instant::now();
        let mut report = BulkSyncReport::default();

        for (entity_id, entity_type) in entities {
            if self.config.excluded_entity_types.contains(entity_type) {
                continue;
            }

            let entity_report = self
                .sync_entity_mappings(entity_id, entity_type, false)
                .await;
            report.entities_processed += 1;
            report.mappings_added_to_cache += entity_report.mappings_added_to_cache;
            report.errors.extend(entity_report.errors);
        }

        if build_transitive && report.mappings_added_to_cache > 0 {
            match self.transitivity.build_transitive_mappings().await {
                Ok(created) => report.transitive_mappings_created = created,
                Err(e) => report.errors.push(format!("Transitivity pass failed: {}", e)),
            }
        }

        tracing::info!(
            "Graph sync processed {} entities, added {} mappings",
            report.entities_processed,
            report.mappings_added_to_cache
        );

        report.duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        report
    }

    async fn ontology_fields_for(&self, node_type: &str) -> Result<Vec<String>> {
        let schema = self.client.schema().await?;
        Ok(schema
            .node_types
            .into_iter()
            .find(|candidate| candidate.name == node_type)
            .map(|candidate| candidate.ontology_fields)
            .unwrap_or_default())
    }

    fn cache_type_for(&self, field: &str) -> String {
        self.config
            .field_type_map
            .get(field)
            .cloned()
            .unwrap_or_else(|| infer_ontology_type(field))
    }
}

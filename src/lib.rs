//! Biomapper Library
//!
//! Mapping-resolution engine for biological entity identifiers: a persistent
//! bidirectional mapping cache, a resource registry and dispatcher routing
//! requests across heterogeneous backends, a transitivity builder deriving
//! new mappings from existing ones, and a RAG pipeline resolving compound
//! names through vector search and LLM arbitration.

use sqlx::SqlitePool;
use std::sync::Arc;

pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::Config;
pub use models::{AddMappingRequest, MapOptions, MappingResult, ResourceType, SupportLevel};
pub use services::{
    CacheAdapter, CacheMonitor, CacheService, DispatchOptions, MappingDispatcher, RagPipeline,
    RegistryService, StrategyRunner, TransitivityBuilder,
};
pub use utils::{BiomapperError, Result};

/// Engine shared state
///
/// All services are wrapped in Arc for cheap cloning and thread safety;
/// constructors receive explicit handles rather than reaching for globals.
#[derive(Clone)]
pub struct MapperEngine {
    pub db: SqlitePool,

    pub monitor: Arc<CacheMonitor>,
    pub cache_service: Arc<CacheService>,
    pub registry_service: Arc<RegistryService>,
    pub dispatcher: Arc<MappingDispatcher>,
    pub transitivity_builder: Arc<TransitivityBuilder>,
}

/// Name under which the built-in cache resource is registered
pub const CACHE_RESOURCE_NAME: &str = "mapping_cache";

/// Name under which the RAG pipeline resource is registered
pub const RAG_RESOURCE_NAME: &str = "rag_pipeline";

impl MapperEngine {
    /// Wire the engine services over an existing pool
    ///
    /// Registers the mapping cache as a resource (priority 10) and declares
    /// full coverage for every entity type currently cached, so the
    /// dispatcher can rank it immediately.
    pub async fn new(pool: SqlitePool, config: &Config) -> Result<Self> {
        let monitor = services::monitor::global();

        let cache_service = Arc::new(CacheService::new(
            pool.clone(),
            config.cache.default_ttl_days,
            config.cache.confidence_threshold,
            Arc::clone(&monitor),
        ));

        let registry_service = Arc::new(RegistryService::new(pool.clone()));

        let dispatcher = Arc::new(MappingDispatcher::new(Arc::clone(&registry_service)));
        dispatcher.register_adapter(Arc::new(CacheAdapter::new(
            CACHE_RESOURCE_NAME,
            Arc::clone(&cache_service),
        )));

        registry_service
            .register_resource(CACHE_RESOURCE_NAME, ResourceType::Cache, None, 10, true)
            .await?;
        for (entity_type, ids) in cache_service.get_all_entity_types().await? {
            registry_service
                .register_ontology_coverage(
                    CACHE_RESOURCE_NAME,
                    &entity_type,
                    SupportLevel::Full,
                    Some(ids.len() as i64),
                )
                .await?;
        }

        let transitivity_builder = Arc::new(TransitivityBuilder::new(
            pool.clone(),
            Arc::clone(&cache_service),
            config.transitivity.min_confidence,
            config.transitivity.max_chain_length,
            config.transitivity.confidence_decay,
        ));

        Ok(Self {
            db: pool,
            monitor,
            cache_service,
            registry_service,
            dispatcher,
            transitivity_builder,
        })
    }

    /// Attach the RAG pipeline as a mapping resource
    ///
    /// Builds the pipeline (validating configuration and probing the vector
    /// store, both fatal here) and registers it for the given name-to-
    /// compound type pair at priority 1, below the cache.
    pub async fn register_rag_resource(
        &self,
        config: services::rag::RagConfig,
        embedder: Arc<dyn services::rag::Embedder>,
        source_ontology: &str,
        target_ontology: &str,
    ) -> Result<()> {
        let pipeline = Arc::new(RagPipeline::new(config, embedder).await?);
        self.dispatcher.register_adapter(Arc::new(services::RagAdapter::new(
            RAG_RESOURCE_NAME,
            pipeline,
            source_ontology,
            target_ontology,
        )));

        self.registry_service
            .register_resource(RAG_RESOURCE_NAME, ResourceType::Api, None, 1, true)
            .await?;
        for ontology in [source_ontology, target_ontology] {
            self.registry_service
                .register_ontology_coverage(RAG_RESOURCE_NAME, ontology, SupportLevel::Full, None)
                .await?;
        }

        Ok(())
    }
}

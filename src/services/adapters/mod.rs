// Resource Adapter Module
// Purpose: Provide unified async interface over heterogeneous mapping
// backends (cache, knowledge graph, RAG pipeline)

mod cache;
mod graph;
mod rag;

pub use cache::CacheAdapter;
pub use graph::{
    GraphAdapter, GraphClient, GraphNode, GraphNodeType, GraphRelationship, GraphSchema,
    infer_ontology_type,
};
pub use rag::RagAdapter;

use crate::models::{MapOptions, MappingResult};
use crate::utils::Result;
use async_trait::async_trait;

/// Resource adapter trait - the one operation every backend must answer
///
/// A `None` return means the backend has no suitable mapping; only real
/// failures come back as errors. Adapters are free to keep their own caches,
/// pools and retry policies internally; the dispatcher treats them as black
/// boxes apart from the timing and status it captures per call.
#[async_trait]
pub trait ResourceAdapter: Send + Sync {
    /// Stable name this adapter is registered under
    fn name(&self) -> &str;

    /// Map an entity from source to target ontology type
    async fn map_entity(
        &self,
        source_id: &str,
        source_type: &str,
        target_type: &str,
        opts: &MapOptions,
    ) -> Result<Option<MappingResult>>;
}

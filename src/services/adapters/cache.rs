//! Cache-backed resource adapter

use async_trait::async_trait;
use std::sync::Arc;

use super::ResourceAdapter;
use crate::models::{MapOptions, MappingResult};
use crate::services::cache_service::CacheService;
use crate::utils::Result;

/// Adapter exposing the mapping cache through the resource contract
pub struct CacheAdapter {
    resource_name: String,
    cache: Arc<CacheService>,
}

impl CacheAdapter {
    pub fn new(resource_name: impl Into<String>, cache: Arc<CacheService>) -> Self {
        Self { resource_name: resource_name.into(), cache }
    }
}

#[async_trait]
impl ResourceAdapter for CacheAdapter {
    fn name(&self) -> &str {
        &self.resource_name
    }

    async fn map_entity(
        &self,
        source_id: &str,
        source_type: &str,
        target_type: &str,
        opts: &MapOptions,
    ) -> Result<Option<MappingResult>> {
        let rows = self
            .cache
            .lookup(source_id, source_type, Some(target_type), true, opts.min_confidence)
            .await?;

        // Highest confidence row wins when several targets are cached
        let best = rows
            .into_iter()
            .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap_or(std::cmp::Ordering::Equal));

        Ok(best.map(|mut result| {
            result.mapping_source = format!("cache:{}", result.mapping_source);
            result.insert_metadata("cache_hit", "true");
            result
        }))
    }
}

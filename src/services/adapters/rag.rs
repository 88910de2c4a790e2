//! RAG pipeline resource adapter

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::ResourceAdapter;
use crate::models::{MapOptions, MappingResult};
use crate::services::rag::models::PipelineStatus;
use crate::services::rag::orchestrator::RagPipeline;
use crate::utils::{BiomapperError, Result};

/// Adapter exposing the three-stage RAG pipeline through the resource
/// contract
///
/// The pipeline maps biochemical names to compound identifiers, so requests
/// for any other type pair are answered with no result.
pub struct RagAdapter {
    resource_name: String,
    pipeline: Arc<RagPipeline>,
    source_ontology: String,
    target_ontology: String,
}

impl RagAdapter {
    pub fn new(
        resource_name: impl Into<String>,
        pipeline: Arc<RagPipeline>,
        source_ontology: impl Into<String>,
        target_ontology: impl Into<String>,
    ) -> Self {
        Self {
            resource_name: resource_name.into(),
            pipeline,
            source_ontology: source_ontology.into(),
            target_ontology: target_ontology.into(),
        }
    }
}

#[async_trait]
impl ResourceAdapter for RagAdapter {
    fn name(&self) -> &str {
        &self.resource_name
    }

    async fn map_entity(
        &self,
        source_id: &str,
        source_type: &str,
        target_type: &str,
        _opts: &MapOptions,
    ) -> Result<Option<MappingResult>> {
        if source_type != self.source_ontology || target_type != self.target_ontology {
            return Ok(None);
        }

        let outcome = self.pipeline.run_single(source_id).await;

        match outcome.status {
            PipelineStatus::Success | PipelineStatus::PartialSuccess => {
                let Some(cid) = outcome.selected_cid else {
                    return Ok(None);
                };

                let mut metadata = HashMap::new();
                metadata.insert("pipeline_status".to_string(), outcome.status.as_str().to_string());
                if let Some(rationale) = &outcome.rationale {
                    metadata.insert("rationale".to_string(), rationale.clone());
                }
                for (stage, elapsed_ms) in &outcome.processing_details {
                    metadata.insert(stage.clone(), format!("{:.1}", elapsed_ms));
                }

                Ok(Some(MappingResult {
                    source_id: source_id.to_string(),
                    target_id: Some(cid.to_string()),
                    target_type: target_type.to_string(),
                    confidence: outcome.confidence_score().unwrap_or(0.0),
                    mapping_source: "rag".to_string(),
                    metadata,
                }))
            },
            PipelineStatus::NoVectorHits
            | PipelineStatus::InsufficientAnnotations
            | PipelineStatus::LlmNoMatch => Ok(None),
            status => Err(BiomapperError::adapter(
                &self.resource_name,
                format!(
                    "pipeline failed with status {}: {}",
                    status.as_str(),
                    outcome.error_message.as_deref().unwrap_or("unknown")
                ),
            )),
        }
    }
}

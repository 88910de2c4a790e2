//! RAG pipeline orchestrator
//!
//! Coordinates the three stages for mapping a biochemical name to a compound
//! identifier: vector similarity search, annotation enrichment, and LLM
//! arbitration. Each stage fails fast into one status from the taxonomy; the
//! result always records per-stage latencies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::annotations::{AnnotationClient, PubChemAnnotationClient, fetch_annotations};
use super::config::RagConfig;
use super::llm::{ChatArbiter, LlmArbiter};
use super::models::{
    BatchRagResult, LlmCandidate, PipelineStatus, RagMappingResult, confidence_score_to_label,
};
use super::vector_search::{Embedder, HttpVectorSearch, VectorSearch};
use crate::utils::Result;

/// Numeric confidence under which a selected compound is only a partial
/// success
const PARTIAL_SUCCESS_THRESHOLD: f64 = 0.5;

pub struct RagPipeline {
    config: RagConfig,
    vector: Arc<dyn VectorSearch>,
    annotations: Arc<dyn AnnotationClient>,
    arbiter: Arc<dyn ChatArbiter>,
}

impl RagPipeline {
    /// Build the pipeline with the standard HTTP components
    ///
    /// Validates the configuration and probes the vector store; both are
    /// fatal here so a misconfigured pipeline never serves requests.
    pub async fn new(config: RagConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        config.ensure_valid()?;

        let vector = HttpVectorSearch::new(&config, embedder);
        vector.check_connectivity().await?;

        let annotations = PubChemAnnotationClient::new(config.annotation_base_url.clone());
        let arbiter = LlmArbiter::new(&config)?;

        tracing::info!("RAG pipeline initialized (collection: {})", config.vector_collection);

        Ok(Self {
            config,
            vector: Arc::new(vector),
            annotations: Arc::new(annotations),
            arbiter: Arc::new(arbiter),
        })
    }

    /// Build with injected stage components (used by tests)
    pub fn with_components(
        config: RagConfig,
        vector: Arc<dyn VectorSearch>,
        annotations: Arc<dyn AnnotationClient>,
        arbiter: Arc<dyn ChatArbiter>,
    ) -> Self {
        Self { config, vector, annotations, arbiter }
    }

    /// Execute the pipeline for a single biochemical name
    pub async fn run_single(&self, name: &str) -> RagMappingResult {
        tracing::info!("Starting pipeline for '{}'", name);
        let total_start = Instant::now();
        let mut result = RagMappingResult::new(name);

        if self.config.llm_api_key.as_deref().unwrap_or("").is_empty() {
            result.status = PipelineStatus::ConfigError;
            result.error_message = Some("LLM API key not configured".to_string());
            return result;
        }

        // Stage 1: vector search
        let stage_start = Instant::now();
        let hits = match self
            .vector
            .search(name, self.config.vector_top_k, self.config.vector_score_threshold)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                tracing::error!("Vector search failed for '{}': {}", name, e);
                result.status = PipelineStatus::ComponentErrorVector;
                result.error_message = Some(format!("Vector search error: {}", e));
                return self.finish(result, total_start);
            },
        };
        result
            .processing_details
            .insert("vector_search_ms".to_string(), elapsed_ms(stage_start));

        if hits.is_empty() {
            tracing::info!("No vector hits for '{}'", name);
            result.status = PipelineStatus::NoVectorHits;
            result.error_message =
                Some("No similar compounds found in the vector index".to_string());
            return self.finish(result, total_start);
        }
        result.vector_hits = hits.clone();

        // Stage 2: annotation fetch
        let stage_start = Instant::now();
        let cids: Vec<i64> = hits.iter().map(|hit| hit.cid).collect();
        let annotations = fetch_annotations(
            Arc::clone(&self.annotations),
            &cids,
            self.config.annotation_max_concurrent_requests,
        )
        .await;
        result
            .processing_details
            .insert("annotation_fetch_ms".to_string(), elapsed_ms(stage_start));

        if annotations.is_empty() {
            tracing::warn!("No annotations retrieved for '{}'", name);
            result.status = PipelineStatus::InsufficientAnnotations;
            result.error_message =
                Some("Failed to retrieve annotations for any candidate".to_string());
            return self.finish(result, total_start);
        }
        result.annotations = annotations.clone();

        // Stage 3: LLM arbitration
        let stage_start = Instant::now();
        let candidates: Vec<LlmCandidate> = hits
            .iter()
            .filter_map(|hit| {
                annotations.get(&hit.cid).map(|annotation| LlmCandidate {
                    hit: hit.clone(),
                    annotation: annotation.clone(),
                })
            })
            .collect();

        let choice = match self.arbiter.select_best_cid(name, &candidates).await {
            Ok(choice) => choice,
            Err(e) => {
                tracing::error!("Arbitration failed for '{}': {}", name, e);
                result.status = PipelineStatus::ComponentErrorLlm;
                result.error_message = Some(format!("Arbitration error: {}", e));
                return self.finish(result, total_start);
            },
        };
        result
            .processing_details
            .insert("llm_decision_ms".to_string(), elapsed_ms(stage_start));

        if let Some(error) = &choice.error_message {
            result.status = PipelineStatus::ComponentErrorLlm;
            result.error_message = Some(error.clone());
            result.llm_choice = Some(choice);
            return self.finish(result, total_start);
        }

        result.rationale = choice.rationale.clone();
        match choice.selected_cid {
            None => {
                tracing::info!("No suitable match for '{}'", name);
                result.status = PipelineStatus::LlmNoMatch;
            },
            Some(cid) => {
                let score = choice.confidence.unwrap_or(0.0);
                result.selected_cid = Some(cid);
                result.confidence = Some(confidence_score_to_label(score).to_string());
                result.status = if score >= PARTIAL_SUCCESS_THRESHOLD {
                    PipelineStatus::Success
                } else {
                    PipelineStatus::PartialSuccess
                };
                tracing::info!("Mapped '{}' to CID {} (score {:.2})", name, cid, score);
            },
        }
        result.llm_choice = Some(choice);

        self.finish(result, total_start)
    }

    /// Execute the pipeline for a list of names, sequentially
    ///
    /// Each request is bounded by the configured pipeline timeout; a timed
    /// out entry is reported, not dropped.
    pub async fn run_batch(&self, names: &[String]) -> BatchRagResult {
        let start = Instant::now();
        tracing::info!("Starting batch pipeline for {} names", names.len());

        if names.is_empty() {
            tracing::warn!("Empty list provided to batch pipeline");
        }

        let budget = Duration::from_secs(self.config.pipeline_timeout_seconds);
        let mut results = Vec::with_capacity(names.len());
        for name in names {
            let result = match tokio::time::timeout(budget, self.run_single(name)).await {
                Ok(result) => result,
                Err(_) => {
                    let mut timed_out = RagMappingResult::new(name);
                    timed_out.status = PipelineStatus::UnknownError;
                    timed_out.error_message = Some(format!(
                        "Pipeline timed out after {}s",
                        self.config.pipeline_timeout_seconds
                    ));
                    timed_out
                },
            };
            results.push(result);
        }

        let successful_mappings = results.iter().filter(|r| r.has_mapping()).count();
        let failed_mappings = results.iter().filter(|r| !r.is_successful()).count();

        let batch = BatchRagResult {
            total_processed: names.len(),
            successful_mappings,
            failed_mappings,
            results,
            processing_time_seconds: start.elapsed().as_secs_f64(),
        };

        tracing::info!("Batch pipeline completed: {}", batch.summary());
        batch
    }

    fn finish(&self, mut result: RagMappingResult, total_start: Instant) -> RagMappingResult {
        result
            .processing_details
            .insert("total_ms".to_string(), elapsed_ms(total_start));
        tracing::info!(
            "Pipeline completed for '{}' with status {}",
            result.input_name,
            result.status.as_str()
        );
        result
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

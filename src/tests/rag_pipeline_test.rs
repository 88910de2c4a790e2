use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::services::rag::annotations::AnnotationClient;
use crate::services::rag::llm::ChatArbiter;
use crate::services::rag::models::{
    CompoundAnnotation, LlmCandidate, LlmChoice, PipelineStatus, VectorHit,
};
use crate::services::rag::orchestrator::RagPipeline;
use crate::services::rag::vector_search::VectorSearch;
use crate::services::rag::RagConfig;
use crate::utils::{BiomapperError, Result};

struct FakeVector {
    hits: Vec<VectorHit>,
    fail: bool,
}

#[async_trait]
impl VectorSearch for FakeVector {
    async fn search(
        &self,
        _text: &str,
        _top_k: usize,
        _score_threshold: f64,
    ) -> Result<Vec<VectorHit>> {
        if self.fail {
            return Err(BiomapperError::adapter("vector_store", "index offline"));
        }
        Ok(self.hits.clone())
    }
}

struct FakeAnnotations {
    annotations: HashMap<i64, CompoundAnnotation>,
}

#[async_trait]
impl AnnotationClient for FakeAnnotations {
    async fn fetch_annotation(&self, cid: i64) -> Result<Option<CompoundAnnotation>> {
        Ok(self.annotations.get(&cid).cloned())
    }
}

struct FakeArbiter {
    choice: Option<LlmChoice>,
}

#[async_trait]
impl ChatArbiter for FakeArbiter {
    async fn select_best_cid(
        &self,
        _name: &str,
        _candidates: &[LlmCandidate],
    ) -> Result<LlmChoice> {
        self.choice
            .clone()
            .ok_or_else(|| BiomapperError::adapter("llm", "model unavailable"))
    }
}

fn test_config() -> RagConfig {
    RagConfig { llm_api_key: Some("test-key".to_string()), ..Default::default() }
}

fn annotation(cid: i64, title: &str) -> CompoundAnnotation {
    CompoundAnnotation { cid, title: Some(title.to_string()), ..Default::default() }
}

fn pipeline(
    hits: Vec<VectorHit>,
    annotations: HashMap<i64, CompoundAnnotation>,
    choice: Option<LlmChoice>,
) -> RagPipeline {
    RagPipeline::with_components(
        test_config(),
        Arc::new(FakeVector { hits, fail: false }),
        Arc::new(FakeAnnotations { annotations }),
        Arc::new(FakeArbiter { choice }),
    )
}

#[tokio::test]
async fn test_successful_mapping() {
    let hits = vec![
        VectorHit { cid: 5793, score: 0.95 },
        VectorHit { cid: 107526, score: 0.88 },
    ];
    let mut annotations = HashMap::new();
    annotations.insert(5793, annotation(5793, "Glucose"));
    annotations.insert(107526, annotation(107526, "beta-D-Glucopyranose"));

    let choice = LlmChoice {
        selected_cid: Some(5793),
        confidence: Some(0.9),
        rationale: Some("Direct title match".to_string()),
        error_message: None,
    };

    let result = pipeline(hits, annotations, Some(choice))
        .run_single("glucose")
        .await;

    assert_eq!(result.status, PipelineStatus::Success);
    assert_eq!(result.selected_cid, Some(5793));
    assert_eq!(result.confidence.as_deref(), Some("High"));
    assert_eq!(result.confidence_score(), Some(0.9));
    assert_eq!(result.rationale.as_deref(), Some("Direct title match"));
    assert!(result.processing_details.contains_key("vector_search_ms"));
    assert!(result.processing_details.contains_key("annotation_fetch_ms"));
    assert!(result.processing_details.contains_key("llm_decision_ms"));
    assert!(result.processing_details.contains_key("total_ms"));
}

#[tokio::test]
async fn test_llm_no_match_preserves_rationale() {
    let hits = vec![
        VectorHit { cid: 111, score: 0.45 },
        VectorHit { cid: 222, score: 0.42 },
    ];
    let mut annotations = HashMap::new();
    annotations.insert(111, annotation(111, "Benzene"));
    annotations.insert(222, annotation(222, "Toluene"));

    let choice = LlmChoice {
        selected_cid: None,
        confidence: Some(0.0),
        rationale: Some("No candidate matches the query".to_string()),
        error_message: None,
    };

    let result = pipeline(hits, annotations, Some(choice))
        .run_single("unknown_compound_xyz")
        .await;

    assert_eq!(result.status, PipelineStatus::LlmNoMatch);
    assert_eq!(result.selected_cid, None);
    assert_eq!(result.rationale.as_deref(), Some("No candidate matches the query"));
}

#[tokio::test]
async fn test_no_vector_hits_short_circuits() {
    let result = pipeline(Vec::new(), HashMap::new(), None)
        .run_single("glucose")
        .await;

    assert_eq!(result.status, PipelineStatus::NoVectorHits);
    assert!(result.error_message.is_some());
    // The annotation and arbitration stages never ran
    assert!(!result.processing_details.contains_key("annotation_fetch_ms"));
}

#[tokio::test]
async fn test_insufficient_annotations_short_circuits() {
    let hits = vec![VectorHit { cid: 5793, score: 0.95 }];

    let result = pipeline(hits, HashMap::new(), None)
        .run_single("glucose")
        .await;

    assert_eq!(result.status, PipelineStatus::InsufficientAnnotations);
    assert!(!result.processing_details.contains_key("llm_decision_ms"));
}

#[tokio::test]
async fn test_vector_component_error() {
    let config = test_config();
    let rag = RagPipeline::with_components(
        config,
        Arc::new(FakeVector { hits: Vec::new(), fail: true }),
        Arc::new(FakeAnnotations { annotations: HashMap::new() }),
        Arc::new(FakeArbiter { choice: None }),
    );

    let result = rag.run_single("glucose").await;
    assert_eq!(result.status, PipelineStatus::ComponentErrorVector);
    assert!(result.error_message.as_deref().unwrap().contains("index offline"));
}

#[tokio::test]
async fn test_llm_component_error() {
    let hits = vec![VectorHit { cid: 5793, score: 0.95 }];
    let mut annotations = HashMap::new();
    annotations.insert(5793, annotation(5793, "Glucose"));

    let result = pipeline(hits, annotations, None).run_single("glucose").await;
    assert_eq!(result.status, PipelineStatus::ComponentErrorLlm);
}

#[tokio::test]
async fn test_low_confidence_is_partial_success() {
    let hits = vec![VectorHit { cid: 5793, score: 0.95 }];
    let mut annotations = HashMap::new();
    annotations.insert(5793, annotation(5793, "Glucose"));

    let choice = LlmChoice {
        selected_cid: Some(5793),
        confidence: Some(0.3),
        rationale: Some("Weak synonym overlap".to_string()),
        error_message: None,
    };

    let result = pipeline(hits, annotations, Some(choice))
        .run_single("glucose")
        .await;

    assert_eq!(result.status, PipelineStatus::PartialSuccess);
    assert!(result.is_successful());
    assert_eq!(result.confidence.as_deref(), Some("Low"));
}

#[tokio::test]
async fn test_missing_api_key_is_config_error() {
    let config = RagConfig { llm_api_key: None, ..Default::default() };
    let rag = RagPipeline::with_components(
        config,
        Arc::new(FakeVector { hits: Vec::new(), fail: false }),
        Arc::new(FakeAnnotations { annotations: HashMap::new() }),
        Arc::new(FakeArbiter { choice: None }),
    );

    let result = rag.run_single("glucose").await;
    assert_eq!(result.status, PipelineStatus::ConfigError);
}

#[tokio::test]
async fn test_batch_reports_per_request_status_and_rate() {
    let hits = vec![VectorHit { cid: 5793, score: 0.95 }];
    let mut annotations = HashMap::new();
    annotations.insert(5793, annotation(5793, "Glucose"));

    let choice = LlmChoice {
        selected_cid: Some(5793),
        confidence: Some(0.9),
        rationale: Some("Direct title match".to_string()),
        error_message: None,
    };

    let rag = pipeline(hits, annotations, Some(choice));
    let names = vec!["glucose".to_string(), "glucose".to_string()];
    let batch = rag.run_batch(&names).await;

    assert_eq!(batch.total_processed, 2);
    assert_eq!(batch.successful_mappings, 2);
    assert_eq!(batch.failed_mappings, 0);
    assert_eq!(batch.results.len(), 2);
    assert!((batch.success_rate() - 100.0).abs() < 1e-9);
    assert!(batch.processing_time_seconds >= 0.0);
}

#[tokio::test]
async fn test_arbiter_error_message_maps_to_llm_error() {
    let hits = vec![VectorHit { cid: 5793, score: 0.95 }];
    let mut annotations = HashMap::new();
    annotations.insert(5793, annotation(5793, "Glucose"));

    let choice = LlmChoice {
        error_message: Some("No candidates provided for arbitration".to_string()),
        ..Default::default()
    };

    let result = pipeline(hits, annotations, Some(choice))
        .run_single("glucose")
        .await;
    assert_eq!(result.status, PipelineStatus::ComponentErrorLlm);
}

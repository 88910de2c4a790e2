//! RAG pipeline data models
//!
//! Status taxonomy, per-stage payloads and the result types returned to
//! callers. The categorical confidence mapping lives here and nowhere else.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Detailed status taxonomy for pipeline execution results
///
/// Every pipeline run ends in exactly one of these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    /// Full pipeline success with confident mapping
    Success,
    /// A compound was selected but with degraded confidence
    PartialSuccess,
    /// Vector search returned no candidates above the threshold
    NoVectorHits,
    /// Candidates found but none could be annotated
    InsufficientAnnotations,
    /// The arbiter evaluated candidates and found no good match
    LlmNoMatch,
    ComponentErrorVector,
    ComponentErrorAnnotation,
    ComponentErrorLlm,
    ConfigError,
    UnknownError,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::PartialSuccess => "PARTIAL_SUCCESS",
            Self::NoVectorHits => "NO_VECTOR_HITS",
            Self::InsufficientAnnotations => "INSUFFICIENT_ANNOTATIONS",
            Self::LlmNoMatch => "LLM_NO_MATCH",
            Self::ComponentErrorVector => "COMPONENT_ERROR_VECTOR",
            Self::ComponentErrorAnnotation => "COMPONENT_ERROR_ANNOTATION",
            Self::ComponentErrorLlm => "COMPONENT_ERROR_LLM",
            Self::ConfigError => "CONFIG_ERROR",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }

    pub fn is_successful(&self) -> bool {
        matches!(self, Self::Success | Self::PartialSuccess)
    }
}

/// One vector search candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub cid: i64,
    pub score: f64,
}

/// Structured compound annotations fetched for a candidate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompoundAnnotation {
    pub cid: i64,
    pub title: Option<String>,
    pub iupac_name: Option<String>,
    pub molecular_formula: Option<String>,
    pub canonical_smiles: Option<String>,
    pub inchi_key: Option<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
    pub description: Option<String>,
}

/// A candidate as presented to the arbiter: vector hit plus annotations
#[derive(Debug, Clone, Serialize)]
pub struct LlmCandidate {
    pub hit: VectorHit,
    pub annotation: CompoundAnnotation,
}

/// Output of the arbitration stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmChoice {
    pub selected_cid: Option<i64>,
    pub confidence: Option<f64>,
    pub rationale: Option<String>,
    pub error_message: Option<String>,
}

/// Complete result for one name mapping request
#[derive(Debug, Clone, Serialize)]
pub struct RagMappingResult {
    pub input_name: String,
    pub status: PipelineStatus,
    pub selected_cid: Option<i64>,
    /// Categorical confidence label ("High", "Medium", "Low")
    pub confidence: Option<String>,
    pub rationale: Option<String>,
    pub vector_hits: Vec<VectorHit>,
    pub annotations: HashMap<i64, CompoundAnnotation>,
    pub llm_choice: Option<LlmChoice>,
    pub error_message: Option<String>,
    /// Per-stage wall-clock latencies in milliseconds
    pub processing_details: HashMap<String, f64>,
}

impl RagMappingResult {
    pub fn new(input_name: impl Into<String>) -> Self {
        Self {
            input_name: input_name.into(),
            status: PipelineStatus::UnknownError,
            selected_cid: None,
            confidence: None,
            rationale: None,
            vector_hits: Vec::new(),
            annotations: HashMap::new(),
            llm_choice: None,
            error_message: None,
            processing_details: HashMap::new(),
        }
    }

    pub fn is_successful(&self) -> bool {
        self.status.is_successful()
    }

    pub fn has_mapping(&self) -> bool {
        self.selected_cid.is_some()
    }

    /// Numeric confidence: the arbiter's score when present, otherwise the
    /// categorical label translated back
    pub fn confidence_score(&self) -> Option<f64> {
        if let Some(choice) = &self.llm_choice
            && let Some(score) = choice.confidence
        {
            return Some(score);
        }
        self.confidence
            .as_deref()
            .and_then(confidence_label_to_score)
    }

    pub fn summary(&self) -> String {
        if self.is_successful() && self.has_mapping() {
            let confidence = self
                .confidence
                .as_deref()
                .map(|label| format!(" (confidence: {})", label))
                .unwrap_or_default();
            format!(
                "Mapped '{}' to CID {}{}",
                self.input_name,
                self.selected_cid.unwrap_or_default(),
                confidence
            )
        } else if self.status == PipelineStatus::NoVectorHits {
            format!("No candidates found for '{}' in vector search", self.input_name)
        } else if self.status == PipelineStatus::LlmNoMatch {
            format!(
                "No suitable match for '{}' among {} candidates",
                self.input_name,
                self.vector_hits.len()
            )
        } else if let Some(error) = &self.error_message {
            format!("Failed to map '{}': {}", self.input_name, error)
        } else {
            format!("Mapping '{}' ended with status {}", self.input_name, self.status.as_str())
        }
    }
}

/// Aggregate result for a batch of name mapping requests
#[derive(Debug, Clone, Serialize)]
pub struct BatchRagResult {
    pub total_processed: usize,
    pub successful_mappings: usize,
    pub failed_mappings: usize,
    pub results: Vec<RagMappingResult>,
    pub processing_time_seconds: f64,
}

impl BatchRagResult {
    pub fn success_rate(&self) -> f64 {
        if self.total_processed == 0 {
            return 0.0;
        }
        self.successful_mappings as f64 / self.total_processed as f64 * 100.0
    }

    pub fn summary(&self) -> String {
        format!(
            "Processed {} names: {} successful mappings ({:.1}% success rate)",
            self.total_processed,
            self.successful_mappings,
            self.success_rate()
        )
    }
}

/// Translate a categorical confidence label to its numeric score
///
/// Also accepts a stringified number, since models answer with either form.
pub fn confidence_label_to_score(label: &str) -> Option<f64> {
    match label.to_lowercase().as_str() {
        "high" => Some(0.9),
        "medium" => Some(0.6),
        "low" => Some(0.3),
        "none" => Some(0.0),
        other => other.parse().ok(),
    }
}

/// Bucket a numeric confidence into the user-facing label
pub fn confidence_score_to_label(score: f64) -> &'static str {
    if score >= 0.8 {
        "High"
    } else if score >= 0.5 {
        "Medium"
    } else {
        "Low"
    }
}

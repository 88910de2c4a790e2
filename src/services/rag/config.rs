//! RAG pipeline configuration

use serde::Deserialize;
use validator::Validate;

use crate::utils::{BiomapperError, Result};

/// Configuration for the vector search, annotation and arbitration stages
///
/// Loaded as the `[rag]` section of the main configuration file; the LLM API
/// key normally arrives through the APP_LLM_API_KEY environment variable.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct RagConfig {
    // Vector store endpoint
    pub vector_host: String,
    pub vector_port: u16,
    pub vector_collection: String,
    pub vector_api_key: Option<String>,
    /// Candidates fetched per query (default: 10)
    #[validate(range(min = 1, max = 100))]
    pub vector_top_k: usize,
    /// Minimum similarity for a candidate to be considered (default: 0.5)
    #[validate(range(min = 0.0, max = 1.0))]
    pub vector_score_threshold: f64,

    // Annotation stage
    #[validate(range(min = 1, max = 20))]
    pub annotation_max_concurrent_requests: usize,
    pub annotation_base_url: String,

    // LLM arbitration (OpenAI-compatible chat API)
    pub llm_api_base: String,
    pub llm_model_name: String,
    pub llm_api_key: Option<String>,
    #[validate(range(min = 1, max = 100_000))]
    pub llm_max_tokens: u32,
    #[validate(range(min = 0.0, max = 2.0))]
    pub llm_temperature: f64,

    // Batch behavior
    #[validate(range(min = 1, max = 50))]
    pub pipeline_batch_size: usize,
    #[validate(range(min = 30, max = 1800))]
    pub pipeline_timeout_seconds: u64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            vector_host: "localhost".to_string(),
            vector_port: 6333,
            vector_collection: "pubchem_embeddings".to_string(),
            vector_api_key: None,
            vector_top_k: 10,
            vector_score_threshold: 0.5,
            annotation_max_concurrent_requests: 5,
            annotation_base_url: "https://pubchem.ncbi.nlm.nih.gov/rest/pug".to_string(),
            llm_api_base: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            llm_api_key: None,
            llm_max_tokens: 500,
            llm_temperature: 0.1,
            pipeline_batch_size: 10,
            pipeline_timeout_seconds: 300,
        }
    }
}

impl RagConfig {
    /// Fail-fast validation of everything the pipeline needs to run
    pub fn ensure_valid(&self) -> Result<()> {
        self.validate()
            .map_err(|e| BiomapperError::config(e.to_string()))?;

        if self.llm_api_key.as_deref().unwrap_or("").is_empty() {
            return Err(BiomapperError::config(
                "llm_api_key is required (set APP_LLM_API_KEY or rag.llm_api_key)",
            ));
        }
        if self.vector_collection.is_empty() {
            return Err(BiomapperError::config("vector_collection cannot be empty"));
        }
        if self.llm_model_name.is_empty() {
            return Err(BiomapperError::config("llm_model_name cannot be empty"));
        }

        Ok(())
    }

    pub fn vector_base_url(&self) -> String {
        format!("http://{}:{}", self.vector_host, self.vector_port)
    }
}

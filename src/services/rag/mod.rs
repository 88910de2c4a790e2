//! Retrieval-augmented mapping pipeline
//!
//! Three stages: vector similarity search over compound embeddings,
//! annotation enrichment from the compound database, and LLM arbitration of
//! the final pick.

pub mod annotations;
pub mod config;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod vector_search;

pub use annotations::{AnnotationClient, PubChemAnnotationClient, fetch_annotations};
pub use config::RagConfig;
pub use llm::{ChatArbiter, LlmArbiter};
pub use models::{
    BatchRagResult, CompoundAnnotation, LlmCandidate, LlmChoice, PipelineStatus, RagMappingResult,
    VectorHit, confidence_label_to_score, confidence_score_to_label,
};
pub use orchestrator::RagPipeline;
pub use vector_search::{Embedder, HttpVectorSearch, VectorSearch};

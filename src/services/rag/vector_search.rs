//! Vector similarity search stage
//!
//! The embedding model stays behind the `Embedder` trait; the HTTP client
//! speaks the Qdrant-style REST search API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::config::RagConfig;
use super::models::VectorHit;
use crate::utils::{BiomapperError, Result};

/// Text embedding model interface
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Vector index search interface
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Top candidates for a query text, best first, scores above threshold
    async fn search(&self, text: &str, top_k: usize, score_threshold: f64)
        -> Result<Vec<VectorHit>>;
}

/// HTTP client for a Qdrant-style vector store
pub struct HttpVectorSearch {
    http_client: Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
    embedder: Arc<dyn Embedder>,
}

impl HttpVectorSearch {
    pub fn new(config: &RagConfig, embedder: Arc<dyn Embedder>) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            base_url: config.vector_base_url(),
            collection: config.vector_collection.clone(),
            api_key: config.vector_api_key.clone(),
            embedder,
        }
    }

    /// Probe the collection endpoint; unreachable store is fatal at startup
    pub async fn check_connectivity(&self) -> Result<()> {
        let url = format!("{}/collections/{}", self.base_url, self.collection);

        let mut request = self.http_client.get(&url).timeout(Duration::from_secs(5));
        if let Some(api_key) = &self.api_key {
            request = request.header("api-key", api_key);
        }

        let response = request.send().await.map_err(|e| {
            BiomapperError::connectivity(format!("vector store unreachable at {}: {}", url, e))
        })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            // Store is reachable even when the collection is not there yet
            tracing::warn!(
                "Vector collection '{}' not found; it may not be populated yet",
                self.collection
            );
            return Ok(());
        }

        if !response.status().is_success() {
            return Err(BiomapperError::connectivity(format!(
                "vector store returned {} for {}",
                response.status(),
                url
            )));
        }

        tracing::info!("Connected to vector store at {}", self.base_url);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest {
    vector: Vec<f32>,
    limit: usize,
    score_threshold: f64,
    with_payload: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: serde_json::Value,
    score: f64,
    payload: Option<serde_json::Value>,
}

impl ScoredPoint {
    /// Compound id from the payload, falling back to the point id
    fn cid(&self) -> Option<i64> {
        if let Some(payload) = &self.payload
            && let Some(cid) = payload.get("cid").and_then(|v| v.as_i64())
        {
            return Some(cid);
        }
        self.id.as_i64()
    }
}

#[async_trait]
impl VectorSearch for HttpVectorSearch {
    async fn search(
        &self,
        text: &str,
        top_k: usize,
        score_threshold: f64,
    ) -> Result<Vec<VectorHit>> {
        let embedding = self.embedder.embed(text).await?;

        let url = format!("{}/collections/{}/points/search", self.base_url, self.collection);
        let body = SearchRequest {
            vector: embedding,
            limit: top_k,
            score_threshold,
            with_payload: true,
        };

        let mut request = self.http_client.post(&url).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.header("api-key", api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BiomapperError::adapter("vector_store", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(BiomapperError::adapter(
                "vector_store",
                format!("search failed with {}: {}", status, error_text),
            ));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| BiomapperError::adapter("vector_store", e))?;

        let mut hits: Vec<VectorHit> = parsed
            .result
            .iter()
            .filter_map(|point| point.cid().map(|cid| VectorHit { cid, score: point.score }))
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);

        tracing::debug!("Vector search for '{}' returned {} hits", text, hits.len());
        Ok(hits)
    }
}

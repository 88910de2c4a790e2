//! Compound annotation fetch stage
//!
//! Enriches candidate CIDs with structured annotations from the compound
//! database. Fetches run as a bounded concurrent fan-out: a semaphore caps
//! in-flight requests, sub-batches keep the task set small, and a short pause
//! between batches stays friendly to the upstream rate limit.

use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::models::CompoundAnnotation;
use crate::utils::{BiomapperError, Result};

const SYNONYM_LIMIT: usize = 10;
const BATCH_SIZE: usize = 10;
const BATCH_PAUSE_MS: u64 = 200;

/// Source of structured compound annotations
#[async_trait]
pub trait AnnotationClient: Send + Sync {
    /// Annotation for one CID; `None` when the compound is unknown upstream
    async fn fetch_annotation(&self, cid: i64) -> Result<Option<CompoundAnnotation>>;
}

/// PubChem PUG REST annotation client
pub struct PubChemAnnotationClient {
    http_client: Client,
    base_url: String,
}

impl PubChemAnnotationClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self { http_client, base_url: base_url.into() }
    }

    async fn get_json(&self, url: &str) -> Result<Option<serde_json::Value>> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| BiomapperError::adapter("pubchem", e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(BiomapperError::adapter(
                "pubchem",
                format!("request failed with {}: {}", response.status(), url),
            ));
        }

        let value = response
            .json()
            .await
            .map_err(|e| BiomapperError::adapter("pubchem", e))?;
        Ok(Some(value))
    }
}

#[async_trait]
impl AnnotationClient for PubChemAnnotationClient {
    async fn fetch_annotation(&self, cid: i64) -> Result<Option<CompoundAnnotation>> {
        let property_list = "Title,IUPACName,MolecularFormula,CanonicalSMILES,InChIKey";
        let url = format!("{}/compound/cid/{}/property/{}/JSON", self.base_url, cid, property_list);

        let Some(data) = self.get_json(&url).await? else {
            tracing::warn!("CID {} not found upstream", cid);
            return Ok(None);
        };

        let properties = data
            .pointer("/PropertyTable/Properties/0")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let text_of = |key: &str| {
            properties
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };

        // Synonyms and description live behind separate endpoints; both are
        // optional enrichments and their failures are not fatal for the CID
        let synonyms_url = format!("{}/compound/cid/{}/synonyms/JSON", self.base_url, cid);
        let synonyms = match self.get_json(&synonyms_url).await {
            Ok(Some(data)) => data
                .pointer("/InformationList/Information/0/Synonym")
                .and_then(|v| v.as_array())
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(|v| v.as_str().map(|s| s.to_string()))
                        .take(SYNONYM_LIMIT)
                        .collect()
                })
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        let description_url = format!("{}/compound/cid/{}/description/JSON", self.base_url, cid);
        let description = match self.get_json(&description_url).await {
            Ok(Some(data)) => data
                .pointer("/InformationList/Information")
                .and_then(|v| v.as_array())
                .and_then(|entries| {
                    entries
                        .iter()
                        .find_map(|entry| entry.get("Description").and_then(|d| d.as_str()))
                })
                .map(|s| s.to_string()),
            _ => None,
        };

        Ok(Some(CompoundAnnotation {
            cid,
            title: text_of("Title"),
            iupac_name: text_of("IUPACName"),
            molecular_formula: text_of("MolecularFormula"),
            canonical_smiles: text_of("CanonicalSMILES"),
            inchi_key: text_of("InChIKey"),
            synonyms,
            description,
        }))
    }
}

/// Fetch annotations for a CID list with bounded concurrency
///
/// CIDs whose fetches fail are omitted; one slow fetch delays only its own
/// batch slot, not the whole request.
pub async fn fetch_annotations(
    client: Arc<dyn AnnotationClient>,
    cids: &[i64],
    max_concurrent: usize,
) -> HashMap<i64, CompoundAnnotation> {
    if cids.is_empty() {
        tracing::warn!("No CIDs provided for annotation");
        return HashMap::new();
    }

    tracing::info!("Starting annotation fetch for {} CIDs", cids.len());
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut annotations = HashMap::new();

    for (batch_index, batch) in cids.chunks(BATCH_SIZE).enumerate() {
        if batch_index > 0 {
            tokio::time::sleep(Duration::from_millis(BATCH_PAUSE_MS)).await;
        }

        let mut tasks = JoinSet::new();
        for &cid in batch {
            let client = Arc::clone(&client);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                (cid, client.fetch_annotation(cid).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((cid, Ok(Some(annotation)))) => {
                    annotations.insert(cid, annotation);
                },
                Ok((cid, Ok(None))) => {
                    tracing::debug!("No annotation available for CID {}", cid);
                },
                Ok((cid, Err(e))) => {
                    tracing::error!("Annotation fetch failed for CID {}: {}", cid, e);
                },
                Err(e) => {
                    tracing::error!("Annotation task panicked: {}", e);
                },
            }
        }
    }

    tracing::info!("Annotated {} out of {} CIDs", annotations.len(), cids.len());
    annotations
}

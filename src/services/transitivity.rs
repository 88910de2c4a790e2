//! Transitive relationship builder
//!
//! Offline job that composes existing cache rows into derived mappings:
//! when A maps to B and B maps to C, an A-to-C row is inserted with decayed
//! confidence and the contributing chain recorded as its derivation path.
//! Confidence for a k-row chain is the product of the chain confidences times
//! `confidence_decay^(k-1)`, one decay per composed hop.

use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{AddMappingRequest, EntityMapping, TransitiveJobLog};
use crate::services::cache_service::CacheService;
use crate::utils::Result;

const PAIR_BATCH_SIZE: usize = 1000;
const PATH_BATCH_SIZE: usize = 100;

type EntityKey = (String, String);

pub struct TransitivityBuilder {
    pool: SqlitePool,
    cache: Arc<CacheService>,
    min_confidence: f64,
    max_chain_length: usize,
    confidence_decay: f64,
}

impl TransitivityBuilder {
    pub fn new(
        pool: SqlitePool,
        cache: Arc<CacheService>,
        min_confidence: f64,
        max_chain_length: usize,
        confidence_decay: f64,
    ) -> Self {
        tracing::info!(
            "Initialized transitivity builder (min_confidence: {}, max_chain_length: {}, confidence_decay: {})",
            min_confidence,
            max_chain_length,
            confidence_decay
        );
        Self { pool, cache, min_confidence, max_chain_length, confidence_decay }
    }

    /// Build length-2 transitive mappings
    ///
    /// Returns the number of new derived rows created.
    pub async fn build_transitive_mappings(&self) -> Result<usize> {
        let started = Utc::now();
        let job_row = self.start_job("running").await?;

        match self.run_length_two_pass().await {
            Ok((processed, created)) => {
                let duration = (Utc::now() - started).num_milliseconds() as f64 / 1000.0;
                self.finish_job(job_row, "completed", processed, created, duration)
                    .await?;
                tracing::info!(
                    "Transitive mapping job completed: processed {} candidates, created {} new mappings in {:.2}s",
                    processed,
                    created,
                    duration
                );
                Ok(created)
            },
            Err(e) => {
                self.fail_job(job_row, &e.to_string()).await?;
                tracing::error!("Transitive mapping job failed: {}", e);
                Err(e)
            },
        }
    }

    /// Build extended transitive mappings with chains longer than 2
    pub async fn build_extended_transitive_mappings(&self) -> Result<usize> {
        if self.max_chain_length <= 2 {
            tracing::info!("Skipping extended transitive mapping (max_chain_length <= 2)");
            return Ok(0);
        }

        let started = Utc::now();
        let job_row = self.start_job("running_extended").await?;

        match self.run_extended_pass().await {
            Ok((processed, created)) => {
                let duration = (Utc::now() - started).num_milliseconds() as f64 / 1000.0;
                self.finish_job(job_row, "completed_extended", processed, created, duration)
                    .await?;
                tracing::info!(
                    "Extended transitive mapping job completed: processed {} paths, created {} new mappings in {:.2}s",
                    processed,
                    created,
                    duration
                );
                Ok(created)
            },
            Err(e) => {
                self.fail_job(job_row, &e.to_string()).await?;
                tracing::error!("Extended transitive mapping job failed: {}", e);
                Err(e)
            },
        }
    }

    /// Job log rows, newest first
    pub async fn job_history(&self, limit: i64) -> Result<Vec<TransitiveJobLog>> {
        let jobs: Vec<TransitiveJobLog> =
            sqlx::query_as("SELECT * FROM transitive_job_log ORDER BY job_date DESC LIMIT ?")
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;
        Ok(jobs)
    }

    // ========================================
    // Passes
    // ========================================

    async fn run_length_two_pass(&self) -> Result<(usize, usize)> {
        let mappings = self.cache.load_mappings_above(self.min_confidence).await?;
        let by_source = index_by_source(&mappings);

        let mut processed = 0;
        let mut created = 0;
        let mut batch: Vec<AddMappingRequest> = Vec::new();
        let empty = Vec::new();

        for first in &mappings {
            for second in by_source.get(&first.target_key()).unwrap_or(&empty) {
                processed += 1;

                // Skip chains that would map an entity onto itself
                if first.source_key() == second.target_key() {
                    continue;
                }

                if let Some(request) = self.derive_candidate(&[first, second]).await? {
                    batch.push(request);
                }

                if batch.len() >= PAIR_BATCH_SIZE {
                    created += self.cache.bulk_add_mappings(&batch).await?;
                    batch.clear();
                }
            }
        }

        if !batch.is_empty() {
            created += self.cache.bulk_add_mappings(&batch).await?;
        }

        Ok((processed, created))
    }

    async fn run_extended_pass(&self) -> Result<(usize, usize)> {
        let mut processed = 0;
        let mut created = 0;

        for chain_length in 3..=self.max_chain_length {
            tracing::info!("Building transitive mappings of length {}", chain_length);

            // Reload per pass so earlier derivations can participate
            let mappings = self.cache.load_mappings_above(self.min_confidence).await?;
            let graph = index_by_source(&mappings);

            // Walks start once per distinct source entity
            let start_keys: Vec<EntityKey> = graph.keys().cloned().collect();

            let mut paths: Vec<Vec<EntityMapping>> = Vec::new();
            for key in start_keys {
                let mut path = Vec::new();
                let mut visited = HashSet::new();
                find_paths(&graph, &key, &mut path, &mut visited, chain_length, &mut paths);
            }

            processed += paths.len();

            for chunk in paths.chunks(PATH_BATCH_SIZE) {
                let mut batch = Vec::new();
                for path in chunk {
                    let chain: Vec<&EntityMapping> = path.iter().collect();
                    if let Some(request) = self.derive_candidate(&chain).await? {
                        batch.push(request);
                    }
                }
                if !batch.is_empty() {
                    created += self.cache.bulk_add_mappings(&batch).await?;
                }
            }
        }

        Ok((processed, created))
    }

    /// Turn a chain of existing rows into an insert request, or nothing when
    /// the chain is rejected
    ///
    /// Rejection rules: composed confidence below the floor, or a direct
    /// (non-derived) row already covering the end points at or above the
    /// floor. Direct evidence is never replaced by a derivation.
    async fn derive_candidate(&self, chain: &[&EntityMapping]) -> Result<Option<AddMappingRequest>> {
        if chain.len() < 2 {
            return Ok(None);
        }

        let first = chain[0];
        let last = chain[chain.len() - 1];

        let confidence = chain.iter().map(|m| m.confidence).product::<f64>()
            * self.confidence_decay.powi(chain.len() as i32 - 1);

        if confidence < self.min_confidence {
            return Ok(None);
        }

        if let Some(existing) = self
            .cache
            .find_direct_mapping(
                &first.source_id,
                &first.source_type,
                &last.target_id,
                &last.target_type,
            )
            .await?
            && !existing.is_derived
            && existing.confidence >= self.min_confidence
        {
            return Ok(None);
        }

        let derivation_path: Vec<i64> = chain.iter().map(|m| m.id).collect();
        let mut metadata = HashMap::new();
        metadata.insert("method".to_string(), "transitive".to_string());
        metadata.insert("chain_length".to_string(), chain.len().to_string());
        metadata.insert("date".to_string(), Utc::now().to_rfc3339());

        Ok(Some(
            AddMappingRequest::new(
                first.source_id.clone(),
                first.source_type.clone(),
                last.target_id.clone(),
                last.target_type.clone(),
            )
            .with_confidence(confidence)
            .with_source("derived")
            .with_metadata(metadata)
            .derived(derivation_path),
        ))
    }

    // ========================================
    // Job log bookkeeping
    // ========================================

    async fn start_job(&self, status: &str) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO transitive_job_log (job_id, job_date, status) VALUES (?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(Utc::now())
        .bind(status)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn finish_job(
        &self,
        job_row: i64,
        status: &str,
        processed: usize,
        created: usize,
        duration_seconds: f64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE transitive_job_log
             SET status = ?, mappings_processed = ?, new_mappings_created = ?, duration_seconds = ?
             WHERE id = ?",
        )
        .bind(status)
        .bind(processed as i64)
        .bind(created as i64)
        .bind(duration_seconds)
        .bind(job_row)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail_job(&self, job_row: i64, message: &str) -> Result<()> {
        sqlx::query("UPDATE transitive_job_log SET status = ? WHERE id = ?")
            .bind(format!("error: {}", message))
            .bind(job_row)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Adjacency index over mapping rows, keyed by source entity
fn index_by_source(mappings: &[EntityMapping]) -> HashMap<EntityKey, Vec<EntityMapping>> {
    let mut index: HashMap<EntityKey, Vec<EntityMapping>> = HashMap::new();
    for mapping in mappings {
        index.entry(mapping.source_key()).or_default().push(mapping.clone());
    }
    index
}

/// Depth-first enumeration of simple paths with exactly `remaining` steps
///
/// The visited set is keyed by entity `(id, type)` so cyclic graphs
/// terminate; nodes are released on backtrack.
fn find_paths(
    graph: &HashMap<EntityKey, Vec<EntityMapping>>,
    current: &EntityKey,
    path: &mut Vec<EntityMapping>,
    visited: &mut HashSet<EntityKey>,
    remaining: usize,
    out: &mut Vec<Vec<EntityMapping>>,
) {
    if visited.contains(current) {
        return;
    }
    visited.insert(current.clone());

    if remaining == 0 {
        if path.len() >= 2 {
            out.push(path.clone());
        }
        visited.remove(current);
        return;
    }

    if let Some(edges) = graph.get(current) {
        for mapping in edges {
            let next = mapping.target_key();
            if &next == current {
                continue;
            }
            path.push(mapping.clone());
            find_paths(graph, &next, path, visited, remaining - 1, out);
            path.pop();
        }
    }

    visited.remove(current);
}

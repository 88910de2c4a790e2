//! Entity mapping cache manager
//!
//! Transactional facade over the mapping schema: bidirectional upserts with
//! TTL bookkeeping, confidence-filtered lookups that maintain usage counters,
//! expiry sweeps and daily statistics.

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::models::{
    AddMappingRequest, CacheStats, EntityMapping, EntityTypeConfig, MappingResult,
};
use crate::services::monitor::{CacheEventType, CacheMonitor};
use crate::utils::{BiomapperError, Result};

#[derive(Clone)]
pub struct CacheService {
    pool: SqlitePool,
    default_ttl_days: i64,
    confidence_threshold: f64,
    enable_stats: bool,
    monitor: Arc<CacheMonitor>,
}

/// Counter deltas applied to today's cache_stats row
#[derive(Debug, Default, Clone, Copy)]
struct StatsDelta {
    hit: bool,
    miss: bool,
    direct: bool,
    derived: bool,
    api_call: bool,
    transitive_derivation: bool,
}

impl CacheService {
    pub fn new(
        pool: SqlitePool,
        default_ttl_days: i64,
        confidence_threshold: f64,
        monitor: Arc<CacheMonitor>,
    ) -> Self {
        tracing::info!(
            "Initialized cache service (TTL: {} days, confidence threshold: {})",
            default_ttl_days,
            confidence_threshold
        );
        Self { pool, default_ttl_days, confidence_threshold, enable_stats: true, monitor }
    }

    /// Disable daily statistics tracking (used by bulk backfills)
    pub fn without_stats(mut self) -> Self {
        self.enable_stats = false;
        self
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    /// Look up target entities for a source entity
    ///
    /// Returns every row whose source matches with `confidence >=
    /// min_confidence` (defaulting to the service threshold), optionally
    /// filtered by target type and direct-only. Each returned row gets its
    /// usage counter bumped; the day's hit/miss counters are updated in the
    /// same transaction.
    pub async fn lookup(
        &self,
        source_id: &str,
        source_type: &str,
        target_type: Option<&str>,
        include_derived: bool,
        min_confidence: Option<f64>,
    ) -> Result<Vec<MappingResult>> {
        let min_confidence = min_confidence.unwrap_or(self.confidence_threshold);

        let mut tx = self.pool.begin().await?;

        let mappings = self
            .select_mappings(
                &mut tx,
                "source_id",
                "source_type",
                source_id,
                source_type,
                target_type.map(|t| ("target_type", t)),
                include_derived,
                min_confidence,
            )
            .await?;

        let delta = StatsDelta {
            hit: !mappings.is_empty(),
            miss: mappings.is_empty(),
            direct: mappings.iter().any(|m| !m.is_derived),
            derived: mappings.iter().any(|m| m.is_derived),
            ..Default::default()
        };
        self.update_stats(&mut tx, delta).await?;

        let mut results = Vec::with_capacity(mappings.len());
        for mapping in &mappings {
            self.increment_usage(&mut tx, mapping.id).await?;
            results.push(self.to_result(&mut tx, mapping, 1).await?);
        }

        tx.commit().await?;

        self.monitor.record_event(
            if delta.hit { CacheEventType::Hit } else { CacheEventType::Miss },
            Some(source_type),
            None,
            None,
        );

        Ok(results)
    }

    /// Look up mappings for an entity in both directions
    ///
    /// Union of the entity as source and as target, deduplicated by row id.
    pub async fn bidirectional_lookup(
        &self,
        entity_id: &str,
        entity_type: &str,
        target_type: Option<&str>,
        include_derived: bool,
        min_confidence: Option<f64>,
    ) -> Result<Vec<MappingResult>> {
        let min_confidence = min_confidence.unwrap_or(self.confidence_threshold);

        let mut tx = self.pool.begin().await?;

        let forward = self
            .select_mappings(
                &mut tx,
                "source_id",
                "source_type",
                entity_id,
                entity_type,
                target_type.map(|t| ("target_type", t)),
                include_derived,
                min_confidence,
            )
            .await?;
        // In the reverse direction the caller's target type constrains the
        // row's source side
        let reverse = self
            .select_mappings(
                &mut tx,
                "target_id",
                "target_type",
                entity_id,
                entity_type,
                target_type.map(|t| ("source_type", t)),
                include_derived,
                min_confidence,
            )
            .await?;

        let all_mappings: Vec<EntityMapping> = forward.into_iter().chain(reverse).collect();

        let delta = StatsDelta {
            hit: !all_mappings.is_empty(),
            miss: all_mappings.is_empty(),
            direct: all_mappings.iter().any(|m| !m.is_derived),
            derived: all_mappings.iter().any(|m| m.is_derived),
            ..Default::default()
        };
        self.update_stats(&mut tx, delta).await?;

        let mut seen_ids = HashSet::new();
        let mut results = Vec::new();
        for mapping in &all_mappings {
            if !seen_ids.insert(mapping.id) {
                continue;
            }
            self.increment_usage(&mut tx, mapping.id).await?;
            results.push(self.to_result(&mut tx, mapping, 1).await?);
        }

        tx.commit().await?;

        self.monitor.record_event(
            if delta.hit { CacheEventType::Hit } else { CacheEventType::Miss },
            Some(entity_type),
            None,
            None,
        );

        Ok(results)
    }

    /// Insert or refresh a mapping
    ///
    /// Upserts by the `(source_id, source_type, target_id, target_type)` quad.
    /// An existing row keeps its identity and usage count; confidence,
    /// provenance, derivation state, expiry and the metadata bag are replaced.
    /// With `bidirectional` set and distinct endpoints the swapped quad gets
    /// the same treatment, with its TTL resolved for the reverse direction.
    pub async fn add_mapping(&self, req: &AddMappingRequest) -> Result<MappingResult> {
        if req.is_derived != !req.derivation_path.is_empty() {
            return Err(BiomapperError::validation(
                "derivation_path must be non-empty exactly when is_derived is set",
            ));
        }
        if req.source_id.is_empty() || req.target_id.is_empty() {
            return Err(BiomapperError::validation("source_id and target_id cannot be empty"));
        }

        let confidence = req.confidence.clamp(0.0, 1.0);

        let mut tx = self.pool.begin().await?;

        let forward_id = self
            .upsert_row(
                &mut tx,
                &req.source_id,
                &req.source_type,
                &req.target_id,
                &req.target_type,
                confidence,
                req,
                true,
            )
            .await?;

        // The reverse row mirrors the forward one; it does not count as a
        // second insertion in the daily stats
        if req.bidirectional
            && (req.source_id != req.target_id || req.source_type != req.target_type)
        {
            self.upsert_row(
                &mut tx,
                &req.target_id,
                &req.target_type,
                &req.source_id,
                &req.source_type,
                confidence,
                req,
                false,
            )
            .await?;
        }

        let mapping: EntityMapping = sqlx::query_as("SELECT * FROM entity_mappings WHERE id = ?")
            .bind(forward_id)
            .fetch_one(&mut *tx)
            .await?;
        let result = self.to_result(&mut tx, &mapping, 0).await?;

        tx.commit().await?;

        self.monitor.record_event(
            if req.is_derived { CacheEventType::Derive } else { CacheEventType::Add },
            Some(req.source_type.as_str()),
            None,
            None,
        );

        Ok(result)
    }

    /// Add multiple mappings; individual failures are logged and skipped
    ///
    /// Returns the number successfully added.
    pub async fn bulk_add_mappings(&self, requests: &[AddMappingRequest]) -> Result<usize> {
        let mut added = 0;
        for req in requests {
            match self.add_mapping(req).await {
                Ok(_) => added += 1,
                Err(e) => {
                    tracing::warn!(
                        "Skipping mapping {}:{} -> {}:{}: {}",
                        req.source_type,
                        req.source_id,
                        req.target_type,
                        req.target_id,
                        e
                    );
                },
            }
        }
        Ok(added)
    }

    /// Delete all rows past their expiry; returns the number removed
    pub async fn delete_expired(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM entity_mappings WHERE expires_at < ?")
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::info!("Expiry sweep removed {} mappings", deleted);
            self.monitor
                .record_event(CacheEventType::Delete, None, None, None);
        }

        Ok(deleted)
    }

    /// Daily statistics rows, oldest first, optionally bounded by date
    pub async fn get_cache_stats(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<CacheStats>> {
        let mut sql = String::from("SELECT * FROM cache_stats WHERE 1 = 1");
        if start_date.is_some() {
            sql.push_str(" AND stats_date >= ?");
        }
        if end_date.is_some() {
            sql.push_str(" AND stats_date <= ?");
        }
        sql.push_str(" ORDER BY stats_date");

        let mut query = sqlx::query_as::<_, CacheStats>(&sql);
        if let Some(start) = start_date {
            query = query.bind(start.to_string());
        }
        if let Some(end) = end_date {
            query = query.bind(end.to_string());
        }

        let stats = query.fetch_all(&self.pool).await?;
        Ok(stats)
    }

    /// Set TTL and confidence defaults for an entity type pair
    pub async fn set_entity_type_config(
        &self,
        source_type: &str,
        target_type: &str,
        ttl_days: i64,
        confidence_threshold: Option<f64>,
    ) -> Result<()> {
        if ttl_days <= 0 {
            return Err(BiomapperError::validation("ttl_days must be > 0"));
        }

        sqlx::query(
            "INSERT INTO entity_type_config (source_type, target_type, ttl_days, confidence_threshold)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (source_type, target_type)
             DO UPDATE SET ttl_days = excluded.ttl_days,
                           confidence_threshold = COALESCE(excluded.confidence_threshold, confidence_threshold)",
        )
        .bind(source_type)
        .bind(target_type)
        .bind(ttl_days)
        .bind(confidence_threshold)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_entity_type_config(
        &self,
        source_type: &str,
        target_type: &str,
    ) -> Result<Option<EntityTypeConfig>> {
        let config: Option<EntityTypeConfig> = sqlx::query_as(
            "SELECT * FROM entity_type_config WHERE source_type = ? AND target_type = ?",
        )
        .bind(source_type)
        .bind(target_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(config)
    }

    /// All entity types present in the cache, with their identifier sets
    pub async fn get_all_entity_types(&self) -> Result<HashMap<String, HashSet<String>>> {
        let sources: Vec<(String, String)> =
            sqlx::query_as("SELECT DISTINCT source_type, source_id FROM entity_mappings")
                .fetch_all(&self.pool)
                .await?;
        let targets: Vec<(String, String)> =
            sqlx::query_as("SELECT DISTINCT target_type, target_id FROM entity_mappings")
                .fetch_all(&self.pool)
                .await?;

        let mut result: HashMap<String, HashSet<String>> = HashMap::new();
        for (entity_type, entity_id) in sources.into_iter().chain(targets) {
            result.entry(entity_type).or_default().insert(entity_id);
        }

        Ok(result)
    }

    /// Raw rows above a confidence floor; used by the transitivity builder
    pub async fn load_mappings_above(&self, min_confidence: f64) -> Result<Vec<EntityMapping>> {
        let mappings: Vec<EntityMapping> =
            sqlx::query_as("SELECT * FROM entity_mappings WHERE confidence >= ?")
                .bind(min_confidence)
                .fetch_all(&self.pool)
                .await?;
        Ok(mappings)
    }

    /// Direct (non-derived) row for a quad, if present
    pub async fn find_direct_mapping(
        &self,
        source_id: &str,
        source_type: &str,
        target_id: &str,
        target_type: &str,
    ) -> Result<Option<EntityMapping>> {
        let mapping: Option<EntityMapping> = sqlx::query_as(
            "SELECT * FROM entity_mappings
             WHERE source_id = ? AND source_type = ? AND target_id = ? AND target_type = ?",
        )
        .bind(source_id)
        .bind(source_type)
        .bind(target_id)
        .bind(target_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(mapping)
    }

    // ========================================
    // Internal helpers (all run inside the caller's transaction)
    // ========================================

    #[allow(clippy::too_many_arguments)]
    async fn select_mappings(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id_column: &str,
        type_column: &str,
        entity_id: &str,
        entity_type: &str,
        other_type: Option<(&str, &str)>,
        include_derived: bool,
        min_confidence: f64,
    ) -> Result<Vec<EntityMapping>> {
        let mut sql = format!(
            "SELECT * FROM entity_mappings WHERE {} = ? AND {} = ? AND confidence >= ?",
            id_column, type_column
        );
        if let Some((column, _)) = other_type {
            sql.push_str(&format!(" AND {} = ?", column));
        }
        if !include_derived {
            sql.push_str(" AND is_derived = 0");
        }

        let mut query = sqlx::query_as::<_, EntityMapping>(&sql)
            .bind(entity_id)
            .bind(entity_type)
            .bind(min_confidence);
        if let Some((_, value)) = other_type {
            query = query.bind(value);
        }

        let mappings = query.fetch_all(&mut **tx).await?;
        Ok(mappings)
    }

    async fn increment_usage(&self, tx: &mut Transaction<'_, Sqlite>, mapping_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE entity_mappings SET usage_count = usage_count + 1, last_updated = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(mapping_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// TTL for a type pair: explicit request value, else per-pair config,
    /// else the service default
    async fn resolve_ttl(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        explicit: Option<i64>,
        source_type: &str,
        target_type: &str,
    ) -> Result<i64> {
        if let Some(ttl) = explicit {
            return Ok(ttl);
        }

        let config: Option<(i64,)> = sqlx::query_as(
            "SELECT ttl_days FROM entity_type_config WHERE source_type = ? AND target_type = ?",
        )
        .bind(source_type)
        .bind(target_type)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(config.map(|(ttl,)| ttl).unwrap_or(self.default_ttl_days))
    }

    #[allow(clippy::too_many_arguments)]
    async fn upsert_row(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        source_id: &str,
        source_type: &str,
        target_id: &str,
        target_type: &str,
        confidence: f64,
        req: &AddMappingRequest,
        count_stats: bool,
    ) -> Result<i64> {
        let now = Utc::now();
        // TTL is resolved per direction, so the reverse row honors its own
        // entity type pair configuration
        let ttl = self
            .resolve_ttl(tx, req.ttl_days, source_type, target_type)
            .await?;
        let expires_at = now + ChronoDuration::days(ttl);
        let derivation_path = serde_json::to_string(&req.derivation_path)?;

        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM entity_mappings
             WHERE source_id = ? AND source_type = ? AND target_id = ? AND target_type = ?",
        )
        .bind(source_id)
        .bind(source_type)
        .bind(target_id)
        .bind(target_type)
        .fetch_optional(&mut **tx)
        .await?;

        let mapping_id = if let Some((id,)) = existing {
            sqlx::query(
                "UPDATE entity_mappings
                 SET confidence = ?, mapping_source = ?, is_derived = ?, derivation_path = ?,
                     last_updated = ?, expires_at = ?
                 WHERE id = ?",
            )
            .bind(confidence)
            .bind(&req.mapping_source)
            .bind(req.is_derived)
            .bind(&derivation_path)
            .bind(now)
            .bind(expires_at)
            .bind(id)
            .execute(&mut **tx)
            .await?;
            id
        } else {
            let result = sqlx::query(
                "INSERT INTO entity_mappings
                 (source_id, source_type, target_id, target_type, confidence, mapping_source,
                  is_derived, derivation_path, usage_count, last_updated, expires_at, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?)",
            )
            .bind(source_id)
            .bind(source_type)
            .bind(target_id)
            .bind(target_type)
            .bind(confidence)
            .bind(&req.mapping_source)
            .bind(req.is_derived)
            .bind(&derivation_path)
            .bind(now)
            .bind(expires_at)
            .bind(now)
            .execute(&mut **tx)
            .await?;

            if count_stats {
                let delta = StatsDelta {
                    api_call: !req.is_derived,
                    transitive_derivation: req.is_derived,
                    ..Default::default()
                };
                self.update_stats(tx, delta).await?;
            }

            result.last_insert_rowid()
        };

        if let Some(metadata) = &req.metadata {
            sqlx::query("DELETE FROM mapping_metadata WHERE mapping_id = ?")
                .bind(mapping_id)
                .execute(&mut **tx)
                .await?;
            for (key, value) in metadata {
                sqlx::query("INSERT INTO mapping_metadata (mapping_id, key, value) VALUES (?, ?, ?)")
                    .bind(mapping_id)
                    .bind(key)
                    .bind(value)
                    .execute(&mut **tx)
                    .await?;
            }
        }

        Ok(mapping_id)
    }

    /// Counters use `SET x = x + 1` so concurrent transactions cannot lose
    /// increments
    async fn update_stats(&self, tx: &mut Transaction<'_, Sqlite>, delta: StatsDelta) -> Result<()> {
        if !self.enable_stats {
            return Ok(());
        }

        let mut sets = Vec::new();
        if delta.hit {
            sets.push("hits = hits + 1");
        }
        if delta.miss {
            sets.push("misses = misses + 1");
        }
        if delta.direct {
            sets.push("direct_lookups = direct_lookups + 1");
        }
        if delta.derived {
            sets.push("derived_lookups = derived_lookups + 1");
        }
        if delta.api_call {
            sets.push("api_calls = api_calls + 1");
        }
        if delta.transitive_derivation {
            sets.push("transitive_derivations = transitive_derivations + 1");
        }
        if sets.is_empty() {
            return Ok(());
        }

        let today = Utc::now().date_naive().to_string();
        sqlx::query("INSERT OR IGNORE INTO cache_stats (stats_date) VALUES (?)")
            .bind(&today)
            .execute(&mut **tx)
            .await?;

        let sql = format!("UPDATE cache_stats SET {} WHERE stats_date = ?", sets.join(", "));
        sqlx::query(&sql).bind(&today).execute(&mut **tx).await?;

        Ok(())
    }

    /// Build the caller-facing result, merging the stored metadata bag.
    /// `usage_bump` reflects an increment applied in this transaction but not
    /// yet visible in the row we selected.
    async fn to_result(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        mapping: &EntityMapping,
        usage_bump: i64,
    ) -> Result<MappingResult> {
        let mut result = MappingResult::from_mapping(mapping);
        result.insert_metadata("usage_count", (mapping.usage_count + usage_bump).to_string());

        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM mapping_metadata WHERE mapping_id = ?")
                .bind(mapping.id)
                .fetch_all(&mut **tx)
                .await?;
        for (key, value) in rows {
            result.metadata.entry(key).or_insert(value);
        }

        Ok(result)
    }
}

//! Resource metadata registry
//!
//! Persistent catalog of mapping backends: what each one is, which ontology
//! types it covers, how it has been performing, and an append-only log of
//! every operation routed through it. The dispatcher asks this registry for
//! the preferred resource order per request.

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;

use crate::models::{
    OntologyCoverage, OperationLog, OperationStatus, OperationType, PerformanceMetrics,
    ResourceMetadata, ResourceType, SupportLevel,
};
use crate::utils::{BiomapperError, Result};

#[derive(Clone)]
pub struct RegistryService {
    pool: SqlitePool,
}

impl RegistryService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register or update a resource; upsert keyed by name
    pub async fn register_resource(
        &self,
        resource_name: &str,
        resource_type: ResourceType,
        connection_info: Option<&serde_json::Value>,
        priority: i64,
        is_active: bool,
    ) -> Result<ResourceMetadata> {
        if resource_name.trim().is_empty() {
            return Err(BiomapperError::validation("Resource name cannot be empty"));
        }

        let conn_info = connection_info.map(|v| v.to_string());
        let now = Utc::now();

        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM resource_metadata WHERE resource_name = ?")
                .bind(resource_name)
                .fetch_optional(&self.pool)
                .await?;

        if let Some((id,)) = existing {
            sqlx::query(
                "UPDATE resource_metadata
                 SET resource_type = ?, connection_info = ?, priority = ?, is_active = ?, updated_at = ?
                 WHERE id = ?",
            )
            .bind(resource_type.as_str())
            .bind(&conn_info)
            .bind(priority)
            .bind(is_active)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
            tracing::info!("Updated resource metadata for '{}'", resource_name);
        } else {
            sqlx::query(
                "INSERT INTO resource_metadata
                 (resource_name, resource_type, connection_info, priority, is_active, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(resource_name)
            .bind(resource_type.as_str())
            .bind(&conn_info)
            .bind(priority)
            .bind(is_active)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;
            tracing::info!("Registered new resource '{}'", resource_name);
        }

        self.get_resource(resource_name)
            .await?
            .ok_or_else(|| BiomapperError::unknown_resource(resource_name))
    }

    /// Register ontology coverage for a resource; upsert per (resource, ontology)
    pub async fn register_ontology_coverage(
        &self,
        resource_name: &str,
        ontology_type: &str,
        support_level: SupportLevel,
        entity_count: Option<i64>,
    ) -> Result<OntologyCoverage> {
        let resource_id = self.resolve_resource_id(resource_name).await?;
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO ontology_coverage (resource_id, ontology_type, support_level, entity_count, last_updated)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (resource_id, ontology_type)
             DO UPDATE SET support_level = excluded.support_level,
                           entity_count = excluded.entity_count,
                           last_updated = excluded.last_updated",
        )
        .bind(resource_id)
        .bind(ontology_type)
        .bind(support_level.as_str())
        .bind(entity_count)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            "Registered ontology coverage for '{}' and '{}': {}",
            resource_name,
            ontology_type,
            support_level.as_str()
        );

        let coverage: OntologyCoverage = sqlx::query_as(
            "SELECT * FROM ontology_coverage WHERE resource_id = ? AND ontology_type = ?",
        )
        .bind(resource_id)
        .bind(ontology_type)
        .fetch_one(&self.pool)
        .await?;

        Ok(coverage)
    }

    /// Update the last sync timestamp for a resource
    pub async fn update_resource_sync(&self, resource_name: &str) -> Result<()> {
        let resource_id = self.resolve_resource_id(resource_name).await?;

        sqlx::query("UPDATE resource_metadata SET last_sync = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(resource_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Append an operation log entry
    ///
    /// When a response time is present the matching performance metrics row
    /// is advanced by one sample under the running-average rule, in the same
    /// transaction as the log append.
    #[allow(clippy::too_many_arguments)]
    pub async fn log_operation(
        &self,
        resource_name: &str,
        operation_type: OperationType,
        source_type: Option<&str>,
        target_type: Option<&str>,
        query: Option<&str>,
        response_time_ms: Option<i64>,
        status: OperationStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let resource_id = self.resolve_resource_id(resource_name).await?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO operation_logs
             (resource_id, operation_type, source_type, target_type, query, response_time_ms,
              status, error_message, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(resource_id)
        .bind(operation_type.as_str())
        .bind(source_type)
        .bind(target_type)
        .bind(query)
        .bind(response_time_ms)
        .bind(status.as_str())
        .bind(error_message)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if let Some(response_time_ms) = response_time_ms {
            self.advance_metrics(
                &mut tx,
                resource_id,
                operation_type,
                source_type,
                target_type,
                response_time_ms as f64,
                status == OperationStatus::Success,
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// List registered resources, highest priority first
    pub async fn get_resources(
        &self,
        active_only: bool,
        resource_type: Option<ResourceType>,
    ) -> Result<Vec<ResourceMetadata>> {
        let mut sql = String::from("SELECT * FROM resource_metadata WHERE 1 = 1");
        if active_only {
            sql.push_str(" AND is_active = 1");
        }
        if resource_type.is_some() {
            sql.push_str(" AND resource_type = ?");
        }
        sql.push_str(" ORDER BY priority DESC, resource_name");

        let mut query = sqlx::query_as::<_, ResourceMetadata>(&sql);
        if let Some(resource_type) = resource_type {
            query = query.bind(resource_type.as_str());
        }

        let resources = query.fetch_all(&self.pool).await?;
        Ok(resources)
    }

    pub async fn get_resource(&self, resource_name: &str) -> Result<Option<ResourceMetadata>> {
        let resource: Option<ResourceMetadata> =
            sqlx::query_as("SELECT * FROM resource_metadata WHERE resource_name = ?")
                .bind(resource_name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(resource)
    }

    /// Whether a resource covers an ontology type at `min_support` or better
    ///
    /// Support levels order as none < partial < full; a missing coverage row
    /// counts as none.
    pub async fn has_ontology_support(
        &self,
        resource_name: &str,
        ontology_type: &str,
        min_support: SupportLevel,
    ) -> Result<bool> {
        let Some(resource) = self.get_resource(resource_name).await? else {
            return Ok(false);
        };

        let coverage: Option<(String,)> = sqlx::query_as(
            "SELECT support_level FROM ontology_coverage WHERE resource_id = ? AND ontology_type = ?",
        )
        .bind(resource.id)
        .bind(ontology_type)
        .fetch_optional(&self.pool)
        .await?;

        let level = coverage
            .map(|(raw,)| SupportLevel::parse_level(&raw))
            .unwrap_or(SupportLevel::None);

        Ok(level.rank() >= min_support.rank())
    }

    /// Ranked resource names for one mapping request
    ///
    /// Active resources covering both types beyond none are scored
    /// `priority*100 + success_rate*50 + (1 - min(1000, avg_ms)/1000)*25`;
    /// missing metrics contribute nothing. Resources under `min_success_rate`
    /// are dropped. Ties break by priority then name, so the order is
    /// deterministic.
    pub async fn get_preferred_resource_order(
        &self,
        source_type: &str,
        target_type: &str,
        operation_type: OperationType,
        min_success_rate: Option<f64>,
    ) -> Result<Vec<String>> {
        let resources = self.get_resources(true, None).await?;

        let mut scored: Vec<(String, i64, f64)> = Vec::new();

        for resource in resources {
            let source_supported = self
                .coverage_rank(resource.id, source_type)
                .await?
                .map(|rank| rank >= SupportLevel::Partial.rank())
                .unwrap_or(false);
            let target_supported = self
                .coverage_rank(resource.id, target_type)
                .await?
                .map(|rank| rank >= SupportLevel::Partial.rank())
                .unwrap_or(false);

            if !source_supported || !target_supported {
                continue;
            }

            let mut score = resource.priority as f64 * 100.0;

            let metrics: Option<PerformanceMetrics> = sqlx::query_as(
                "SELECT * FROM performance_metrics
                 WHERE resource_id = ? AND operation_type = ? AND source_type = ? AND target_type = ?",
            )
            .bind(resource.id)
            .bind(operation_type.as_str())
            .bind(source_type)
            .bind(target_type)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(metrics) = metrics {
                let success_rate = metrics.success_rate.unwrap_or(0.0);
                if let Some(min) = min_success_rate
                    && success_rate < min
                {
                    continue;
                }

                score += success_rate * 50.0;

                if let Some(avg) = metrics.avg_response_time_ms
                    && avg > 0.0
                {
                    let normalized = avg.min(1000.0) / 1000.0;
                    score += (1.0 - normalized) * 25.0;
                }
            }

            scored.push((resource.resource_name, resource.priority, score));
        }

        scored.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.1.cmp(&a.1))
                .then(a.0.cmp(&b.0))
        });

        Ok(scored.into_iter().map(|(name, _, _)| name).collect())
    }

    /// Performance metrics filtered for reporting
    pub async fn get_performance_metrics(
        &self,
        resource_name: Option<&str>,
        operation_type: Option<OperationType>,
        source_type: Option<&str>,
        target_type: Option<&str>,
    ) -> Result<Vec<PerformanceMetrics>> {
        let resource_id = match resource_name {
            Some(name) => match self.get_resource(name).await? {
                Some(resource) => Some(resource.id),
                None => return Ok(Vec::new()),
            },
            None => None,
        };

        let mut sql = String::from("SELECT * FROM performance_metrics WHERE 1 = 1");
        if resource_id.is_some() {
            sql.push_str(" AND resource_id = ?");
        }
        if operation_type.is_some() {
            sql.push_str(" AND operation_type = ?");
        }
        if source_type.is_some() {
            sql.push_str(" AND source_type = ?");
        }
        if target_type.is_some() {
            sql.push_str(" AND target_type = ?");
        }

        let mut query = sqlx::query_as::<_, PerformanceMetrics>(&sql);
        if let Some(id) = resource_id {
            query = query.bind(id);
        }
        if let Some(operation_type) = operation_type {
            query = query.bind(operation_type.as_str());
        }
        if let Some(source_type) = source_type {
            query = query.bind(source_type);
        }
        if let Some(target_type) = target_type {
            query = query.bind(target_type);
        }

        let metrics = query.fetch_all(&self.pool).await?;
        Ok(metrics)
    }

    /// Resource names mapped to their logged metrics, for reporting
    pub async fn get_resource_performance(
        &self,
        source_type: Option<&str>,
        target_type: Option<&str>,
    ) -> Result<HashMap<String, Vec<PerformanceMetrics>>> {
        let metrics = self
            .get_performance_metrics(None, Some(OperationType::Map), source_type, target_type)
            .await?;

        let mut by_resource: HashMap<String, Vec<PerformanceMetrics>> = HashMap::new();
        for metric in metrics {
            let name: Option<(String,)> =
                sqlx::query_as("SELECT resource_name FROM resource_metadata WHERE id = ?")
                    .bind(metric.resource_id)
                    .fetch_optional(&self.pool)
                    .await?;
            if let Some((name,)) = name {
                by_resource.entry(name).or_default().push(metric);
            }
        }

        Ok(by_resource)
    }

    /// Recent operation log entries for a resource, newest first
    pub async fn get_operation_logs(
        &self,
        resource_name: &str,
        limit: i64,
    ) -> Result<Vec<OperationLog>> {
        let resource_id = self.resolve_resource_id(resource_name).await?;

        let logs: Vec<OperationLog> = sqlx::query_as(
            "SELECT * FROM operation_logs WHERE resource_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(resource_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(logs)
    }

    /// Delete operation logs, optionally bounded by age and resource
    pub async fn clear_operation_logs(
        &self,
        older_than_days: Option<i64>,
        resource_name: Option<&str>,
    ) -> Result<u64> {
        let resource_id = match resource_name {
            Some(name) => match self.get_resource(name).await? {
                Some(resource) => Some(resource.id),
                None => return Ok(0),
            },
            None => None,
        };

        let mut sql = String::from("DELETE FROM operation_logs WHERE 1 = 1");
        if older_than_days.is_some() {
            sql.push_str(" AND timestamp < ?");
        }
        if resource_id.is_some() {
            sql.push_str(" AND resource_id = ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(days) = older_than_days {
            query = query.bind(Utc::now() - ChronoDuration::days(days));
        }
        if let Some(id) = resource_id {
            query = query.bind(id);
        }

        let result = query.execute(&self.pool).await?;
        let cleared = result.rows_affected();
        tracing::info!("Cleared {} operation logs", cleared);
        Ok(cleared)
    }

    // ========================================
    // Internal helpers
    // ========================================

    async fn resolve_resource_id(&self, resource_name: &str) -> Result<i64> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM resource_metadata WHERE resource_name = ?")
                .bind(resource_name)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(id,)| id)
            .ok_or_else(|| BiomapperError::unknown_resource(resource_name))
    }

    async fn coverage_rank(&self, resource_id: i64, ontology_type: &str) -> Result<Option<u8>> {
        let coverage: Option<(String,)> = sqlx::query_as(
            "SELECT support_level FROM ontology_coverage WHERE resource_id = ? AND ontology_type = ?",
        )
        .bind(resource_id)
        .bind(ontology_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(coverage.map(|(raw,)| SupportLevel::parse_level(&raw).rank()))
    }

    /// Running-average update:
    ///   avg_new  = (avg_old * n + t) / (n + 1)
    ///   succ_new = (succ_old * n + s) / (n + 1)
    ///   n       += 1
    /// starting from the first sample when the row is absent.
    #[allow(clippy::too_many_arguments)]
    async fn advance_metrics(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        resource_id: i64,
        operation_type: OperationType,
        source_type: Option<&str>,
        target_type: Option<&str>,
        response_time_ms: f64,
        success: bool,
    ) -> Result<()> {
        let existing: Option<PerformanceMetrics> = sqlx::query_as(
            "SELECT * FROM performance_metrics
             WHERE resource_id = ? AND operation_type = ? AND source_type IS ? AND target_type IS ?",
        )
        .bind(resource_id)
        .bind(operation_type.as_str())
        .bind(source_type)
        .bind(target_type)
        .fetch_optional(&mut **tx)
        .await?;

        let success_value = if success { 1.0 } else { 0.0 };
        let now = Utc::now();

        match existing {
            Some(metrics) => {
                let n = metrics.sample_count as f64;
                let avg = metrics.avg_response_time_ms.unwrap_or(response_time_ms);
                let rate = metrics.success_rate.unwrap_or(success_value);

                let new_avg = (avg * n + response_time_ms) / (n + 1.0);
                let new_rate = (rate * n + success_value) / (n + 1.0);

                sqlx::query(
                    "UPDATE performance_metrics
                     SET avg_response_time_ms = ?, success_rate = ?,
                         sample_count = sample_count + 1, last_updated = ?
                     WHERE id = ?",
                )
                .bind(new_avg)
                .bind(new_rate)
                .bind(now)
                .bind(metrics.id)
                .execute(&mut **tx)
                .await?;
            },
            None => {
                sqlx::query(
                    "INSERT INTO performance_metrics
                     (resource_id, operation_type, source_type, target_type,
                      avg_response_time_ms, success_rate, sample_count, last_updated)
                     VALUES (?, ?, ?, ?, ?, ?, 1, ?)",
                )
                .bind(resource_id)
                .bind(operation_type.as_str())
                .bind(source_type)
                .bind(target_type)
                .bind(response_time_ms)
                .bind(success_value)
                .bind(now)
                .execute(&mut **tx)
                .await?;
            },
        }

        Ok(())
    }
}

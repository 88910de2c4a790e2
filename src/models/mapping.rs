//! Entity mapping models
//!
//! Core data structures for the mapping cache: cached rows, insert requests,
//! per-type configuration, daily statistics and transitivity job logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;

/// A cached entity mapping row
///
/// The quad `(source_id, source_type, target_id, target_type)` is unique.
/// `derivation_path` is stored as a JSON array of mapping row ids and is
/// non-empty exactly when `is_derived` is set.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EntityMapping {
    pub id: i64,
    pub source_id: String,
    pub source_type: String,
    pub target_id: String,
    pub target_type: String,
    pub confidence: f64,
    pub mapping_source: String,
    pub is_derived: bool,
    pub derivation_path: String,
    pub usage_count: i64,
    pub last_updated: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl EntityMapping {
    /// Parse the stored derivation path into row ids
    pub fn derivation_ids(&self) -> Vec<i64> {
        serde_json::from_str(&self.derivation_path).unwrap_or_default()
    }

    pub fn source_key(&self) -> (String, String) {
        (self.source_id.clone(), self.source_type.clone())
    }

    pub fn target_key(&self) -> (String, String) {
        (self.target_id.clone(), self.target_type.clone())
    }
}

/// Request to insert or refresh a cached mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMappingRequest {
    pub source_id: String,
    pub source_type: String,
    pub target_id: String,
    pub target_type: String,
    pub confidence: f64,
    pub mapping_source: String,
    pub is_derived: bool,
    pub derivation_path: Vec<i64>,
    pub metadata: Option<HashMap<String, String>>,
    pub ttl_days: Option<i64>,
    pub bidirectional: bool,
}

impl AddMappingRequest {
    pub fn new(
        source_id: impl Into<String>,
        source_type: impl Into<String>,
        target_id: impl Into<String>,
        target_type: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            source_type: source_type.into(),
            target_id: target_id.into(),
            target_type: target_type.into(),
            confidence: 1.0,
            mapping_source: "api".to_string(),
            is_derived: false,
            derivation_path: Vec::new(),
            metadata: None,
            ttl_days: None,
            bidirectional: true,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_source(mut self, mapping_source: impl Into<String>) -> Self {
        self.mapping_source = mapping_source.into();
        self
    }

    pub fn with_ttl_days(mut self, ttl_days: i64) -> Self {
        self.ttl_days = Some(ttl_days);
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn derived(mut self, derivation_path: Vec<i64>) -> Self {
        self.is_derived = true;
        self.derivation_path = derivation_path;
        self
    }

    pub fn unidirectional(mut self) -> Self {
        self.bidirectional = false;
        self
    }
}

/// Value returned to callers for a resolved mapping
///
/// `metadata` is a stringified provenance sidecar: which resource served the
/// request, response time, cache-hit flag, derivation path when derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingResult {
    pub source_id: String,
    pub target_id: Option<String>,
    pub target_type: String,
    pub confidence: f64,
    pub mapping_source: String,
    pub metadata: HashMap<String, String>,
}

impl MappingResult {
    pub fn from_mapping(mapping: &EntityMapping) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("mapping_id".to_string(), mapping.id.to_string());
        metadata.insert("usage_count".to_string(), mapping.usage_count.to_string());
        if mapping.is_derived {
            metadata.insert("derivation_path".to_string(), mapping.derivation_path.clone());
        }

        Self {
            source_id: mapping.source_id.clone(),
            target_id: Some(mapping.target_id.clone()),
            target_type: mapping.target_type.clone(),
            confidence: mapping.confidence,
            mapping_source: mapping.mapping_source.clone(),
            metadata,
        }
    }

    pub fn insert_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }
}

/// Per entity-type-pair cache configuration
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EntityTypeConfig {
    pub id: i64,
    pub source_type: String,
    pub target_type: String,
    pub ttl_days: i64,
    pub confidence_threshold: Option<f64>,
}

/// Daily cache usage counters (one row per UTC calendar day)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CacheStats {
    pub id: i64,
    pub stats_date: String,
    pub hits: i64,
    pub misses: i64,
    pub direct_lookups: i64,
    pub derived_lookups: i64,
    pub api_calls: i64,
    pub transitive_derivations: i64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total > 0 { self.hits as f64 / total as f64 } else { 0.0 }
    }
}

/// Log row for one transitivity builder run
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TransitiveJobLog {
    pub id: i64,
    pub job_id: String,
    pub job_date: DateTime<Utc>,
    pub status: String,
    pub mappings_processed: i64,
    pub new_mappings_created: i64,
    pub duration_seconds: Option<f64>,
}

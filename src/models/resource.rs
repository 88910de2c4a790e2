//! Resource registry models
//!
//! Backends registered with the engine, their ontology coverage, running
//! performance aggregates and the append-only operation log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;

/// Kind of backend a resource wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Cache,
    Graph,
    Api,
    Dataset,
    Other,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Graph => "graph",
            Self::Api => "api",
            Self::Dataset => "dataset",
            Self::Other => "other",
        }
    }

    pub fn parse_type(s: &str) -> Self {
        match s {
            "cache" => Self::Cache,
            "graph" => Self::Graph,
            "api" => Self::Api,
            "dataset" => Self::Dataset,
            _ => Self::Other,
        }
    }
}

/// Level of support a resource claims for an ontology type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportLevel {
    None,
    Partial,
    Full,
}

impl SupportLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Partial => "partial",
            Self::Full => "full",
        }
    }

    pub fn parse_level(s: &str) -> Self {
        match s {
            "partial" => Self::Partial,
            "full" => Self::Full,
            _ => Self::None,
        }
    }

    /// Ordering rank: none < partial < full
    pub fn rank(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Partial => 1,
            Self::Full => 2,
        }
    }
}

/// Operation kind recorded in logs and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Lookup,
    Map,
    Sync,
    Update,
    Delete,
    Other,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lookup => "lookup",
            Self::Map => "map",
            Self::Sync => "sync",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Other => "other",
        }
    }
}

/// Outcome recorded for one logged operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Success,
    Error,
    Timeout,
    Pending,
    Canceled,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Pending => "pending",
            Self::Canceled => "canceled",
        }
    }
}

/// A registered backend
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ResourceMetadata {
    pub id: i64,
    pub resource_name: String,
    pub resource_type: String,
    pub connection_info: Option<String>,
    pub priority: i64,
    pub is_active: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceMetadata {
    pub fn resource_type_enum(&self) -> ResourceType {
        ResourceType::parse_type(&self.resource_type)
    }

    /// Connection info decoded from its stored JSON blob
    pub fn connection_info_json(&self) -> serde_json::Value {
        self.connection_info
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or(serde_json::Value::Null)
    }
}

/// Ontology coverage claimed by a resource, unique per (resource, ontology)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OntologyCoverage {
    pub id: i64,
    pub resource_id: i64,
    pub ontology_type: String,
    pub support_level: String,
    pub entity_count: Option<i64>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl OntologyCoverage {
    pub fn support_level_enum(&self) -> SupportLevel {
        SupportLevel::parse_level(&self.support_level)
    }
}

/// Running performance aggregates, unique per (resource, op, source, target)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub id: i64,
    pub resource_id: i64,
    pub operation_type: String,
    pub source_type: Option<String>,
    pub target_type: Option<String>,
    pub avg_response_time_ms: Option<f64>,
    pub success_rate: Option<f64>,
    pub sample_count: i64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Append-only record of a single operation against a resource
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OperationLog {
    pub id: i64,
    pub resource_id: i64,
    pub operation_type: String,
    pub source_type: Option<String>,
    pub target_type: Option<String>,
    pub query: Option<String>,
    pub response_time_ms: Option<i64>,
    pub status: String,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A named operation a resource claims to support (runtime only, not persisted)
///
/// Capability names follow the `<source_type>_to_<target_type>` convention
/// and are discovered from backend schemas at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceCapability {
    pub name: String,
    pub description: String,
    pub confidence: f64,
    pub parameters: HashMap<String, String>,
}

impl ResourceCapability {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            confidence: 1.0,
            parameters: HashMap::new(),
        }
    }

    /// Canonical capability name for a type pair
    pub fn name_for(source_type: &str, target_type: &str) -> String {
        format!("{}_to_{}", source_type, target_type)
    }
}

/// Per-request options forwarded to adapters
///
/// Adapters read what they understand and ignore unknown extras.
#[derive(Debug, Clone, Default)]
pub struct MapOptions {
    pub min_confidence: Option<f64>,
    pub extras: HashMap<String, String>,
}

impl MapOptions {
    pub fn with_min_confidence(min_confidence: f64) -> Self {
        Self { min_confidence: Some(min_confidence), extras: HashMap::new() }
    }
}

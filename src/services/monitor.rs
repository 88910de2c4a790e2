//! In-process cache observability
//!
//! Bounded ring buffer of recent cache events plus aggregate counters per
//! event type. Constructors take an explicit `Arc<CacheMonitor>` handle; a
//! single convenience global exists for callers that do not thread one.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Types of cache events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheEventType {
    Hit,
    Miss,
    Add,
    Delete,
    Lookup,
    Derive,
    ApiCall,
    Error,
}

impl CacheEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Add => "add",
            Self::Delete => "delete",
            Self::Lookup => "lookup",
            Self::Derive => "derive",
            Self::ApiCall => "api_call",
            Self::Error => "error",
        }
    }
}

/// Record of a single cache event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEvent {
    pub event_type: CacheEventType,
    pub timestamp: DateTime<Utc>,
    pub entity_type: Option<String>,
    pub duration_ms: Option<f64>,
    pub metadata: HashMap<String, String>,
}

/// Aggregate view over recorded events
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStats {
    pub events: HashMap<String, u64>,
    pub hit_ratio: Option<f64>,
    pub performance: HashMap<String, PerformanceStat>,
    pub uptime_seconds: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceStat {
    pub avg_ms: f64,
    pub samples: usize,
}

struct MonitorInner {
    events: VecDeque<CacheEvent>,
    counts: HashMap<CacheEventType, u64>,
    durations: HashMap<CacheEventType, Vec<f64>>,
}

/// Monitor for tracking cache behavior
pub struct CacheMonitor {
    enabled: bool,
    max_events: usize,
    log_events: bool,
    inner: Mutex<MonitorInner>,
    start: Instant,
}

const DURATION_SAMPLE_CAP: usize = 100;

impl Default for CacheMonitor {
    fn default() -> Self {
        Self::new(true, 1000, true)
    }
}

impl CacheMonitor {
    pub fn new(enabled: bool, max_events: usize, log_events: bool) -> Self {
        Self {
            enabled,
            max_events,
            log_events,
            inner: Mutex::new(MonitorInner {
                events: VecDeque::with_capacity(max_events.min(1024)),
                counts: HashMap::new(),
                durations: HashMap::new(),
            }),
            start: Instant::now(),
        }
    }

    /// Record a cache event
    pub fn record_event(
        &self,
        event_type: CacheEventType,
        entity_type: Option<&str>,
        duration_ms: Option<f64>,
        metadata: Option<HashMap<String, String>>,
    ) {
        if !self.enabled {
            return;
        }

        let event = CacheEvent {
            event_type,
            timestamp: Utc::now(),
            entity_type: entity_type.map(|t| t.to_string()),
            duration_ms,
            metadata: metadata.unwrap_or_default(),
        };

        {
            let mut inner = self.inner.lock().expect("monitor lock poisoned");
            inner.events.push_back(event.clone());
            while inner.events.len() > self.max_events {
                inner.events.pop_front();
            }

            *inner.counts.entry(event_type).or_insert(0) += 1;

            if let Some(duration) = duration_ms {
                let samples = inner.durations.entry(event_type).or_default();
                samples.push(duration);
                if samples.len() > DURATION_SAMPLE_CAP {
                    samples.remove(0);
                }
            }
        }

        if self.log_events {
            self.log_event(&event);
        }
    }

    fn log_event(&self, event: &CacheEvent) {
        let mut msg = format!("Cache {}", event.event_type.as_str());
        if let Some(entity_type) = &event.entity_type {
            msg.push_str(&format!(" type={}", entity_type));
        }
        if let Some(duration) = event.duration_ms {
            msg.push_str(&format!(" duration={:.2}ms", duration));
        }
        for (key, value) in &event.metadata {
            msg.push_str(&format!(" {}={}", key, value));
        }

        match event.event_type {
            CacheEventType::Error => tracing::error!("{}", msg),
            CacheEventType::Hit => tracing::debug!("{}", msg),
            _ => tracing::info!("{}", msg),
        }
    }

    /// Aggregate statistics over everything recorded so far
    pub fn get_stats(&self) -> MonitorStats {
        let inner = self.inner.lock().expect("monitor lock poisoned");

        let events: HashMap<String, u64> = inner
            .counts
            .iter()
            .map(|(event_type, count)| (event_type.as_str().to_string(), *count))
            .collect();

        let hits = inner.counts.get(&CacheEventType::Hit).copied().unwrap_or(0);
        let misses = inner.counts.get(&CacheEventType::Miss).copied().unwrap_or(0);
        let hit_ratio = if hits + misses > 0 {
            Some(hits as f64 / (hits + misses) as f64)
        } else {
            None
        };

        let performance: HashMap<String, PerformanceStat> = inner
            .durations
            .iter()
            .filter(|(_, samples)| !samples.is_empty())
            .map(|(event_type, samples)| {
                let avg = samples.iter().sum::<f64>() / samples.len() as f64;
                (
                    event_type.as_str().to_string(),
                    PerformanceStat { avg_ms: avg, samples: samples.len() },
                )
            })
            .collect();

        MonitorStats {
            events,
            hit_ratio,
            performance,
            uptime_seconds: self.start.elapsed().as_secs_f64(),
        }
    }

    /// Most recent events, newest last
    pub fn recent_events(&self, limit: usize) -> Vec<CacheEvent> {
        let inner = self.inner.lock().expect("monitor lock poisoned");
        inner
            .events
            .iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    /// Run an operation under timing
    ///
    /// Measures wall-clock duration and records the event on success. A
    /// failure records an Error event carrying the message and the error is
    /// handed back to the caller untouched.
    pub async fn track_operation<T, E, F>(
        &self,
        event_type: CacheEventType,
        entity_type: Option<&str>,
        metadata: Option<HashMap<String, String>>,
        operation: F,
    ) -> std::result::Result<T, E>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        if !self.enabled {
            return operation.await;
        }

        let start = Instant::now();
        match operation.await {
            Ok(value) => {
                let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
                self.record_event(event_type, entity_type, Some(duration_ms), metadata);
                Ok(value)
            },
            Err(e) => {
                let mut metadata = metadata.unwrap_or_default();
                metadata.insert("error".to_string(), e.to_string());
                self.record_event(CacheEventType::Error, entity_type, None, Some(metadata));
                Err(e)
            },
        }
    }
}

/// Process-wide convenience monitor
static GLOBAL_MONITOR: Lazy<Arc<CacheMonitor>> = Lazy::new(|| Arc::new(CacheMonitor::default()));

/// The global monitor handle; prefer threading an explicit handle through
/// constructors and use this only at the outermost wiring layer
pub fn global() -> Arc<CacheMonitor> {
    Arc::clone(&GLOBAL_MONITOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_hit_ratio() {
        let monitor = CacheMonitor::new(true, 10, false);
        monitor.record_event(CacheEventType::Hit, Some("chebi"), Some(1.5), None);
        monitor.record_event(CacheEventType::Hit, Some("hmdb"), None, None);
        monitor.record_event(CacheEventType::Miss, None, None, None);

        let stats = monitor.get_stats();
        assert_eq!(stats.events.get("hit"), Some(&2));
        assert_eq!(stats.events.get("miss"), Some(&1));
        assert!((stats.hit_ratio.unwrap() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.performance.get("hit").unwrap().samples, 1);
    }

    #[test]
    fn test_ring_buffer_cap() {
        let monitor = CacheMonitor::new(true, 3, false);
        for _ in 0..10 {
            monitor.record_event(CacheEventType::Add, None, None, None);
        }
        assert_eq!(monitor.recent_events(10).len(), 3);
        assert_eq!(monitor.get_stats().events.get("add"), Some(&10));
    }

    #[tokio::test]
    async fn test_track_operation_records_error() {
        let monitor = CacheMonitor::new(true, 10, false);

        let result: Result<(), String> = monitor
            .track_operation(CacheEventType::Lookup, Some("chebi"), None, async {
                Err("backend unavailable".to_string())
            })
            .await;

        assert!(result.is_err());
        let events = monitor.recent_events(1);
        assert_eq!(events[0].event_type, CacheEventType::Error);
        assert_eq!(events[0].metadata.get("error").map(String::as_str), Some("backend unavailable"));
    }

    #[tokio::test]
    async fn test_track_operation_measures_duration() {
        let monitor = CacheMonitor::new(true, 10, false);

        let result: Result<u32, String> = monitor
            .track_operation(CacheEventType::Lookup, None, None, async { Ok(7) })
            .await;

        assert_eq!(result.unwrap(), 7);
        let events = monitor.recent_events(1);
        assert_eq!(events[0].event_type, CacheEventType::Lookup);
        assert!(events[0].duration_ms.is_some());
    }
}

pub mod adapters;
pub mod cache_service;
pub mod dispatcher;
pub mod graph_sync;
pub mod maintenance;
pub mod monitor;
pub mod rag;
pub mod registry_service;
pub mod strategy;
pub mod transitivity;

pub use adapters::{
    CacheAdapter, GraphAdapter, GraphClient, GraphNode, GraphNodeType, GraphRelationship,
    GraphSchema, RagAdapter, ResourceAdapter,
};
pub use cache_service::CacheService;
pub use dispatcher::{BatchMapEntry, DispatchOptions, MappingDispatcher};
pub use graph_sync::{BulkSyncReport, GraphCacheSync, SyncConfig, SyncReport};
pub use maintenance::{CacheMaintenanceTask, start_cache_maintenance_task};
pub use monitor::{CacheEvent, CacheEventType, CacheMonitor, MonitorStats};
pub use rag::{RagConfig, RagPipeline};
pub use registry_service::RegistryService;
pub use strategy::{
    ActionRegistry, Endpoint, ExecutionContext, Strategy, StrategyAction, StrategyOutcome,
    StrategyRunner, StrategyStep, StepResult, default_action_registry,
};
pub use transitivity::TransitivityBuilder;

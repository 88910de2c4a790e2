pub mod mapping;
pub mod resource;

pub use mapping::{
    AddMappingRequest, CacheStats, EntityMapping, EntityTypeConfig, MappingResult,
    TransitiveJobLog,
};
pub use resource::{
    MapOptions, OntologyCoverage, OperationLog, OperationStatus, OperationType,
    PerformanceMetrics, ResourceCapability, ResourceMetadata, ResourceType, SupportLevel,
};

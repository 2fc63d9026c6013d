//! Collaborator services around the checking pipeline
//!
//! Proxy allocation, identifier input, result and checkpoint persistence,
//! reporting, and host health checks.

pub mod checkpoint;
pub mod health;
pub mod identifiers;
pub mod proxy;
pub mod report;
pub mod storage;

// Re-export commonly used types
pub use checkpoint::{
    Checkpoint,
    CheckpointError,
    CheckpointStore,
    JsonCheckpointStore,
    RunCounts,
    RunStatus,
};
pub use health::{HealthProbe, HealthThresholds, SystemHealth};
pub use identifiers::{FileIdentifierSource, IdentifierSource, IdentifierStream};
pub use proxy::{PoolHealth, ProxyPool, ProxyPoolConfig};
pub use report::{ReportError, ReportFiles, ReportGenerator, ReportMetrics};
pub use storage::{RedbResultStore, ResultSink, ResultsSnapshot, StoreError, StoredResult};

//! GitOps reconciliation engine for network-fabric configuration.
//!
//! Keeps a Git-backed directory of YAML manifests and a live cluster
//! control-plane consistent: ingests raw files, resolves identity conflicts,
//! detects drift, applies and fetches against the cluster, and schedules
//! itself periodically without racing its own invocations.

pub mod cluster;
pub mod config;
pub mod conflict;
pub mod drift;
pub mod error;
pub mod events;
pub mod gitops;
pub mod ingest;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod sanitize;
pub mod scheduler;
pub mod secrets;
pub mod telemetry;

pub use cluster::{ClusterApi, ClusterError, ClusterSyncClient, InMemoryCluster, RestClusterClient};
pub use config::{load_config, EngineConfig};
pub use conflict::{ConflictResolver, ConflictStrategy};
pub use drift::{calculate_sync_status, detect_drift, CalculatedSyncStatus};
pub use error::{ConfigError, ErrorKind, Result, SyncError};
pub use events::{SyncEvent, SyncEventBroadcaster, SyncRequest, SyncTriggerSender};
pub use gitops::{FabricLayout, GitDirectoryManager, GitOpsError};
pub use ingest::{IngestionEngine, IngestionReport};
pub use model::{
    Document, Fabric, ManagedResource, ResourceKey, SyncDirection, SyncOperation, SyncTrigger,
};
pub use orchestrator::{FabricStatus, SyncOrchestrator};
pub use registry::{Database, ResourceRegistry};
pub use scheduler::{SyncScheduler, WorkerPool};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};

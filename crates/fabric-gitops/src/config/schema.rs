use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::cluster::KindMapping;
use crate::telemetry::LoggingConfig;

pub const DEFAULT_RECOGNIZED_GROUP: &str = "githedgehog.com";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Registry database file; defaults to `~/.fabric-gitops/data/registry.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Pending sync jobs allowed before the tick stops submitting.
    /// Zero means twice the worker count.
    #[serde(default)]
    pub queue_capacity: usize,
}

fn default_tick_interval() -> u64 {
    60
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

impl SchedulerConfig {
    pub fn effective_queue_capacity(&self) -> usize {
        if self.queue_capacity == 0 {
            self.worker_count * 2
        } else {
            self.queue_capacity
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            worker_count: default_worker_count(),
            queue_capacity: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitConfig {
    #[serde(default = "default_git_retries")]
    pub max_retries: u32,
    #[serde(default = "default_git_retry_delay")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_git_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default = "default_user_name")]
    pub user_name: String,
    #[serde(default = "default_user_email")]
    pub user_email: String,
}

fn default_git_retries() -> u32 {
    3
}

fn default_git_retry_delay() -> u64 {
    2000
}

fn default_git_timeout() -> u64 {
    120
}

pub(crate) fn default_branch() -> String {
    "main".to_string()
}

fn default_user_name() -> String {
    "fabric-gitops".to_string()
}

fn default_user_email() -> String {
    "fabric-gitops@localhost".to_string()
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            max_retries: default_git_retries(),
            retry_base_delay_ms: default_git_retry_delay(),
            timeout_secs: default_git_timeout(),
            default_branch: default_branch(),
            user_name: default_user_name(),
            user_email: default_user_email(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    #[serde(default = "default_cluster_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_pool_idle")]
    pub pool_max_idle_per_host: usize,
    #[serde(default = "default_cluster_retries")]
    pub max_retries: u32,
    #[serde(default = "default_cluster_retry_delay")]
    pub retry_base_delay_ms: u64,
    /// Extra kind mappings on top of the built-in fabric CRD table.
    #[serde(default)]
    pub kinds: Vec<KindMapping>,
}

fn default_cluster_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_pool_idle() -> usize {
    4
}

fn default_cluster_retries() -> u32 {
    2
}

fn default_cluster_retry_delay() -> u64 {
    500
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_cluster_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            pool_max_idle_per_host: default_pool_idle(),
            max_retries: default_cluster_retries(),
            retry_base_delay_ms: default_cluster_retry_delay(),
            kinds: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionConfig {
    /// API group suffixes accepted by validation. `vpc.githedgehog.com`
    /// matches `githedgehog.com`.
    #[serde(default = "default_recognized_groups")]
    pub recognized_groups: Vec<String>,
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,
    /// More identity conflicts than this in one batch aborts the batch.
    #[serde(default = "default_conflict_threshold")]
    pub conflict_threshold: usize,
    #[serde(default = "default_namespace")]
    pub default_namespace: String,
}

fn default_recognized_groups() -> Vec<String> {
    vec![DEFAULT_RECOGNIZED_GROUP.to_string()]
}

fn default_lock_timeout() -> u64 {
    300
}

fn default_conflict_threshold() -> usize {
    25
}

fn default_namespace() -> String {
    "default".to_string()
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            recognized_groups: default_recognized_groups(),
            lock_timeout_secs: default_lock_timeout(),
            conflict_threshold: default_conflict_threshold(),
            default_namespace: default_namespace(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    /// How long a resource may be absent from both Git and the cluster
    /// before its registry row is deleted.
    #[serde(default = "default_orphan_grace")]
    pub orphan_grace_secs: u64,
    #[serde(default = "default_operation_retention")]
    pub operation_history_limit: usize,
}

fn default_orphan_grace() -> u64 {
    86_400
}

fn default_operation_retention() -> usize {
    500
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            orphan_grace_secs: default_orphan_grace(),
            operation_history_limit: default_operation_retention(),
        }
    }
}

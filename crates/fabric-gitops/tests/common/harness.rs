//! Test harness for isolated sync runs.
//!
//! The `TestHarness` struct provides a complete isolated environment:
//! - a temporary fabric directory that the first sync turns into a
//!   local-only Git working copy
//! - an in-memory registry with the fabric already inserted
//! - an in-memory cluster behind a static connector

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tempfile::TempDir;
use walkdir::WalkDir;

use fabric_gitops::cluster::{InMemoryCluster, StaticConnector};
use fabric_gitops::config::EngineConfig;
use fabric_gitops::conflict::ConflictStrategy;
use fabric_gitops::gitops::FabricLayout;
use fabric_gitops::model::{ClusterEndpoint, Document, Fabric, GitRepositoryConfig, ResourceKey};
use fabric_gitops::model::{ManagedResource, SyncOperation, SyncTrigger};
use fabric_gitops::registry::{fabric_repo, Database, ResourceRegistry};
use fabric_gitops::SyncOrchestrator;

/// Engine config for tests: no retries, so failure paths return at once.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.git.max_retries = 0;
    config.cluster.max_retries = 0;
    config.scheduler.worker_count = 2;
    config
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub fabric_dir: PathBuf,
    pub layout: FabricLayout,
    pub cluster: Arc<InMemoryCluster>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub fabric: Fabric,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_strategy(ConflictStrategy::MostRecentWins)
    }

    pub fn with_strategy(strategy: ConflictStrategy) -> Self {
        Self::build(strategy, test_config())
    }

    pub fn build(strategy: ConflictStrategy, config: EngineConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let fabric_dir = temp_dir.path().join("fabric");
        std::fs::create_dir_all(&fabric_dir).expect("Failed to create fabric dir");

        let db = Database::open_in_memory().expect("Failed to open registry");
        let cluster = Arc::new(InMemoryCluster::new());
        let connector = Arc::new(StaticConnector::new(cluster.clone()));
        let orchestrator = Arc::new(SyncOrchestrator::new(db, config, connector));

        let mut fabric = Fabric::new("lab")
            .with_git(GitRepositoryConfig::local(&fabric_dir))
            .with_cluster(ClusterEndpoint {
                endpoint: "https://fabric.example:6443".to_string(),
                ..ClusterEndpoint::default()
            });
        fabric.conflict_strategy = strategy;
        fabric_repo::insert(orchestrator.database(), &fabric).expect("Failed to insert fabric");

        Self {
            layout: FabricLayout::new(&fabric_dir),
            temp_dir,
            fabric_dir,
            cluster,
            orchestrator,
            fabric,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn db(&self) -> &Database {
        self.orchestrator.database()
    }

    pub fn registry(&self) -> ResourceRegistry {
        ResourceRegistry::new(self.db().clone(), &self.fabric.id)
    }

    pub fn resource(&self, key: &ResourceKey) -> ManagedResource {
        self.registry()
            .find(key)
            .expect("Registry lookup failed")
            .unwrap_or_else(|| panic!("{} not in registry", key))
    }

    pub fn reload_fabric(&self) -> Fabric {
        fabric_repo::find(self.db(), &self.fabric.id)
            .expect("Fabric lookup failed")
            .expect("Fabric missing")
    }

    /// Drops a file into `raw/`.
    pub fn write_raw(&self, filename: &str, content: &str) -> PathBuf {
        let dir = self.layout.raw_dir();
        std::fs::create_dir_all(&dir).expect("Failed to create raw dir");
        let path = dir.join(filename);
        std::fs::write(&path, content).expect("Failed to write raw file");
        path
    }

    /// Overwrites a managed file, as a hand edit in Git would.
    pub fn edit_managed(&self, key: &ResourceKey, document: &Document) {
        let path = self.managed_path(key);
        let yaml = document.to_yaml().expect("Failed to serialize document");
        std::fs::write(path, yaml).expect("Failed to write managed file");
    }

    pub fn managed_path(&self, key: &ResourceKey) -> PathBuf {
        self.layout.absolute(&self.layout.managed_relative_path(key))
    }

    pub fn managed_document(&self, key: &ResourceKey) -> Document {
        let content =
            std::fs::read_to_string(self.managed_path(key)).expect("Managed file missing");
        Document::from_yaml(&content).expect("Managed file does not parse")
    }

    pub async fn sync(&self) -> SyncOperation {
        self.orchestrator
            .sync(&self.fabric.id, SyncTrigger::Manual)
            .await
            .expect("Sync failed")
    }

    /// Every file of the working copy outside `.git`, with its content.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        WalkDir::new(&self.fabric_dir)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let content = std::fs::read(e.path()).expect("Failed to read file");
                (self.layout.relative(e.path()), content)
            })
            .collect()
    }

    pub fn unmanaged_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.layout.unmanaged_dir())
            .expect("unmanaged/ missing")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| !n.starts_with('.'))
            .collect();
        names.sort();
        names
    }

    pub fn commit_count(&self) -> usize {
        let output = Command::new("git")
            .args(["rev-list", "--count", "HEAD"])
            .current_dir(&self.fabric_dir)
            .output()
            .expect("Failed to run git");
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .unwrap_or(0)
    }
}

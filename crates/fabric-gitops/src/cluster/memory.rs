use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::api::ClusterApi;
use super::error::{ClusterError, Result};
use super::kinds::KindMapping;
use crate::model::{Document, ResourceKey};

/// A control-plane held in memory. Behaves like the real API where the
/// engine can tell: list items carry server-managed metadata and a status
/// block, every write bumps `resourceVersion`, and updates based on a stale
/// version are refused.
#[derive(Default)]
pub struct InMemoryCluster {
    objects: Mutex<BTreeMap<ResourceKey, Value>>,
    next_version: AtomicU64,
    unreachable: AtomicBool,
    latency_ms: AtomicU64,
    rejected_kinds: Mutex<HashSet<String>>,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
    create_calls: AtomicUsize,
    update_calls: AtomicUsize,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a document as if someone had applied it out of band.
    pub fn insert(&self, document: &Document) {
        let namespace = document.namespace_or("default").to_string();
        let key = ResourceKey::new(&document.kind, &namespace, &document.metadata.name);
        let value = self.stamp(document.to_value(), &namespace, None);
        self.lock_objects().insert(key, value);
    }

    pub fn remove(&self, key: &ResourceKey) -> bool {
        self.lock_objects().remove(key).is_some()
    }

    pub fn document(&self, key: &ResourceKey) -> Option<Document> {
        self.lock_objects()
            .get(key)
            .and_then(|v| Document::from_value(v.clone()).ok())
    }

    pub fn len(&self) -> usize {
        self.lock_objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every call fails with a connection error while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Every list call waits this long before answering.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Creates and updates of `kind` are refused as invalid.
    pub fn reject_kind(&self, kind: &str) {
        if let Ok(mut kinds) = self.rejected_kinds.lock() {
            kinds.insert(kind.to_string());
        }
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    /// Creates plus updates.
    pub fn apply_calls(&self) -> usize {
        self.create_calls() + self.update_calls()
    }

    pub fn reset_counters(&self) {
        for counter in [
            &self.list_calls,
            &self.get_calls,
            &self.create_calls,
            &self.update_calls,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    fn lock_objects(&self) -> std::sync::MutexGuard<'_, BTreeMap<ResourceKey, Value>> {
        // a panicking test thread must not take every other test down with it
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ClusterError::Connection("connection refused".to_string()));
        }
        Ok(())
    }

    fn check_accepted(&self, kind: &str, resource: &str) -> Result<()> {
        let rejected = self
            .rejected_kinds
            .lock()
            .map(|kinds| kinds.contains(kind))
            .unwrap_or(false);
        if rejected {
            return Err(ClusterError::Rejected {
                resource: resource.to_string(),
                status: 422,
                message: format!("admission webhook denied {}", kind),
            });
        }
        Ok(())
    }

    /// Adds what an API server would: namespace, uid, creation time, a
    /// fresh resource version and an empty status.
    fn stamp(&self, mut value: Value, namespace: &str, previous: Option<&Value>) -> Value {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        let uid = previous
            .and_then(|p| p.pointer("/metadata/uid").cloned())
            .unwrap_or_else(|| Value::String(uuid::Uuid::new_v4().to_string()));

        if let Some(object) = value.as_object_mut() {
            let metadata = object
                .entry("metadata")
                .or_insert_with(|| json!({}));
            if let Some(metadata) = metadata.as_object_mut() {
                metadata.insert("namespace".into(), Value::String(namespace.to_string()));
                metadata.insert("uid".into(), uid);
                metadata.insert("resourceVersion".into(), Value::String(version.to_string()));
                metadata
                    .entry("creationTimestamp")
                    .or_insert_with(|| Value::String(chrono::Utc::now().to_rfc3339()));
                metadata.insert("generation".into(), json!(version));
            }
            object.insert("status".into(), json!({"applied": {"gen": version}}));
        }
        value
    }
}

fn name_of(body: &Value) -> Result<String> {
    body.pointer("/metadata/name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ClusterError::Rejected {
            resource: "object".to_string(),
            status: 422,
            message: "metadata.name is required".to_string(),
        })
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn list(&self, mapping: &KindMapping, namespace: &str) -> Result<Vec<Value>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.check_reachable()?;
        Ok(self
            .lock_objects()
            .iter()
            .filter(|(key, _)| key.kind == mapping.kind && key.namespace == namespace)
            .map(|(_, value)| value.clone())
            .collect())
    }

    async fn get(&self, mapping: &KindMapping, namespace: &str, name: &str) -> Result<Option<Value>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        let key = ResourceKey::new(&mapping.kind, namespace, name);
        Ok(self.lock_objects().get(&key).cloned())
    }

    async fn create(&self, mapping: &KindMapping, namespace: &str, body: &Value) -> Result<Value> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        let name = name_of(body)?;
        let key = ResourceKey::new(&mapping.kind, namespace, &name);
        self.check_accepted(&mapping.kind, &key.to_string())?;

        let mut objects = self.lock_objects();
        if objects.contains_key(&key) {
            return Err(ClusterError::VersionConflict(format!("{} already exists", key)));
        }
        let stored = self.stamp(body.clone(), namespace, None);
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        mapping: &KindMapping,
        namespace: &str,
        name: &str,
        body: &Value,
    ) -> Result<Value> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        let key = ResourceKey::new(&mapping.kind, namespace, name);
        self.check_accepted(&mapping.kind, &key.to_string())?;

        let mut objects = self.lock_objects();
        let current = objects
            .get(&key)
            .ok_or_else(|| ClusterError::NotFound(key.to_string()))?;

        let expected = current.pointer("/metadata/resourceVersion");
        let offered = body.pointer("/metadata/resourceVersion");
        if offered.is_some() && offered != expected {
            return Err(ClusterError::VersionConflict(key.to_string()));
        }

        let stored = self.stamp(body.clone(), namespace, Some(current));
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn test_connection(&self) -> Result<String> {
        self.check_reachable()?;
        Ok("in-memory".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::kinds::KindRegistry;

    fn vpc(name: &str) -> Document {
        Document::new(
            "vpc.githedgehog.com/v1beta1",
            "VPC",
            "default",
            name,
            json!({"subnets": {"default": {"subnet": "10.0.1.0/24"}}}),
        )
    }

    #[tokio::test]
    async fn test_list_returns_server_fields() {
        let cluster = InMemoryCluster::new();
        cluster.insert(&vpc("vpc-1"));
        let mapping = KindRegistry::builtin().get("VPC").cloned().unwrap();

        let items = cluster.list(&mapping, "default").await.unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0].pointer("/metadata/uid").is_some());
        assert!(items[0].get("status").is_some());
        assert!(cluster.list(&mapping, "other").await.unwrap().is_empty());
        assert_eq!(cluster.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_stale_update_is_a_conflict() {
        let cluster = InMemoryCluster::new();
        let mapping = KindRegistry::builtin().get("VPC").cloned().unwrap();
        let created = cluster
            .create(&mapping, "default", &vpc("vpc-1").to_value())
            .await
            .unwrap();

        let mut body = created.clone();
        body["spec"]["subnets"]["default"]["vlan"] = json!(1001);
        cluster.update(&mapping, "default", "vpc-1", &body).await.unwrap();

        let err = cluster
            .update(&mapping, "default", "vpc-1", &body)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::VersionConflict(_)));
        assert_eq!(cluster.apply_calls(), 3);
    }

    #[tokio::test]
    async fn test_unreachable_and_rejected() {
        let cluster = InMemoryCluster::new();
        let mapping = KindRegistry::builtin().get("VPC").cloned().unwrap();

        cluster.set_unreachable(true);
        assert!(cluster.test_connection().await.unwrap_err().is_retryable());
        cluster.set_unreachable(false);

        cluster.reject_kind("VPC");
        let err = cluster
            .create(&mapping, "default", &vpc("vpc-1").to_value())
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(cluster.is_empty());
    }
}

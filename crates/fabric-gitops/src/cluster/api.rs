use async_trait::async_trait;
use serde_json::Value;

use super::error::Result;
use super::kinds::KindMapping;

/// The slice of the control-plane API the engine needs: REST-style
/// list/get/create/update on one collection per kind.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list(&self, mapping: &KindMapping, namespace: &str) -> Result<Vec<Value>>;

    /// `Ok(None)` when the resource does not exist.
    async fn get(&self, mapping: &KindMapping, namespace: &str, name: &str) -> Result<Option<Value>>;

    async fn create(&self, mapping: &KindMapping, namespace: &str, body: &Value) -> Result<Value>;

    /// `body` carries the `resourceVersion` it was based on; a stale one is
    /// rejected with a version conflict.
    async fn update(
        &self,
        mapping: &KindMapping,
        namespace: &str,
        name: &str,
        body: &Value,
    ) -> Result<Value>;

    /// Cheap credential and reachability check. Returns the server version.
    async fn test_connection(&self) -> Result<String>;
}

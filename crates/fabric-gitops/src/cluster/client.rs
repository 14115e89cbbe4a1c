use log::{debug, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::api::ClusterApi;
use super::error::{ClusterError, Result};
use super::kinds::{KindMapping, KindRegistry};
use crate::config::ClusterConfig;
use crate::model::Document;
use crate::retry::{retry_with_backoff, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    /// The cluster already holds the same content; nothing was written.
    Unchanged,
}

/// Result of [`ClusterSyncClient::apply`]: what happened and the
/// `resourceVersion` the cluster now holds for the object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub outcome: ApplyOutcome,
    pub version: Option<String>,
}

/// A normalized cluster document together with the `resourceVersion` it
/// carried before normalization stripped it.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedResource {
    pub document: Document,
    pub version: Option<String>,
}

fn resource_version(value: &Value) -> Option<String> {
    value
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Cluster Sync Client: fetches and applies normalized documents through a
/// [`ClusterApi`], retrying transient failures.
#[derive(Clone)]
pub struct ClusterSyncClient {
    api: Arc<dyn ClusterApi>,
    kinds: KindRegistry,
    namespaces: Vec<String>,
    default_namespace: String,
    retry: RetryPolicy,
}

impl ClusterSyncClient {
    /// `namespaces` are the ones fetched for every kind; empty means just
    /// the default namespace.
    pub fn new(
        api: Arc<dyn ClusterApi>,
        kinds: KindRegistry,
        namespaces: &[String],
        default_namespace: &str,
    ) -> Self {
        let namespaces = if namespaces.is_empty() {
            vec![default_namespace.to_string()]
        } else {
            namespaces.to_vec()
        };
        Self {
            api,
            kinds,
            namespaces,
            default_namespace: default_namespace.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_config(self, config: &ClusterConfig) -> Self {
        self.with_retry(RetryPolicy::new(
            config.max_retries,
            Duration::from_millis(config.retry_base_delay_ms),
        ))
    }

    pub fn kinds(&self) -> &KindRegistry {
        &self.kinds
    }

    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    /// Every cluster instance of `kind` across the configured namespaces,
    /// normalized like a document read from Git. Items that do not
    /// deserialize are skipped with a warning.
    pub async fn fetch(&self, kind: &str) -> Result<Vec<FetchedResource>> {
        let mapping = self
            .kinds
            .get(kind)
            .cloned()
            .ok_or_else(|| ClusterError::InvalidConfig(format!("no collection mapping for kind '{}'", kind)))?;

        let mut documents = Vec::new();
        for namespace in &self.namespaces {
            let items = retry_with_backoff(
                &self.retry,
                &format!("list {}/{}", mapping.plural, namespace),
                ClusterError::is_retryable,
                || self.api.list(&mapping, namespace),
            )
            .await?;

            for item in items {
                let version = resource_version(&item);
                match Document::from_value(item) {
                    Ok(document) => documents.push(FetchedResource {
                        document: document.normalized(&self.default_namespace),
                        version,
                    }),
                    Err(e) => warn!("Skipping malformed {} in {}: {}", kind, namespace, e),
                }
            }
        }

        debug!("Fetched {} {} resources", documents.len(), kind);
        Ok(documents)
    }

    /// Creates or updates `document` by identity. An update is based on the
    /// version just read, so a concurrent writer causes a version conflict,
    /// which is retried from the read.
    pub async fn apply(&self, document: &Document) -> Result<Applied> {
        let mapping = self.kinds.for_document(document);
        let namespace = document.namespace_or(&self.default_namespace).to_string();
        let desired = document.clone().normalized(&self.default_namespace);

        retry_with_backoff(
            &self.retry,
            &format!("apply {}/{}/{}", desired.kind, namespace, desired.metadata.name),
            ClusterError::is_retryable,
            || self.apply_once(&mapping, &namespace, &desired),
        )
        .await
    }

    async fn apply_once(
        &self,
        mapping: &KindMapping,
        namespace: &str,
        desired: &Document,
    ) -> Result<Applied> {
        let name = &desired.metadata.name;
        let Some(current) = self.api.get(mapping, namespace, name).await? else {
            let created = self.api.create(mapping, namespace, &desired.to_value()).await?;
            return Ok(Applied {
                outcome: ApplyOutcome::Created,
                version: resource_version(&created),
            });
        };

        let current_version = resource_version(&current);
        let current = Document::from_value(current)
            .map_err(|e| ClusterError::InvalidResponse(format!("{}/{}: {}", mapping.kind, name, e)))?;
        if current.fingerprint() == desired.fingerprint() {
            return Ok(Applied {
                outcome: ApplyOutcome::Unchanged,
                version: current_version,
            });
        }

        let mut body = desired.clone();
        body.metadata.resource_version = current_version;
        let updated = self
            .api
            .update(mapping, namespace, name, &body.to_value())
            .await?;
        Ok(Applied {
            outcome: ApplyOutcome::Updated,
            version: resource_version(&updated),
        })
    }

    pub async fn test_connection(&self) -> Result<String> {
        retry_with_backoff(
            &self.retry,
            "test connection",
            ClusterError::is_retryable,
            || self.api.test_connection(),
        )
        .await
    }
}

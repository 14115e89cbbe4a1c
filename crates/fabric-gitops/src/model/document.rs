use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::{content_hash, ResourceKey};

pub const ANNOTATION_SOURCE_FILE: &str = "gitops.githedgehog.com/source-file";
pub const ANNOTATION_INGESTED_AT: &str = "gitops.githedgehog.com/ingested-at";
pub const ANNOTATION_ORIGIN: &str = "gitops.githedgehog.com/origin";

const PROVENANCE_PREFIX: &str = "gitops.githedgehog.com/";
const LAST_APPLIED: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// A resource manifest in its normalized shape.
///
/// Deserializing through this type is itself the normalization step: server
/// managed metadata (`uid`, `generation`, `managedFields`, ...) and the
/// `status` subresource are not part of the shape and are dropped, so a
/// document fetched from the cluster and one read from Git compare equal
/// when they describe the same resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub spec: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

/// Which store a managed file was last written from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Git,
    Cluster,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Git => "git",
            Origin::Cluster => "cluster",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Origin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "git" => Ok(Origin::Git),
            "cluster" => Ok(Origin::Cluster),
            other => Err(format!("unknown origin '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Provenance {
    pub origin: Origin,
    pub source: String,
    pub ingested_at: DateTime<Utc>,
}

impl Document {
    pub fn new(api_version: &str, kind: &str, namespace: &str, name: &str, spec: Value) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: Some(namespace.to_string()),
                ..ObjectMeta::default()
            },
            spec,
        }
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// `vpc.githedgehog.com` for `vpc.githedgehog.com/v1beta1`; empty for
    /// the core group.
    pub fn group(&self) -> &str {
        self.api_version
            .split_once('/')
            .map(|(group, _)| group)
            .unwrap_or("")
    }

    pub fn version(&self) -> &str {
        self.api_version
            .split_once('/')
            .map(|(_, version)| version)
            .unwrap_or(&self.api_version)
    }

    pub fn namespace_or<'a>(&'a self, default_namespace: &'a str) -> &'a str {
        self.metadata
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(default_namespace)
    }

    pub fn key(&self, default_namespace: &str) -> ResourceKey {
        ResourceKey::new(
            &self.kind,
            self.namespace_or(default_namespace),
            &self.metadata.name,
        )
    }

    /// Fills in the namespace and drops fields that belong to a particular
    /// store rather than to the resource: the server's resource version,
    /// client-side apply bookkeeping and earlier provenance annotations.
    pub fn normalized(mut self, default_namespace: &str) -> Self {
        let namespace = self.namespace_or(default_namespace).to_string();
        self.metadata.namespace = Some(namespace);
        self.metadata.resource_version = None;
        self.metadata
            .annotations
            .retain(|k, _| k != LAST_APPLIED && !k.starts_with(PROVENANCE_PREFIX));
        self
    }

    pub fn with_provenance(mut self, provenance: &Provenance) -> Self {
        let annotations = &mut self.metadata.annotations;
        annotations.insert(
            ANNOTATION_ORIGIN.to_string(),
            provenance.origin.as_str().to_string(),
        );
        annotations.insert(
            ANNOTATION_SOURCE_FILE.to_string(),
            provenance.source.clone(),
        );
        annotations.insert(
            ANNOTATION_INGESTED_AT.to_string(),
            provenance.ingested_at.to_rfc3339(),
        );
        self
    }

    pub fn provenance(&self) -> Option<Provenance> {
        let annotations = &self.metadata.annotations;
        let origin = annotations.get(ANNOTATION_ORIGIN)?.parse().ok()?;
        let source = annotations.get(ANNOTATION_SOURCE_FILE)?.clone();
        let ingested_at = DateTime::parse_from_rfc3339(annotations.get(ANNOTATION_INGESTED_AT)?)
            .ok()?
            .with_timezone(&Utc);
        Some(Provenance {
            origin,
            source,
            ingested_at,
        })
    }

    /// The part of a document that both stores must agree on: type,
    /// labels and spec. Annotations are excluded since the cluster and our
    /// provenance bookkeeping both add their own.
    pub fn comparable(&self) -> Value {
        serde_json::json!({
            "apiVersion": self.api_version,
            "kind": self.kind,
            "labels": self.metadata.labels,
            "spec": self.spec,
        })
    }

    /// Stable hash of [`Document::comparable`]. `serde_json` maps are
    /// key-sorted so the serialization is canonical.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(&self.comparable()).unwrap_or_default();
        content_hash(&canonical)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vpc() -> Document {
        Document::new(
            "vpc.githedgehog.com/v1beta1",
            "VPC",
            "default",
            "vpc-1",
            json!({"subnets": {"default": {"subnet": "10.0.1.0/24", "vlan": 1001}}}),
        )
    }

    #[test]
    fn test_group_and_version() {
        let doc = vpc();
        assert_eq!(doc.group(), "vpc.githedgehog.com");
        assert_eq!(doc.version(), "v1beta1");

        let core = Document::new("v1", "ConfigMap", "default", "x", Value::Null);
        assert_eq!(core.group(), "");
        assert_eq!(core.version(), "v1");
    }

    #[test]
    fn test_cluster_shape_normalizes_to_git_shape() {
        let from_cluster = json!({
            "apiVersion": "vpc.githedgehog.com/v1beta1",
            "kind": "VPC",
            "metadata": {
                "name": "vpc-1",
                "namespace": "default",
                "uid": "7f1c",
                "generation": 3,
                "resourceVersion": "4711",
                "creationTimestamp": "2026-01-01T00:00:00Z",
                "managedFields": [{"manager": "kubectl"}],
                "annotations": {
                    "kubectl.kubernetes.io/last-applied-configuration": "{}"
                }
            },
            "spec": {"subnets": {"default": {"subnet": "10.0.1.0/24", "vlan": 1001}}},
            "status": {"vni": 100}
        });
        let doc = Document::from_value(from_cluster).unwrap();
        assert_eq!(doc.metadata.resource_version.as_deref(), Some("4711"));

        let normalized = doc.normalized("default");
        assert_eq!(normalized, vpc());
        assert_eq!(normalized.fingerprint(), vpc().fingerprint());
    }

    #[test]
    fn test_missing_namespace_defaults() {
        let mut doc = vpc();
        doc.metadata.namespace = None;
        assert_eq!(doc.key("fabric").namespace, "fabric");
        assert_eq!(
            doc.normalized("fabric").metadata.namespace.as_deref(),
            Some("fabric")
        );
    }

    #[test]
    fn test_fingerprint_ignores_annotations() {
        let stamped = vpc().with_provenance(&Provenance {
            origin: Origin::Git,
            source: "raw/vpcs.yaml".to_string(),
            ingested_at: Utc::now(),
        });
        assert_eq!(stamped.fingerprint(), vpc().fingerprint());

        let mut changed = vpc();
        changed.spec["subnets"]["default"]["vlan"] = json!(1002);
        assert_ne!(changed.fingerprint(), vpc().fingerprint());
    }

    #[test]
    fn test_provenance_round_trip() {
        let at = DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let provenance = Provenance {
            origin: Origin::Cluster,
            source: "cluster".to_string(),
            ingested_at: at,
        };
        let doc = vpc().with_provenance(&provenance);
        let yaml = doc.to_yaml().unwrap();
        let parsed = Document::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.provenance(), Some(provenance));
        assert!(parsed.normalized("default").provenance().is_none());
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::Document;

pub const VPC_API_GROUP: &str = "vpc.githedgehog.com";
pub const WIRING_API_GROUP: &str = "wiring.githedgehog.com";
pub const FABRIC_API_VERSION: &str = "v1beta1";

/// How a kind maps onto a control-plane collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindMapping {
    pub kind: String,
    pub group: String,
    pub version: String,
    pub plural: String,
}

impl KindMapping {
    pub fn new(kind: &str, group: &str, version: &str, plural: &str) -> Self {
        Self {
            kind: kind.to_string(),
            group: group.to_string(),
            version: version.to_string(),
            plural: plural.to_string(),
        }
    }

    pub fn api_version(&self) -> String {
        format!("{}/{}", self.group, self.version)
    }

    /// `/apis/<group>/<version>/namespaces/<ns>/<plural>`
    pub fn collection_path(&self, namespace: &str) -> String {
        format!(
            "/apis/{}/{}/namespaces/{}/{}",
            self.group, self.version, namespace, self.plural
        )
    }

    pub fn resource_path(&self, namespace: &str, name: &str) -> String {
        format!("{}/{}", self.collection_path(namespace), name)
    }
}

/// Kind to collection table: the fabric CRDs plus whatever the engine
/// config adds.
#[derive(Debug, Clone)]
pub struct KindRegistry {
    mappings: BTreeMap<String, KindMapping>,
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl KindRegistry {
    pub fn builtin() -> Self {
        let vpc = [
            ("VPC", "vpcs"),
            ("VPCAttachment", "vpcattachments"),
            ("VPCPeering", "vpcpeerings"),
            ("IPv4Namespace", "ipv4namespaces"),
            ("External", "externals"),
            ("ExternalAttachment", "externalattachments"),
            ("ExternalPeering", "externalpeerings"),
        ];
        let wiring = [
            ("Connection", "connections"),
            ("Server", "servers"),
            ("Switch", "switches"),
            ("SwitchGroup", "switchgroups"),
            ("VLANNamespace", "vlannamespaces"),
        ];

        let mappings = vpc
            .iter()
            .map(|(kind, plural)| KindMapping::new(kind, VPC_API_GROUP, FABRIC_API_VERSION, plural))
            .chain(wiring.iter().map(|(kind, plural)| {
                KindMapping::new(kind, WIRING_API_GROUP, FABRIC_API_VERSION, plural)
            }))
            .map(|m| (m.kind.clone(), m))
            .collect();

        Self { mappings }
    }

    /// Configured mappings replace built-in ones of the same kind.
    pub fn with_extra(mut self, extra: &[KindMapping]) -> Self {
        for mapping in extra {
            self.mappings.insert(mapping.kind.clone(), mapping.clone());
        }
        self
    }

    pub fn get(&self, kind: &str) -> Option<&KindMapping> {
        self.mappings.get(kind)
    }

    pub fn kinds(&self) -> Vec<String> {
        self.mappings.keys().cloned().collect()
    }

    /// The mapping for a document's kind. Kinds missing from the table use
    /// the document's own API version and a lower-cased plural.
    pub fn for_document(&self, document: &Document) -> KindMapping {
        self.get(&document.kind).cloned().unwrap_or_else(|| {
            KindMapping::new(
                &document.kind,
                document.group(),
                document.version(),
                &pluralize(&document.kind),
            )
        })
    }
}

pub fn pluralize(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') || lower.ends_with('x') || lower.ends_with("ch") || lower.ends_with("sh")
    {
        format!("{}es", lower)
    } else if let Some(stem) = lower
        .strip_suffix('y')
        .filter(|stem| !stem.ends_with(['a', 'e', 'i', 'o', 'u']))
    {
        format!("{}ies", stem)
    } else {
        format!("{}s", lower)
    }
}

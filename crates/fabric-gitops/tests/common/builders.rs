//! Manifest builders for tests.

#![allow(dead_code)]

use fabric_gitops::model::{Document, ResourceKey};
use serde_json::json;

pub const VPC_API: &str = "vpc.githedgehog.com/v1beta1";
pub const WIRING_API: &str = "wiring.githedgehog.com/v1beta1";

pub fn vpc(name: &str, subnet: &str) -> Document {
    Document::new(
        VPC_API,
        "VPC",
        "default",
        name,
        json!({ "subnets": { "default": { "subnet": subnet } } }),
    )
}

pub fn vpc_yaml(name: &str, subnet: &str) -> String {
    format!(
        "apiVersion: {}\nkind: VPC\nmetadata:\n  name: {}\nspec:\n  subnets:\n    default:\n      subnet: {}\n",
        VPC_API, name, subnet
    )
}

pub fn vpc_key(name: &str) -> ResourceKey {
    ResourceKey::new("VPC", "default", name)
}

pub fn server(name: &str, description: &str) -> Document {
    Document::new(
        WIRING_API,
        "Server",
        "default",
        name,
        json!({ "description": description, "profile": "vs" }),
    )
}

pub fn server_key(name: &str) -> ResourceKey {
    ResourceKey::new("Server", "default", name)
}

/// Joins documents into one multi-document YAML stream.
pub fn stream(documents: &[String]) -> String {
    documents.join("---\n")
}

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

use crate::model::Document;

// RFC 1123 subdomain, the naming rule the control-plane enforces.
static RE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9.]*[a-z0-9])?$").unwrap());
static RE_KIND: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Z][A-Za-z0-9]*$").unwrap());
static RE_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^v[0-9]+((alpha|beta)[0-9]+)?$").unwrap());

const MAX_NAME_LEN: usize = 253;

/// Why an input ended up in `unmanaged/`. Written into the `.reason`
/// sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InvalidYaml,
    NotAnObject,
    MissingField,
    InvalidApiVersion,
    UnrecognizedGroup,
    InvalidName,
    /// Lost an identity collision that waits for a manual decision.
    ConflictPending,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::InvalidYaml => "invalid_yaml",
            RejectReason::NotAnObject => "not_an_object",
            RejectReason::MissingField => "missing_field",
            RejectReason::InvalidApiVersion => "invalid_api_version",
            RejectReason::UnrecognizedGroup => "unrecognized_group",
            RejectReason::InvalidName => "invalid_name",
            RejectReason::ConflictPending => "conflict_pending",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub reason: RejectReason,
    pub message: String,
}

impl Rejection {
    fn new(reason: RejectReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

/// Checks the fields every managed resource needs and that its API group is
/// one we manage. `recognized_groups` are suffixes: `githedgehog.com`
/// accepts `vpc.githedgehog.com`.
pub fn validate_document(value: &Value, recognized_groups: &[String]) -> Result<Document, Rejection> {
    let Some(object) = value.as_object() else {
        return Err(Rejection::new(
            RejectReason::NotAnObject,
            "document is not a mapping",
        ));
    };

    let api_version = required_str(object.get("apiVersion"), "apiVersion")?;
    let kind = required_str(object.get("kind"), "kind")?;
    let name = required_str(
        object.get("metadata").and_then(|m| m.get("name")),
        "metadata.name",
    )?;

    let Some((group, version)) = api_version.split_once('/') else {
        return Err(Rejection::new(
            RejectReason::InvalidApiVersion,
            format!("apiVersion '{}' has no API group", api_version),
        ));
    };
    if group.is_empty() || !RE_VERSION.is_match(version) {
        return Err(Rejection::new(
            RejectReason::InvalidApiVersion,
            format!("apiVersion '{}' is not <group>/<version>", api_version),
        ));
    }
    if !is_recognized_group(group, recognized_groups) {
        return Err(Rejection::new(
            RejectReason::UnrecognizedGroup,
            format!("API group '{}' is not managed here", group),
        ));
    }

    if !RE_KIND.is_match(kind) {
        return Err(Rejection::new(
            RejectReason::InvalidName,
            format!("kind '{}' is not a valid kind name", kind),
        ));
    }
    check_name(name, "metadata.name")?;
    if let Some(namespace) = object
        .get("metadata")
        .and_then(|m| m.get("namespace"))
        .and_then(Value::as_str)
        .filter(|ns| !ns.is_empty())
    {
        check_name(namespace, "metadata.namespace")?;
    }

    Document::from_value(value.clone()).map_err(|e| {
        Rejection::new(RejectReason::MissingField, format!("malformed document: {}", e))
    })
}

pub fn is_recognized_group(group: &str, recognized_groups: &[String]) -> bool {
    recognized_groups.iter().any(|suffix| {
        group == suffix
            || group
                .strip_suffix(suffix.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

fn required_str<'a>(value: Option<&'a Value>, field: &str) -> Result<&'a str, Rejection> {
    match value.and_then(Value::as_str).map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(Rejection::new(
            RejectReason::MissingField,
            format!("{} is required", field),
        )),
    }
}

fn check_name(name: &str, field: &str) -> Result<(), Rejection> {
    if name.len() > MAX_NAME_LEN || !RE_NAME.is_match(name) {
        return Err(Rejection::new(
            RejectReason::InvalidName,
            format!("{} '{}' is not a valid resource name", field, name),
        ));
    }
    Ok(())
}

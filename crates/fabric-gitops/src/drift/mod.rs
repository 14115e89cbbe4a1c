//! Drift Detector and fabric status calculator. Both are pure functions
//! over registry state.

mod status;

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::model::{ConflictStatus, Document, DriftStatus, ManagedResource};

pub use status::{calculate_sync_status, CalculatedSyncStatus};

/// Share of differing leaves at or below which drift counts as minor.
pub const MINOR_DRIFT_THRESHOLD: f64 = 0.25;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftReport {
    pub status: DriftStatus,
    /// Differing leaves over all leaves present on either side, 0.0–1.0.
    pub score: f64,
    /// Dotted paths of the differing leaves.
    pub differences: Vec<String>,
}

impl DriftReport {
    fn none() -> Self {
        Self {
            status: DriftStatus::None,
            score: 0.0,
            differences: Vec::new(),
        }
    }
}

/// Structural diff of the desired (Git) and actual (cluster) versions of
/// one resource. Only [`Document::comparable`] content takes part, so
/// server-managed metadata and the status subresource never count as
/// drift. A resource missing on one side is major drift.
pub fn detect_drift(desired: Option<&Document>, actual: Option<&Document>) -> DriftReport {
    let (desired, actual) = match (desired, actual) {
        (None, None) => return DriftReport::none(),
        (Some(_), None) | (None, Some(_)) => {
            return DriftReport {
                status: DriftStatus::Major,
                score: 1.0,
                differences: vec![String::new()],
            }
        }
        (Some(d), Some(a)) => (d, a),
    };

    let desired = desired.comparable();
    let actual = actual.comparable();
    let mut left = BTreeMap::new();
    flatten("", &desired, &mut left);
    let mut right = BTreeMap::new();
    flatten("", &actual, &mut right);

    let mut paths: Vec<&String> = left.keys().chain(right.keys()).collect();
    paths.sort();
    paths.dedup();

    let differences: Vec<String> = paths
        .iter()
        .filter(|p| left.get(**p) != right.get(**p))
        .map(|p| p.to_string())
        .collect();

    if differences.is_empty() {
        return DriftReport::none();
    }

    let score = differences.len() as f64 / paths.len() as f64;
    let status = if score <= MINOR_DRIFT_THRESHOLD {
        DriftStatus::Minor
    } else {
        DriftStatus::Major
    };

    DriftReport {
        status,
        score,
        differences,
    }
}

fn flatten<'a>(prefix: &str, value: &'a Value, out: &mut BTreeMap<String, &'a Value>) {
    let join = |segment: &str| {
        if prefix.is_empty() {
            segment.to_string()
        } else {
            format!("{}.{}", prefix, segment)
        }
    };

    match value {
        Value::Object(map) if !map.is_empty() => {
            for (k, v) in map {
                flatten(&join(k), v, out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (i, v) in items.iter().enumerate() {
                flatten(&join(&format!("[{}]", i)), v, out);
            }
        }
        leaf => {
            out.insert(prefix.to_string(), leaf);
        }
    }
}

/// Per-fabric counts for the status surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftSummary {
    pub total: usize,
    pub in_sync: usize,
    pub minor: usize,
    pub major: usize,
    pub conflicts: usize,
}

pub fn summarize(resources: &[ManagedResource]) -> DriftSummary {
    resources.iter().fold(DriftSummary::default(), |mut summary, r| {
        summary.total += 1;
        match r.drift_status {
            DriftStatus::None => summary.in_sync += 1,
            DriftStatus::Minor => summary.minor += 1,
            DriftStatus::Major => summary.major += 1,
        }
        if r.conflict_status == ConflictStatus::Conflict {
            summary.conflicts += 1;
        }
        summary
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn server(spec: Value) -> Document {
        Document::new("wiring.githedgehog.com/v1beta1", "Server", "default", "server-01", spec)
    }

    fn base_spec() -> Value {
        json!({
            "description": "compute node",
            "profile": "vs",
            "ports": ["E1/1", "E1/2"],
            "boot": {"mac": "0c:20:12:fe:00:01", "pxe": true},
        })
    }

    #[test]
    fn test_identical_is_no_drift() {
        let report = detect_drift(Some(&server(base_spec())), Some(&server(base_spec())));
        assert_eq!(report, DriftReport::none());
    }

    #[test]
    fn test_server_fields_are_ignored() {
        let mut actual = server(base_spec());
        actual.metadata.resource_version = Some("4711".to_string());
        actual
            .metadata
            .annotations
            .insert("kubectl.kubernetes.io/last-applied-configuration".into(), "{}".into());
        let report = detect_drift(Some(&server(base_spec())), Some(&actual));
        assert_eq!(report.status, DriftStatus::None);
    }

    #[test]
    fn test_single_field_is_minor() {
        let mut spec = base_spec();
        spec["description"] = json!("storage node");
        let report = detect_drift(Some(&server(base_spec())), Some(&server(spec)));
        assert_eq!(report.status, DriftStatus::Minor);
        assert_eq!(report.differences, vec!["spec.description"]);
        assert!(report.score > 0.0 && report.score <= MINOR_DRIFT_THRESHOLD);
    }

    #[test]
    fn test_rewritten_spec_is_major() {
        let report = detect_drift(
            Some(&server(base_spec())),
            Some(&server(json!({"profile": "hw", "ports": []}))),
        );
        assert_eq!(report.status, DriftStatus::Major);
        assert!(report.score > MINOR_DRIFT_THRESHOLD);
    }

    #[test]
    fn test_missing_side_is_major() {
        let report = detect_drift(Some(&server(base_spec())), None);
        assert_eq!(report.status, DriftStatus::Major);
        assert_eq!(report.score, 1.0);
        assert_eq!(detect_drift(None, None).status, DriftStatus::None);
    }

    #[test]
    fn test_nested_and_added_fields_are_listed_in_order() {
        let mut spec = base_spec();
        spec["boot"]["pxe"] = json!(false);
        spec["rack"] = json!("r1");
        let report = detect_drift(Some(&server(base_spec())), Some(&server(spec)));
        assert_eq!(report.differences, vec!["spec.boot.pxe", "spec.rack"]);
        assert_eq!(report.status, DriftStatus::Minor);
    }

    #[test]
    fn test_array_elements_are_compared_by_position() {
        let mut spec = base_spec();
        spec["ports"] = json!(["E1/1", "E1/3"]);
        let report = detect_drift(Some(&server(base_spec())), Some(&server(spec)));
        assert_eq!(report.differences, vec!["spec.ports.[1]"]);
    }
}

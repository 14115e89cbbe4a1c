use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;

use crate::model::Fabric;

/// What a host shows for a fabric. Computed on every read and never
/// stored, so it cannot disagree with the fields it is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculatedSyncStatus {
    NotConfigured,
    Disabled,
    Error,
    NeverSynced,
    OutOfSync,
    InSync,
}

impl CalculatedSyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalculatedSyncStatus::NotConfigured => "not_configured",
            CalculatedSyncStatus::Disabled => "disabled",
            CalculatedSyncStatus::Error => "error",
            CalculatedSyncStatus::NeverSynced => "never_synced",
            CalculatedSyncStatus::OutOfSync => "out_of_sync",
            CalculatedSyncStatus::InSync => "in_sync",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            CalculatedSyncStatus::NotConfigured => "Not configured",
            CalculatedSyncStatus::Disabled => "Sync disabled",
            CalculatedSyncStatus::Error => "Error",
            CalculatedSyncStatus::NeverSynced => "Never synced",
            CalculatedSyncStatus::OutOfSync => "Out of sync",
            CalculatedSyncStatus::InSync => "In sync",
        }
    }

    pub fn is_synchronized(&self) -> bool {
        *self == CalculatedSyncStatus::InSync
    }
}

impl fmt::Display for CalculatedSyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// First match wins:
/// 1. blank cluster endpoint
/// 2. sync disabled
/// 3. non-empty sync or connection error
/// 4. never synced
/// 5. last sync older than twice the interval
/// 6. in sync
///
/// The raw `sync_status` column is never consulted.
pub fn calculate_sync_status(fabric: &Fabric, now: DateTime<Utc>) -> CalculatedSyncStatus {
    if !fabric.has_endpoint() {
        return CalculatedSyncStatus::NotConfigured;
    }
    if !fabric.sync_enabled {
        return CalculatedSyncStatus::Disabled;
    }
    if fabric.has_error() {
        return CalculatedSyncStatus::Error;
    }
    let Some(last_sync) = fabric.last_sync else {
        return CalculatedSyncStatus::NeverSynced;
    };

    let interval = Duration::seconds(fabric.sync_interval_secs.min(i64::MAX as u64 / 2) as i64);
    if now.signed_duration_since(last_sync) > interval * 2 {
        CalculatedSyncStatus::OutOfSync
    } else {
        CalculatedSyncStatus::InSync
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ClusterEndpoint;

    fn configured() -> Fabric {
        Fabric::new("lab").with_cluster(ClusterEndpoint {
            endpoint: "https://10.0.0.1:6443".to_string(),
            ..ClusterEndpoint::default()
        })
    }

    #[test]
    fn test_blank_endpoint_wins_over_everything() {
        let now = Utc::now();
        for endpoint in ["", "   "] {
            let mut fabric = configured();
            fabric.cluster.endpoint = endpoint.to_string();
            fabric.sync_status = "synced".to_string();
            fabric.last_sync = Some(now);
            fabric.sync_enabled = false;
            fabric.sync_error = Some("boom".to_string());
            assert_eq!(
                calculate_sync_status(&fabric, now),
                CalculatedSyncStatus::NotConfigured
            );
        }
    }

    #[test]
    fn test_priority_order() {
        let now = Utc::now();
        let mut fabric = configured();
        fabric.sync_enabled = false;
        fabric.connection_error = Some("refused".to_string());
        assert_eq!(calculate_sync_status(&fabric, now), CalculatedSyncStatus::Disabled);

        fabric.sync_enabled = true;
        assert_eq!(calculate_sync_status(&fabric, now), CalculatedSyncStatus::Error);

        fabric.connection_error = Some(String::new());
        assert_eq!(calculate_sync_status(&fabric, now), CalculatedSyncStatus::NeverSynced);
    }

    #[test]
    fn test_out_of_sync_after_two_intervals() {
        let now = Utc::now();
        let mut fabric = configured();
        fabric.sync_interval_secs = 60;

        fabric.last_sync = Some(now - Duration::seconds(120));
        assert_eq!(calculate_sync_status(&fabric, now), CalculatedSyncStatus::InSync);

        fabric.last_sync = Some(now - Duration::seconds(121));
        assert_eq!(calculate_sync_status(&fabric, now), CalculatedSyncStatus::OutOfSync);
    }

    #[test]
    fn test_raw_status_is_ignored() {
        let now = Utc::now();
        let mut fabric = configured();
        fabric.sync_status = "synced".to_string();
        assert_eq!(calculate_sync_status(&fabric, now), CalculatedSyncStatus::NeverSynced);
        assert!(!calculate_sync_status(&fabric, now).is_synchronized());
    }

    #[test]
    fn test_display_strings() {
        assert_eq!(CalculatedSyncStatus::NotConfigured.to_string(), "Not configured");
        assert_eq!(CalculatedSyncStatus::InSync.as_str(), "in_sync");
    }
}

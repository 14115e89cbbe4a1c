//! Per-resource reconciliation decision.
//!
//! The decision only looks at the registry row: the fingerprints of both
//! sides and the pair recorded the last time they converged. Nothing is
//! ever deleted from the cluster; a side that disappears after convergence
//! leaves the resource detached until it reappears or both sides are gone.

use crate::model::{ManagedResource, SyncDirection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Both sides agree with each other and with the recorded baseline.
    Noop,
    /// Both sides agree but the baseline is missing or stale.
    Converged,
    /// Push the Git document to the cluster.
    Apply,
    /// Write the cluster document into `managed/`. `conflict` is set when
    /// both sides changed since the last convergence.
    WriteBack { conflict: bool },
    /// One side disappeared after convergence and the other did not move.
    Detached,
    /// Absent from both sides.
    Orphan,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Noop => "noop",
            Action::Converged => "converged",
            Action::Apply => "apply",
            Action::WriteBack { conflict: false } => "write_back",
            Action::WriteBack { conflict: true } => "write_back_conflict",
            Action::Detached => "detached",
            Action::Orphan => "orphan",
        }
    }
}

pub fn decide(resource: &ManagedResource) -> Action {
    let desired = resource.desired_hash.as_deref();
    let actual = resource.actual_hash.as_deref();

    match (desired, actual) {
        (None, None) => Action::Orphan,
        (Some(_), None) => {
            if resource.synced_actual_hash.is_some() && !resource.git_changed() {
                Action::Detached
            } else {
                Action::Apply
            }
        }
        (None, Some(_)) => {
            if resource.synced_desired_hash.is_some() && !resource.cluster_changed() {
                Action::Detached
            } else {
                Action::WriteBack { conflict: false }
            }
        }
        (Some(d), Some(a)) if d == a => {
            if resource.synced_desired_hash.as_deref() == Some(d)
                && resource.synced_actual_hash.as_deref() == Some(a)
            {
                Action::Noop
            } else {
                Action::Converged
            }
        }
        (Some(_), Some(_)) => {
            let has_baseline =
                resource.synced_desired_hash.is_some() || resource.synced_actual_hash.is_some();
            if !has_baseline {
                return by_direction(resource.sync_direction, true);
            }
            match (resource.git_changed(), resource.cluster_changed()) {
                (true, true) => Action::WriteBack { conflict: true },
                (true, false) => {
                    if resource.sync_direction == SyncDirection::ClusterToGit {
                        Action::WriteBack { conflict: false }
                    } else {
                        Action::Apply
                    }
                }
                (false, true) => {
                    if resource.sync_direction == SyncDirection::GitToCluster {
                        Action::Apply
                    } else {
                        Action::WriteBack { conflict: false }
                    }
                }
                // diverged at the last pass already, e.g. a failed apply
                (false, false) => by_direction(resource.sync_direction, false),
            }
        }
    }
}

/// Resolution when there is no usable baseline to tell which side moved.
fn by_direction(direction: SyncDirection, first_contact: bool) -> Action {
    match direction {
        SyncDirection::GitToCluster => Action::Apply,
        SyncDirection::ClusterToGit => Action::WriteBack { conflict: false },
        SyncDirection::Bidirectional => Action::WriteBack {
            conflict: first_contact,
        },
    }
}

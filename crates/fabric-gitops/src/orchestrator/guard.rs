//! Per-fabric in-flight markers.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Fabrics with a sync in progress. At most one sync per fabric holds a
/// [`SyncPermit`] at any time.
#[derive(Clone, Default)]
pub struct InFlightSet {
    fabrics: Arc<Mutex<HashSet<String>>>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `fabric_id` as syncing. Returns `None` when it already is.
    pub fn try_acquire(&self, fabric_id: &str) -> Option<SyncPermit> {
        let mut fabrics = self.fabrics.lock().unwrap_or_else(|e| e.into_inner());
        if !fabrics.insert(fabric_id.to_string()) {
            return None;
        }
        Some(SyncPermit {
            fabric_id: fabric_id.to_string(),
            fabrics: Arc::clone(&self.fabrics),
        })
    }

    pub fn contains(&self, fabric_id: &str) -> bool {
        self.fabrics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(fabric_id)
    }

    pub fn len(&self) -> usize {
        self.fabrics.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Proof that the holder is the only sync running for a fabric. The marker
/// is cleared on drop, so a failed or panicking sync releases it too.
#[derive(Debug)]
pub struct SyncPermit {
    fabric_id: String,
    fabrics: Arc<Mutex<HashSet<String>>>,
}

impl SyncPermit {
    pub fn fabric_id(&self) -> &str {
        &self.fabric_id
    }
}

impl Drop for SyncPermit {
    fn drop(&mut self) {
        let mut fabrics = self.fabrics.lock().unwrap_or_else(|e| e.into_inner());
        fabrics.remove(&self.fabric_id);
    }
}

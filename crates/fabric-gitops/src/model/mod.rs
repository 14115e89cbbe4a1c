//! Core data model shared by every stage of a sync pass.

mod document;
mod fabric;
mod operation;
mod resource;

use sha2::{Digest, Sha256};
use std::fmt::Write;

pub use document::{
    Document, ObjectMeta, Origin, Provenance, ANNOTATION_INGESTED_AT, ANNOTATION_ORIGIN,
    ANNOTATION_SOURCE_FILE,
};
pub use fabric::{ClusterEndpoint, Fabric, GitAuth, GitAuthType, GitRepositoryConfig};
pub use operation::{KindCounts, SyncCounts, SyncOperation, SyncOutcome, SyncTrigger};
pub use resource::{
    ConflictStatus, DriftStatus, ManagedResource, ResourceKey, StateChange, SyncDirection,
};

/// Lower-case hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .fold(String::with_capacity(64), |mut out, b| {
            let _ = write!(out, "{:02x}", b);
            out
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_hex_sha256() {
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(content_hash(b"spec").len(), 64);
    }
}

//! The fabric GitOps directory and the Git working copy behind it.

pub mod error;
pub mod git;
pub mod layout;
pub mod lock;
pub mod manager;
pub mod provenance;

pub use error::{GitOpsError, Result};
pub use git::{CommitResult, GitRepository, GitSettings, GitStatus, PullResult};
pub use layout::{FabricLayout, ManagedFile};
pub use lock::ProcessingLock;
pub use manager::GitDirectoryManager;
pub use provenance::{ArchiveLogEntry, ManifestEntry, MoveAction, ProvenanceManifest};

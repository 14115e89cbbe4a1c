use thiserror::Error;

use crate::conflict::ExcessiveConflicts;
use crate::error::ErrorKind;
use crate::gitops::GitOpsError;

/// Batch-level ingestion failures. Problems with a single file or document
/// are routed to `unmanaged/` and reported, never raised.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Directory(#[from] GitOpsError),

    #[error(transparent)]
    ExcessiveConflicts(#[from] ExcessiveConflicts),
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Directory(e) => e.kind(),
            IngestError::ExcessiveConflicts(_) => ErrorKind::Conflict,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

//! File Ingestion Engine: scan `raw/`, parse, validate, normalize and
//! route every document to `managed/` or `unmanaged/`.

mod engine;
mod error;
mod parser;
mod scanner;
mod validate;

pub use engine::{IngestionEngine, IngestionReport, KnownResource, ReasonRecord, RejectionSummary};
pub use error::{IngestError, Result};
pub use parser::parse_stream;
pub use scanner::{scan, RawFile};
pub use validate::{is_recognized_group, validate_document, RejectReason, Rejection};

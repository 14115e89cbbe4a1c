use thiserror::Error;

use crate::error::ErrorKind;
use crate::secrets::SecretError;

/// Response bodies are cut to this length before they reach an error
/// message or a log line.
const MAX_ERROR_BODY_LENGTH: usize = 200;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Cluster endpoint is not configured")]
    NotConfigured,

    #[error("Invalid cluster configuration: {0}")]
    InvalidConfig(String),

    #[error("Cluster credentials rejected ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("Cluster request timed out: {0}")]
    Timeout(String),

    #[error("Cannot reach cluster: {0}")]
    Connection(String),

    #[error("Cluster unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("Resource version conflict: {0}")]
    VersionConflict(String),

    #[error("Cluster rejected {resource} ({status}): {message}")]
    Rejected {
        resource: String,
        status: u16,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid response from cluster: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Secret(#[from] SecretError),
}

impl ClusterError {
    /// Timeouts, refused connections, 5xx/429 and optimistic-concurrency
    /// conflicts. Everything else fails the same way on a second try.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClusterError::Timeout(_)
                | ClusterError::Connection(_)
                | ClusterError::Unavailable { .. }
                | ClusterError::VersionConflict(_)
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ClusterError::NotConfigured
            | ClusterError::InvalidConfig(_)
            | ClusterError::Unauthorized { .. }
            | ClusterError::Secret(_) => ErrorKind::Configuration,
            ClusterError::Timeout(_)
            | ClusterError::Connection(_)
            | ClusterError::Unavailable { .. } => ErrorKind::TransientNetwork,
            ClusterError::VersionConflict(_) => ErrorKind::Conflict,
            ClusterError::Rejected { .. } | ClusterError::InvalidResponse(_) => {
                ErrorKind::Validation
            }
            ClusterError::NotFound(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error, resource: &str) -> Self {
        if err.is_timeout() {
            ClusterError::Timeout(resource.to_string())
        } else if err.is_decode() {
            ClusterError::InvalidResponse(format!("{}: {}", resource, err))
        } else if err.is_builder() {
            ClusterError::InvalidConfig(err.to_string())
        } else {
            // connect failures and broken connections alike
            ClusterError::Connection(format!("{}: {}", resource, err))
        }
    }
}

/// Maps a non-success HTTP status onto an error variant.
pub fn classify_status(status: u16, resource: &str, body: &str) -> ClusterError {
    let message = truncate_body(body);
    match status {
        401 | 403 => ClusterError::Unauthorized { status, message },
        404 => ClusterError::NotFound(resource.to_string()),
        409 => ClusterError::VersionConflict(resource.to_string()),
        408 | 429 | 500..=599 => ClusterError::Unavailable { status, message },
        _ => ClusterError::Rejected {
            resource: resource.to_string(),
            status,
            message,
        },
    }
}

fn truncate_body(body: &str) -> String {
    let body = body.trim();
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &body[..end])
}

pub type Result<T> = std::result::Result<T, ClusterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(401, "VPC/default/vpc-1", ""),
            ClusterError::Unauthorized { status: 401, .. }
        ));
        assert!(classify_status(503, "vpcs", "overloaded").is_retryable());
        assert!(classify_status(429, "vpcs", "").is_retryable());
        assert!(classify_status(409, "VPC/default/vpc-1", "").is_retryable());

        let rejected = classify_status(422, "VPC/default/vpc-1", "spec.subnets: Invalid value");
        assert!(!rejected.is_retryable());
        assert_eq!(rejected.kind(), ErrorKind::Validation);
        assert!(rejected.to_string().contains("spec.subnets"));
    }

    #[test]
    fn test_kinds() {
        assert_eq!(ClusterError::NotConfigured.kind(), ErrorKind::Configuration);
        assert_eq!(
            ClusterError::Timeout("vpcs".into()).kind(),
            ErrorKind::TransientNetwork
        );
        assert!(!ClusterError::NotConfigured.is_retryable());
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "é".repeat(300);
        let err = classify_status(400, "vpcs", &body);
        let text = err.to_string();
        assert!(text.ends_with("... (truncated)"));
        assert!(text.len() < 300);
    }
}

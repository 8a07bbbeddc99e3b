//! Error types for datastore, target and schema operations.

use thiserror::Error;

use crate::tree::TreeError;

/// Southbound target failures.
#[derive(Debug, Error)]
pub enum TargetError {
    /// Bad endpoint, credentials or other target configuration.
    #[error("invalid target config: {0}")]
    InvalidConfig(String),

    /// Could not establish or keep the transport.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// The target answered an RPC with an error status.
    #[error("rpc failed: {0}")]
    Rpc(#[from] tonic::Status),

    /// A value or path could not be converted to or from the wire form.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// The subscription stream ended or could not be opened.
    #[error("subscription failed: {0}")]
    Subscription(String),
}

/// Remote schema classification failures.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema lookup failed: {0}")]
    Lookup(#[from] tonic::Status),

    #[error("schema server returned no schema for {0}")]
    Empty(String),

    #[error("invalid schema server address: {0}")]
    InvalidAddress(String),
}

/// Errors returned by datastore operations.
#[derive(Debug, Error)]
pub enum DatastoreError {
    #[error("missing candidate name")]
    MissingName,

    #[error("unknown candidate name {0:?}")]
    CandidateNotFound(String),

    #[error("candidate {0:?} already exists")]
    CandidateExists(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The datastore was stopped before the operation could complete.
    #[error("datastore stopped")]
    Stopped,

    #[error(transparent)]
    Target(#[from] TargetError),

    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Result type for datastore operations.
pub type Result<T> = std::result::Result<T, DatastoreError>;

impl DatastoreError {
    /// Returns true if this error was caused by the caller's input.
    ///
    /// Such errors are returned as-is: they are never retried and never
    /// logged as system failures.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            DatastoreError::MissingName
                | DatastoreError::CandidateNotFound(_)
                | DatastoreError::CandidateExists(_)
                | DatastoreError::InvalidArgument(_)
                | DatastoreError::Tree(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DatastoreError::CandidateNotFound("c1".to_string());
        assert!(err.to_string().contains("unknown candidate name"));
        assert!(err.to_string().contains("c1"));

        let err = DatastoreError::Target(TargetError::Rpc(tonic::Status::unavailable("down")));
        assert!(err.to_string().contains("down"));
    }

    #[test]
    fn test_caller_errors() {
        assert!(DatastoreError::MissingName.is_caller_error());
        assert!(DatastoreError::CandidateNotFound("x".into()).is_caller_error());
        assert!(DatastoreError::CandidateExists("x".into()).is_caller_error());
        assert!(!DatastoreError::Stopped.is_caller_error());
        assert!(
            !DatastoreError::Target(TargetError::Subscription("eof".into())).is_caller_error()
        );
    }
}

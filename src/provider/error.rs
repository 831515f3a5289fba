//! Errors surfaced by the flow persistence provider.

use thiserror::Error;

use crate::index::{LookupError, MetadataError};
use crate::provider::config::ConfigError;
use crate::storage::{BucketId, CommitId, FlowId, StorageError};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// writing the bucket record failed
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("version {version} of flow {flow_id} in bucket {bucket_id} already exists")]
    VersionAlreadyExists {
        bucket_id: BucketId,
        flow_id: FlowId,
        version: u32,
    },

    #[error("invalid flow version {0}: versions start at 1")]
    InvalidVersion(u32),

    /// another flow in the bucket already stores its content in this file
    #[error("file '{file_name}' in bucket {bucket_id} already belongs to flow {existing}")]
    FileInUse {
        bucket_id: BucketId,
        file_name: String,
        existing: FlowId,
    },

    /// the operation needs a remote and none is configured
    #[error("no remote is configured")]
    RemoteNotConfigured,

    /// a target directory for a bucket is already used by another bucket
    #[error("directory '{dir_name}' already holds bucket {existing}")]
    DirectoryInUse { dir_name: String, existing: BucketId },

    /// the commit was made locally but the push failed; retrying the push
    /// later is safe
    #[error("committed locally as {commit} but push failed: {source}")]
    PushFailed {
        commit: CommitId,
        #[source]
        source: StorageError,
    },

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
}

impl ProviderError {
    /// bucket, flow or version does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            ProviderError::Lookup(_) => true,
            ProviderError::Storage(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// the caller can retry the same operation (or the push) later
    pub fn is_retriable(&self) -> bool {
        match self {
            ProviderError::PushFailed { .. } => true,
            ProviderError::Storage(e) => e.is_retriable(),
            _ => false,
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_classification() {
        let not_found = ProviderError::from(LookupError::BucketNotFound {
            bucket_id: BucketId::new("b1").unwrap(),
        });
        assert!(not_found.is_not_found());
        assert!(!not_found.is_retriable());

        let push = ProviderError::PushFailed {
            commit: CommitId::from_hex("0123456789abcdef0123456789abcdef01234567").unwrap(),
            source: StorageError::PushRejected { remote: "origin".into(), reason: "non-fast-forward".into() },
        };
        assert!(push.is_retriable());
        assert!(push.to_string().contains("0123456789abcdef"));

        let dirty = ProviderError::from(StorageError::DirtyWorkingTree { paths: vec![PathBuf::from("x")] });
        assert!(!dirty.is_retriable());
        assert!(!dirty.is_not_found());

        assert!(!ProviderError::Unsupported("delete single version").is_retriable());
    }

    #[test]
    fn test_lookup_message_passes_through() {
        let err = ProviderError::from(LookupError::BucketNotFound {
            bucket_id: BucketId::new("b9").unwrap(),
        });
        assert_eq!(err.to_string(), "bucket not found: b9");
    }
}

//! Storage layer error types
//!
//! All errors that can occur while talking to the repository are defined here.
//! We use `thiserror` for ergonomic error definition and better error messages

use std::path::PathBuf;

use thiserror::Error;

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// error from the underlying Git library
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// the storage path exists but is not a directory
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// the storage path is not a git working directory
    #[error("repository not initialized: {0}")]
    NotInitialized(PathBuf),

    /// the repository has no working directory
    #[error("bare repository cannot hold flow content: {0}")]
    BareRepository(PathBuf),

    /// HEAD does not point at a branch
    #[error("HEAD is detached; a checked-out branch is required")]
    DetachedHead,

    /// repo is empty (no commits)
    #[error("repository is empty: no commits found")]
    EmptyRepository,

    /// the commit was not found
    #[error("commit not found: {0}")]
    CommitNotFound(String),

    /// the blob was not found in the object database
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// the working tree has changes not made through this provider
    #[error("working tree is not clean: {}", paths_display(.paths))]
    DirtyWorkingTree { paths: Vec<PathBuf> },

    /// a bucket directory could not be moved to its new name
    #[error("failed to rename {from} to {to}: {source}")]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// merge conflict detected while merging remote changes
    #[error("merge conflict: {}", paths_display(.conflicting_paths))]
    MergeConflict { conflicting_paths: Vec<PathBuf> },

    /// the named remote does not exist in the repository config
    #[error("remote not found: {0}")]
    RemoteNotFound(String),

    /// network or transport failure while talking to a remote
    #[error("{operation} to remote '{remote}' failed: {source}")]
    Remote {
        operation: &'static str,
        remote: String,
        #[source]
        source: git2::Error,
    },

    /// the remote refused a pushed ref
    #[error("push to remote '{remote}' rejected: {reason}")]
    PushRejected { remote: String, reason: String },

    /// data integrity check failed
    #[error("corrupted data at {path}: {reason}")]
    CorruptedData { path: PathBuf, reason: String },

    /// internal error that shouldn't happen
    #[error("internal error: {0}")]
    Internal(String),
}

fn paths_display(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl StorageError {
    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::CommitNotFound(_)
                | StorageError::BlobNotFound(_)
                | StorageError::RemoteNotFound(_)
        )
    }

    /// check if this error is a conflict with state outside our control
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::DirtyWorkingTree { .. }
                | StorageError::MergeConflict { .. }
                | StorageError::PushRejected { .. }
        )
    }

    /// check if this error is recoverable by retry
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            StorageError::Remote { .. } | StorageError::PushRejected { .. }
        )
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let not_found = StorageError::BlobNotFound("abc".to_string());
        assert!(not_found.is_not_found());
        assert!(!not_found.is_conflict());

        let dirty = StorageError::DirtyWorkingTree {
            paths: vec![PathBuf::from("bucket/flow.snapshot")],
        };
        assert!(!dirty.is_not_found());
        assert!(dirty.is_conflict());
        assert!(!dirty.is_retriable());

        let push = StorageError::Remote {
            operation: "push",
            remote: "origin".to_string(),
            source: git2::Error::from_str("connection refused"),
        };
        assert!(push.is_retriable());
    }

    #[test]
    fn test_dirty_message_lists_paths() {
        let dirty = StorageError::DirtyWorkingTree {
            paths: vec![PathBuf::from("a/bucket.yml"), PathBuf::from("stray.txt")],
        };
        assert_eq!(
            dirty.to_string(),
            "working tree is not clean: a/bucket.yml, stray.txt"
        );
    }
}

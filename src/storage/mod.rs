//! storage layer for flowgit
//!
//! this module provides the abstraction over git that the index builder and
//! the flow provider use. Git operations are implemented here with git2.
//!
//!  # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     GitRepository                           │
//! │  (open/validate, status, commit, replay, read, sync)        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │    tree     │       │    blob     │       │   remote    │
//!  │ (classify)  │       │ (snapshots) │       │ (push/pull) │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//!         │                     │                     │
//!         └─────────────────────┼─────────────────────┘
//!                               │
//!                               ▼
//!                 ┌───────────────────────────┐
//!                 │   commit  +  refs         │
//!                 │ (history, HEAD, branches) │
//!                 └───────────────────────────┘
//!  ```
//!
//! # Usage
//!
//! ```ignore
//! use flowgit::storage::GitRepository;
//!
//! // Open an existing working directory (never initializes one)
//! let repo = GitRepository::open("./flow_storage")?;
//!
//! // Commit whatever the working tree holds now
//! repo.ensure_clean()?;
//! std::fs::write("./flow_storage/Bucket/Flow.snapshot", b"...")?;
//! let commit = repo.commit_all(Some("alice"), "first version")?;
//!
//! // Read content back by object id
//! let blob = repo.blob_id_at(commit, "Bucket/Flow.snapshot")?.unwrap();
//! let bytes = repo.read_blob(blob)?;
//! ```

mod blob;
mod commit;
mod error;
mod refs;
mod remote;
mod repository;
mod tree;
mod types;

// Re-export public API
pub use blob::BlobMetadata;
pub use commit::{CommitInfo, CommitMessage};
pub use error::{StorageError, StorageResult};
pub use remote::{MergeOutcome, RemoteCredentials};
pub use repository::GitRepository;
pub use tree::{CommitSnapshot, RecordBlob};
pub use types::{
    bucket_dir_name, sanitize_file_name, snapshot_file_name, BlobId, BranchName, BucketId,
    CommitId, FlowId, GitSignature, InvalidNameError, TreeId, BUCKET_METADATA_FILE,
    SNAPSHOT_SUFFIX,
};

// Re-export for internal use by other modules
pub(crate) use remote::RemoteManager;
pub(crate) use repository::remove_file_if_exists;

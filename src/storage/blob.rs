//! Blob operations for snapshot content.
//!
//! Snapshot bytes are opaque to the storage layer: they are written to the
//! working tree and staged like any file, and read back straight from the
//! object database by oid, which never depends on the working tree.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::BlobId;

/// read a blob's content from the repository
pub fn read_blob(repo: &git2::Repository, blob_id: BlobId) -> StorageResult<Vec<u8>> {
    let blob = repo.find_blob(blob_id.raw()).map_err(|e| {
        if e.code() == git2::ErrorCode::NotFound {
            StorageError::BlobNotFound(blob_id.to_string())
        } else {
            StorageError::Git(e)
        }
    })?;
    Ok(blob.content().to_vec())
}

/// metadata about a blob without reading its full content
#[derive(Debug, Clone)]
pub struct BlobMetadata {
    pub id: BlobId,
    pub size: usize,
}

impl BlobMetadata {
    /// get the metadata for a blob
    pub fn lookup(repo: &git2::Repository, blob_id: BlobId) -> StorageResult<Self> {
        let blob = repo
            .find_blob(blob_id.raw())
            .map_err(|_| StorageError::BlobNotFound(blob_id.to_string()))?;
        Ok(Self {
            id: BlobId::new(blob.id()),
            size: blob.size(),
        })
    }
}

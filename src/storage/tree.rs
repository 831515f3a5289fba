//!  tree operations for bucket and snapshot discovery.
//!
//! in Git, a tree is a directory. Here:
//! - the root tree contains one directory per bucket
//! - each bucket directory holds a `bucket.yml` metadata record
//!   and one `<flow>.snapshot` blob per flow
//!
//! the index builder needs, for every commit it replays, the full set of
//! metadata records and snapshot blobs in that commit's tree. This module
//! produces that view without touching the working directory.

use std::collections::HashMap;
use std::path::Path;

use git2::{ObjectType, Repository, Tree, TreeWalkMode, TreeWalkResult};

use crate::storage::blob;
use crate::storage::commit::CommitInfo;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BlobId, CommitId, BUCKET_METADATA_FILE, SNAPSHOT_SUFFIX};

/// A read only handle to a git tree at a specific commit
///
/// think of it as a snapshot - it won't change even if new commits are made.
pub struct TreeHandle<'repo> {
    tree: Tree<'repo>,
}

impl<'repo> TreeHandle<'repo> {
    /// create a TreeHandle from a git2::Tree
    pub(crate) fn new(tree: Tree<'repo>) -> Self {
        Self { tree }
    }

    /// load the tree of a commit
    pub fn at_commit(repo: &'repo Repository, commit_id: CommitId) -> StorageResult<Self> {
        let commit = repo
            .find_commit(commit_id.raw())
            .map_err(|_| StorageError::CommitNotFound(commit_id.to_string()))?;
        Ok(Self::new(commit.tree()?))
    }

    /// blob id of the file at a slash-separated path, if it exists and is a file
    pub fn blob_id_at(&self, path: &str) -> StorageResult<Option<BlobId>> {
        let entry = match self.tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Git(e)),
        };

        if entry.kind() != Some(ObjectType::Blob) {
            return Ok(None);
        }
        Ok(Some(BlobId::new(entry.id())))
    }

    /// walk the whole tree and classify files by name.
    ///
    /// only `bucket.yml` files sitting directly in a top-level directory count
    /// as metadata records; snapshot files are collected wherever they are, keyed
    /// by their full path.
    pub fn classify(&self) -> StorageResult<TreeContents> {
        let mut records = Vec::new();
        let mut snapshots = HashMap::new();

        self.tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() != Some(ObjectType::Blob) {
                return TreeWalkResult::Ok;
            }
            let Some(name) = entry.name() else {
                return TreeWalkResult::Ok;
            };

            if name == BUCKET_METADATA_FILE {
                let dir = root.trim_end_matches('/');
                if !dir.is_empty() && !dir.contains('/') {
                    records.push((dir.to_string(), BlobId::new(entry.id())));
                }
            } else if name.ends_with(SNAPSHOT_SUFFIX) {
                snapshots.insert(format!("{}{}", root, name), BlobId::new(entry.id()));
            }
            TreeWalkResult::Ok
        })?;

        Ok(TreeContents { records, snapshots })
    }
}

/// classified contents of one tree
#[derive(Debug, Clone, Default)]
pub struct TreeContents {
    /// (bucket directory, blob id of its `bucket.yml`)
    pub records: Vec<(String, BlobId)>,
    /// snapshot path (`dir/file.snapshot`) -> blob id
    pub snapshots: HashMap<String, BlobId>,
}

/// A bucket metadata record as found in one commit.
#[derive(Debug, Clone)]
pub struct RecordBlob {
    pub dir_name: String,
    pub content: Vec<u8>,
}

/// Everything the index builder needs to know about one commit.
#[derive(Debug, Clone)]
pub struct CommitSnapshot {
    pub commit_id: CommitId,
    pub parent_ids: Vec<CommitId>,
    pub records: Vec<RecordBlob>,
    pub snapshots: HashMap<String, BlobId>,
}

impl CommitSnapshot {
    /// read the metadata records and snapshot locations of a commit's tree
    pub fn load(repo: &Repository, commit: &CommitInfo) -> StorageResult<Self> {
        let tree = TreeHandle::new(repo.find_tree(commit.tree_id.raw())?);
        let contents = tree.classify()?;

        let records = contents
            .records
            .into_iter()
            .map(|(dir_name, id)| {
                Ok(RecordBlob {
                    dir_name,
                    content: blob::read_blob(repo, id)?,
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;

        Ok(Self {
            commit_id: commit.id,
            parent_ids: commit.parent_ids.clone(),
            records,
            snapshots: contents.snapshots,
        })
    }

    /// blob id of `<dir>/<file>` in this commit
    pub fn snapshot_blob(&self, dir_name: &str, file_name: &str) -> Option<BlobId> {
        self.snapshots.get(&format!("{}/{}", dir_name, file_name)).copied()
    }
}

//!   Core Git repository wrapper.
//!
//!  This is the central component of the storage layer. It wraps
//!  `git2::Repository` with thread-safe access and provides the operations
//!  the flow provider needs: working-tree status, staging and committing,
//!  history replay, content-addressed reads and remote synchronization.
//!
//!  Two handles to the same repository are kept. Everything that looks at
//!  refs or the working tree goes through the writer; blob reads by oid go
//!  through the reader, so a slow commit or push never blocks a reader.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::{IndexAddOption, Repository, Status, StatusOptions};
use parking_lot::Mutex;
use tracing::debug;

use crate::storage::blob::{self, BlobMetadata};
use crate::storage::commit::{self, CommitInfo, NewCommit};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::refs::RefManager;
use crate::storage::remote::{MergeOutcome, RemoteCredentials, RemoteManager};
use crate::storage::tree::{CommitSnapshot, TreeHandle};
use crate::storage::types::{BlobId, BranchName, CommitId, GitSignature, TreeId};

/// The main Git repository wrapper.
///
/// Clone this to share across threads - it uses Arc internally.
#[derive(Clone)]
pub struct GitRepository {
    inner: Arc<GitRepositoryInner>,
}

struct GitRepositoryInner {
    writer: Mutex<Repository>,
    reader: Mutex<Repository>,
    path: PathBuf,
    signature: GitSignature,
}

impl GitRepository {
    /// Open an existing, non-bare working directory.
    ///
    /// Never initializes a repository: the directory must already be one.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();

        let meta = fs::metadata(path)?;
        if !meta.is_dir() {
            return Err(StorageError::NotADirectory(path.to_path_buf()));
        }
        // surfaces permission problems as io errors before libgit2 does
        fs::read_dir(path)?;

        let writer = Self::open_handle(path)?;
        let reader = Self::open_handle(path)?;

        let signature = match writer.signature() {
            Ok(sig) => GitSignature::new(
                sig.name().unwrap_or("flowgit"),
                sig.email().unwrap_or("flowgit@localhost"),
            ),
            Err(_) => GitSignature::flowgit(),
        };

        Ok(Self {
            inner: Arc::new(GitRepositoryInner {
                writer: Mutex::new(writer),
                reader: Mutex::new(reader),
                path: path.to_path_buf(),
                signature,
            }),
        })
    }

    /// open one libgit2 handle, rejecting anything but a working directory
    /// whose root is `path`
    pub(crate) fn open_handle(path: &Path) -> StorageResult<Repository> {
        let repo = Repository::open(path).map_err(|_| StorageError::NotInitialized(path.to_path_buf()))?;
        if repo.is_bare() || repo.workdir().is_none() {
            return Err(StorageError::BareRepository(path.to_path_buf()));
        }
        Ok(repo)
    }

    /// Get the repository path.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// The repository's configured identity (or the built-in default).
    pub fn signature(&self) -> &GitSignature {
        &self.inner.signature
    }

    /// Execute a function with the reader handle.
    pub fn with_repo<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Repository) -> StorageResult<T>,
    {
        let repo = self.inner.reader.lock();
        f(&repo)
    }

    /// Execute a function with the writer handle.
    pub fn with_repo_mut<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Repository) -> StorageResult<T>,
    {
        let repo = self.inner.writer.lock();
        f(&repo)
    }

    // ==================== Queries ====================

    /// Get the current HEAD commit, `None` for a repository without commits.
    pub fn head(&self) -> StorageResult<Option<CommitId>> {
        self.with_repo_mut(|repo| RefManager::head_commit_opt(repo))
    }

    /// The checked-out branch.
    pub fn current_branch(&self) -> StorageResult<BranchName> {
        self.with_repo_mut(|repo| RefManager::current_branch(repo))
    }

    /// Get information about a commit.
    pub fn get_commit(&self, id: CommitId) -> StorageResult<CommitInfo> {
        self.with_repo(|repo| commit::get_commit(repo, id))
    }

    /// Get commit history from HEAD, newest first.
    pub fn history(&self, limit: Option<usize>) -> StorageResult<Vec<CommitInfo>> {
        self.with_repo_mut(|repo| {
            let walk = commit::walk_head(repo)?;
            walk.take(limit.unwrap_or(usize::MAX)).collect()
        })
    }

    /// Feed the history from HEAD backwards, one classified commit at a time,
    /// into `f`. Commits are only loaded as `f` pulls them.
    pub fn replay_history<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&mut dyn Iterator<Item = StorageResult<CommitSnapshot>>) -> StorageResult<T>,
    {
        self.with_repo_mut(|repo| {
            let walk = commit::walk_head(repo)?;
            let mut snapshots = walk.map(|info| info.and_then(|info| CommitSnapshot::load(repo, &info)));
            f(&mut snapshots)
        })
    }

    /// blob id of `path` in the tree of `commit_id`
    pub fn blob_id_at(&self, commit_id: CommitId, path: &str) -> StorageResult<Option<BlobId>> {
        self.with_repo_mut(|repo| TreeHandle::at_commit(repo, commit_id)?.blob_id_at(path))
    }

    /// Read blob content straight from the object database.
    pub fn read_blob(&self, blob_id: BlobId) -> StorageResult<Vec<u8>> {
        self.with_repo(|repo| blob::read_blob(repo, blob_id))
    }

    /// Size of a blob without copying its content.
    pub fn blob_metadata(&self, blob_id: BlobId) -> StorageResult<BlobMetadata> {
        self.with_repo(|repo| BlobMetadata::lookup(repo, blob_id))
    }

    // ==================== Working tree ====================

    /// Paths with uncommitted changes (untracked included, ignored excluded).
    pub fn dirty_paths(&self) -> StorageResult<Vec<PathBuf>> {
        self.with_repo_mut(|repo| {
            let mut options = StatusOptions::new();
            options
                .include_untracked(true)
                .recurse_untracked_dirs(true)
                .include_ignored(false);

            let statuses = repo.statuses(Some(&mut options))?;
            Ok(statuses
                .iter()
                .filter(|entry| entry.status() != Status::CURRENT)
                .filter_map(|entry| entry.path().map(PathBuf::from))
                .collect())
        })
    }

    /// Fail with `DirtyWorkingTree` unless `git status` is clean.
    pub fn ensure_clean(&self) -> StorageResult<()> {
        let paths = self.dirty_paths()?;
        if paths.is_empty() {
            Ok(())
        } else {
            Err(StorageError::DirtyWorkingTree { paths })
        }
    }

    /// Stage every add, modification and deletion in the working tree and
    /// commit it on top of HEAD (or as the root commit).
    ///
    /// `author` overrides the author name; the committer is always the
    /// repository identity.
    pub fn commit_all(&self, author: Option<&str>, message: &str) -> StorageResult<CommitId> {
        self.with_repo_mut(|repo| {
            let mut index = repo.index()?;
            index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
            index.update_all(["*"], None)?;
            index.write()?;
            let tree_id = TreeId::new(index.write_tree()?);

            let committer = self.inner.signature.clone();
            let author = match author {
                Some(name) if !name.trim().is_empty() => committer.with_name(name.trim()),
                _ => committer.clone(),
            };
            let parents = RefManager::head_commit_opt(repo)?.into_iter().collect();

            NewCommit {
                tree: tree_id,
                parents,
                author,
                committer,
                message,
            }
            .write(repo, Some("HEAD"))
        })
    }

    /// Put the index and working tree back to HEAD and remove files that
    /// are not tracked. Used to undo a write that failed before its commit.
    pub fn discard_changes(&self) -> StorageResult<()> {
        self.with_repo_mut(|repo| {
            match RefManager::head_commit_opt(repo)? {
                Some(head) => RemoteManager::reset_hard(repo, head)?,
                None => {
                    let mut index = repo.index()?;
                    index.clear()?;
                    index.write()?;
                }
            }

            let workdir = self.inner.path.clone();
            let mut options = StatusOptions::new();
            options.include_untracked(true).recurse_untracked_dirs(true);
            let untracked: Vec<PathBuf> = repo
                .statuses(Some(&mut options))?
                .iter()
                .filter(|entry| entry.status().contains(Status::WT_NEW))
                .filter_map(|entry| entry.path().map(|p| workdir.join(p)))
                .collect();

            for path in untracked {
                remove_file_if_exists(&path)?;
                if let Some(parent) = path.parent() {
                    if parent != workdir {
                        // only succeeds when the directory is now empty
                        let _ = fs::remove_dir(parent);
                    }
                }
            }
            Ok(())
        })
    }

    /// Take `commit` back off the checked-out branch: the branch returns to
    /// the commit's first parent (or becomes unborn again for a root commit)
    /// and the working tree follows. `commit` must be the current HEAD.
    pub fn retract_tip(&self, commit: CommitId) -> StorageResult<()> {
        self.with_repo_mut(|repo| {
            let head = RefManager::head_commit(repo)?;
            if head != commit {
                return Err(StorageError::Internal(format!(
                    "cannot retract {}: HEAD is at {}",
                    commit.short(),
                    head.short()
                )));
            }
            match commit::get_commit(repo, commit)?.parent_ids.first() {
                Some(parent) => RemoteManager::reset_hard(repo, *parent)?,
                None => {
                    let branch = RefManager::current_branch(repo)?;
                    repo.find_reference(&branch.as_ref_path())?.delete()?;
                }
            }
            Ok(())
        })?;
        debug!(commit = %commit.short(), "retracted commit");
        self.discard_changes()
    }

    // ==================== Remote operations ====================

    /// Fail unless the named remote exists.
    pub fn ensure_remote(&self, remote: &str) -> StorageResult<()> {
        self.with_repo_mut(|repo| RemoteManager::ensure_remote(repo, remote))
    }

    /// Push the checked-out branch.
    pub fn push(&self, remote: &str, credentials: Option<&RemoteCredentials>) -> StorageResult<()> {
        self.with_repo_mut(|repo| RemoteManager::push(repo, remote, credentials))
    }

    /// Fetch the checked-out branch and merge it in.
    pub fn pull(
        &self,
        remote: &str,
        credentials: Option<&RemoteCredentials>,
    ) -> StorageResult<MergeOutcome> {
        self.with_repo_mut(|repo| {
            RemoteManager::fetch(repo, remote, credentials)?;
            RemoteManager::merge_fetched(repo, remote, &self.inner.signature)
        })
    }

    /// Fetch, then hard reset the checked-out branch to the remote tip.
    ///
    /// Returns the commit reset to, or `None` when the remote has no such
    /// branch (nothing is changed in that case).
    pub fn reset_to_remote(
        &self,
        remote: &str,
        credentials: Option<&RemoteCredentials>,
    ) -> StorageResult<Option<CommitId>> {
        self.with_repo_mut(|repo| {
            let Some(tip) = RemoteManager::fetch(repo, remote, credentials)? else {
                return Ok(None);
            };
            match RefManager::head_commit_opt(repo)? {
                Some(_) => RemoteManager::reset_hard(repo, tip)?,
                None => {
                    let branch = RefManager::current_branch(repo)?;
                    RefManager::set_branch_target(repo, &branch, tip, "reset to remote")?;
                    repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;
                }
            }
            Ok(Some(tip))
        })
    }
}

/// Remove a file, treating "already gone" as success.
pub(crate) fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl std::fmt::Debug for GitRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepository")
            .field("path", &self.inner.path)
            .field("signature", &self.inner.signature)
            .finish()
    }
}

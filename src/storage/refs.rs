//!  Branch and reference management.
//!
//!  Git refs are pointers to commits. This module handles:
//! - HEAD resolution, including the unborn state of a fresh repository
//! - the name of the checked-out branch (what gets pushed and fetched)
//! - moving a branch during fast-forward merges

use git2::Repository;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BranchName, CommitId};

/// Manages Git references (branches).
pub struct RefManager;

impl RefManager {
    /// Get the current HEAD commit.
    pub fn head_commit(repo: &Repository) -> StorageResult<CommitId> {
        Self::head_commit_opt(repo)?.ok_or(StorageError::EmptyRepository)
    }

    /// Get the current HEAD commit, or `None` when the branch is still unborn.
    pub fn head_commit_opt(repo: &Repository) -> StorageResult<Option<CommitId>> {
        let head = match repo.head() {
            Ok(head) => head,
            Err(e)
                if e.code() == git2::ErrorCode::UnbornBranch
                    || e.code() == git2::ErrorCode::NotFound =>
            {
                return Ok(None)
            }
            Err(e) => return Err(StorageError::Git(e)),
        };

        let commit = head.peel_to_commit()?;
        Ok(Some(CommitId::new(commit.id())))
    }

    /// The branch HEAD points at, even if it has no commits yet.
    pub fn current_branch(repo: &Repository) -> StorageResult<BranchName> {
        let head = repo.find_reference("HEAD")?;
        let target = head.symbolic_target().ok_or(StorageError::DetachedHead)?;
        BranchName::from_ref_path(target)
            .map_err(|e| StorageError::Internal(format!("unexpected HEAD target: {}", e)))
    }

    /// Resolve an arbitrary ref (e.g. a remote-tracking ref) to its commit.
    pub fn resolve_ref(repo: &Repository, refname: &str) -> StorageResult<Option<CommitId>> {
        let reference = match repo.find_reference(refname) {
            Ok(r) => r,
            Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Git(e)),
        };
        let commit = reference.peel_to_commit()?;
        Ok(Some(CommitId::new(commit.id())))
    }

    /// Point a branch at a commit, creating the branch if it is unborn.
    pub fn set_branch_target(
        repo: &Repository,
        branch: &BranchName,
        target: CommitId,
        log_message: &str,
    ) -> StorageResult<()> {
        repo.reference(&branch.as_ref_path(), target.raw(), true, log_message)?;
        Ok(())
    }
}

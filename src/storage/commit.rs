//!  Commits and history
//!
//!  every save or delete of flow content is exactly one commit, and the
//!  version index is rebuilt by walking commits from HEAD backwards. Merges
//!  of remote changes are the only commits with two parents.

use chrono::{DateTime, TimeZone, Utc};
use git2::{Repository, Sort};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::refs::RefManager;
use crate::storage::types::{CommitId, GitSignature, TreeId};

/// A commit as the index and the provider see it.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub id: CommitId,
    pub tree_id: TreeId,
    pub parent_ids: Vec<CommitId>,
    pub message: String,
    pub author_name: String,
    pub timestamp: DateTime<Utc>,
}

impl CommitInfo {
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }
}

impl From<&git2::Commit<'_>> for CommitInfo {
    fn from(commit: &git2::Commit<'_>) -> Self {
        let seconds = commit.author().when().seconds();
        Self {
            id: CommitId::new(commit.id()),
            tree_id: TreeId::new(commit.tree_id()),
            parent_ids: commit.parent_ids().map(CommitId::new).collect(),
            message: String::from_utf8_lossy(commit.message_bytes()).into_owned(),
            author_name: String::from_utf8_lossy(commit.author().name_bytes()).into_owned(),
            timestamp: Utc.timestamp_opt(seconds, 0).single().unwrap_or_default(),
        }
    }
}

/// A commit about to be written.
pub(crate) struct NewCommit<'m> {
    pub tree: TreeId,
    /// empty for a root commit
    pub parents: Vec<CommitId>,
    pub author: GitSignature,
    pub committer: GitSignature,
    pub message: &'m str,
}

impl NewCommit<'_> {
    /// Write the commit object, moving `update_ref` (e.g. `HEAD`) to it.
    pub(crate) fn write(&self, repo: &Repository, update_ref: Option<&str>) -> StorageResult<CommitId> {
        let tree = repo.find_tree(self.tree.raw())?;
        let parents = self
            .parents
            .iter()
            .map(|id| repo.find_commit(id.raw()))
            .collect::<Result<Vec<_>, _>>()?;
        let parents: Vec<&git2::Commit<'_>> = parents.iter().collect();

        let oid = repo.commit(
            update_ref,
            &self.author.to_git2_signature()?,
            &self.committer.to_git2_signature()?,
            self.message,
            &tree,
            &parents,
        )?;
        Ok(CommitId::new(oid))
    }
}

pub fn get_commit(repo: &Repository, id: CommitId) -> StorageResult<CommitInfo> {
    let commit = repo
        .find_commit(id.raw())
        .map_err(|_| StorageError::CommitNotFound(id.to_string()))?;
    Ok(CommitInfo::from(&commit))
}

/// Commits reachable from HEAD, newest first (time, then topological
/// order). Yields nothing while HEAD is unborn.
pub(crate) fn walk_head(repo: &Repository) -> StorageResult<impl Iterator<Item = StorageResult<CommitInfo>> + '_> {
    let mut revwalk = repo.revwalk()?;
    revwalk.set_sorting(Sort::TIME | Sort::TOPOLOGICAL)?;
    if let Some(head) = RefManager::head_commit_opt(repo)? {
        revwalk.push(head.raw())?;
    }

    Ok(revwalk.map(move |oid| -> StorageResult<CommitInfo> {
        let commit = repo.find_commit(oid?)?;
        Ok(CommitInfo::from(&commit))
    }))
}

/// message formatting for provider-generated commits
pub struct CommitMessage;

impl CommitMessage {
    /// default message for a save when the caller left the comment blank
    pub fn save_flow(flow_name: &str, flow_id: &str, version: u32) -> String {
        format!("Saved flow {}:{} version {}", flow_name, flow_id, version)
    }

    /// message for removing a flow (and possibly its bucket)
    pub fn delete_flow(flow_name: &str, flow_id: &str, bucket_name: &str, bucket_id: &str) -> String {
        format!(
            "Deleted flow {}:{} in bucket {}:{}.",
            flow_name, flow_id, bucket_name, bucket_id
        )
    }

    /// message for a merge of fetched remote changes
    pub fn merge_remote(remote: &str, branch: &str) -> String {
        format!("Merge {}/{} into {}", remote, branch, branch)
    }
}

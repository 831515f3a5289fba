//! Remote synchronization: push, fetch, merge and hard reset.
//!
//! Every operation here works on the checked-out branch only. Fetches land in
//! the conventional remote-tracking ref (`refs/remotes/<remote>/<branch>`) and
//! merges/resets take their target from there.

use std::fmt;
use std::path::PathBuf;

use git2::build::CheckoutBuilder;
use git2::{Cred, FetchOptions, PushOptions, RemoteCallbacks, Repository, ResetType};

use crate::storage::commit::{CommitMessage, NewCommit};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::refs::RefManager;
use crate::storage::types::{CommitId, GitSignature, TreeId};

/// username/password pair for remote access
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteCredentials {
    pub username: String,
    pub password: String,
}

impl RemoteCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// result of merging fetched changes into the local branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// nothing new on the remote
    UpToDate,
    /// local branch moved forward to the remote tip
    FastForward(CommitId),
    /// histories diverged; a merge commit was created
    Merged(CommitId),
}

impl MergeOutcome {
    /// whether local history moved
    pub fn changed(&self) -> bool {
        !matches!(self, MergeOutcome::UpToDate)
    }
}

fn callbacks(credentials: Option<&RemoteCredentials>) -> RemoteCallbacks<'_> {
    let mut callbacks = RemoteCallbacks::new();
    if let Some(creds) = credentials {
        callbacks.credentials(move |_url, _username, _allowed| {
            Cred::userpass_plaintext(&creds.username, &creds.password)
        });
    }
    callbacks
}

/// Remote operations over a raw repository handle.
pub struct RemoteManager;

impl RemoteManager {
    /// Fail unless the named remote exists in the repository config.
    pub fn ensure_remote(repo: &Repository, remote: &str) -> StorageResult<()> {
        repo.find_remote(remote)
            .map(|_| ())
            .map_err(|_| StorageError::RemoteNotFound(remote.to_string()))
    }

    /// Push the checked-out branch to the same branch name on `remote`.
    pub fn push(
        repo: &Repository,
        remote: &str,
        credentials: Option<&RemoteCredentials>,
    ) -> StorageResult<()> {
        let branch = RefManager::current_branch(repo)?;
        let mut git_remote = repo
            .find_remote(remote)
            .map_err(|_| StorageError::RemoteNotFound(remote.to_string()))?;

        let mut rejected: Vec<String> = Vec::new();
        {
            let mut cb = callbacks(credentials);
            cb.push_update_reference(|refname, status| {
                if let Some(message) = status {
                    rejected.push(format!("{}: {}", refname, message));
                }
                Ok(())
            });

            let mut options = PushOptions::new();
            options.remote_callbacks(cb);

            git_remote
                .push(&[branch.push_refspec()], Some(&mut options))
                .map_err(|source| StorageError::Remote {
                    operation: "push",
                    remote: remote.to_string(),
                    source,
                })?;
        }

        if !rejected.is_empty() {
            return Err(StorageError::PushRejected {
                remote: remote.to_string(),
                reason: rejected.join("; "),
            });
        }
        Ok(())
    }

    /// Fetch the checked-out branch from `remote` into its remote-tracking ref.
    ///
    /// Returns the fetched tip, or `None` if the remote has no such branch.
    pub fn fetch(
        repo: &Repository,
        remote: &str,
        credentials: Option<&RemoteCredentials>,
    ) -> StorageResult<Option<CommitId>> {
        let branch = RefManager::current_branch(repo)?;
        let mut git_remote = repo
            .find_remote(remote)
            .map_err(|_| StorageError::RemoteNotFound(remote.to_string()))?;

        let mut options = FetchOptions::new();
        options.remote_callbacks(callbacks(credentials));

        git_remote
            .fetch(&[branch.fetch_refspec(remote)], Some(&mut options), None)
            .map_err(|source| StorageError::Remote {
                operation: "fetch",
                remote: remote.to_string(),
                source,
            })?;

        RefManager::resolve_ref(repo, &branch.remote_tracking_ref(remote))
    }

    /// Merge the remote-tracking ref of the checked-out branch into it.
    ///
    /// Conflicts abort the merge and leave the working tree at HEAD.
    pub fn merge_fetched(
        repo: &Repository,
        remote: &str,
        signature: &GitSignature,
    ) -> StorageResult<MergeOutcome> {
        let branch = RefManager::current_branch(repo)?;
        let tracking = match repo.find_reference(&branch.remote_tracking_ref(remote)) {
            Ok(r) => r,
            Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(MergeOutcome::UpToDate),
            Err(e) => return Err(StorageError::Git(e)),
        };
        let theirs = repo.reference_to_annotated_commit(&tracking)?;
        let (analysis, _) = repo.merge_analysis(&[&theirs])?;

        if analysis.is_up_to_date() {
            return Ok(MergeOutcome::UpToDate);
        }

        if analysis.is_unborn() || analysis.is_fast_forward() {
            let target = CommitId::new(theirs.id());
            RefManager::set_branch_target(repo, &branch, target, "fast-forward from remote")?;
            repo.set_head(&branch.as_ref_path())?;
            repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
            return Ok(MergeOutcome::FastForward(target));
        }

        let ours = RefManager::head_commit(repo)?;
        repo.merge(&[&theirs], None, None)?;

        let mut index = repo.index()?;
        if index.has_conflicts() {
            let mut paths = Vec::new();
            for conflict in index.conflicts()? {
                let conflict = conflict?;
                let entry = conflict.our.or(conflict.their).or(conflict.ancestor);
                if let Some(entry) = entry {
                    paths.push(PathBuf::from(String::from_utf8_lossy(&entry.path).into_owned()));
                }
            }
            repo.cleanup_state()?;
            Self::reset_hard(repo, ours)?;
            return Err(StorageError::MergeConflict {
                conflicting_paths: paths,
            });
        }

        let tree_id = TreeId::new(index.write_tree()?);
        let message = CommitMessage::merge_remote(remote, branch.as_str());
        let merged = NewCommit {
            tree: tree_id,
            parents: vec![ours, CommitId::new(theirs.id())],
            author: signature.clone(),
            committer: signature.clone(),
            message: &message,
        }
        .write(repo, Some("HEAD"))?;
        repo.cleanup_state()?;

        Ok(MergeOutcome::Merged(merged))
    }

    /// Hard reset the checked-out branch, index and working tree to `target`.
    pub fn reset_hard(repo: &Repository, target: CommitId) -> StorageResult<()> {
        let object = repo.find_object(target.raw(), None)?;
        repo.reset(&object, ResetType::Hard, Some(CheckoutBuilder::new().force()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn signature() -> GitSignature {
        GitSignature::new("Test", "test@example.com")
    }

    /// write a file in the working tree and commit everything
    fn commit_file(repo: &Repository, name: &str, content: &str) -> CommitId {
        let workdir = repo.workdir().unwrap().to_path_buf();
        fs::write(workdir.join(name), content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
        let tree_id = TreeId::new(index.write_tree().unwrap());
        let parents = RefManager::head_commit_opt(repo).unwrap().into_iter().collect();
        let message = format!("write {}", name);
        NewCommit {
            tree: tree_id,
            parents,
            author: signature(),
            committer: signature(),
            message: &message,
        }
        .write(repo, Some("HEAD"))
        .unwrap()
    }

    /// local working repo with an `origin` bare remote
    fn setup_with_remote() -> (TempDir, TempDir, Repository) {
        let remote_dir = TempDir::new().unwrap();
        Repository::init_bare(remote_dir.path()).unwrap();
        let local_dir = TempDir::new().unwrap();
        let repo = Repository::init(local_dir.path()).unwrap();
        repo.remote("origin", remote_dir.path().to_str().unwrap()).unwrap();
        (remote_dir, local_dir, repo)
    }

    #[test]
    fn test_ensure_remote() {
        let (_remote_dir, _local_dir, repo) = setup_with_remote();
        RemoteManager::ensure_remote(&repo, "origin").unwrap();
        assert!(matches!(
            RemoteManager::ensure_remote(&repo, "upstream"),
            Err(StorageError::RemoteNotFound(_))
        ));
    }

    #[test]
    fn test_push_then_fetch() {
        let (remote_dir, _local_dir, repo) = setup_with_remote();
        let head = commit_file(&repo, "a.txt", "a");

        RemoteManager::push(&repo, "origin", None).unwrap();

        let branch = RefManager::current_branch(&repo).unwrap();
        let bare = Repository::open_bare(remote_dir.path()).unwrap();
        assert_eq!(
            RefManager::resolve_ref(&bare, &branch.as_ref_path()).unwrap(),
            Some(head)
        );

        let fetched = RemoteManager::fetch(&repo, "origin", None).unwrap();
        assert_eq!(fetched, Some(head));
    }

    #[test]
    fn test_merge_fast_forward_and_up_to_date() {
        let (remote_dir, _local_dir, repo) = setup_with_remote();
        commit_file(&repo, "a.txt", "a");
        RemoteManager::push(&repo, "origin", None).unwrap();

        // a second clone moves the remote forward
        let other_dir = TempDir::new().unwrap();
        let other = Repository::clone(remote_dir.path().to_str().unwrap(), other_dir.path()).unwrap();
        let remote_tip = commit_file(&other, "b.txt", "b");
        RemoteManager::push(&other, "origin", None).unwrap();

        RemoteManager::fetch(&repo, "origin", None).unwrap();
        let outcome = RemoteManager::merge_fetched(&repo, "origin", &signature()).unwrap();
        assert_eq!(outcome, MergeOutcome::FastForward(remote_tip));
        assert!(repo.workdir().unwrap().join("b.txt").exists());

        let again = RemoteManager::merge_fetched(&repo, "origin", &signature()).unwrap();
        assert_eq!(again, MergeOutcome::UpToDate);
        assert!(!again.changed());
    }

    #[test]
    fn test_merge_diverged_creates_merge_commit() {
        let (remote_dir, _local_dir, repo) = setup_with_remote();
        commit_file(&repo, "a.txt", "a");
        RemoteManager::push(&repo, "origin", None).unwrap();

        let other_dir = TempDir::new().unwrap();
        let other = Repository::clone(remote_dir.path().to_str().unwrap(), other_dir.path()).unwrap();
        commit_file(&other, "theirs.txt", "theirs");
        RemoteManager::push(&other, "origin", None).unwrap();

        commit_file(&repo, "ours.txt", "ours");
        RemoteManager::fetch(&repo, "origin", None).unwrap();
        let outcome = RemoteManager::merge_fetched(&repo, "origin", &signature()).unwrap();

        let MergeOutcome::Merged(id) = outcome else {
            panic!("expected merge commit, got {:?}", outcome);
        };
        let commit = repo.find_commit(id.raw()).unwrap();
        assert_eq!(commit.parent_count(), 2);
        let workdir = repo.workdir().unwrap();
        assert!(workdir.join("ours.txt").exists());
        assert!(workdir.join("theirs.txt").exists());
    }

    #[test]
    fn test_merge_conflict_is_aborted() {
        let (remote_dir, _local_dir, repo) = setup_with_remote();
        commit_file(&repo, "a.txt", "base");
        RemoteManager::push(&repo, "origin", None).unwrap();

        let other_dir = TempDir::new().unwrap();
        let other = Repository::clone(remote_dir.path().to_str().unwrap(), other_dir.path()).unwrap();
        commit_file(&other, "a.txt", "theirs");
        RemoteManager::push(&other, "origin", None).unwrap();

        let ours = commit_file(&repo, "a.txt", "ours");
        RemoteManager::fetch(&repo, "origin", None).unwrap();
        let result = RemoteManager::merge_fetched(&repo, "origin", &signature());

        match result {
            Err(StorageError::MergeConflict { conflicting_paths }) => {
                assert_eq!(conflicting_paths, vec![PathBuf::from("a.txt")]);
            }
            other => panic!("expected merge conflict, got {:?}", other),
        }
        assert_eq!(RefManager::head_commit(&repo).unwrap(), ours);
        let content = fs::read_to_string(repo.workdir().unwrap().join("a.txt")).unwrap();
        assert_eq!(content, "ours");
        assert_eq!(repo.state(), git2::RepositoryState::Clean);
    }

    #[test]
    fn test_reset_hard() {
        let (_remote_dir, _local_dir, repo) = setup_with_remote();
        let first = commit_file(&repo, "a.txt", "one");
        commit_file(&repo, "a.txt", "two");

        RemoteManager::reset_hard(&repo, first).unwrap();

        assert_eq!(RefManager::head_commit(&repo).unwrap(), first);
        let content = fs::read_to_string(repo.workdir().unwrap().join("a.txt")).unwrap();
        assert_eq!(content, "one");
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = RemoteCredentials::new("user", "secret");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("user"));
        assert!(!debug.contains("secret"));
    }
}

//! Delivery of local commits to the configured remote.
//!
//! Synchronous pushes run on the caller's thread while the write lock is
//! held. Background pushes are queued to a worker thread that owns its own
//! repository handle; queued requests are coalesced since every push sends
//! the whole branch.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use git2::Repository;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::provider::config::{RemoteConfig, SyncPolicy};
use crate::storage::{CommitId, GitRepository, RemoteCredentials, RemoteManager, StorageError, StorageResult};

pub(crate) struct PushDispatcher {
    remote: String,
    credentials: Option<RemoteCredentials>,
    mode: Mode,
}

enum Mode {
    Synchronous,
    Background(PushWorker),
}

impl PushDispatcher {
    pub(crate) fn new(repo: &GitRepository, remote: &RemoteConfig, policy: SyncPolicy) -> StorageResult<Self> {
        let mode = match policy {
            SyncPolicy::Synchronous => Mode::Synchronous,
            SyncPolicy::Background { max_attempts, backoff } => {
                let handle = GitRepository::open_handle(repo.path())?;
                Mode::Background(PushWorker::spawn(
                    handle,
                    remote.clone(),
                    max_attempts.max(1),
                    backoff,
                )?)
            }
        };
        Ok(Self {
            remote: remote.name.clone(),
            credentials: remote.credentials.clone(),
            mode,
        })
    }

    /// Push `commit` according to the policy. Only a synchronous push can
    /// fail here.
    pub(crate) fn dispatch(&self, repo: &GitRepository, commit: CommitId) -> StorageResult<()> {
        match &self.mode {
            Mode::Synchronous => {
                repo.push(&self.remote, self.credentials.as_ref())?;
                info!(remote = %self.remote, commit = %commit.short(), "pushed");
                Ok(())
            }
            Mode::Background(worker) => worker.enqueue(commit),
        }
    }
}

struct PushJob {
    id: Ulid,
    commit: CommitId,
}

/// worker thread plus the sending half of its queue
struct PushWorker {
    sender: Option<Sender<PushJob>>,
    handle: Option<JoinHandle<()>>,
}

impl PushWorker {
    fn spawn(repo: Repository, remote: RemoteConfig, max_attempts: u32, backoff: Duration) -> StorageResult<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let handle = thread::Builder::new()
            .name("flowgit-push".to_string())
            .spawn(move || run_worker(repo, remote, receiver, max_attempts, backoff))?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    fn enqueue(&self, commit: CommitId) -> StorageResult<()> {
        let job = PushJob { id: Ulid::new(), commit };
        let id = job.id;
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| StorageError::Internal("push worker is shut down".to_string()))?;
        sender
            .send(job)
            .map_err(|_| StorageError::Internal("push worker stopped unexpectedly".to_string()))?;
        debug!(job = %id, commit = %commit.short(), "queued background push");
        Ok(())
    }
}

impl Drop for PushWorker {
    fn drop(&mut self) {
        // closing the channel lets the worker drain and exit
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("push worker panicked");
            }
        }
    }
}

fn run_worker(
    repo: Repository,
    remote: RemoteConfig,
    receiver: Receiver<PushJob>,
    max_attempts: u32,
    backoff: Duration,
) {
    while let Ok(mut job) = receiver.recv() {
        let mut coalesced = 0usize;
        while let Ok(newer) = receiver.try_recv() {
            job = newer;
            coalesced += 1;
        }

        for attempt in 1..=max_attempts {
            match RemoteManager::push(&repo, &remote.name, remote.credentials.as_ref()) {
                Ok(()) => {
                    info!(
                        job = %job.id,
                        remote = %remote.name,
                        commit = %job.commit.short(),
                        coalesced,
                        attempt,
                        "pushed"
                    );
                    break;
                }
                Err(e) if attempt < max_attempts => {
                    warn!(job = %job.id, remote = %remote.name, attempt, error = %e, "push failed, retrying");
                    thread::sleep(backoff * attempt);
                }
                Err(e) => {
                    warn!(
                        job = %job.id,
                        remote = %remote.name,
                        commit = %job.commit.short(),
                        attempts = max_attempts,
                        error = %e,
                        "giving up on push; the next write will push again"
                    );
                }
            }
        }
    }
    debug!(remote = %remote.name, "push worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        _dirs: (TempDir, TempDir),
        repo: GitRepository,
        bare: std::path::PathBuf,
    }

    fn setup(remote_url: Option<&str>) -> Fixture {
        let work = TempDir::new().unwrap();
        let bare_dir = TempDir::new().unwrap();
        Repository::init_bare(bare_dir.path()).unwrap();

        let raw = Repository::init(work.path()).unwrap();
        let url = remote_url
            .map(str::to_string)
            .unwrap_or_else(|| bare_dir.path().to_string_lossy().into_owned());
        raw.remote("origin", &url).unwrap();

        let repo = GitRepository::open(work.path()).unwrap();
        let bare = bare_dir.path().to_path_buf();
        Fixture { _dirs: (work, bare_dir), repo, bare }
    }

    fn commit_file(repo: &GitRepository, name: &str) -> CommitId {
        fs::write(repo.path().join(name), name).unwrap();
        repo.commit_all(None, name).unwrap()
    }

    fn remote_tip(bare: &Path, repo: &GitRepository) -> Option<CommitId> {
        let branch = repo.current_branch().unwrap();
        let bare = Repository::open_bare(bare).unwrap();
        let tip = bare.refname_to_id(&branch.as_ref_path()).ok()?;
        Some(CommitId::new(tip))
    }

    fn origin() -> RemoteConfig {
        RemoteConfig { name: "origin".to_string(), credentials: None }
    }

    #[test]
    fn test_synchronous_push() {
        let fx = setup(None);
        let dispatcher = PushDispatcher::new(&fx.repo, &origin(), SyncPolicy::Synchronous).unwrap();

        let commit = commit_file(&fx.repo, "a");
        dispatcher.dispatch(&fx.repo, commit).unwrap();
        assert_eq!(remote_tip(&fx.bare, &fx.repo), Some(commit));
    }

    #[test]
    fn test_synchronous_push_failure_surfaces() {
        let fx = setup(Some("/nonexistent/flowgit/remote.git"));
        let dispatcher = PushDispatcher::new(&fx.repo, &origin(), SyncPolicy::Synchronous).unwrap();

        let commit = commit_file(&fx.repo, "a");
        let err = dispatcher.dispatch(&fx.repo, commit).unwrap_err();
        assert!(err.is_retriable());
    }

    #[test]
    fn test_background_push_drains_on_drop() {
        let fx = setup(None);
        let policy = SyncPolicy::Background { max_attempts: 2, backoff: Duration::from_millis(1) };
        let dispatcher = PushDispatcher::new(&fx.repo, &origin(), policy).unwrap();

        commit_file(&fx.repo, "a");
        let last = commit_file(&fx.repo, "b");
        dispatcher.dispatch(&fx.repo, last).unwrap();
        drop(dispatcher);

        assert_eq!(remote_tip(&fx.bare, &fx.repo), Some(last));
    }

    #[test]
    fn test_background_push_failure_is_not_reported_to_caller() {
        let fx = setup(Some("/nonexistent/flowgit/remote.git"));
        let policy = SyncPolicy::Background { max_attempts: 2, backoff: Duration::from_millis(1) };
        let dispatcher = PushDispatcher::new(&fx.repo, &origin(), policy).unwrap();

        let commit = commit_file(&fx.repo, "a");
        dispatcher.dispatch(&fx.repo, commit).unwrap();
        // joins the worker after its retries run out
        drop(dispatcher);
    }
}

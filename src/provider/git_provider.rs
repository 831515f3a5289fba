//! Flow persistence on top of a git working directory.
//!
//! Every save or delete becomes exactly one commit. The provider keeps one
//! [`RepositoryIndex`] published behind an `Arc`: writers copy it, apply
//! their change, commit, and only then swap the copy in, so a reader sees
//! either the state before a write or after it.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::index::{replay, Bucket, BucketMetadata, CurrentSnapshot, Flow, FlowPointer, LookupError, RepositoryIndex};
use crate::provider::api::{FlowPersistenceProvider, FlowSnapshotContext};
use crate::provider::config::{ConfigError, ProviderConfig, RemoteConfig};
use crate::provider::error::{ProviderError, ProviderResult};
use crate::provider::sync::PushDispatcher;
use crate::storage::{
    bucket_dir_name, remove_file_if_exists, snapshot_file_name, BlobId, BucketId, CommitId,
    CommitMessage, FlowId, GitRepository, MergeOutcome, StorageError, StorageResult,
    BUCKET_METADATA_FILE, SNAPSHOT_SUFFIX,
};

/// Details of one stored flow version.
#[derive(Debug, Clone, Serialize)]
pub struct FlowVersionInfo {
    pub version: u32,
    pub file_name: String,
    pub commit_id: CommitId,
    pub blob_id: BlobId,
    pub size: usize,
    pub author: String,
    pub committed_at: DateTime<Utc>,
    pub message: String,
}

pub struct GitFlowPersistenceProvider {
    repo: GitRepository,
    remote: Option<RemoteConfig>,
    index: RwLock<Arc<RepositoryIndex>>,
    /// held across every write, including a synchronous push
    write_lock: Mutex<()>,
    push: Option<PushDispatcher>,
}

impl GitFlowPersistenceProvider {
    /// Open the configured repository and build the index from its history.
    pub fn configure(config: ProviderConfig) -> ProviderResult<Self> {
        config.validate()?;
        let repo = GitRepository::open(&config.storage_dir).map_err(ConfigError::from)?;

        let push = match &config.remote {
            Some(remote) => {
                repo.ensure_remote(&remote.name).map_err(ConfigError::from)?;
                Some(PushDispatcher::new(&repo, remote, config.sync_policy)?)
            }
            None => None,
        };

        let index = build_index(&repo)?;
        info!(
            path = %repo.path().display(),
            buckets = index.len(),
            versions = index.version_count(),
            remote = config.remote_name().unwrap_or("none"),
            policy = ?config.sync_policy,
            "flow storage configured"
        );

        Ok(Self {
            repo,
            remote: config.remote,
            index: RwLock::new(Arc::new(index)),
            write_lock: Mutex::new(()),
            push,
        })
    }

    /// Configure from the registry's property map.
    pub fn from_properties(properties: &HashMap<String, String>) -> ProviderResult<Self> {
        Self::configure(ProviderConfig::from_properties(properties)?)
    }

    pub fn repository(&self) -> &GitRepository {
        &self.repo
    }

    /// The currently published index.
    pub fn index(&self) -> Arc<RepositoryIndex> {
        self.index.read().clone()
    }

    /// Stored versions of a flow, ascending.
    pub fn flow_versions(&self, bucket_id: &BucketId, flow_id: &FlowId) -> ProviderResult<Vec<u32>> {
        Ok(self.index().find_flow(bucket_id, flow_id)?.version_numbers())
    }

    /// Where a version lives, who wrote it and how large it is.
    pub fn describe_version(
        &self,
        bucket_id: &BucketId,
        flow_id: &FlowId,
        version: u32,
    ) -> ProviderResult<FlowVersionInfo> {
        let index = self.index();
        let pointer = index.find_version(bucket_id, flow_id, version)?;
        let commit = self.repo.get_commit(pointer.commit_id)?;
        let blob = self.repo.blob_metadata(pointer.blob_id)?;

        Ok(FlowVersionInfo {
            version,
            file_name: pointer.file_name.clone(),
            commit_id: pointer.commit_id,
            blob_id: pointer.blob_id,
            size: blob.size,
            author: commit.author_name.clone(),
            committed_at: commit.timestamp,
            message: commit.summary().to_string(),
        })
    }

    /// Fetch and merge the remote branch, then rebuild the index.
    pub fn pull(&self) -> ProviderResult<MergeOutcome> {
        let remote = self.remote.as_ref().ok_or(ProviderError::RemoteNotConfigured)?;
        let _guard = self.write_lock.lock();
        self.repo.ensure_clean()?;

        let outcome = self.repo.pull(&remote.name, remote.credentials.as_ref())?;
        if outcome.changed() {
            self.reload_index()?;
        }
        info!(remote = %remote.name, outcome = ?outcome, "pulled from remote");
        Ok(outcome)
    }

    /// Discard local history in favor of the remote branch, then rebuild
    /// the index.
    pub fn reset_to_remote(&self) -> ProviderResult<Option<CommitId>> {
        let remote = self.remote.as_ref().ok_or(ProviderError::RemoteNotConfigured)?;
        let _guard = self.write_lock.lock();

        let tip = self.repo.reset_to_remote(&remote.name, remote.credentials.as_ref())?;
        self.reload_index()?;
        match tip {
            Some(commit) => info!(remote = %remote.name, commit = %commit.short(), "reset to remote"),
            None => warn!(remote = %remote.name, "remote has no matching branch; nothing reset"),
        }
        Ok(tip)
    }

    /// Replay history into a fresh index and publish it.
    pub fn reload_index(&self) -> ProviderResult<()> {
        let index = build_index(&self.repo)?;
        debug!(buckets = index.len(), versions = index.version_count(), "index rebuilt");
        self.publish(index);
        Ok(())
    }

    fn publish(&self, index: RepositoryIndex) {
        *self.index.write() = Arc::new(index);
    }

    /// Undo the working-tree side of a write that failed before its commit.
    fn abandon(&self, err: ProviderError) -> ProviderError {
        if let Err(e) = self.repo.discard_changes() {
            error!(error = %e, "failed to restore working tree after failed write");
        }
        err
    }

    /// Take back a commit whose tree lacks the snapshot it was made for
    /// (the path is ignored or not part of the work tree).
    fn retract(&self, commit: CommitId, path: &str) -> ProviderError {
        error!(commit = %commit.short(), path = %path, "snapshot missing from new commit, retracting it");
        if let Err(e) = self.repo.retract_tip(commit) {
            error!(commit = %commit.short(), error = %e, "failed to retract commit");
        }
        // an ignored file survives the reset
        if let Err(e) = remove_file_if_exists(&self.repo.path().join(path)) {
            debug!(path = %path, error = %e, "snapshot file not removed");
        }
        StorageError::CorruptedData {
            path: path.into(),
            reason: "snapshot was not recorded by the commit".to_string(),
        }
        .into()
    }

    fn push_commit(&self, commit: CommitId) -> ProviderResult<()> {
        let Some(push) = &self.push else {
            return Ok(());
        };
        push.dispatch(&self.repo, commit).map_err(|source| {
            warn!(commit = %commit.short(), error = %source, "push failed; local commit kept");
            ProviderError::PushFailed { commit, source }
        })
    }

    /// Reject a save that cannot succeed, before anything on disk changes.
    fn check_save(&self, index: &RepositoryIndex, ctx: &FlowSnapshotContext) -> ProviderResult<()> {
        if ctx.version == 0 {
            return Err(ProviderError::InvalidVersion(ctx.version));
        }

        let dir_name = bucket_dir_name(&ctx.bucket_name);
        if let Some(other) = index.bucket_in_dir(&dir_name) {
            if other.id != ctx.bucket_id {
                return Err(ProviderError::DirectoryInUse {
                    dir_name,
                    existing: other.id.clone(),
                });
            }
        }

        let Some(bucket) = index.bucket(&ctx.bucket_id) else {
            return Ok(());
        };

        if bucket.flow(&ctx.flow_id).is_some_and(|f| f.has_version(ctx.version)) {
            return Err(ProviderError::VersionAlreadyExists {
                bucket_id: ctx.bucket_id.clone(),
                flow_id: ctx.flow_id.clone(),
                version: ctx.version,
            });
        }

        let file_name = snapshot_file_name(&ctx.flow_name);
        if let Some(owner) = bucket
            .flows
            .values()
            .find(|f| f.id != ctx.flow_id && f.current.file_name == file_name)
        {
            return Err(ProviderError::FileInUse {
                bucket_id: ctx.bucket_id.clone(),
                file_name,
                existing: owner.id.clone(),
            });
        }
        Ok(())
    }

    /// Apply a save to the working tree and to `index`. Returns the
    /// snapshot path relative to the repository root.
    fn stage_snapshot(
        &self,
        index: &mut RepositoryIndex,
        ctx: &FlowSnapshotContext,
        content: &[u8],
    ) -> ProviderResult<String> {
        let root = self.repo.path();
        let dir_name = bucket_dir_name(&ctx.bucket_name);
        let file_name = snapshot_file_name(&ctx.flow_name);

        if !index.contains_bucket(&ctx.bucket_id) {
            index.insert_bucket(Bucket::new(ctx.bucket_id.clone(), dir_name.clone()));
        }
        let bucket = index
            .bucket_mut(&ctx.bucket_id)
            .ok_or_else(|| StorageError::Internal(format!("bucket {} missing after insert", ctx.bucket_id)))?;

        if bucket.dir_name != dir_name {
            rename_bucket_dir(root, &bucket.dir_name, &dir_name)?;
            info!(bucket = %bucket.id, from = %bucket.dir_name, to = %dir_name, "renamed bucket directory");
            bucket.dir_name = dir_name;
        }

        let old_file = bucket
            .flow(&ctx.flow_id)
            .map(|f| f.current.file_name.clone())
            .filter(|old| *old != file_name);

        let bucket_dir = root.join(&bucket.dir_name);
        fs::create_dir_all(&bucket_dir)?;
        fs::write(bucket_dir.join(&file_name), content)?;
        // only once the new file is in place
        if let Some(old) = &old_file {
            remove_file_if_exists(&bucket_dir.join(old))?;
            debug!(flow = %ctx.flow_id, from = %old, to = %file_name, "renamed flow snapshot");
        }

        let current = CurrentSnapshot {
            version: ctx.version,
            file_name: file_name.clone(),
        };
        match bucket.flow_mut(&ctx.flow_id) {
            Some(flow) => flow.current = current,
            None => {
                bucket
                    .flows
                    .insert(ctx.flow_id.clone(), Flow::new(ctx.flow_id.clone(), current));
            }
        }

        write_bucket_record(&bucket_dir, bucket)?;
        Ok(bucket.path_of(&file_name))
    }

    /// Remove a flow from the working tree and from `index`, collapsing
    /// the bucket when it was the last flow.
    fn stage_delete(&self, index: &mut RepositoryIndex, bucket_id: &BucketId, flow_id: &FlowId) -> ProviderResult<()> {
        let bucket = index.bucket_mut(bucket_id).ok_or_else(|| LookupError::BucketNotFound {
            bucket_id: bucket_id.clone(),
        })?;
        let flow = bucket.flows.remove(flow_id).ok_or_else(|| LookupError::FlowNotFound {
            bucket_id: bucket_id.clone(),
            flow_id: flow_id.clone(),
        })?;

        let bucket_dir = self.repo.path().join(&bucket.dir_name);
        remove_file_if_exists(&bucket_dir.join(&flow.current.file_name))?;

        if bucket.flows.is_empty() {
            remove_file_if_exists(&bucket_dir.join(BUCKET_METADATA_FILE))?;
            // stays if anything else lives there
            if let Err(e) = fs::remove_dir(&bucket_dir) {
                debug!(dir = %bucket_dir.display(), error = %e, "bucket directory not removed");
            }
            index.remove_bucket(bucket_id);
        } else {
            write_bucket_record(&bucket_dir, bucket)?;
        }
        Ok(())
    }
}

impl FlowPersistenceProvider for GitFlowPersistenceProvider {
    fn save_flow_content(&self, ctx: &FlowSnapshotContext, content: &[u8]) -> ProviderResult<()> {
        let _guard = self.write_lock.lock();
        self.repo.ensure_clean()?;

        let mut index = (*self.index()).clone();
        self.check_save(&index, ctx)?;

        let path = match self.stage_snapshot(&mut index, ctx, content) {
            Ok(path) => path,
            Err(e) => return Err(self.abandon(e)),
        };

        let message = match ctx.commit_comment() {
            Some(comment) => comment.to_string(),
            None => CommitMessage::save_flow(&ctx.flow_name, ctx.flow_id.as_str(), ctx.version),
        };
        let commit = match self.repo.commit_all(ctx.author.as_deref(), &message) {
            Ok(commit) => commit,
            Err(e) => return Err(self.abandon(e.into())),
        };

        let blob_id = match self.repo.blob_id_at(commit, &path) {
            Ok(Some(blob_id)) => blob_id,
            Ok(None) => return Err(self.retract(commit, &path)),
            Err(e) => {
                // the commit exists; let history decide
                warn!(commit = %commit.short(), path = %path, error = %e, "new snapshot not indexed, rebuilding index");
                self.reload_index()?;
                return Err(e.into());
            }
        };
        match index.bucket_mut(&ctx.bucket_id).and_then(|b| b.flow_mut(&ctx.flow_id)) {
            Some(flow) => {
                let pointer = FlowPointer {
                    file_name: flow.current.file_name.clone(),
                    commit_id: commit,
                    blob_id,
                };
                flow.versions.insert(ctx.version, pointer);
                self.publish(index);
            }
            None => {
                warn!(commit = %commit.short(), flow = %ctx.flow_id, "saved flow missing from index, rebuilding index");
                self.reload_index()?;
            }
        }

        info!(
            bucket = %ctx.bucket_id,
            flow = %ctx.flow_id,
            version = ctx.version,
            commit = %commit.short(),
            snapshot_timestamp = %ctx.snapshot_timestamp,
            "saved flow content"
        );
        self.push_commit(commit)
    }

    fn get_flow_content(&self, bucket_id: &BucketId, flow_id: &FlowId, version: u32) -> ProviderResult<Vec<u8>> {
        let blob_id = self.index().find_version(bucket_id, flow_id, version)?.blob_id;
        Ok(self.repo.read_blob(blob_id)?)
    }

    fn delete_all_flow_content(&self, bucket_id: &BucketId, flow_id: &FlowId) -> ProviderResult<()> {
        let _guard = self.write_lock.lock();
        self.repo.ensure_clean()?;

        let mut index = (*self.index()).clone();
        let dir_name = index.find_bucket(bucket_id)?.dir_name.clone();
        let file_name = index.find_flow(bucket_id, flow_id)?.current.file_name.clone();
        let flow_name = file_name.strip_suffix(SNAPSHOT_SUFFIX).unwrap_or(&file_name);
        let message = CommitMessage::delete_flow(flow_name, flow_id.as_str(), &dir_name, bucket_id.as_str());

        let commit = match self
            .stage_delete(&mut index, bucket_id, flow_id)
            .and_then(|()| Ok(self.repo.commit_all(None, &message)?))
        {
            Ok(commit) => commit,
            Err(e) => return Err(self.abandon(e)),
        };
        let bucket_removed = !index.contains_bucket(bucket_id);
        self.publish(index);

        info!(
            bucket = %bucket_id,
            flow = %flow_id,
            bucket_removed,
            commit = %commit.short(),
            "deleted flow content"
        );
        self.push_commit(commit)
    }

    fn delete_flow_content(&self, _bucket_id: &BucketId, _flow_id: &FlowId, _version: u32) -> ProviderResult<()> {
        Err(ProviderError::Unsupported("deleting a single flow version"))
    }
}

impl std::fmt::Debug for GitFlowPersistenceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitFlowPersistenceProvider")
            .field("repo", &self.repo)
            .field("remote", &self.remote.as_ref().map(|r| &r.name))
            .finish()
    }
}

fn build_index(repo: &GitRepository) -> StorageResult<RepositoryIndex> {
    repo.replay_history(|commits| replay(commits))
}

fn rename_bucket_dir(root: &Path, from: &str, to: &str) -> StorageResult<()> {
    let from = root.join(from);
    let to = root.join(to);
    if to.exists() {
        return Err(StorageError::RenameFailed {
            from,
            to,
            source: io::Error::new(io::ErrorKind::AlreadyExists, "target directory already exists"),
        });
    }
    fs::rename(&from, &to).map_err(|source| StorageError::RenameFailed { from, to, source })
}

fn write_bucket_record(bucket_dir: &Path, bucket: &Bucket) -> ProviderResult<()> {
    let yaml = BucketMetadata::from_bucket(bucket).to_yaml()?;
    fs::write(bucket_dir.join(BUCKET_METADATA_FILE), yaml)?;
    Ok(())
}

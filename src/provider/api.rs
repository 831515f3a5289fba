//! The persistence interface the registry calls into.

use chrono::{DateTime, Utc};

use crate::provider::error::ProviderResult;
use crate::storage::{BucketId, FlowId};

/// Everything known about a flow version at the moment it is saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSnapshotContext {
    pub bucket_id: BucketId,
    /// display name; decides the bucket's directory
    pub bucket_name: String,
    pub flow_id: FlowId,
    /// display name; decides the snapshot's file name
    pub flow_name: String,
    /// positive, caller assigned, unique per flow
    pub version: u32,
    /// commit author; the repository identity when absent
    pub author: Option<String>,
    /// commit message; generated when blank
    pub comments: Option<String>,
    pub snapshot_timestamp: DateTime<Utc>,
}

impl FlowSnapshotContext {
    pub fn new(
        bucket_id: BucketId,
        bucket_name: impl Into<String>,
        flow_id: FlowId,
        flow_name: impl Into<String>,
        version: u32,
    ) -> Self {
        Self {
            bucket_id,
            bucket_name: bucket_name.into(),
            flow_id,
            flow_name: flow_name.into(),
            version,
            author: None,
            comments: None,
            snapshot_timestamp: Utc::now(),
        }
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.snapshot_timestamp = timestamp;
        self
    }

    /// the caller's comment, unless it is blank
    pub fn commit_comment(&self) -> Option<&str> {
        self.comments
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

/// Storage of flow snapshot content, one blob per flow version.
pub trait FlowPersistenceProvider: Send + Sync {
    /// Persist the content of one new flow version.
    fn save_flow_content(&self, context: &FlowSnapshotContext, content: &[u8]) -> ProviderResult<()>;

    /// Content of a stored flow version.
    fn get_flow_content(&self, bucket_id: &BucketId, flow_id: &FlowId, version: u32) -> ProviderResult<Vec<u8>>;

    /// Remove a flow and every version of it.
    fn delete_all_flow_content(&self, bucket_id: &BucketId, flow_id: &FlowId) -> ProviderResult<()>;

    /// Remove one version of a flow.
    fn delete_flow_content(&self, bucket_id: &BucketId, flow_id: &FlowId, version: u32) -> ProviderResult<()>;
}

//! In-memory view of every bucket, flow and version in the repository.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::storage::{BlobId, BucketId, CommitId, FlowId};

/// errors resolving a bucket/flow/version against the index
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("bucket not found: {bucket_id}")]
    BucketNotFound { bucket_id: BucketId },

    #[error("flow not found: {flow_id} in bucket {bucket_id}")]
    FlowNotFound { bucket_id: BucketId, flow_id: FlowId },

    #[error("version {version} not found for flow {flow_id} in bucket {bucket_id}")]
    VersionNotFound {
        bucket_id: BucketId,
        flow_id: FlowId,
        version: u32,
    },
}

/// Where one version of a flow lives. Never changes once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowPointer {
    pub file_name: String,
    /// commit that wrote this version
    pub commit_id: CommitId,
    pub blob_id: BlobId,
}

/// the version most recently written for a flow, and the file holding it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentSnapshot {
    pub version: u32,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Flow {
    pub id: FlowId,
    pub current: CurrentSnapshot,
    pub versions: BTreeMap<u32, FlowPointer>,
}

impl Flow {
    pub fn new(id: FlowId, current: CurrentSnapshot) -> Self {
        Self {
            id,
            current,
            versions: BTreeMap::new(),
        }
    }

    pub fn version(&self, version: u32) -> Option<&FlowPointer> {
        self.versions.get(&version)
    }

    pub fn has_version(&self, version: u32) -> bool {
        self.versions.contains_key(&version)
    }

    /// known versions, ascending
    pub fn version_numbers(&self) -> Vec<u32> {
        self.versions.keys().copied().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub id: BucketId,
    /// directory under the repository root
    pub dir_name: String,
    pub flows: BTreeMap<FlowId, Flow>,
}

impl Bucket {
    pub fn new(id: BucketId, dir_name: impl Into<String>) -> Self {
        Self {
            id,
            dir_name: dir_name.into(),
            flows: BTreeMap::new(),
        }
    }

    pub fn flow(&self, flow_id: &FlowId) -> Option<&Flow> {
        self.flows.get(flow_id)
    }

    pub fn flow_mut(&mut self, flow_id: &FlowId) -> Option<&mut Flow> {
        self.flows.get_mut(flow_id)
    }

    /// path of a file in this bucket, relative to the repository root
    pub fn path_of(&self, file_name: &str) -> String {
        format!("{}/{}", self.dir_name, file_name)
    }
}

/// Every bucket currently in the repository, keyed by bucket id.
///
/// The index is a projection of commit history: [`replay`](super::replay)
/// rebuilds it from scratch, and live writes update a clone of it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepositoryIndex {
    buckets: BTreeMap<BucketId, Bucket>,
}

impl RepositoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn buckets(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.values()
    }

    pub fn bucket(&self, bucket_id: &BucketId) -> Option<&Bucket> {
        self.buckets.get(bucket_id)
    }

    pub fn bucket_mut(&mut self, bucket_id: &BucketId) -> Option<&mut Bucket> {
        self.buckets.get_mut(bucket_id)
    }

    /// the bucket stored in `dir_name`, if any
    pub fn bucket_in_dir(&self, dir_name: &str) -> Option<&Bucket> {
        self.buckets.values().find(|b| b.dir_name == dir_name)
    }

    pub fn contains_bucket(&self, bucket_id: &BucketId) -> bool {
        self.buckets.contains_key(bucket_id)
    }

    /// Insert a bucket, replacing any bucket with the same id.
    pub fn insert_bucket(&mut self, bucket: Bucket) {
        self.buckets.insert(bucket.id.clone(), bucket);
    }

    pub fn remove_bucket(&mut self, bucket_id: &BucketId) -> Option<Bucket> {
        self.buckets.remove(bucket_id)
    }

    pub fn find_bucket(&self, bucket_id: &BucketId) -> Result<&Bucket, LookupError> {
        self.bucket(bucket_id).ok_or_else(|| LookupError::BucketNotFound {
            bucket_id: bucket_id.clone(),
        })
    }

    pub fn find_flow(&self, bucket_id: &BucketId, flow_id: &FlowId) -> Result<&Flow, LookupError> {
        self.find_bucket(bucket_id)?
            .flow(flow_id)
            .ok_or_else(|| LookupError::FlowNotFound {
                bucket_id: bucket_id.clone(),
                flow_id: flow_id.clone(),
            })
    }

    /// Resolve bucket, then flow, then version.
    pub fn find_version(
        &self,
        bucket_id: &BucketId,
        flow_id: &FlowId,
        version: u32,
    ) -> Result<&FlowPointer, LookupError> {
        self.find_flow(bucket_id, flow_id)?
            .version(version)
            .ok_or_else(|| LookupError::VersionNotFound {
                bucket_id: bucket_id.clone(),
                flow_id: flow_id.clone(),
                version,
            })
    }

    /// total number of flow versions across all buckets
    pub fn version_count(&self) -> usize {
        self.buckets
            .values()
            .flat_map(|b| b.flows.values())
            .map(|f| f.versions.len())
            .sum()
    }
}

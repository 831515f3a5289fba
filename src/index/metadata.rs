//! The per-bucket metadata record (`bucket.yml`).
//!
//! The record lists, for every flow in the bucket, only the version most
//! recently written and the file holding it. Older versions live in older
//! commits' copies of this record.
//!
//! ```yaml
//! layoutVer: 1
//! bucketId: bucket-id-A
//! flows:
//!   flow-id-1:
//!     ver: 3
//!     file: FlowOne.snapshot
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::index::model::Bucket;
use crate::storage::{BucketId, FlowId};

/// Newest record layout this build understands.
pub const CURRENT_LAYOUT_VERSION: u32 = 1;

/// errors reading a metadata record
#[derive(Debug, Error)]
pub enum MetadataError {
    /// malformed YAML or missing required fields
    #[error("invalid bucket metadata: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// written by a newer layout than we support
    #[error("unsupported bucket metadata layout version {found} (supported up to {supported})")]
    UnsupportedLayout { found: u32, supported: u32 },

    /// an identifier in the record is not usable
    #[error("invalid identifier in bucket metadata: {0}")]
    InvalidIdentifier(#[from] crate::storage::InvalidNameError),
}

/// one flow's entry in the record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub ver: u32,
    pub file: String,
}

/// the record as stored in `bucket.yml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketMetadata {
    pub layout_ver: u32,
    pub bucket_id: BucketId,
    pub flows: BTreeMap<FlowId, FlowRecord>,
}

impl BucketMetadata {
    /// an empty record for a bucket, at the current layout
    pub fn new(bucket_id: BucketId) -> Self {
        Self {
            layout_ver: CURRENT_LAYOUT_VERSION,
            bucket_id,
            flows: BTreeMap::new(),
        }
    }

    /// the record for a bucket's current state: one entry per flow
    pub fn from_bucket(bucket: &Bucket) -> Self {
        let flows = bucket
            .flows
            .values()
            .map(|flow| {
                let record = FlowRecord {
                    ver: flow.current.version,
                    file: flow.current.file_name.clone(),
                };
                (flow.id.clone(), record)
            })
            .collect();
        Self {
            layout_ver: CURRENT_LAYOUT_VERSION,
            bucket_id: bucket.id.clone(),
            flows,
        }
    }

    /// parse and validate record bytes
    pub fn parse(bytes: &[u8]) -> Result<Self, MetadataError> {
        let record: BucketMetadata = serde_yaml::from_slice(bytes)?;
        if record.layout_ver > CURRENT_LAYOUT_VERSION {
            return Err(MetadataError::UnsupportedLayout {
                found: record.layout_ver,
                supported: CURRENT_LAYOUT_VERSION,
            });
        }
        // deserialization bypasses the identifier constructors
        BucketId::new(record.bucket_id.as_str())?;
        for flow_id in record.flows.keys() {
            FlowId::new(flow_id.as_str())?;
        }
        Ok(record)
    }

    /// serialize for writing to disk
    pub fn to_yaml(&self) -> Result<String, MetadataError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

//! flowgit - git-backed versioned flow storage
//!
//! Flow snapshots are stored as files in a git working directory: one
//! directory per bucket, one `.snapshot` file per flow, and a `bucket.yml`
//! record naming the current version of every flow. Each save or delete is
//! one commit, so every version ever saved stays reachable through history.
//!
//! # Example
//!
//! ```no_run
//! use flowgit::provider::{FlowPersistenceProvider, FlowSnapshotContext, GitFlowPersistenceProvider, ProviderConfig};
//! use flowgit::storage::{BucketId, FlowId};
//!
//! let provider = GitFlowPersistenceProvider::configure(ProviderConfig::new("./flow_storage")).unwrap();
//! let ctx = FlowSnapshotContext::new(BucketId::new("b1").unwrap(), "Bucket", FlowId::new("f1").unwrap(), "Flow", 1);
//! provider.save_flow_content(&ctx, b"<flow/>").unwrap();
//! ```

pub mod index;
pub mod provider;
pub mod storage;

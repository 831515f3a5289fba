//! flow persistence provider
//!
//! [`GitFlowPersistenceProvider`] implements [`FlowPersistenceProvider`] on
//! top of [`crate::storage::GitRepository`] and keeps a
//! [`crate::index::RepositoryIndex`] of every stored version in memory.
//!
//! # Usage
//!
//! ```ignore
//! use flowgit::provider::{FlowPersistenceProvider, FlowSnapshotContext, GitFlowPersistenceProvider, ProviderConfig};
//! use flowgit::storage::{BucketId, FlowId};
//!
//! let provider = GitFlowPersistenceProvider::configure(ProviderConfig::new("./flow_storage"))?;
//!
//! let bucket = BucketId::new("b1")?;
//! let flow = FlowId::new("f1")?;
//! let ctx = FlowSnapshotContext::new(bucket.clone(), "Bucket", flow.clone(), "Flow", 1).author("alice");
//! provider.save_flow_content(&ctx, b"<flow/>")?;
//!
//! let bytes = provider.get_flow_content(&bucket, &flow, 1)?;
//! ```

mod api;
pub mod config;
mod error;
mod git_provider;
mod sync;

pub use api::{FlowPersistenceProvider, FlowSnapshotContext};
pub use config::{
    ConfigError, ProviderConfig, RemoteConfig, SyncPolicy, DEFAULT_PUSH_ATTEMPTS, DEFAULT_PUSH_BACKOFF,
    PROP_PUSH_ATTEMPTS, PROP_PUSH_MODE, PROP_REMOTE_PASSWORD, PROP_REMOTE_TO_PUSH, PROP_REMOTE_USER,
    PROP_STORAGE_DIRECTORY,
};
pub use error::{ProviderError, ProviderResult};
pub use git_provider::{FlowVersionInfo, GitFlowPersistenceProvider};

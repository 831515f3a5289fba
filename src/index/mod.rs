//! Repository index: which buckets, flows and versions exist, and where
//! each version's content lives.
//!
//! The index holds nothing that history does not. [`replay`] derives it from
//! the commit log; the provider then keeps it current by updating a copy
//! after each of its own commits.
//!
//! ```ignore
//! use flowgit::index::replay;
//!
//! let index = repo.replay_history(|commits| replay(commits))?;
//! let pointer = index.find_version(&bucket_id, &flow_id, 3)?;
//! let bytes = repo.read_blob(pointer.blob_id)?;
//! ```

mod metadata;
mod model;
mod replay;

pub use metadata::{BucketMetadata, FlowRecord, MetadataError, CURRENT_LAYOUT_VERSION};
pub use model::{Bucket, CurrentSnapshot, Flow, FlowPointer, LookupError, RepositoryIndex};
pub use replay::replay;

//! core type-safe wrappers around git primitives and registry identifiers.

use std::fmt;
use std::fmt::Formatter;

use git2::Oid;
use serde::{Deserialize, Serialize, Serializer};

/// File name of the per-bucket metadata record.
pub const BUCKET_METADATA_FILE: &str = "bucket.yml";

/// Suffix of every flow snapshot file.
pub const SNAPSHOT_SUFFIX: &str = ".snapshot";

/// This makes sure we don't accidentally pass a blob ID where a commit ID
/// is expected. The inner Oid is only accessible within the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitId(pub(crate) Oid);

impl CommitId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    /// raw Oid (for internal use only)
    pub(crate) fn raw(&self) -> Oid {
        self.0
    }

    /// parse CommitId from a hex string
    pub fn from_hex(hex: &str) -> Result<Self, git2::Error> {
        Oid::from_str(hex).map(CommitId)
    }

    /// short form of the commit ID
    pub fn short(&self) -> String {
        self.0.to_string()[..7].to_string()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for CommitId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

/// Git blob identifier. Content addressed, so a given id always denotes the
/// same bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobId(pub(crate) Oid);

impl BlobId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }

    /// parse BlobId from a hex string
    pub fn from_hex(hex: &str) -> Result<Self, git2::Error> {
        Oid::from_str(hex).map(BlobId)
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for BlobId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

/// Git tree identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeId(pub(crate) Oid);

impl TreeId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validate an externally assigned identifier.
///
/// Identifiers are opaque (usually UUIDs) and never touch the filesystem,
/// but they end up as YAML keys and in commit messages.
fn validate_identifier(id: &str) -> Result<(), InvalidNameError> {
    if id.trim().is_empty() {
        return Err(InvalidNameError::Empty);
    }

    if id.len() > 256 {
        return Err(InvalidNameError::TooLong(id.len()));
    }

    for (i, c) in id.chars().enumerate() {
        if c.is_control() {
            return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
        }
    }

    Ok(())
}

/// Stable identifier of a bucket, assigned by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketId(String);

impl BucketId {
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidNameError> {
        let id = id.into();
        validate_identifier(&id)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for BucketId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Stable identifier of a flow, assigned by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(String);

impl FlowId {
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidNameError> {
        let id = id.into();
        validate_identifier(&id)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for FlowId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Turn a display name into something safe to use as a single path component.
///
/// Characters that are illegal on common filesystems (and the path
/// separators) become `_`. Names that would resolve to the current or parent
/// directory are replaced entirely, and `.git` in any case loses its dot.
pub fn sanitize_file_name(name: &str) -> String {
    const ILLEGAL: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| if ILLEGAL.contains(&c) || c.is_control() { '_' } else { c })
        .collect();

    match sanitized.as_str() {
        "" | "." | ".." => "_".to_string(),
        s if s.eq_ignore_ascii_case(".git") => format!("_{}", &s[1..]),
        _ => sanitized,
    }
}

/// Directory name for a bucket with the given display name.
pub fn bucket_dir_name(bucket_name: &str) -> String {
    sanitize_file_name(bucket_name)
}

/// Snapshot file name for a flow with the given display name.
pub fn snapshot_file_name(flow_name: &str) -> String {
    format!("{}{}", sanitize_file_name(flow_name), SNAPSHOT_SUFFIX)
}

/// a local branch name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BranchName(String);

impl BranchName {
    const HEADS_PREFIX: &'static str = "refs/heads/";

    /// create a new BranchName
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        // git is more permissive but we stay restrictive
        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if name.contains("..") || name.ends_with('/') || name.starts_with('/') {
            return Err(InvalidNameError::InvalidPath(name));
        }
        Ok(Self(name))
    }

    /// parse a full ref path such as `refs/heads/main`
    pub fn from_ref_path(path: &str) -> Result<Self, InvalidNameError> {
        match path.strip_prefix(Self::HEADS_PREFIX) {
            Some(short) => Self::new(short),
            None => Err(InvalidNameError::InvalidPath(path.to_string())),
        }
    }

    /// get the full ref path (e.g., "refs/heads/main")
    pub fn as_ref_path(&self) -> String {
        format!("{}{}", Self::HEADS_PREFIX, self.0)
    }

    /// the ref that tracks this branch on a remote, e.g. `refs/remotes/origin/main`
    pub fn remote_tracking_ref(&self, remote: &str) -> String {
        format!("refs/remotes/{}/{}", remote, self.0)
    }

    /// refspec that fetches this branch into its remote-tracking ref
    pub fn fetch_refspec(&self, remote: &str) -> String {
        format!("+{}:{}", self.as_ref_path(), self.remote_tracking_ref(remote))
    }

    /// refspec that pushes this branch to the same name on the remote
    pub fn push_refspec(&self) -> String {
        format!("{0}:{0}", self.as_ref_path())
    }

    /// get the short name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// git signature (author/committer info)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSignature {
    pub name: String,
    pub email: String,
}

impl GitSignature {
    /// create a new signature
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// identity used when the repository has none configured
    pub fn flowgit() -> Self {
        Self::new("flowgit", "flowgit@localhost")
    }

    /// same email, different display name (caller-supplied author)
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self::new(name, self.email.clone())
    }

    /// convert to git2::Signature
    pub(crate) fn to_git2_signature(&self) -> Result<git2::Signature<'static>, git2::Error> {
        git2::Signature::now(&self.name, &self.email)
    }
}

impl Default for GitSignature {
    fn default() -> Self {
        Self::flowgit()
    }
}

/// error type for invalid identifiers and ref names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    TooLong(usize),
    InvalidCharacter { char: char, position: usize },
    InvalidPath(String),
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::TooLong(len) => write!(f, "name too long: {} characters", len),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character {:?} at position {}", char, position)
            }
            Self::InvalidPath(path) => write!(f, "invalid path: '{}'", path),
        }
    }
}

impl std::error::Error for InvalidNameError {}

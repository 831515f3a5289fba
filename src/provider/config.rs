//! Provider configuration.
//!
//! A configuration is built either in code with the builder methods or from
//! the registry's string property map (see [`ProviderConfig::from_properties`]).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::storage::{RemoteCredentials, StorageError};

pub const PROP_STORAGE_DIRECTORY: &str = "Flow Storage Directory";
pub const PROP_REMOTE_TO_PUSH: &str = "Remote To Push";
pub const PROP_REMOTE_USER: &str = "Remote Access User";
pub const PROP_REMOTE_PASSWORD: &str = "Remote Access Password";
pub const PROP_PUSH_MODE: &str = "Remote Push Mode";
pub const PROP_PUSH_ATTEMPTS: &str = "Remote Push Attempts";

/// Background push attempts when none are configured.
pub const DEFAULT_PUSH_ATTEMPTS: u32 = 3;
/// Base delay between background push attempts, multiplied by the attempt number.
pub const DEFAULT_PUSH_BACKOFF: Duration = Duration::from_millis(500);

/// errors building or applying a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required property '{0}'")]
    MissingProperty(&'static str),

    #[error("'{}' and '{}' must be set together", PROP_REMOTE_USER, PROP_REMOTE_PASSWORD)]
    PartialCredentials,

    #[error("remote credentials are set but '{}' is not", PROP_REMOTE_TO_PUSH)]
    CredentialsWithoutRemote,

    #[error("invalid value '{value}' for '{property}': {reason}")]
    InvalidValue {
        property: &'static str,
        value: String,
        reason: String,
    },

    /// the storage directory or remote failed validation
    #[error("invalid flow storage: {0}")]
    Storage(#[from] StorageError),
}

/// How commits reach the configured remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// push inside the write, surfacing failures to the caller
    #[default]
    Synchronous,
    /// push from a worker thread, retrying with linear backoff
    Background { max_attempts: u32, backoff: Duration },
}

impl SyncPolicy {
    pub fn background(max_attempts: u32) -> Self {
        SyncPolicy::Background {
            max_attempts: max_attempts.max(1),
            backoff: DEFAULT_PUSH_BACKOFF,
        }
    }
}

/// remote to push to, with optional credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub name: String,
    pub credentials: Option<RemoteCredentials>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// existing git working directory holding the buckets
    pub storage_dir: PathBuf,
    pub remote: Option<RemoteConfig>,
    pub sync_policy: SyncPolicy,
    /// credentials given before any remote
    pending_credentials: Option<RemoteCredentials>,
}

impl ProviderConfig {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            remote: None,
            sync_policy: SyncPolicy::default(),
            pending_credentials: None,
        }
    }

    /// Push to `name` after every write.
    pub fn remote(mut self, name: impl Into<String>) -> Self {
        let credentials = self
            .remote
            .take()
            .and_then(|r| r.credentials)
            .or_else(|| self.pending_credentials.take());
        self.remote = Some(RemoteConfig {
            name: name.into(),
            credentials,
        });
        self
    }

    /// Credentials for the remote, which may be named before or after.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        let credentials = RemoteCredentials::new(username, password);
        match self.remote.as_mut() {
            Some(remote) => remote.credentials = Some(credentials),
            None => self.pending_credentials = Some(credentials),
        }
        self
    }

    /// Reject combinations no provider can use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pending_credentials.is_some() {
            return Err(ConfigError::CredentialsWithoutRemote);
        }
        Ok(())
    }

    pub fn sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    /// Build a configuration from the registry's property map.
    ///
    /// Blank values count as unset. Only the shape of the values is checked
    /// here; the directory and remote are validated when the provider opens
    /// the repository.
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            properties
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };

        let storage_dir = get(PROP_STORAGE_DIRECTORY)
            .ok_or(ConfigError::MissingProperty(PROP_STORAGE_DIRECTORY))?;
        let mut config = ProviderConfig::new(storage_dir);

        let credentials = match (get(PROP_REMOTE_USER), get(PROP_REMOTE_PASSWORD)) {
            (Some(user), Some(password)) => Some(RemoteCredentials::new(user, password)),
            (None, None) => None,
            _ => return Err(ConfigError::PartialCredentials),
        };

        match (get(PROP_REMOTE_TO_PUSH), credentials) {
            (Some(remote), credentials) => {
                config.remote = Some(RemoteConfig {
                    name: remote.to_string(),
                    credentials,
                });
            }
            (None, Some(_)) => return Err(ConfigError::CredentialsWithoutRemote),
            (None, None) => {}
        }

        let attempts = match get(PROP_PUSH_ATTEMPTS) {
            Some(raw) => parse_attempts(raw)?,
            None => DEFAULT_PUSH_ATTEMPTS,
        };

        config.sync_policy = match get(PROP_PUSH_MODE).map(str::to_ascii_lowercase).as_deref() {
            None | Some("synchronous") | Some("sync") => SyncPolicy::Synchronous,
            Some("background") | Some("async") => SyncPolicy::background(attempts),
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    property: PROP_PUSH_MODE,
                    value: other.to_string(),
                    reason: "expected 'synchronous' or 'background'".to_string(),
                })
            }
        };

        Ok(config)
    }

    pub fn remote_name(&self) -> Option<&str> {
        self.remote.as_ref().map(|r| r.name.as_str())
    }

    pub fn remote_credentials(&self) -> Option<&RemoteCredentials> {
        self.remote.as_ref().and_then(|r| r.credentials.as_ref())
    }
}

fn parse_attempts(raw: &str) -> Result<u32, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidValue {
        property: PROP_PUSH_ATTEMPTS,
        value: raw.to_string(),
        reason: reason.to_string(),
    };
    let attempts: u32 = raw.parse().map_err(|_| invalid("not a number"))?;
    if attempts == 0 {
        return Err(invalid("must be at least 1"));
    }
    Ok(attempts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_minimal_properties() {
        let config = ProviderConfig::from_properties(&props(&[(PROP_STORAGE_DIRECTORY, "/tmp/flows")])).unwrap();
        assert_eq!(config.storage_dir, PathBuf::from("/tmp/flows"));
        assert_eq!(config.remote, None);
        assert_eq!(config.sync_policy, SyncPolicy::Synchronous);
    }

    #[test]
    fn test_missing_or_blank_directory() {
        assert!(matches!(
            ProviderConfig::from_properties(&props(&[])),
            Err(ConfigError::MissingProperty(PROP_STORAGE_DIRECTORY))
        ));
        assert!(matches!(
            ProviderConfig::from_properties(&props(&[(PROP_STORAGE_DIRECTORY, "   ")])),
            Err(ConfigError::MissingProperty(_))
        ));
    }

    #[test]
    fn test_remote_with_credentials() {
        let config = ProviderConfig::from_properties(&props(&[
            (PROP_STORAGE_DIRECTORY, "/tmp/flows"),
            (PROP_REMOTE_TO_PUSH, "origin"),
            (PROP_REMOTE_USER, "alice"),
            (PROP_REMOTE_PASSWORD, "secret"),
        ]))
        .unwrap();

        assert_eq!(config.remote_name(), Some("origin"));
        assert_eq!(
            config.remote_credentials(),
            Some(&RemoteCredentials::new("alice", "secret"))
        );
    }

    #[test]
    fn test_partial_credentials_rejected() {
        let result = ProviderConfig::from_properties(&props(&[
            (PROP_STORAGE_DIRECTORY, "/tmp/flows"),
            (PROP_REMOTE_TO_PUSH, "origin"),
            (PROP_REMOTE_USER, "alice"),
            (PROP_REMOTE_PASSWORD, " "),
        ]));
        assert!(matches!(result, Err(ConfigError::PartialCredentials)));
    }

    #[test]
    fn test_blank_remote_is_unset() {
        let config = ProviderConfig::from_properties(&props(&[
            (PROP_STORAGE_DIRECTORY, "/tmp/flows"),
            (PROP_REMOTE_TO_PUSH, ""),
        ]))
        .unwrap();
        assert_eq!(config.remote, None);
    }

    #[test]
    fn test_push_mode_and_attempts() {
        let config = ProviderConfig::from_properties(&props(&[
            (PROP_STORAGE_DIRECTORY, "/tmp/flows"),
            (PROP_PUSH_MODE, "Background"),
            (PROP_PUSH_ATTEMPTS, "5"),
        ]))
        .unwrap();
        assert_eq!(
            config.sync_policy,
            SyncPolicy::Background { max_attempts: 5, backoff: DEFAULT_PUSH_BACKOFF }
        );

        let config = ProviderConfig::from_properties(&props(&[
            (PROP_STORAGE_DIRECTORY, "/tmp/flows"),
            (PROP_PUSH_MODE, "background"),
        ]))
        .unwrap();
        assert_eq!(config.sync_policy, SyncPolicy::background(DEFAULT_PUSH_ATTEMPTS));
    }

    #[test]
    fn test_invalid_push_settings() {
        let result = ProviderConfig::from_properties(&props(&[
            (PROP_STORAGE_DIRECTORY, "/tmp/flows"),
            (PROP_PUSH_MODE, "eventually"),
        ]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { property: PROP_PUSH_MODE, .. })));

        for bad in ["0", "-1", "many"] {
            let result = ProviderConfig::from_properties(&props(&[
                (PROP_STORAGE_DIRECTORY, "/tmp/flows"),
                (PROP_PUSH_ATTEMPTS, bad),
            ]));
            assert!(matches!(
                result,
                Err(ConfigError::InvalidValue { property: PROP_PUSH_ATTEMPTS, .. })
            ));
        }
    }

    #[test]
    fn test_builder() {
        let config = ProviderConfig::new("/tmp/flows")
            .remote("origin")
            .credentials("bob", "pw")
            .sync_policy(SyncPolicy::background(0));

        assert_eq!(config.remote_name(), Some("origin"));
        assert_eq!(config.remote_credentials().unwrap().username, "bob");
        // attempts are clamped to at least one
        assert!(matches!(config.sync_policy, SyncPolicy::Background { max_attempts: 1, .. }));
        config.validate().unwrap();
    }

    #[test]
    fn test_builder_credentials_before_remote() {
        let config = ProviderConfig::new("/tmp/flows").credentials("bob", "pw");
        assert!(matches!(config.validate(), Err(ConfigError::CredentialsWithoutRemote)));

        let config = config.remote("origin");
        assert_eq!(config.remote_credentials(), Some(&RemoteCredentials::new("bob", "pw")));
        config.validate().unwrap();
    }

    #[test]
    fn test_credentials_without_remote_rejected() {
        let result = ProviderConfig::from_properties(&props(&[
            (PROP_STORAGE_DIRECTORY, "/tmp/flows"),
            (PROP_REMOTE_TO_PUSH, " "),
            (PROP_REMOTE_USER, "alice"),
            (PROP_REMOTE_PASSWORD, "secret"),
        ]));
        assert!(matches!(result, Err(ConfigError::CredentialsWithoutRemote)));
    }
}

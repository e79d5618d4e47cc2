use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, UnsealError};
use crate::shamir::{MAX_SHARES, MIN_THRESHOLD};
use crate::storage::FileStore;

pub const DEFAULT_THRESHOLD: u8 = 3;
pub const DEFAULT_MAX_SHARES: u8 = 5;
pub const DEFAULT_VERIFICATION_BUCKET: &str = "global";
/// Key of the verification record in [`DEFAULT_VERIFICATION_BUCKET`]
///
/// Names record format 1, the one-block layout described at
/// [`crate::VERIFICATION_MARKER`]. A store holding a record of another format under this
/// key refuses every candidate key instead of being rewritten; a new format gets a new key.
pub const DEFAULT_VERIFICATION_KEY: &str = "unseal.init";

/// Master key provider backing the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// k-of-n Shamir shares over the 2^521 - 1 field
    #[default]
    Shamir,
}

/// Configuration for the unlock lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Master key provider
    pub provider: ProviderKind,
    /// Shares needed before reconstruction is attempted
    pub threshold: u8,
    /// Most shares accepted while locked before further submissions are refused
    pub max_shares: u8,
    /// Location of the file store, if one is used
    pub storage_path: Option<PathBuf>,
    /// Bucket holding the verification record
    pub verification_bucket: String,
    /// Key of the verification record inside its bucket
    pub verification_key: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            threshold: DEFAULT_THRESHOLD,
            max_shares: DEFAULT_MAX_SHARES,
            storage_path: None,
            verification_bucket: DEFAULT_VERIFICATION_BUCKET.to_string(),
            verification_key: DEFAULT_VERIFICATION_KEY.to_string(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the threshold
    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    /// Sets the maximum number of accumulated shares
    pub fn with_max_shares(mut self, max_shares: u8) -> Self {
        self.max_shares = max_shares;
        self
    }

    /// Sets the file store location
    pub fn with_storage_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    /// Sets where the verification record is stored
    pub fn with_verification_key(mut self, bucket: &str, key: &str) -> Self {
        self.verification_bucket = bucket.to_string();
        self.verification_key = key.to_string();
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if !(MIN_THRESHOLD..=MAX_SHARES).contains(&self.threshold) {
            return Err(UnsealError::InvalidConfig(format!(
                "threshold {} must be between {MIN_THRESHOLD} and {MAX_SHARES}",
                self.threshold
            )));
        }
        if self.max_shares < self.threshold || self.max_shares > MAX_SHARES {
            return Err(UnsealError::InvalidConfig(format!(
                "max shares {} must be between threshold {} and {MAX_SHARES}",
                self.max_shares, self.threshold
            )));
        }
        if self.verification_bucket.is_empty() || self.verification_key.is_empty() {
            return Err(UnsealError::InvalidConfig(
                "verification record location cannot be empty".into(),
            ));
        }
        Ok(())
    }

    /// Parses and validates a TOML document
    ///
    /// # Example
    /// ```
    /// use shamir_unseal::Config;
    ///
    /// let config = Config::from_toml_str(r#"
    ///     [masterkey]
    ///     type = "shamir"
    ///     threshold = 2
    ///     max_shares = 3
    ///
    ///     [storage]
    ///     path = "/var/lib/unseal/store.db"
    /// "#).unwrap();
    /// assert_eq!(config.threshold, 2);
    /// ```
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents)
            .map_err(|e| UnsealError::InvalidConfig(format!("failed to parse config: {e}")))?;
        let config = Self::from(file);
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            UnsealError::InvalidConfig(format!(
                "failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Renders the configuration in the format [`Config::from_toml_str`] reads
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(&ConfigFile::from(self)).map_err(|e| {
            UnsealError::InvalidConfig(format!("failed to serialize config: {e}"))
        })
    }

    /// Opens the file store named by `storage_path`
    pub fn open_file_store(&self) -> Result<FileStore> {
        let path = self
            .storage_path
            .as_ref()
            .ok_or_else(|| UnsealError::InvalidConfig("no path for storage".into()))?;
        FileStore::open(path)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ConfigFile {
    masterkey: MasterKeySection,
    #[serde(default)]
    storage: StorageSection,
}

#[derive(Debug, Serialize, Deserialize)]
struct MasterKeySection {
    #[serde(rename = "type")]
    provider: ProviderKind,
    #[serde(default = "default_threshold")]
    threshold: u8,
    #[serde(default = "default_max_shares")]
    max_shares: u8,
    #[serde(default = "default_verification_bucket")]
    verification_bucket: String,
    #[serde(default = "default_verification_key")]
    verification_key: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StorageSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<PathBuf>,
}

fn default_threshold() -> u8 {
    DEFAULT_THRESHOLD
}

fn default_max_shares() -> u8 {
    DEFAULT_MAX_SHARES
}

fn default_verification_bucket() -> String {
    DEFAULT_VERIFICATION_BUCKET.to_string()
}

fn default_verification_key() -> String {
    DEFAULT_VERIFICATION_KEY.to_string()
}

impl From<ConfigFile> for Config {
    fn from(file: ConfigFile) -> Self {
        Self {
            provider: file.masterkey.provider,
            threshold: file.masterkey.threshold,
            max_shares: file.masterkey.max_shares,
            storage_path: file.storage.path,
            verification_bucket: file.masterkey.verification_bucket,
            verification_key: file.masterkey.verification_key,
        }
    }
}

impl From<&Config> for ConfigFile {
    fn from(config: &Config) -> Self {
        Self {
            masterkey: MasterKeySection {
                provider: config.provider,
                threshold: config.threshold,
                max_shares: config.max_shares,
                verification_bucket: config.verification_bucket.clone(),
                verification_key: config.verification_key.clone(),
            },
            storage: StorageSection {
                path: config.storage_path.clone(),
            },
        }
    }
}

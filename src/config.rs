//! config
//!
//! Configuration schema and loading.
//!
//! # Overview
//!
//! A [`StorageConfig`] describes one repository: where the `git` executable
//! lives, which control-file directory to operate on, how raw path/author
//! bytes should be decoded, and whether the revision cache should persist
//! across storage instances.
//!
//! The surrounding application hands configuration over as opaque string
//! key/value pairs; [`StorageConfig::from_params`] decodes them. The same
//! schema also loads from TOML for the inspection CLI.
//!
//! # Validation
//!
//! Configuration errors are fatal and eager: a missing or incomplete
//! control directory is detected at storage construction and propagated,
//! never silently degraded into empty query results.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No control-file directory was supplied.
    #[error("no repository directory configured")]
    MissingDir,

    /// The configured directory is not a git control directory.
    #[error("'{path}' does not look like a git directory (missing {missing})")]
    NotAGitDir {
        /// The directory that was checked
        path: PathBuf,
        /// The entry whose absence disqualified it
        missing: String,
    },

    /// Failed to read a config file.
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse a config file.
    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    /// A parameter value could not be interpreted.
    #[error("invalid config value for '{key}': {value}")]
    InvalidValue { key: String, value: String },

    /// The external tool is older than the supported minimum.
    #[error("git version {found} is below the required minimum {required}")]
    VersionTooOld { found: String, required: String },
}

/// Configuration for one repository storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    /// Path to the `git` executable.
    #[serde(default = "default_git_bin")]
    pub git_bin: PathBuf,

    /// The control-file directory (a `.git` directory or a bare repository).
    pub git_dir: PathBuf,

    /// Text encoding for paths and author strings stored as raw bytes.
    ///
    /// `None` (and `"utf-8"`) decode lossily as UTF-8; this layer does not
    /// transcode other encodings and records the label for the caller.
    #[serde(default)]
    pub encoding: Option<String>,

    /// Hand the revision cache to the next storage built for this path.
    #[serde(default)]
    pub persist_cache: bool,
}

fn default_git_bin() -> PathBuf {
    PathBuf::from("git")
}

impl StorageConfig {
    /// Configuration with defaults for a control directory.
    pub fn new(git_dir: impl Into<PathBuf>) -> Self {
        Self {
            git_bin: default_git_bin(),
            git_dir: git_dir.into(),
            encoding: None,
            persist_cache: false,
        }
    }

    /// Decode opaque key/value parameters from the enclosing application.
    ///
    /// Recognized keys: `git_bin`, `git_dir`, `encoding`, `persist_cache`.
    /// Unknown keys are ignored so registries can carry parameters for
    /// other backends alongside ours.
    ///
    /// # Errors
    ///
    /// `ConfigError::MissingDir` when `git_dir` is absent;
    /// `ConfigError::InvalidValue` for an unparsable `persist_cache`.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let git_dir = params.get("git_dir").ok_or(ConfigError::MissingDir)?;
        let mut config = Self::new(git_dir);

        if let Some(bin) = params.get("git_bin") {
            config.git_bin = PathBuf::from(bin);
        }
        if let Some(enc) = params.get("encoding") {
            if !enc.is_empty() {
                config.encoding = Some(enc.clone());
            }
        }
        if let Some(persist) = params.get("persist_cache") {
            config.persist_cache = match persist.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "enabled" => true,
                "0" | "false" | "no" | "disabled" | "" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "persist_cache".into(),
                        value: persist.clone(),
                    })
                }
            };
        }
        Ok(config)
    }

    /// Load from a TOML file (used by the CLI).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|err| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    /// Verify that `git_dir` is a plausible control directory.
    ///
    /// Checks for the entries every git directory carries: `HEAD`,
    /// `objects/`, `refs/`. Run eagerly at storage construction.
    pub fn validate_git_dir(&self) -> Result<(), ConfigError> {
        for entry in ["HEAD", "objects", "refs"] {
            if !self.git_dir.join(entry).exists() {
                return Err(ConfigError::NotAGitDir {
                    path: self.git_dir.clone(),
                    missing: entry.to_string(),
                });
            }
        }
        Ok(())
    }
}

//! Run configuration
//!
//! Every field has a default, so an empty TOML document (or no file at all)
//! yields the stock layout: `.stdf` files go to `stdf/`, `.txt` files go to
//! `summary/`, both below the working directory.

use crate::error::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top level configuration for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Suffixes that are sometimes ZIP containers and sometimes plain data.
    pub provisional_zip_suffixes: Vec<String>,

    /// Payload kinds, one master directory each.
    #[serde(rename = "payload")]
    pub payloads: Vec<PayloadKind>,

    /// Platform metadata noise.
    pub metadata: MetadataConfig,

    /// Retry policy for deleting an archive after extraction.
    pub delete_retry: RetryConfig,

    /// Run the organize phase
    pub organize: bool,

    /// Run the cleanup phase
    pub cleanup: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provisional_zip_suffixes: vec![".stdf".to_string()],
            payloads: vec![
                PayloadKind::new("stdf", &[".stdf"], "stdf"),
                PayloadKind::new("summary", &[".txt"], "summary"),
            ],
            metadata: MetadataConfig::default(),
            delete_retry: RetryConfig::default(),
            organize: true,
            cleanup: true,
        }
    }
}

impl Config {
    /// Load and validate a configuration file
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = fs_err::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(contents).map_err(|e| ArchiveError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the pipeline relies on
    pub fn validate(&self) -> Result<()> {
        if self.payloads.is_empty() {
            return Err(ArchiveError::config("at least one payload kind is required"));
        }

        let mut directories = HashSet::new();
        for payload in &self.payloads {
            if payload.suffixes.iter().all(|s| s.is_empty()) {
                return Err(ArchiveError::config(format!(
                    "payload kind '{}' has no suffixes",
                    payload.name
                )));
            }
            if payload.directory.as_os_str().is_empty() {
                return Err(ArchiveError::config(format!(
                    "payload kind '{}' has no directory",
                    payload.name
                )));
            }
            if !directories.insert(&payload.directory) {
                return Err(ArchiveError::config(format!(
                    "master directory {} is used by more than one payload kind",
                    payload.directory.display()
                )));
            }
        }

        if self.provisional_zip_suffixes.iter().any(String::is_empty) {
            return Err(ArchiveError::config("empty provisional zip suffix"));
        }

        if self.delete_retry.max_attempts == 0 {
            return Err(ArchiveError::config(
                "delete_retry.max_attempts must be at least 1",
            ));
        }

        Ok(())
    }

    /// Master directories resolved against the working directory
    pub fn master_directories(&self, working_dir: &Path) -> Vec<PathBuf> {
        self.payloads
            .iter()
            .map(|payload| payload.master_directory(working_dir))
            .collect()
    }
}

/// One tracked kind of payload file and its destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PayloadKind {
    pub name: String,
    /// Case-insensitive suffixes, including the leading dot
    pub suffixes: Vec<String>,
    /// Master directory, relative paths are resolved against the working
    /// directory
    pub directory: PathBuf,
}

impl PayloadKind {
    pub fn new(name: &str, suffixes: &[&str], directory: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            suffixes: suffixes.iter().map(|s| s.to_string()).collect(),
            directory: directory.into(),
        }
    }

    pub fn matches(&self, file_name: &str) -> bool {
        let lower = file_name.to_lowercase();
        self.suffixes
            .iter()
            .filter(|suffix| !suffix.is_empty())
            .any(|suffix| lower.ends_with(&suffix.to_lowercase()))
    }

    pub fn master_directory(&self, working_dir: &Path) -> PathBuf {
        if self.directory.is_absolute() {
            self.directory.clone()
        } else {
            working_dir.join(&self.directory)
        }
    }
}

/// Platform generated files and folders (resource forks, Finder state).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetadataConfig {
    /// Names starting with one of these are markers
    pub prefixes: Vec<String>,
    /// Names equal to one of these are markers
    pub names: Vec<String>,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            prefixes: vec!["._".to_string()],
            names: vec!["__MACOSX".to_string(), ".DS_Store".to_string()],
        }
    }
}

impl MetadataConfig {
    pub fn is_marker(&self, name: &str) -> bool {
        self.prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && name.starts_with(prefix.as_str()))
            || self.names.iter().any(|marker| marker == name)
    }
}

/// Bounded exponential backoff for deleting a just-extracted archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 200,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before the retry following `attempt` (zero based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt as i32);
        Duration::from_millis((self.initial_delay_ms as f64 * factor) as u64)
    }
}

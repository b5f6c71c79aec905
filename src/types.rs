use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Name of a storage bucket, and by convention the base name of its model.
pub type BucketId = String;

pub const MASTER_BRANCH: &str = "master";

// Model branch tag ("master" or a named experiment)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelBranch(String);

impl ModelBranch {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Self::default();
        }
        Self(trimmed.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_master(&self) -> bool {
        self.0 == MASTER_BRANCH
    }

    /// Suffix appended to the artifact file name: empty for master, `-{branch}` otherwise.
    pub fn artifact_suffix(&self) -> String {
        if self.is_master() {
            String::new()
        } else {
            format!("-{}", self.0)
        }
    }
}

impl Default for ModelBranch {
    fn default() -> Self {
        Self(MASTER_BRANCH.to_string())
    }
}

impl fmt::Display for ModelBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short-lived bearer credential. Never persisted, so not `Serialize`.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub(crate) fn new(value: String) -> Self {
        Self(value)
    }

    pub fn secret(&self) -> &str {
        &self.0
    }

    pub(crate) fn bearer(&self) -> String {
        format!("bearer {}", self.0)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

// What we remember about a model installed for one bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledModelRecord {
    /// `Last-Modified` of the remote artifact at install time
    pub last_modified: DateTime<Utc>,
    pub installed_at: DateTime<Utc>,
    #[serde(default)]
    pub sha256: String,
}

// Result of a successful download + compile + install
#[derive(Debug, Clone, Serialize)]
pub struct InstallOutcome {
    pub bucket: BucketId,
    pub path: PathBuf,
    pub bytes_downloaded: u64,
    pub sha256: String,
    /// Set when the backup exclusion step failed; the model is still installed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_exclusion_error: Option<String>,
}

// Result of the orchestrated "update if stale" workflow
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateStatus {
    UpToDate {
        bucket: BucketId,
        last_modified: DateTime<Utc>,
    },
    Updated {
        bucket: BucketId,
        last_modified: DateTime<Utc>,
        outcome: InstallOutcome,
    },
}

impl UpdateStatus {
    pub fn was_updated(&self) -> bool {
        matches!(self, UpdateStatus::Updated { .. })
    }
}

// Image stored in a bucket under a generated name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedImage {
    pub bucket: BucketId,
    pub key: String,
    pub url: String,
}

// Bucket and the timestamp of its model, as found by discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableModel {
    pub bucket: BucketId,
    pub last_modified: DateTime<Utc>,
}

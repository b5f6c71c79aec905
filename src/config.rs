// Runtime configuration for the storage client

use std::path::PathBuf;
use std::time::Duration;

use crate::types::ModelBranch;

pub const DEFAULT_ENDPOINT: &str = "https://s3-api.us-geo.objectstorage.softlayer.net";
pub const DEFAULT_IAM_URL: &str = "https://iam.ng.bluemix.net/oidc/token";

/// Which compiler turns a raw `.mlmodel` into a loadable `.mlmodelc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerKind {
    CoreMl,
    Passthrough,
}

impl CompilerKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "coreml" | "core-ml" | "xcrun" => Some(CompilerKind::CoreMl),
            "passthrough" | "none" => Some(CompilerKind::Passthrough),
            _ => None,
        }
    }
}

impl Default for CompilerKind {
    fn default() -> Self {
        if cfg!(target_vendor = "apple") {
            CompilerKind::CoreMl
        } else {
            CompilerKind::Passthrough
        }
    }
}

#[derive(Clone)]
pub struct SyncConfig {
    /// Object storage endpoint, including scheme
    pub endpoint: String,
    /// IAM token exchange endpoint
    pub iam_url: String,
    pub api_key: String,
    /// Service instance id sent when listing buckets
    pub resource_instance_id: String,
    pub model_branch: ModelBranch,
    /// Timeout for token, metadata, listing and upload requests
    pub request_timeout: Duration,
    /// Timeout for the model artifact download
    pub download_timeout: Duration,
    pub connect_timeout: Duration,
    /// Overrides the per-user application data directory
    pub data_dir: Option<PathBuf>,
    /// Overrides the system temp directory for scratch downloads
    pub scratch_dir: Option<PathBuf>,
    pub compiler: CompilerKind,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            iam_url: DEFAULT_IAM_URL.to_string(),
            api_key: String::new(),
            resource_instance_id: String::new(),
            model_branch: ModelBranch::default(),
            request_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(600), // models can be large
            connect_timeout: Duration::from_secs(30),
            data_dir: None,
            scratch_dir: None,
            compiler: CompilerKind::default(),
        }
    }
}

// The api key must never reach a log line.
impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("endpoint", &self.endpoint)
            .field("iam_url", &self.iam_url)
            .field("api_key", &"<redacted>")
            .field("resource_instance_id", &self.resource_instance_id)
            .field("model_branch", &self.model_branch)
            .field("request_timeout", &self.request_timeout)
            .field("download_timeout", &self.download_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("data_dir", &self.data_dir)
            .field("scratch_dir", &self.scratch_dir)
            .field("compiler", &self.compiler)
            .finish()
    }
}

impl SyncConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, fallback: Duration| {
            lookup(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };

        Self {
            endpoint: lookup("COS_ENDPOINT")
                .map(|s| normalize_endpoint(&s))
                .unwrap_or(defaults.endpoint),
            iam_url: lookup("COS_IAM_URL").unwrap_or(defaults.iam_url),
            api_key: lookup("COS_API_KEY")
                .or_else(|| lookup("API_KEY"))
                .unwrap_or_default(),
            resource_instance_id: lookup("COS_RESOURCE_INSTANCE_ID")
                .or_else(|| lookup("RESOURCE_INSTANCE_ID"))
                .unwrap_or_default(),
            model_branch: lookup("COS_MODEL_BRANCH")
                .map(ModelBranch::new)
                .unwrap_or(defaults.model_branch),
            request_timeout: secs("COS_REQUEST_TIMEOUT_SECS", defaults.request_timeout),
            download_timeout: secs("COS_DOWNLOAD_TIMEOUT_SECS", defaults.download_timeout),
            connect_timeout: secs("COS_CONNECT_TIMEOUT_SECS", defaults.connect_timeout),
            data_dir: lookup("COS_DATA_DIR").map(PathBuf::from),
            scratch_dir: lookup("COS_SCRATCH_DIR").map(PathBuf::from),
            compiler: lookup("COS_MODEL_COMPILER")
                .and_then(|s| CompilerKind::parse(&s))
                .unwrap_or(defaults.compiler),
        }
    }
}

/// Accepts a bare host (`s3-api.example.net`) or a full base url.
fn normalize_endpoint(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

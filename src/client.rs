// Object storage client shared by the freshness check, model download,
// bucket discovery and image upload operations

use crate::auth::TokenProvider;
use crate::bucket_list::parse_bucket_list;
use crate::config::SyncConfig;
use crate::download::{compiler_for, InstallLocks, ModelCompiler};
use crate::error::{SyncError, SyncResult};
use crate::paths::{compiled_model_path, get_app_data_dir, raw_model_file_name, validate_bucket_id};
use crate::types::{AccessToken, BucketId, ModelBranch};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Url};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// Header naming the storage service instance whose buckets are listed
pub const SERVICE_INSTANCE_HEADER: &str = "ibm-service-instance-id";

/// Create HTTP client for storage calls. Per-request timeouts are set by each operation.
fn create_http_client(config: &SyncConfig) -> SyncResult<Client> {
    Client::builder()
        .user_agent(concat!("cloud-vision-sync/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .connect_timeout(config.connect_timeout)
        .pool_idle_timeout(std::time::Duration::from_secs(90))
        .tcp_keepalive(std::time::Duration::from_secs(60))
        .build()
        .map_err(SyncError::from)
}

pub struct CloudVision {
    pub(crate) http: Client,
    pub(crate) config: SyncConfig,
    tokens: TokenProvider,
    pub(crate) compiler: Arc<dyn ModelCompiler>,
    pub(crate) install_locks: InstallLocks,
}

impl CloudVision {
    /// Create a client using the compiler selected in the config.
    pub fn new(config: SyncConfig) -> SyncResult<Self> {
        let compiler = compiler_for(config.compiler);
        Self::with_compiler(config, compiler)
    }

    pub fn with_compiler(config: SyncConfig, compiler: Arc<dyn ModelCompiler>) -> SyncResult<Self> {
        let http = create_http_client(&config)?;
        let tokens = TokenProvider::new(
            http.clone(),
            config.iam_url.clone(),
            config.api_key.clone(),
            config.request_timeout,
        );

        log::info!(
            "Storage client ready: endpoint={}, branch={}, compiler={:?}",
            config.endpoint,
            config.model_branch,
            config.compiler
        );

        Ok(Self {
            http,
            config,
            tokens,
            compiler,
            install_locks: InstallLocks::default(),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn install_locks(&self) -> &InstallLocks {
        &self.install_locks
    }

    /// Fresh token for one logical operation.
    pub async fn get_token(&self) -> SyncResult<AccessToken> {
        self.tokens.get_token().await
    }

    fn endpoint_url(&self) -> SyncResult<Url> {
        let mut url = Url::parse(&self.config.endpoint)
            .map_err(|e| SyncError::UrlConstruction(format!("endpoint '{}': {}", self.config.endpoint, e)))?;
        if url.cannot_be_a_base() {
            return Err(SyncError::UrlConstruction(format!(
                "endpoint '{}' cannot hold object paths",
                self.config.endpoint
            )));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    /// `{endpoint}/{bucket}/{key}`
    pub fn object_url(&self, bucket: &str, key: &str) -> SyncResult<Url> {
        validate_bucket_id(bucket)?;
        let mut url = self.endpoint_url()?;
        url.path_segments_mut()
            .map_err(|_| SyncError::UrlConstruction("endpoint cannot hold object paths".to_string()))?
            .pop_if_empty()
            .push(bucket)
            .push(key);
        Ok(url)
    }

    /// `{endpoint}/{bucket}/{bucket}[-{branch}].mlmodel`
    pub fn model_url(&self, bucket: &str, branch: &ModelBranch) -> SyncResult<Url> {
        let file_name = format!("{}{}", bucket, branch.artifact_suffix());
        self.object_url(bucket, &raw_model_file_name(&file_name))
    }

    pub fn app_data_dir(&self) -> SyncResult<PathBuf> {
        get_app_data_dir(self.config.data_dir.as_deref())
    }

    /// List the buckets of a storage service instance.
    ///
    /// The listing is parsed best-effort: a malformed document is logged and the
    /// names read before the error are returned.
    pub async fn get_bucket_list(&self, resource_id: &str) -> SyncResult<Vec<BucketId>> {
        let url = self.endpoint_url()?;
        let token = self.get_token().await?;

        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, token.bearer())
            .header(SERVICE_INSTANCE_HEADER, resource_id)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(SyncError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Protocol {
                status: Some(status.as_u16()),
                message: "Failed get bucket".to_string(),
            });
        }

        let body = response.bytes().await.map_err(SyncError::from)?;
        let listing = parse_bucket_list(&body);
        if let Some(error) = &listing.error {
            log::warn!(
                "Bucket listing was malformed, keeping {} bucket(s) read before the error: {}",
                listing.names.len(),
                error
            );
        }

        log::info!("Found {} bucket(s)", listing.names.len());
        Ok(listing.into_partial())
    }

    /// Path of the installed compiled model for a bucket.
    pub fn locate_model(&self, bucket: &str) -> SyncResult<PathBuf> {
        validate_bucket_id(bucket)?;
        let path = compiled_model_path(&self.app_data_dir()?, bucket);
        if path.exists() {
            Ok(path)
        } else {
            Err(SyncError::NotFound(format!(
                "Failed to locate a Core ML model on disk for bucket {}",
                bucket
            )))
        }
    }

    /// Delete the installed compiled model. Returns false when nothing was installed.
    pub fn remove_model(&self, bucket: &str) -> SyncResult<bool> {
        validate_bucket_id(bucket)?;
        let path = compiled_model_path(&self.app_data_dir()?, bucket);
        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(SyncError::fs("Failed to inspect model", &path, e)),
        };

        let result = if metadata.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        result.map_err(|e| SyncError::fs("Failed to delete model", &path, e))?;

        log::info!("Removed model for bucket '{}' at {:?}", bucket, path);
        Ok(true)
    }
}

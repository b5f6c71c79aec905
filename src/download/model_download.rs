use super::compiler::ModelCompiler;
use super::download_utils::{calculate_sha256, parse_last_modified};
use super::install::{exclude_from_backup, install_compiled_model};
use crate::client::CloudVision;
use crate::error::{SyncError, SyncResult};
use crate::paths::{compiled_model_path, raw_model_file_name, validate_bucket_id};
use crate::types::{AccessToken, InstallOutcome, ModelBranch};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use reqwest::header::{AUTHORIZATION, LAST_MODIFIED};
use reqwest::{StatusCode, Url};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::sync::OwnedMutexGuard;

impl CloudVision {
    /// Last-modified timestamp of the remote model for a bucket/branch (metadata only).
    pub async fn get_latest_model_date(
        &self,
        bucket: &str,
        branch: &ModelBranch,
    ) -> SyncResult<DateTime<Utc>> {
        let url = self.model_url(bucket, branch)?;
        let token = self.get_token().await?;

        let response = self
            .http
            .head(url)
            .header(AUTHORIZATION, token.bearer())
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(SyncError::from)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SyncError::NotFound(format!(
                "no model for bucket '{}' on branch '{}'",
                bucket, branch
            )));
        }
        if !status.is_success() {
            return Err(SyncError::Protocol {
                status: Some(status.as_u16()),
                message: "Couldn't fetch date".to_string(),
            });
        }

        let header = response
            .headers()
            .get(LAST_MODIFIED)
            .ok_or_else(|| SyncError::Protocol {
                status: Some(status.as_u16()),
                message: "response has no Last-Modified header".to_string(),
            })?;
        let value = header
            .to_str()
            .map_err(|e| SyncError::Parse(format!("Last-Modified is not text: {}", e)))?;

        let date = parse_last_modified(value)?;
        log::debug!("Model for bucket '{}' last modified {}", bucket, date);
        Ok(date)
    }

    /// Download, compile and install the model for a bucket.
    ///
    /// Installs for the same bucket are serialized; other buckets run concurrently.
    pub async fn download_model(
        &self,
        bucket: &str,
        branch: &ModelBranch,
    ) -> SyncResult<InstallOutcome> {
        let guard = self.install_locks.acquire(bucket).await;
        let (outcome, _guard) = self.download_model_locked(bucket, branch, guard).await?;
        Ok(outcome)
    }

    /// Body of [`download_model`](Self::download_model). `guard` must be the bucket's install lock.
    ///
    /// The guard and the scratch directory move into the blocking install step and
    /// live until it finishes, even if this future is dropped. The guard is handed
    /// back on success so the caller can finish its bookkeeping under the lock.
    pub(crate) async fn download_model_locked(
        &self,
        bucket: &str,
        branch: &ModelBranch,
        guard: OwnedMutexGuard<()>,
    ) -> SyncResult<(InstallOutcome, OwnedMutexGuard<()>)> {
        validate_bucket_id(bucket)?;
        let url = self.model_url(bucket, branch)?;
        let token = self.get_token().await?;

        // Removed when dropped, including on cancellation before the install step.
        let downloads = self.create_scratch_dir("cloud-vision-download-")?;
        let app_dir = self.app_data_dir()?;

        let source = downloads.path().join(raw_model_file_name(bucket));
        let destination = compiled_model_path(&app_dir, bucket);

        log::info!("Starting model '{}' download from: {}", bucket, url);
        log::info!("Download destination: {:?}", source);

        let bytes_downloaded = download_to_file(self, &url, &token, &source).await?;

        let compile_dir = self.create_scratch_dir("cloud-vision-compile-")?;
        let compiler = Arc::clone(&self.compiler);
        let install_destination = destination.clone();
        let (result, guard) = tokio::task::spawn_blocking(move || {
            let result = compile_and_install(compiler, &source, compile_dir, &install_destination);
            drop(downloads);
            (result, guard)
        })
        .await
        .map_err(|e| SyncError::Compilation(format!("install task failed: {}", e)))?;
        let (sha256, backup_exclusion_error) = result?;

        log::info!("Model '{}' ready at: {:?}", bucket, destination);

        let outcome = InstallOutcome {
            bucket: bucket.to_string(),
            path: destination,
            bytes_downloaded,
            sha256,
            backup_exclusion_error,
        };
        Ok((outcome, guard))
    }

    fn create_scratch_dir(&self, prefix: &str) -> SyncResult<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        let result = match &self.config.scratch_dir {
            Some(root) => {
                std::fs::create_dir_all(root)
                    .map_err(|e| SyncError::fs("Failed to create temporary downloads directory", root, e))?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        };
        result.map_err(|e| {
            SyncError::fs(
                "Failed to create temporary downloads directory",
                self.config
                    .scratch_dir
                    .clone()
                    .unwrap_or_else(std::env::temp_dir),
                e,
            )
        })
    }
}

/// Steps 4-6 of an install. `compile_dir` is dropped (and deleted) on return.
fn compile_and_install(
    compiler: Arc<dyn ModelCompiler>,
    source: &Path,
    compile_dir: TempDir,
    destination: &Path,
) -> SyncResult<(String, Option<String>)> {
    let sha256 = calculate_sha256(source)?;

    let compiled: PathBuf = compiler.compile(source, compile_dir.path())?;
    install_compiled_model(&compiled, destination)?;

    let backup_exclusion_error = match exclude_from_backup(destination) {
        Ok(()) => None,
        Err(e) => {
            log::warn!("Model installed but backup exclusion failed: {}", e);
            Some(e.to_string())
        }
    };

    Ok((sha256, backup_exclusion_error))
}

/// Stream the artifact at `url` into `path`. Any non-2xx status is a protocol error.
async fn download_to_file(
    cloud: &CloudVision,
    url: &Url,
    token: &AccessToken,
    path: &Path,
) -> SyncResult<u64> {
    let response = cloud
        .http
        .get(url.clone())
        .header(AUTHORIZATION, token.bearer())
        .header("Accept", "*/*")
        .header("Accept-Encoding", "identity")
        .timeout(cloud.config.download_timeout)
        .send()
        .await
        .map_err(SyncError::from)?;

    let status = response.status();
    log::info!("HTTP response status: {}", status);

    if !status.is_success() {
        return Err(SyncError::Protocol {
            status: Some(status.as_u16()),
            message: format!(
                "Status code was not acceptable: {} - {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            ),
        });
    }

    let total_size = response.content_length();
    if let Some(size) = total_size {
        log::info!("Model size: {:.2} MB", size as f64 / 1_048_576.0);
    }

    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| SyncError::fs("Failed to create model file", path, e))?;

    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;
    let mut last_log_mb = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(SyncError::from)?;

        file.write_all(&chunk)
            .await
            .map_err(|e| SyncError::fs("Failed to write chunk", path, e))?;

        downloaded += chunk.len() as u64;

        // Log progress every 10 MB
        let current_log_mb = downloaded / (10 * 1024 * 1024);
        if current_log_mb > last_log_mb {
            last_log_mb = current_log_mb;
            match total_size {
                Some(total) => log::info!(
                    "Downloaded: {:.2} MB ({:.1}%)",
                    downloaded as f64 / 1_048_576.0,
                    (downloaded as f64 / total as f64) * 100.0
                ),
                None => log::info!("Downloaded: {:.2} MB", downloaded as f64 / 1_048_576.0),
            }
        }
    }

    file.flush()
        .await
        .map_err(|e| SyncError::fs("Failed to flush file", path, e))?;
    file.sync_all()
        .await
        .map_err(|e| SyncError::fs("Failed to sync file", path, e))?;

    log::info!(
        "Download completed! Total: {:.2} MB",
        downloaded as f64 / 1_048_576.0
    );

    Ok(downloaded)
}

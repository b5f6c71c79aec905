// Sync workflows: "which buckets have a model" and "update the local model if stale"

use crate::client::CloudVision;
use crate::error::{SyncError, SyncResult};
use crate::paths::compiled_model_path;
use crate::settings::SettingsStore;
use crate::types::{AvailableModel, InstalledModelRecord, ModelBranch, UpdateStatus};
use chrono::Utc;
use futures_util::future::join_all;
use std::sync::Arc;

pub struct ModelSync {
    cloud: Arc<CloudVision>,
    settings: SettingsStore,
}

impl ModelSync {
    pub fn new(cloud: Arc<CloudVision>, settings: SettingsStore) -> Self {
        Self { cloud, settings }
    }

    /// Use the settings file inside the client's app data directory.
    pub fn open(cloud: Arc<CloudVision>) -> SyncResult<Self> {
        let settings = SettingsStore::open(&cloud.app_data_dir()?);
        Ok(Self::new(cloud, settings))
    }

    pub fn cloud(&self) -> &CloudVision {
        &self.cloud
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Buckets of `resource_id` that hold a model on the configured branch.
    ///
    /// One freshness check per bucket runs concurrently. Buckets whose check
    /// fails for any reason are left out; listing order is preserved.
    pub async fn discover_models(&self, resource_id: &str) -> SyncResult<Vec<AvailableModel>> {
        let buckets = self.cloud.get_bucket_list(resource_id).await?;
        let branch = &self.cloud.config().model_branch;

        let checks = buckets.iter().map(|bucket| async move {
            match self.cloud.get_latest_model_date(bucket, branch).await {
                Ok(last_modified) => Some(AvailableModel {
                    bucket: bucket.clone(),
                    last_modified,
                }),
                Err(e) => {
                    log::debug!("Bucket '{}' has no usable model: {}", bucket, e);
                    None
                }
            }
        });

        let models: Vec<AvailableModel> = join_all(checks).await.into_iter().flatten().collect();
        log::info!(
            "{} of {} bucket(s) have a model on branch '{}'",
            models.len(),
            buckets.len(),
            branch
        );
        Ok(models)
    }

    /// Download and install the model for `bucket` unless the installed copy
    /// is at least as new as the remote one.
    pub async fn update_if_stale(&self, bucket: &str, branch: &ModelBranch) -> SyncResult<UpdateStatus> {
        let guard = self.cloud.install_locks().acquire(bucket).await;

        let remote = self.cloud.get_latest_model_date(bucket, branch).await?;
        let installed = self.settings.installed_model(bucket)?;
        let on_disk = compiled_model_path(&self.cloud.app_data_dir()?, bucket).exists();

        if let Some(record) = &installed {
            if record.last_modified >= remote && on_disk {
                log::info!(
                    "Model for '{}' is up to date (installed {}, remote {})",
                    bucket,
                    record.last_modified,
                    remote
                );
                return Ok(UpdateStatus::UpToDate {
                    bucket: bucket.to_string(),
                    last_modified: record.last_modified,
                });
            }
            if !on_disk {
                log::warn!("Install record for '{}' exists but the model is missing, reinstalling", bucket);
            }
        }

        let (outcome, _guard) = self.cloud.download_model_locked(bucket, branch, guard).await?;

        self.settings.record_install(
            bucket,
            InstalledModelRecord {
                last_modified: remote,
                installed_at: Utc::now(),
                sha256: outcome.sha256.clone(),
            },
        )?;

        Ok(UpdateStatus::Updated {
            bucket: bucket.to_string(),
            last_modified: remote,
            outcome,
        })
    }

    /// [`update_if_stale`](Self::update_if_stale) for the selected bucket on the configured branch.
    pub async fn check_selected(&self) -> SyncResult<UpdateStatus> {
        let bucket = self
            .settings
            .selected_bucket()?
            .ok_or_else(|| SyncError::NotFound("no bucket selected".to_string()))?;
        let branch = self.cloud.config().model_branch.clone();
        self.update_if_stale(&bucket, &branch).await
    }

    /// Delete the installed model and its install record.
    pub async fn remove_model(&self, bucket: &str) -> SyncResult<bool> {
        let _guard = self.cloud.install_locks().acquire(bucket).await;
        let removed = self.cloud.remove_model(bucket)?;
        let forgotten = self.settings.forget_install(bucket)?;
        Ok(removed || forgotten)
    }
}

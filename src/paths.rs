use crate::error::{SyncError, SyncResult};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "com.cloud-annotations.vision";
const SETTINGS_FILE: &str = "settings.json";
pub const COMPILED_MODEL_EXTENSION: &str = "mlmodelc";
pub const RAW_MODEL_EXTENSION: &str = "mlmodel";

// Get app data directory (cross-platform), creating it if absent
pub fn get_app_data_dir(override_dir: Option<&Path>) -> SyncResult<PathBuf> {
    let app_dir = match override_dir {
        Some(dir) => dir.to_path_buf(),
        None => dirs::data_dir()
            .ok_or_else(|| SyncError::NotFound("application data directory".to_string()))?
            .join(APP_DIR_NAME),
    };

    fs::create_dir_all(&app_dir)
        .map_err(|e| SyncError::fs("Failed to create application data directory", &app_dir, e))?;
    Ok(app_dir)
}

// Stable location of the compiled model for a bucket
pub fn compiled_model_path(app_dir: &Path, bucket: &str) -> PathBuf {
    app_dir.join(format!("{}.{}", bucket, COMPILED_MODEL_EXTENSION))
}

// File name of the raw artifact as stored in the bucket and in scratch
pub fn raw_model_file_name(bucket: &str) -> String {
    format!("{}.{}", bucket, RAW_MODEL_EXTENSION)
}

// Get path to settings file
pub fn get_settings_path(app_dir: &Path) -> PathBuf {
    app_dir.join(SETTINGS_FILE)
}

// Get path to the host log file
pub fn get_log_file_path(app_dir: &Path) -> PathBuf {
    app_dir.join("cloud-vision-host.log")
}

/// Reject bucket ids that would escape the app data directory.
pub fn validate_bucket_id(bucket: &str) -> SyncResult<()> {
    let invalid = bucket.is_empty()
        || bucket == "."
        || bucket == ".."
        || bucket.contains(['/', '\\', '\0']);
    if invalid {
        return Err(SyncError::UrlConstruction(format!(
            "invalid bucket id '{}'",
            bucket
        )));
    }
    Ok(())
}

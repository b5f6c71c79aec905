use crate::error::{SyncError, SyncResult};
use crate::paths::get_settings_path;
use crate::types::{BucketId, InstalledModelRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Persisted state: the selected bucket and one install record per bucket.
///
/// Unknown keys (such as an old global `lastModified`) are ignored on load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(rename = "bucket_id", default, skip_serializing_if = "Option::is_none")]
    pub selected_bucket: Option<BucketId>,
    #[serde(default)]
    pub installed_models: BTreeMap<BucketId, InstalledModelRecord>,
}

/// Settings file in the app data directory.
pub struct SettingsStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within the process
    lock: Mutex<()>,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Store at the default location inside `app_dir`.
    pub fn open(app_dir: &Path) -> Self {
        Self::new(get_settings_path(app_dir))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings. A missing file gives defaults; so does a corrupt one, with a warning.
    pub fn load(&self) -> SyncResult<SyncSettings> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(SyncSettings::default()),
            Err(e) => return Err(SyncError::fs("Failed to read settings", &self.path, e)),
        };

        match serde_json::from_str(&content) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                log::warn!("Settings at {:?} are unreadable, using defaults: {}", self.path, e);
                Ok(SyncSettings::default())
            }
        }
    }

    /// Save settings by writing a sibling temp file and renaming it over the old one.
    pub fn save(&self, settings: &SyncSettings) -> SyncResult<()> {
        let content = serde_json::to_string_pretty(settings)
            .map_err(|e| SyncError::Settings(format!("Failed to serialize settings: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SyncError::fs("Failed to create settings directory", parent, e))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(|e| SyncError::fs("Failed to write settings", &tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            SyncError::fs("Failed to replace settings", &self.path, e)
        })
    }

    /// Load, apply `change`, save. Returns whatever `change` returns.
    pub fn update<T>(&self, change: impl FnOnce(&mut SyncSettings) -> T) -> SyncResult<T> {
        let _guard = match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut settings = self.load()?;
        let result = change(&mut settings);
        self.save(&settings)?;
        Ok(result)
    }

    pub fn selected_bucket(&self) -> SyncResult<Option<BucketId>> {
        Ok(self.load()?.selected_bucket)
    }

    pub fn set_selected_bucket(&self, bucket: Option<BucketId>) -> SyncResult<()> {
        log::info!("Selected bucket set to: {:?}", bucket);
        self.update(|settings| settings.selected_bucket = bucket)
    }

    pub fn installed_model(&self, bucket: &str) -> SyncResult<Option<InstalledModelRecord>> {
        Ok(self.load()?.installed_models.get(bucket).cloned())
    }

    pub fn record_install(&self, bucket: &str, record: InstalledModelRecord) -> SyncResult<()> {
        self.update(|settings| {
            settings.installed_models.insert(bucket.to_string(), record);
        })
    }

    /// Drop the install record. Returns whether one existed.
    pub fn forget_install(&self, bucket: &str) -> SyncResult<bool> {
        self.update(|settings| settings.installed_models.remove(bucket).is_some())
    }
}

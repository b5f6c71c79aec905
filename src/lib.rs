// Cloud Vision model sync: token exchange, bucket discovery, model freshness,
// download + compile + install, and image upload against IBM Cloud Object Storage

pub mod auth;
pub mod bucket_list;
pub mod client;
pub mod config;
pub mod download;
pub mod error;
pub mod paths;
pub mod settings;
pub mod sync;
pub mod types;
pub mod upload;

pub use bucket_list::{parse_bucket_list, BucketListing};
pub use client::CloudVision;
pub use config::{CompilerKind, SyncConfig};
pub use download::{CoreMlCompiler, ModelCompiler, PassthroughCompiler};
pub use error::{AuthFailure, SyncError, SyncResult};
pub use settings::{SettingsStore, SyncSettings};
pub use sync::ModelSync;
pub use types::{
    AccessToken, AvailableModel, BucketId, InstallOutcome, InstalledModelRecord, ModelBranch,
    UpdateStatus, UploadedImage,
};

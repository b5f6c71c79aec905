// Download module - freshness checks, streaming download, compile and install

mod compiler;
mod download_utils;
mod install;
mod model_download;

pub use compiler::{compiler_for, CoreMlCompiler, ModelCompiler, PassthroughCompiler, PASSTHROUGH_MODEL_FILE};
pub use download_utils::{calculate_sha256, parse_last_modified};
pub use install::{exclude_from_backup, install_compiled_model, InstallLocks, CACHEDIR_TAG};

// Installing compiled models into the app data directory
//
// The destination is only ever swapped by rename, so a reader sees either the
// previous complete model or the new complete model, never a partial copy.
// Where the OS can exchange two paths atomically the destination never goes missing.

use crate::error::{SyncError, SyncResult};
use crate::types::BucketId;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// One async mutex per bucket so installs of the same bucket run one at a time.
#[derive(Clone, Default)]
pub struct InstallLocks {
    locks: Arc<Mutex<HashMap<BucketId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl InstallLocks {
    pub async fn acquire(&self, bucket: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut guard = match self.locks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.entry(bucket.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

fn sibling_path(destination: &Path, tag: &str) -> SyncResult<PathBuf> {
    let parent = destination.parent().ok_or_else(|| {
        SyncError::fs(
            "Model destination has no parent directory",
            destination,
            std::io::Error::from(std::io::ErrorKind::InvalidInput),
        )
    })?;
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model".to_string());
    Ok(parent.join(format!(".{}.{}-{}", name, tag, uuid::Uuid::new_v4().simple())))
}

/// Copy a file or a directory tree.
pub fn copy_recursively(source: &Path, target: &Path) -> SyncResult<()> {
    let metadata = fs::metadata(source)
        .map_err(|e| SyncError::fs("Failed to inspect compiled model", source, e))?;

    if !metadata.is_dir() {
        fs::copy(source, target)
            .map_err(|e| SyncError::fs("Failed to copy compiled model", target, e))?;
        return Ok(());
    }

    fs::create_dir_all(target).map_err(|e| SyncError::fs("Failed to create directory", target, e))?;
    let entries =
        fs::read_dir(source).map_err(|e| SyncError::fs("Failed to read directory", source, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| SyncError::fs("Failed to read directory", source, e))?;
        copy_recursively(&entry.path(), &target.join(entry.file_name()))?;
    }
    Ok(())
}

pub fn remove_path(path: &Path) -> std::io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Place `compiled` at `destination`, replacing any previous model transactionally.
pub fn install_compiled_model(compiled: &Path, destination: &Path) -> SyncResult<()> {
    let staging = sibling_path(destination, "staging")?;

    // Stage next to the destination so the final step is a same-filesystem rename.
    if let Err(e) = copy_recursively(compiled, &staging) {
        let _ = remove_path(&staging);
        return Err(e);
    }

    let replacing = fs::symlink_metadata(destination).is_ok();
    if !replacing {
        return fs::rename(&staging, destination).map_err(|e| {
            let _ = remove_path(&staging);
            SyncError::fs("Failed to move compiled model", destination, e)
        });
    }

    match exchange_paths(&staging, destination) {
        Ok(true) => {
            // staging now holds the replaced model
            if let Err(e) = remove_path(&staging) {
                log::warn!("Failed to remove replaced model {:?}: {}", staging, e);
            }
            return Ok(());
        }
        Ok(false) => {}
        Err(e) => {
            let _ = remove_path(&staging);
            return Err(SyncError::fs("Failed to move compiled model", destination, e));
        }
    }

    // Two-step fallback: the destination is briefly absent between the renames.
    let previous = sibling_path(destination, "previous")?;
    if let Err(e) = fs::rename(destination, &previous) {
        let _ = remove_path(&staging);
        return Err(SyncError::fs("Failed to move compiled model", destination, e));
    }

    if let Err(e) = fs::rename(&staging, destination) {
        if let Err(restore) = fs::rename(&previous, destination) {
            log::error!(
                "Failed to restore previous model {:?} after failed replace: {}",
                previous,
                restore
            );
        }
        let _ = remove_path(&staging);
        return Err(SyncError::fs("Failed to move compiled model", destination, e));
    }

    if let Err(e) = remove_path(&previous) {
        log::warn!("Failed to remove replaced model {:?}: {}", previous, e);
    }

    Ok(())
}

/// Atomically swap two existing paths.
///
/// `Ok(false)` means the platform or filesystem cannot exchange and nothing moved.
#[cfg(any(all(target_os = "linux", target_env = "gnu"), target_vendor = "apple"))]
pub fn exchange_paths(a: &Path, b: &Path) -> std::io::Result<bool> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = |p: &Path| {
        CString::new(p.as_os_str().as_bytes())
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))
    };
    let a = c_path(a)?;
    let b = c_path(b)?;

    // SAFETY: both paths are NUL-terminated and outlive the call.
    #[cfg(target_os = "linux")]
    let rc = unsafe {
        libc::renameat2(
            libc::AT_FDCWD,
            a.as_ptr(),
            libc::AT_FDCWD,
            b.as_ptr(),
            libc::RENAME_EXCHANGE,
        )
    };
    // SAFETY: as above.
    #[cfg(target_vendor = "apple")]
    let rc = unsafe { libc::renamex_np(a.as_ptr(), b.as_ptr(), libc::RENAME_SWAP) };

    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::EINVAL || code == libc::ENOSYS || code == libc::ENOTSUP => {
            log::debug!("Atomic exchange unsupported here ({}), using two renames", err);
            Ok(false)
        }
        _ => Err(err),
    }
}

#[cfg(not(any(all(target_os = "linux", target_env = "gnu"), target_vendor = "apple")))]
pub fn exchange_paths(_a: &Path, _b: &Path) -> std::io::Result<bool> {
    Ok(false)
}

#[cfg(target_vendor = "apple")]
const BACKUP_EXCLUDE_XATTR: &str = "com.apple.metadata:com_apple_backup_excludeItem";

/// Exclude the installed model from device backups.
#[cfg(target_vendor = "apple")]
pub fn exclude_from_backup(path: &Path) -> SyncResult<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let invalid = || {
        SyncError::fs(
            "Could not exclude compiled model from backup",
            path,
            std::io::Error::from(std::io::ErrorKind::InvalidInput),
        )
    };
    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| invalid())?;
    let c_name = CString::new(BACKUP_EXCLUDE_XATTR).map_err(|_| invalid())?;
    let value = b"com.apple.backupd";

    // SAFETY: both strings are NUL-terminated and outlive the call; value/len describe a valid buffer.
    let rc = unsafe {
        libc::setxattr(
            c_path.as_ptr(),
            c_name.as_ptr(),
            value.as_ptr() as *const libc::c_void,
            value.len(),
            0,
            0,
        )
    };
    if rc != 0 {
        return Err(SyncError::fs(
            "Could not exclude compiled model from backup",
            path,
            std::io::Error::last_os_error(),
        ));
    }
    Ok(())
}

pub const CACHEDIR_TAG: &str = "CACHEDIR.TAG";
#[cfg(not(target_vendor = "apple"))]
const CACHEDIR_TAG_CONTENT: &str = "Signature: 8a477f597d28d172789f06886806bc55\n\
# This file is a cache directory tag created by cloud-vision-sync.\n\
# For information about cache directory tags see https://bford.info/cachedir/\n";

/// Exclude the installed model from backups by tagging it as a cache directory.
#[cfg(not(target_vendor = "apple"))]
pub fn exclude_from_backup(path: &Path) -> SyncResult<()> {
    if !path.is_dir() {
        log::debug!("Not a directory, skipping cache tag for {:?}", path);
        return Ok(());
    }
    let tag = path.join(CACHEDIR_TAG);
    fs::write(&tag, CACHEDIR_TAG_CONTENT)
        .map_err(|e| SyncError::fs("Could not exclude compiled model from backup", &tag, e))
}

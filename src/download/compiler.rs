// Model compilation: raw `.mlmodel` artifact -> runtime-loadable `.mlmodelc`

use crate::config::CompilerKind;
use crate::error::{SyncError, SyncResult};
use crate::paths::COMPILED_MODEL_EXTENSION;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

/// Turns a downloaded artifact into its compiled form.
///
/// `output_dir` is a fresh temporary directory owned by the caller; the
/// returned path must live inside it so the caller's cleanup covers it.
pub trait ModelCompiler: Send + Sync {
    fn compile(&self, source: &Path, output_dir: &Path) -> SyncResult<PathBuf>;
}

pub fn compiler_for(kind: CompilerKind) -> Arc<dyn ModelCompiler> {
    match kind {
        CompilerKind::CoreMl => Arc::new(CoreMlCompiler::default()),
        CompilerKind::Passthrough => Arc::new(PassthroughCompiler),
    }
}

fn compiled_name(source: &Path) -> SyncResult<String> {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| SyncError::Compilation(format!("invalid model file name: {:?}", source)))?;
    Ok(format!("{}.{}", stem, COMPILED_MODEL_EXTENSION))
}

/// Compiles with Xcode's `coremlcompiler`.
#[derive(Debug, Clone)]
pub struct CoreMlCompiler {
    program: PathBuf,
}

impl Default for CoreMlCompiler {
    fn default() -> Self {
        Self {
            program: PathBuf::from("xcrun"),
        }
    }
}

impl ModelCompiler for CoreMlCompiler {
    fn compile(&self, source: &Path, output_dir: &Path) -> SyncResult<PathBuf> {
        let expected = output_dir.join(compiled_name(source)?);

        log::info!("Compiling {:?} with coremlcompiler", source);

        let output = Command::new(&self.program)
            .arg("coremlcompiler")
            .arg("compile")
            .arg(source)
            .arg(output_dir)
            .output()
            .map_err(|e| SyncError::Compilation(format!("failed to run {:?}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SyncError::Compilation(format!(
                "coremlcompiler exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        if !expected.exists() {
            return Err(SyncError::Compilation(format!(
                "coremlcompiler did not produce {:?}",
                expected
            )));
        }

        Ok(expected)
    }
}

/// Packages the raw artifact as-is into a `.mlmodelc` directory, for hosts
/// without Core ML tooling.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCompiler;

pub const PASSTHROUGH_MODEL_FILE: &str = "model.mlmodel";

impl ModelCompiler for PassthroughCompiler {
    fn compile(&self, source: &Path, output_dir: &Path) -> SyncResult<PathBuf> {
        let size = fs::metadata(source)
            .map_err(|e| SyncError::fs("Failed to inspect downloaded model", source, e))?
            .len();
        if size == 0 {
            return Err(SyncError::Compilation("model artifact is empty".to_string()));
        }

        let compiled = output_dir.join(compiled_name(source)?);
        fs::create_dir_all(&compiled)
            .map_err(|e| SyncError::fs("Failed to create compiled model directory", &compiled, e))?;

        let target = compiled.join(PASSTHROUGH_MODEL_FILE);
        fs::copy(source, &target)
            .map_err(|e| SyncError::fs("Failed to copy model into compiled directory", &target, e))?;

        Ok(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_packages_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("flowers.mlmodel");
        fs::write(&source, b"model-bytes").unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();

        let compiled = PassthroughCompiler.compile(&source, &out).unwrap();
        assert_eq!(compiled, out.join("flowers.mlmodelc"));
        assert_eq!(
            fs::read(compiled.join(PASSTHROUGH_MODEL_FILE)).unwrap(),
            b"model-bytes"
        );
    }

    #[test]
    fn passthrough_rejects_empty_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("flowers.mlmodel");
        fs::write(&source, b"").unwrap();

        let result = PassthroughCompiler.compile(&source, dir.path());
        assert!(matches!(result, Err(SyncError::Compilation(_))));
    }

    #[test]
    fn missing_compiler_binary_is_compilation_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("flowers.mlmodel");
        fs::write(&source, b"x").unwrap();

        let compiler = CoreMlCompiler {
            program: dir.path().join("no-such-xcrun"),
        };
        assert!(matches!(
            compiler.compile(&source, dir.path()),
            Err(SyncError::Compilation(_))
        ));
    }
}

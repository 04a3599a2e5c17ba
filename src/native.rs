//! Build generated C with the system compiler.

use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info};

use crate::config::BackendConfig;
use crate::error::KernelError;

fn run(mut command: Command) -> crate::error::Result<()> {
    debug!("running {command:?}");
    let output = command
        .output()
        .map_err(|e| KernelError::native_error(format!("failed to invoke C compiler: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(KernelError::native_error(format!(
            "C compiler exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

/// Compile `source` into a shared library at `output`.
pub fn build_shared_library(
    config: &BackendConfig,
    source: &Path,
    output: &Path,
) -> crate::error::Result<()> {
    let mut command = Command::new(&config.cc);
    command
        .args(&config.cflags)
        .args(&config.shared_cflags)
        .arg(source)
        .arg("-o")
        .arg(output)
        .arg("-lm");
    run(command)?;
    info!("built {}", output.display());
    Ok(())
}

/// Compile and link `sources` into an executable at `output`.
pub fn build_executable(
    config: &BackendConfig,
    sources: &[&Path],
    output: &Path,
) -> crate::error::Result<()> {
    let mut command = Command::new(&config.cc);
    command
        .args(&config.cflags)
        .args(sources)
        .arg("-o")
        .arg(output)
        .arg("-lm");
    run(command)?;
    info!("linked {}", output.display());
    Ok(())
}

/// Write `c_source` to `<dir>/<stem>.c` and build `<dir>/<stem><suffix>`.
/// Returns the library path.
pub fn compile_c_source(
    config: &BackendConfig,
    c_source: &str,
    dir: &Path,
    stem: &str,
) -> crate::error::Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| {
        KernelError::native_error(format!("failed to create '{}': {e}", dir.display()))
    })?;
    let source_path = dir.join(format!("{stem}.c"));
    std::fs::write(&source_path, c_source).map_err(|e| {
        KernelError::native_error(format!("failed to write '{}': {e}", source_path.display()))
    })?;
    let library = config.shared_library_path(&dir.join(stem));
    build_shared_library(config, &source_path, &library)?;
    Ok(library)
}

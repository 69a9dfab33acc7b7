//! Per-language build backends.
//!
//! Each service build config declares a `type` (`go`, `rust`, `npm`/`node`,
//! `custom`) that picks one of the backends below. The contract is the
//! same for all of them: given a normalized spec, a target platform, and a
//! destination path, leave a binary at the destination or fail with the
//! toolchain's trimmed output.

mod cargo;
mod custom;
mod golang;
mod node;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::StageError;
use crate::manifest::BuildSpec;
use crate::platform::Platform;

/// Compile a service binary for `platform`, returning the path actually
/// written (windows destinations get `.exe` appended).
pub fn compile(
    build: &BuildSpec,
    manifest_root: &Path,
    platform: &Platform,
    dest: &Path,
) -> Result<PathBuf> {
    let dest = windows_dest(dest, platform);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory '{}'", parent.display()))?;
    }

    let source_dir = source_dir(build, manifest_root);

    match build.build_type.as_str() {
        "go" => golang::compile(build, &source_dir, platform, &dest)?,
        "rust" => cargo::compile(build, &source_dir, platform, &dest)?,
        "npm" | "node" => node::compile(build, &source_dir, platform, &dest)?,
        "custom" => custom::compile(build, &source_dir, platform, &dest)?,
        other => {
            return Err(StageError::BadInput(format!(
                "unsupported build type '{other}' (expected go, rust, npm, node, or custom)"
            ))
            .into())
        }
    }

    Ok(dest)
}

fn source_dir(build: &BuildSpec, manifest_root: &Path) -> PathBuf {
    if build.source_dir.is_empty() {
        manifest_root.to_path_buf()
    } else {
        manifest_root.join(&build.source_dir)
    }
}

fn windows_dest(dest: &Path, platform: &Platform) -> PathBuf {
    if platform.is_windows() && dest.extension().map(|e| e != "exe").unwrap_or(true) {
        let mut with_exe = dest.as_os_str().to_os_string();
        with_exe.push(".exe");
        PathBuf::from(with_exe)
    } else {
        dest.to_path_buf()
    }
}

/// Locate a toolchain binary on PATH.
pub(crate) fn find_tool(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|_| {
        anyhow::anyhow!(
            "'{name}' not found on PATH; install the toolchain before building this service"
        )
    })
}

/// Run a build command, wrapping any failure with its trimmed output.
pub(crate) fn run_build_command(mut cmd: Command, target: &str) -> Result<()> {
    log::debug!("running build command for '{target}': {cmd:?}");
    let output = cmd
        .output()
        .with_context(|| format!("spawning build command for '{target}'"))?;

    if output.status.success() {
        return Ok(());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let mut combined = String::new();
    if !stdout.trim().is_empty() {
        combined.push_str(stdout.trim());
    }
    if !stderr.trim().is_empty() {
        if !combined.is_empty() {
            combined.push('\n');
        }
        combined.push_str(stderr.trim());
    }
    if combined.is_empty() {
        combined = format!("exit status {}", output.status);
    }

    Err(StageError::BuildFailed {
        target: target.to_string(),
        output: combined,
    }
    .into())
}

/// Fail with `MissingOutput` unless the build left a file at `dest`.
pub(crate) fn require_output(dest: &Path) -> Result<()> {
    if dest.is_file() {
        Ok(())
    } else {
        Err(StageError::MissingOutput(dest.to_path_buf()).into())
    }
}

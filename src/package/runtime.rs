//! Supervisor runtime embedding.
//!
//! Every bundle carries the supervisor (`runtime`) and its CLI
//! (`runtimectl`) compiled for each requested platform under
//! `runtime/<platformKey>/`. The runtime source tree ships next to the
//! packager, not inside app repos, so it is located relative to the
//! working directory or the executable. `runtime` is required;
//! `runtimectl` is best-effort.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::compile;
use crate::manifest::BuildSpec;
use crate::platform::{alias_platform_key, Platform};

/// Env override for the runtime source tree location.
pub const RUNTIME_SRC_ENV: &str = "DESKTOP_BUNDLER_RUNTIME_SRC";

#[derive(Debug, Clone)]
pub struct RuntimeArtifacts {
    pub platform_key: String,
    pub runtime: PathBuf,
    pub runtimectl: Option<PathBuf>,
}

/// Directory name used for a platform under `bundle/runtime/`.
///
/// Runtime directories use the electron-style spelling (`linux-x64`,
/// `win-x64`, `mac-aarch64`) rather than the canonical goos/goarch form.
pub fn runtime_dir_key(platform: &Platform) -> String {
    alias_platform_key(&platform.key()).unwrap_or_else(|| platform.key())
}

/// Find the runtime source tree.
///
/// Checks the env override, then cwd- and executable-relative candidates.
/// A directory qualifies when it holds a `go.mod` and a `cmd/runtime`
/// entry point.
pub fn locate_runtime_source() -> Result<PathBuf> {
    if let Ok(overridden) = std::env::var(RUNTIME_SRC_ENV) {
        let path = PathBuf::from(overridden);
        if is_runtime_source(&path) {
            return Ok(path);
        }
        bail!(
            "{RUNTIME_SRC_ENV} points at '{}' but it is not a runtime source tree",
            path.display()
        );
    }

    let mut candidates = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join("runtime"));
        candidates.push(cwd.join("../runtime"));
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            candidates.push(exe_dir.join("runtime"));
            candidates.push(exe_dir.join("../runtime"));
            candidates.push(exe_dir.join("../share/desktop-bundler/runtime"));
        }
    }

    for candidate in &candidates {
        if is_runtime_source(candidate) {
            return Ok(candidate.clone());
        }
    }

    bail!(
        "runtime source tree not found (set {RUNTIME_SRC_ENV} or place it at one of: {})",
        candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    )
}

fn is_runtime_source(path: &Path) -> bool {
    path.join("go.mod").is_file() && path.join("cmd/runtime").is_dir()
}

/// Build `runtime` and `runtimectl` for each platform into the bundle.
pub fn embed_runtime(
    bundle_dir: &Path,
    runtime_src: &Path,
    platforms: &[Platform],
) -> Result<Vec<RuntimeArtifacts>> {
    let mut artifacts = Vec::new();

    for platform in platforms {
        let dir_key = runtime_dir_key(platform);
        let out_dir = bundle_dir.join("runtime").join(&dir_key);

        let runtime = compile::compile(
            &go_build_spec("./cmd/runtime"),
            runtime_src,
            platform,
            &out_dir.join("runtime"),
        )
        .with_context(|| format!("building runtime for '{dir_key}'"))?;

        let runtimectl = match compile::compile(
            &go_build_spec("./cmd/runtimectl"),
            runtime_src,
            platform,
            &out_dir.join("runtimectl"),
        ) {
            Ok(path) => Some(path),
            Err(err) => {
                log::warn!("runtimectl build failed for '{dir_key}', skipping: {err:#}");
                None
            }
        };

        artifacts.push(RuntimeArtifacts {
            platform_key: dir_key,
            runtime,
            runtimectl,
        });
    }

    Ok(artifacts)
}

fn go_build_spec(entry_point: &str) -> BuildSpec {
    BuildSpec {
        build_type: "go".to_string(),
        source_dir: String::new(),
        entry_point: entry_point.to_string(),
        args: Vec::new(),
        env: BTreeMap::new(),
        output_pattern: None,
    }
}

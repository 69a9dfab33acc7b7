//! Bundle packager.
//!
//! Turns a bundle manifest plus a source tree into a self-contained
//! `<app>/bundle/` directory: staged service binaries (prebuilt or
//! compiled on demand), asset trees, the supervisor runtime per platform,
//! CLI helpers, and a copy of the manifest. The packager is strict — any
//! non-best-effort failure aborts the run.

pub mod electron;
pub mod runtime;
pub mod shim;
pub mod size;

use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StageError;
use crate::manifest::{BinarySpec, Manifest};
use crate::paths::{copy_path, normalize_bundle_path, resolve_path};
use crate::platform::{normalize_platform_input, Platform};

use runtime::RuntimeArtifacts;
use size::SizeReport;

/// Result of a packaging run.
#[derive(Debug)]
pub struct PackageReport {
    pub bundle_dir: PathBuf,
    pub staged_manifest: PathBuf,
    pub platforms: Vec<String>,
    pub runtime: Vec<RuntimeArtifacts>,
    pub staged_files: Vec<PathBuf>,
    pub size: SizeReport,
}

/// Package an app directory into `<app>/bundle/`.
///
/// `requested_platforms` accepts canonical keys, aliases, and shorthands;
/// when empty, the union of platforms declared in service binaries is
/// used.
pub fn package(
    app_path: &Path,
    manifest_path: &Path,
    requested_platforms: &[String],
) -> Result<PackageReport> {
    if !app_path.is_dir() {
        bail!(StageError::BadInput(format!(
            "app path '{}' is not a directory",
            app_path.display()
        )));
    }

    let mut manifest = Manifest::load(manifest_path)?;
    let manifest_root = manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let platforms = resolve_requested_platforms(&manifest, requested_platforms)?;
    validate_coverage(&manifest, &platforms)?;

    let bundle_dir = app_path.join("bundle");
    fs::create_dir_all(&bundle_dir)
        .with_context(|| format!("creating bundle directory '{}'", bundle_dir.display()))?;

    let staged_manifest = bundle_dir.join("bundle.json");
    copy_path(manifest_path, &staged_manifest)
        .with_context(|| "staging bundle.json".to_string())?;

    let mut staged_files = Vec::new();
    staged_files.extend(stage_service_binaries(
        &mut manifest,
        &manifest_root,
        &bundle_dir,
        &platforms,
    )?);
    staged_files.extend(stage_assets(&manifest, &manifest_root, &bundle_dir)?);
    staged_files.extend(stage_cli_tools(&bundle_dir)?);

    if platforms.iter().any(|p| !p.is_windows()) {
        staged_files.push(shim::write_cli_shim(&bundle_dir)?);
    }

    let runtime_src = runtime::locate_runtime_source()?;
    let runtime_artifacts = runtime::embed_runtime(&bundle_dir, &runtime_src, &platforms)?;

    electron::ensure_bundle_extra_resources(app_path)?;

    let size = size::audit_bundle_size(&bundle_dir)?;
    if let Some(warning) = &size.warning {
        log::warn!("bundle size {}: {}", warning.level, warning.message);
    }

    Ok(PackageReport {
        bundle_dir,
        staged_manifest,
        platforms: platforms.iter().map(Platform::key).collect(),
        runtime: runtime_artifacts,
        staged_files,
        size,
    })
}

/// Normalize and dedupe the requested platform list, deriving it from the
/// manifest when empty.
fn resolve_requested_platforms(
    manifest: &Manifest,
    requested: &[String],
) -> Result<Vec<Platform>> {
    let keys: Vec<String> = if requested.is_empty() {
        manifest.declared_platforms()
    } else {
        requested.to_vec()
    };

    if keys.is_empty() {
        bail!(StageError::BadInput(
            "no platforms requested and none declared in the manifest".into()
        ));
    }

    let mut seen = BTreeSet::new();
    let mut platforms = Vec::new();
    for key in keys {
        let platform = normalize_platform_input(&key)?;
        if seen.insert(platform.key()) {
            platforms.push(platform);
        }
    }
    Ok(platforms)
}

/// Every service must have either a declared binary or a build config for
/// every requested platform.
fn validate_coverage(manifest: &Manifest, platforms: &[Platform]) -> Result<()> {
    for service in &manifest.services {
        for platform in platforms {
            let has_binary = service.binary_for_platform(&platform.key()).is_some();
            if !has_binary && service.build.is_none() {
                return Err(StageError::ManifestIncomplete {
                    service: service.id.clone(),
                    platform: platform.key(),
                }
                .into());
            }
        }
    }
    Ok(())
}

/// Stage each service's binary per platform, compiling on demand.
///
/// Compiled binaries are patched back into the in-memory manifest so
/// later steps (and the caller's report) see where they landed.
fn stage_service_binaries(
    manifest: &mut Manifest,
    manifest_root: &Path,
    bundle_dir: &Path,
    platforms: &[Platform],
) -> Result<Vec<PathBuf>> {
    let mut staged = Vec::new();

    for idx in 0..manifest.services.len() {
        for platform in platforms {
            let service = &manifest.services[idx];
            let service_id = service.id.clone();
            let declared = service
                .binary_for_platform(&platform.key())
                .map(|(_, spec)| spec.path.clone());
            let build = service.build.clone();

            let (dest_rel, source) = match &declared {
                Some(path) => (normalize_bundle_path(path), Some(manifest_root.join(path))),
                None => (service_id.clone(), None),
            };
            let dest = resolve_path(bundle_dir, &dest_rel).with_context(|| {
                format!("staging binary for service '{service_id}' ({})", platform.key())
            })?;

            let produced = match source {
                Some(src) if src.is_file() => {
                    copy_path(&src, &dest).with_context(|| {
                        format!("copying prebuilt binary for service '{service_id}'")
                    })?;
                    dest
                }
                _ => {
                    let Some(build) = build else {
                        bail!(
                            "service '{service_id}' declares binary '{}' for {} but the file \
                             is missing and no build config is present",
                            declared.as_deref().unwrap_or("<none>"),
                            platform.key()
                        );
                    };
                    let compiled = crate::compile::compile(&build, manifest_root, platform, &dest)
                        .with_context(|| {
                            format!("building service '{service_id}' for {}", platform.key())
                        })?;
                    let compiled_rel = compiled
                        .strip_prefix(bundle_dir)
                        .unwrap_or(&compiled)
                        .to_string_lossy()
                        .replace('\\', "/");
                    manifest.services[idx]
                        .binaries
                        .insert(platform.key(), BinarySpec { path: compiled_rel });
                    compiled
                }
            };
            staged.push(produced);
        }
    }

    Ok(staged)
}

/// Copy declared asset trees into the bundle.
fn stage_assets(
    manifest: &Manifest,
    manifest_root: &Path,
    bundle_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let mut staged = Vec::new();

    for service in &manifest.services {
        for asset in &service.assets {
            let src = resolve_path(manifest_root, &asset.path).with_context(|| {
                format!("resolving asset '{}' for service '{}'", asset.path, service.id)
            })?;
            if !src.exists() {
                bail!(StageError::NotFound(format!(
                    "asset '{}' for service '{}'",
                    asset.path, service.id
                )));
            }

            if let Some(max_size) = asset.max_size {
                if let Ok(meta) = fs::metadata(&src) {
                    if meta.is_file() && meta.len() > max_size {
                        log::warn!(
                            "asset '{}' is {} bytes, over its declared max of {}",
                            asset.path,
                            meta.len(),
                            max_size
                        );
                    }
                }
            }

            let dest = resolve_path(bundle_dir, &normalize_bundle_path(&asset.path))
                .with_context(|| format!("staging asset '{}'", asset.path))?;
            copy_path(&src, &dest)
                .with_context(|| format!("copying asset '{}'", asset.path))?;
            staged.push(dest);
        }
    }

    Ok(staged)
}

/// Expose files staged under `bundle/cli/` as executables in `bundle/bin/`.
fn stage_cli_tools(bundle_dir: &Path) -> Result<Vec<PathBuf>> {
    let cli_dir = bundle_dir.join("cli");
    if !cli_dir.is_dir() {
        return Ok(Vec::new());
    }

    let bin_dir = bundle_dir.join("bin");
    fs::create_dir_all(&bin_dir)
        .with_context(|| format!("creating '{}'", bin_dir.display()))?;

    let mut staged = Vec::new();
    for entry in fs::read_dir(&cli_dir)
        .with_context(|| format!("reading '{}'", cli_dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let dest = bin_dir.join(entry.file_name());
        copy_path(&entry.path(), &dest)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dest, fs::Permissions::from_mode(0o755))
                .with_context(|| format!("marking '{}' executable", dest.display()))?;
        }
        staged.push(dest);
    }

    Ok(staged)
}

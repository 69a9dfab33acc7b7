//! Rust build backend.
//!
//! Maps the `(goos, goarch)` pair onto a Rust target triple, runs
//! `cargo build --release --target <triple>`, and copies the produced
//! artifact out of the cargo target directory to the destination.

use anyhow::Result;
use std::path::Path;
use std::process::Command;

use super::{find_tool, run_build_command};
use crate::error::StageError;
use crate::manifest::BuildSpec;
use crate::paths::copy_path;
use crate::platform::Platform;

/// Supported `(goos, goarch)` → Rust target triple mappings.
const TARGET_TRIPLES: &[(&str, &str, &str)] = &[
    ("linux", "amd64", "x86_64-unknown-linux-gnu"),
    ("linux", "arm64", "aarch64-unknown-linux-gnu"),
    ("darwin", "amd64", "x86_64-apple-darwin"),
    ("darwin", "arm64", "aarch64-apple-darwin"),
    ("windows", "amd64", "x86_64-pc-windows-gnu"),
    ("windows", "arm64", "aarch64-pc-windows-msvc"),
];

pub fn target_triple(platform: &Platform) -> Result<&'static str> {
    TARGET_TRIPLES
        .iter()
        .find(|(goos, goarch, _)| *goos == platform.goos && *goarch == platform.goarch)
        .map(|(_, _, triple)| *triple)
        .ok_or_else(|| StageError::UnsupportedPlatform(platform.key()).into())
}

pub fn compile(build: &BuildSpec, source_dir: &Path, platform: &Platform, dest: &Path) -> Result<()> {
    let cargo = find_tool("cargo")?;
    let triple = target_triple(platform)?;

    let mut cmd = Command::new(cargo);
    cmd.args(["build", "--release", "--target", triple]);
    cmd.args(&build.args);
    cmd.current_dir(source_dir);
    cmd.envs(&build.env);

    run_build_command(cmd, &format!("cargo build in '{}'", source_dir.display()))?;

    let name = artifact_name(build, dest);
    let produced = source_dir
        .join("target")
        .join(triple)
        .join("release")
        .join(crate::platform::runtime_binary_name(&name, &platform.goos));
    if !produced.is_file() {
        return Err(StageError::MissingOutput(produced).into());
    }
    copy_path(&produced, dest)
}

/// Name of the binary cargo produced: the declared output pattern, the
/// entry point, or the destination file stem in that order.
fn artifact_name(build: &BuildSpec, dest: &Path) -> String {
    if let Some(pattern) = &build.output_pattern {
        if !pattern.is_empty() {
            return pattern.clone();
        }
    }
    if !build.entry_point.is_empty() {
        return build.entry_point.clone();
    }
    dest.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("service")
        .to_string()
}

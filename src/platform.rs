//! Platform key parsing and normalization.
//!
//! Every platform comparison inside the crate happens on the canonical
//! `<goos>-<goarch>` form (goos ∈ linux/darwin/windows, goarch ∈
//! amd64/arm64). Aliases (`win`/`windows`, `mac`/`darwin`, `x64`/`amd64`,
//! `aarch64`/`arm64`) and arch-less shorthands are normalized at ingress.

use anyhow::{bail, Result};

/// Operating systems a bundle can target.
pub const SUPPORTED_GOOS: &[&str] = &["linux", "darwin", "windows"];

/// Architectures a bundle can target.
pub const SUPPORTED_GOARCH: &[&str] = &["amd64", "arm64"];

/// A parsed, canonical platform key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub goos: String,
    pub goarch: String,
}

impl Platform {
    pub fn key(&self) -> String {
        format!("{}-{}", self.goos, self.goarch)
    }

    pub fn is_windows(&self) -> bool {
        self.goos == "windows"
    }
}

/// Parse a platform key into canonical `(goos, goarch)`.
///
/// Accepts aliases on either side (`win-x64`, `mac-aarch64`, ...).
pub fn parse_platform_key(key: &str) -> Result<Platform> {
    let trimmed = key.trim();
    let Some((os_part, arch_part)) = trimmed.split_once('-') else {
        bail!("invalid platform key '{}': expected <os>-<arch>", key);
    };
    let goos = canonical_goos(os_part)
        .ok_or_else(|| anyhow::anyhow!("invalid platform key '{}': unknown os '{}'", key, os_part))?;
    let goarch = canonical_goarch(arch_part).ok_or_else(|| {
        anyhow::anyhow!("invalid platform key '{}': unknown arch '{}'", key, arch_part)
    })?;
    Ok(Platform {
        goos: goos.to_string(),
        goarch: goarch.to_string(),
    })
}

/// The alternate spelling of a platform key.
///
/// Maps each side through its alias table, so
/// `alias_platform_key(alias_platform_key(k)) == k` for any valid key.
/// `linux` has no os alias and maps to itself.
pub fn alias_platform_key(key: &str) -> Option<String> {
    let (os_part, arch_part) = key.split_once('-')?;
    let os = match os_part {
        "windows" => "win",
        "win" => "windows",
        "darwin" => "mac",
        "mac" => "darwin",
        "linux" => "linux",
        _ => return None,
    };
    let arch = match arch_part {
        "amd64" => "x64",
        "x64" => "amd64",
        "arm64" => "aarch64",
        "aarch64" => "arm64",
        _ => return None,
    };
    Some(format!("{os}-{arch}"))
}

/// Expand an arch-less shorthand (`win`, `mac`, `linux`, `windows`,
/// `darwin`) into candidate canonical keys: host arch first, then the
/// `amd64` default.
pub fn expand_shorthand_platform(name: &str) -> Vec<String> {
    let Some(goos) = canonical_goos(name.trim()) else {
        return Vec::new();
    };
    let mut candidates = vec![format!("{goos}-{}", host_goarch())];
    let fallback = format!("{goos}-amd64");
    if !candidates.contains(&fallback) {
        candidates.push(fallback);
    }
    candidates
}

/// Normalize any accepted platform spelling (canonical, aliased, or
/// shorthand) to a canonical key.
pub fn normalize_platform_input(name: &str) -> Result<Platform> {
    if name.contains('-') {
        return parse_platform_key(name);
    }
    match expand_shorthand_platform(name).into_iter().next() {
        Some(key) => parse_platform_key(&key),
        None => bail!("invalid platform '{}': expected <os>-<arch> or os shorthand", name),
    }
}

/// Canonical key of the host the process runs on.
pub fn host_platform_key() -> String {
    format!("{}-{}", host_goos(), host_goarch())
}

pub fn host_goos() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "windows",
        _ => "linux",
    }
}

pub fn host_goarch() -> &'static str {
    match std::env::consts::ARCH {
        "aarch64" => "arm64",
        _ => "amd64",
    }
}

/// Binary filename for a platform: appends `.exe` on windows.
pub fn runtime_binary_name(base: &str, goos: &str) -> String {
    if goos == "windows" {
        format!("{base}.exe")
    } else {
        base.to_string()
    }
}

fn canonical_goos(value: &str) -> Option<&'static str> {
    match value {
        "linux" => Some("linux"),
        "darwin" | "mac" | "macos" => Some("darwin"),
        "windows" | "win" => Some("windows"),
        _ => None,
    }
}

fn canonical_goarch(value: &str) -> Option<&'static str> {
    match value {
        "amd64" | "x64" => Some("amd64"),
        "arm64" | "aarch64" => Some("arm64"),
        _ => None,
    }
}

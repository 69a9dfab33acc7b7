//! Bundle size audit.
//!
//! Desktop bundles ship over download channels where size is felt
//! directly; the audit totals the staged tree, surfaces the biggest
//! offenders, and attaches a warning the caller is expected to display.

use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use walkdir::WalkDir;

/// Files above this size make the "largest files" list.
const LARGE_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Total size that triggers a warning-level report.
pub const WARN_TOTAL_BYTES: u64 = 500 * 1024 * 1024;

/// Total size that triggers a critical-level report.
pub const CRITICAL_TOTAL_BYTES: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Serialize)]
pub struct LargeFile {
    pub path: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SizeWarning {
    pub level: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SizeReport {
    pub total_bytes: u64,
    pub total_human: String,
    pub largest_files: Vec<LargeFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<SizeWarning>,
}

/// Walk the bundle and produce the size report.
pub fn audit_bundle_size(bundle_dir: &Path) -> Result<SizeReport> {
    let mut total_bytes = 0u64;
    let mut large: Vec<LargeFile> = Vec::new();

    for entry in WalkDir::new(bundle_dir).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
        total_bytes += bytes;
        if bytes > LARGE_FILE_BYTES {
            let rel = entry
                .path()
                .strip_prefix(bundle_dir)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            large.push(LargeFile { path: rel, bytes });
        }
    }

    large.sort_by(|a, b| b.bytes.cmp(&a.bytes));
    large.truncate(10);

    let warning = size_warning(total_bytes);
    Ok(SizeReport {
        total_bytes,
        total_human: human_size(total_bytes),
        largest_files: large,
        warning,
    })
}

fn size_warning(total_bytes: u64) -> Option<SizeWarning> {
    let level = if total_bytes >= CRITICAL_TOTAL_BYTES {
        "critical"
    } else if total_bytes >= WARN_TOTAL_BYTES {
        "warning"
    } else {
        return None;
    };
    Some(SizeWarning {
        level: level.to_string(),
        message: format!(
            "bundle is {} — consider trimming assets before shipping",
            human_size(total_bytes)
        ),
    })
}

/// Human-readable byte count (binary units, one decimal).
pub fn human_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn totals_and_no_warning_for_small_bundles() {
        let temp = tempfile::TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("sub")).unwrap();
        fs::write(temp.path().join("a"), vec![0u8; 100]).unwrap();
        fs::write(temp.path().join("sub/b"), vec![0u8; 50]).unwrap();

        let report = audit_bundle_size(temp.path()).unwrap();
        assert_eq!(report.total_bytes, 150);
        assert!(report.warning.is_none());
        assert!(report.largest_files.is_empty());
    }

    #[test]
    fn warning_thresholds_are_inclusive() {
        assert!(size_warning(WARN_TOTAL_BYTES - 1).is_none());
        assert_eq!(size_warning(WARN_TOTAL_BYTES).unwrap().level, "warning");
        assert_eq!(
            size_warning(CRITICAL_TOTAL_BYTES - 1).unwrap().level,
            "warning"
        );
        assert_eq!(size_warning(CRITICAL_TOTAL_BYTES).unwrap().level, "critical");
    }

    #[test]
    fn human_sizes() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KiB");
        assert_eq!(human_size(500 * 1024 * 1024), "500.0 MiB");
        assert_eq!(human_size(1024 * 1024 * 1024), "1.0 GiB");
    }
}

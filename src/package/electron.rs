//! Electron `package.json` integration.
//!
//! electron-builder ships anything listed under `build.extraResources`
//! with the app; the staged bundle rides along as `resources/bundle`.
//! The patch is idempotent and preserves unrelated entries. Concurrent
//! packagers of the same app serialize on an advisory lock file.

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use serde_json::{json, Value};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILENAME: &str = ".package.json.lock";

/// Ensure `build.extraResources` contains the bundle entry.
///
/// Rewrites with two-space indent and a trailing newline; applying twice
/// produces the same bytes. Missing `package.json` gets created with the
/// minimal structure.
pub fn ensure_bundle_extra_resources(app_path: &Path) -> Result<PathBuf> {
    let package_json = app_path.join("package.json");
    let _lock = PackageJsonLock::acquire(app_path)?;

    let mut root: Value = if package_json.exists() {
        let bytes = fs::read(&package_json)
            .with_context(|| format!("reading '{}'", package_json.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing '{}'", package_json.display()))?
    } else {
        json!({})
    };

    if !root.is_object() {
        bail!(
            "'{}' is not a JSON object; refusing to rewrite it",
            package_json.display()
        );
    }

    let build = root
        .as_object_mut()
        .expect("checked is_object above")
        .entry("build")
        .or_insert_with(|| json!({}));
    if !build.is_object() {
        bail!(
            "'{}' has a non-object 'build' field; refusing to rewrite it",
            package_json.display()
        );
    }

    let resources = build
        .as_object_mut()
        .expect("checked is_object above")
        .entry("extraResources")
        .or_insert_with(|| json!([]));
    if !resources.is_array() {
        bail!(
            "'{}' has a non-array 'build.extraResources'; refusing to rewrite it",
            package_json.display()
        );
    }

    let entry = bundle_entry();
    let entries = resources.as_array_mut().expect("checked is_array above");
    let already_present = entries.iter().any(|existing| {
        existing.get("from").and_then(Value::as_str) == Some("bundle")
            && existing.get("to").and_then(Value::as_str) == Some("bundle")
    });
    if !already_present {
        entries.push(entry);
    }

    let mut rendered = serde_json::to_string_pretty(&root)
        .with_context(|| format!("serializing '{}'", package_json.display()))?;
    rendered.push('\n');
    fs::write(&package_json, rendered)
        .with_context(|| format!("writing '{}'", package_json.display()))?;

    Ok(package_json)
}

fn bundle_entry() -> Value {
    json!({
        "from": "bundle",
        "to": "bundle",
        "filter": ["**/*"]
    })
}

/// Advisory lock serializing package.json rewrites for one app path.
struct PackageJsonLock {
    _file: File,
    path: PathBuf,
}

impl PackageJsonLock {
    fn acquire(app_path: &Path) -> Result<Self> {
        let path = app_path.join(LOCK_FILENAME);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("creating lock file '{}'", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("locking '{}'", path.display()))?;
        Ok(Self { _file: file, path })
    }
}

impl Drop for PackageJsonLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_is_idempotent() {
        let temp = tempfile::TempDir::new().unwrap();
        fs::write(
            temp.path().join("package.json"),
            r#"{"name":"demo","build":{"appId":"com.example.demo"}}"#,
        )
        .unwrap();

        ensure_bundle_extra_resources(temp.path()).unwrap();
        let first = fs::read_to_string(temp.path().join("package.json")).unwrap();
        ensure_bundle_extra_resources(temp.path()).unwrap();
        let second = fs::read_to_string(temp.path().join("package.json")).unwrap();

        assert_eq!(first, second);
        assert!(first.ends_with('\n'));

        let parsed: Value = serde_json::from_str(&first).unwrap();
        assert_eq!(parsed["name"], "demo");
        assert_eq!(parsed["build"]["appId"], "com.example.demo");
        let entries = parsed["build"]["extraResources"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["filter"][0], "**/*");
    }

    #[test]
    fn preserves_existing_extra_resources() {
        let temp = tempfile::TempDir::new().unwrap();
        fs::write(
            temp.path().join("package.json"),
            r#"{"build":{"extraResources":[{"from":"licenses","to":"licenses"}]}}"#,
        )
        .unwrap();

        ensure_bundle_extra_resources(temp.path()).unwrap();

        let parsed: Value =
            serde_json::from_str(&fs::read_to_string(temp.path().join("package.json")).unwrap())
                .unwrap();
        let entries = parsed["build"]["extraResources"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["from"], "licenses");
        assert_eq!(entries[1]["from"], "bundle");
    }

    #[test]
    fn creates_missing_package_json() {
        let temp = tempfile::TempDir::new().unwrap();
        ensure_bundle_extra_resources(temp.path()).unwrap();
        let parsed: Value =
            serde_json::from_str(&fs::read_to_string(temp.path().join("package.json")).unwrap())
                .unwrap();
        assert_eq!(parsed["build"]["extraResources"][0]["from"], "bundle");
    }

    #[test]
    fn rejects_malformed_build_field() {
        let temp = tempfile::TempDir::new().unwrap();
        fs::write(temp.path().join("package.json"), r#"{"build":"nope"}"#).unwrap();
        assert!(ensure_bundle_extra_resources(temp.path()).is_err());
    }
}

//! End-to-end packaging scenarios.
//!
//! The full `package()` flow embeds the supervisor runtime with the Go
//! toolchain; tests that need it skip cleanly when `go` is not on PATH
//! and share one compiled fixture tree to keep the suite fast.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use desktop_bundler::platform::{host_goos, host_platform_key};

/// One shared runtime source fixture; the env override is process-wide,
/// so it is created and exported exactly once.
fn runtime_fixture() -> &'static Path {
    static FIXTURE: OnceLock<PathBuf> = OnceLock::new();
    FIXTURE
        .get_or_init(|| {
            let dir = tempfile::Builder::new()
                .prefix("runtime-src-")
                .tempdir()
                .unwrap()
                .keep();
            fs::write(dir.join("go.mod"), "module bundled-runtime\n\ngo 1.21\n").unwrap();
            for cmd in ["runtime", "runtimectl"] {
                let cmd_dir = dir.join("cmd").join(cmd);
                fs::create_dir_all(&cmd_dir).unwrap();
                fs::write(
                    cmd_dir.join("main.go"),
                    "package main\n\nfunc main() {}\n",
                )
                .unwrap();
            }
            std::env::set_var("DESKTOP_BUNDLER_RUNTIME_SRC", &dir);
            dir
        })
        .as_path()
}

fn go_available() -> bool {
    which::which("go").is_ok()
}

fn write_app(manifest: &serde_json::Value) -> (tempfile::TempDir, PathBuf, PathBuf) {
    let temp = tempfile::TempDir::new().unwrap();
    let app_path = temp.path().join("app");
    fs::create_dir_all(&app_path).unwrap();
    fs::write(
        app_path.join("package.json"),
        r#"{"name":"demo","build":{"appId":"com.example.demo"}}"#,
    )
    .unwrap();
    let manifest_path = app_path.join("bundle.json");
    fs::write(&manifest_path, serde_json::to_string_pretty(manifest).unwrap()).unwrap();
    (temp, app_path, manifest_path)
}

#[test]
fn single_service_bundle_on_host_platform() {
    if !go_available() {
        eprintln!("skipping test: go not on PATH");
        return;
    }
    runtime_fixture();

    let manifest = serde_json::json!({
        "schema_version": "1",
        "target": "desktop",
        "app": {"name": "Demo", "id": "com.example.demo"},
        "services": [{
            "id": "svc",
            "type": "api",
            "build": {
                "type": "custom",
                "args": ["sh", "-c", "printf 'svc for {{platform}}' > {{output}}"]
            }
        }]
    });
    let (_temp, app_path, manifest_path) = write_app(&manifest);

    let host = host_platform_key();
    let report =
        desktop_bundler::package(&app_path, &manifest_path, &[host.clone()]).unwrap();

    // Compiled service staged at bundle/<service id>.
    let staged = report.bundle_dir.join("svc");
    assert_eq!(
        fs::read_to_string(&staged).unwrap(),
        format!("svc for {host}")
    );

    // Staged manifest is byte-identical to the source.
    assert_eq!(
        fs::read(&manifest_path).unwrap(),
        fs::read(report.bundle_dir.join("bundle.json")).unwrap()
    );

    // Runtime and runtimectl embedded for the host platform.
    assert_eq!(report.runtime.len(), 1);
    let runtime = &report.runtime[0];
    assert!(runtime.runtime.is_file());
    assert!(runtime.runtimectl.as_ref().unwrap().is_file());
    assert!(runtime
        .runtime
        .starts_with(report.bundle_dir.join("runtime")));

    // POSIX shim staged with exec bits on non-windows hosts.
    if host_goos() != "windows" {
        use std::os::unix::fs::PermissionsExt;
        let shim = report.bundle_dir.join("bin/vrooli");
        let mode = fs::metadata(&shim).unwrap().permissions().mode();
        assert_ne!(mode & 0o111, 0);
    }

    // package.json gained the extraResources entry, idempotently.
    let package_json = app_path.join("package.json");
    let first = fs::read_to_string(&package_json).unwrap();
    assert!(first.contains("extraResources"));
    desktop_bundler::package::electron::ensure_bundle_extra_resources(&app_path).unwrap();
    assert_eq!(first, fs::read_to_string(&package_json).unwrap());

    // A tiny bundle stays below the warning threshold.
    assert!(report.size.total_bytes > 0);
    assert!(report.size.warning.is_none());

    // Every staged file lives inside the bundle.
    for file in &report.staged_files {
        assert!(
            file.starts_with(&report.bundle_dir),
            "{} escaped the bundle",
            file.display()
        );
    }
}

#[test]
fn multi_platform_prebuilt_binaries_are_normalized_inside_bundle() {
    if !go_available() {
        eprintln!("skipping test: go not on PATH");
        return;
    }
    runtime_fixture();

    // Prebuilt binaries live two levels above the app, as external build
    // systems often leave them.
    let temp = tempfile::TempDir::new().unwrap();
    let workspace = temp.path();
    let app_path = workspace.join("apps/demo");
    fs::create_dir_all(&app_path).unwrap();
    for key in ["win-x64", "linux-x64"] {
        fs::create_dir_all(workspace.join("bin").join(key)).unwrap();
    }
    fs::write(workspace.join("bin/win-x64/api.exe"), "win build").unwrap();
    fs::write(workspace.join("bin/linux-x64/api"), "linux build").unwrap();

    let manifest = serde_json::json!({
        "schema_version": "1",
        "target": "desktop",
        "app": {"name": "Demo", "id": "com.example.demo"},
        "services": [{
            "id": "api",
            "type": "api",
            "binaries": {
                "win-x64": {"path": "../../bin/win-x64/api.exe"},
                "linux-x64": {"path": "../../bin/linux-x64/api"}
            }
        }]
    });
    let manifest_path = app_path.join("bundle.json");
    fs::write(&manifest_path, serde_json::to_string_pretty(&manifest).unwrap()).unwrap();

    let report = desktop_bundler::package(
        &app_path,
        &manifest_path,
        &["win-x64".to_string(), "linux-x64".to_string()],
    )
    .unwrap();

    assert_eq!(report.platforms, vec!["windows-amd64", "linux-amd64"]);

    // Parent traversals normalized away: binaries land under bundle/bin/.
    assert_eq!(
        fs::read_to_string(report.bundle_dir.join("bin/win-x64/api.exe")).unwrap(),
        "win build"
    );
    assert_eq!(
        fs::read_to_string(report.bundle_dir.join("bin/linux-x64/api")).unwrap(),
        "linux build"
    );

    // Runtime embedded for both platforms, .exe suffix on windows.
    let keys: Vec<&str> = report
        .runtime
        .iter()
        .map(|r| r.platform_key.as_str())
        .collect();
    assert_eq!(keys, vec!["win-x64", "linux-x64"]);
    assert!(report
        .bundle_dir
        .join("runtime/win-x64/runtime.exe")
        .is_file());
    assert!(report.bundle_dir.join("runtime/linux-x64/runtime").is_file());
}

#[test]
fn escaping_asset_aborts_without_writing_outside() {
    // Asset staging runs before runtime embedding, so no toolchain is
    // involved in this failure path.
    let manifest = serde_json::json!({
        "schema_version": "1",
        "target": "desktop",
        "services": [{
            "id": "svc",
            "type": "api",
            "binaries": {"linux-amd64": {"path": "bin/svc"}},
            "assets": [{"path": "../../etc/passwd"}]
        }]
    });
    let (temp, app_path, manifest_path) = write_app(&manifest);
    fs::create_dir_all(app_path.join("bin")).unwrap();
    fs::write(app_path.join("bin/svc"), "bin").unwrap();

    let err = desktop_bundler::package(
        &app_path,
        &manifest_path,
        &["linux-amd64".to_string()],
    )
    .unwrap_err();
    assert_eq!(desktop_bundler::ingress_status(&err), 400);

    // Nothing was staged outside the bundle root.
    assert!(!temp.path().join("etc").exists());
    assert!(!app_path.join("bundle/etc").exists());
}

#[test]
fn missing_coverage_is_rejected_before_any_staging() {
    let manifest = serde_json::json!({
        "schema_version": "1",
        "target": "desktop",
        "services": [{
            "id": "svc",
            "type": "api",
            "binaries": {"linux-amd64": {"path": "bin/svc"}}
        }]
    });
    let (_temp, app_path, manifest_path) = write_app(&manifest);

    let err = desktop_bundler::package(
        &app_path,
        &manifest_path,
        &["win-x64".to_string()],
    )
    .unwrap_err();
    assert_eq!(desktop_bundler::ingress_status(&err), 400);
    assert!(format!("{err:#}").contains("neither a binary nor a build config"));
}

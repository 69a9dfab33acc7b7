//! Preflight pipeline tests against a fixture supervisor.
//!
//! The supervisor child is a stub shell script that writes the control
//! files and sleeps; the control API itself is a `tiny_http` server the
//! test owns, so every endpoint's payload is under test control.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use desktop_bundler::platform::{host_platform_key, parse_platform_key};
use desktop_bundler::preflight::job::{JobState, StepState};
use desktop_bundler::preflight::{PreflightRequest, PreflightService};
use tiny_http::{Response, Server};

/// Control-plane fixture: serves supervisor endpoints until dropped.
struct FakeControlPlane {
    port: u16,
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl FakeControlPlane {
    /// `secret_filled` drives the `/secrets` payload's `has_value`.
    fn start(secret_filled: bool) -> Self {
        let server = Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = std::thread::spawn(move || {
            while !stop_flag.load(Ordering::SeqCst) {
                let Ok(Some(request)) = server.recv_timeout(Duration::from_millis(50)) else {
                    continue;
                };
                let path = request.url().split('?').next().unwrap_or("").to_string();
                let body = match path.as_str() {
                    "/healthz" => "{}".to_string(),
                    "/status" => {
                        r#"{"instance_id":"fixture-1","status":"running"}"#.to_string()
                    }
                    "/validate" => {
                        r#"{"valid":true,"errors":[],"warnings":[],"missing_assets":[]}"#
                            .to_string()
                    }
                    "/secrets" => format!(
                        r#"{{"secrets":[{{"id":"API_KEY","required":true,"has_value":{secret_filled}}}]}}"#
                    ),
                    "/readyz" => {
                        r#"{"ready":true,"services":{"api":{"ready":true}}}"#.to_string()
                    }
                    "/ports" => r#"{"api":{"api":4400}}"#.to_string(),
                    "/telemetry" => {
                        r#"{"path":"/tmp/telemetry/demo.jsonl"}"#.to_string()
                    }
                    "/logs/tail" => "log line one\nlog line two".to_string(),
                    _ => {
                        let _ = request.respond(Response::from_string("{}").with_status_code(404));
                        continue;
                    }
                };
                let _ = request.respond(Response::from_string(body));
            }
        });

        Self {
            port,
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for FakeControlPlane {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Stage a minimal bundle: manifest, a staged binary, and a stub runtime
/// that writes the control files pointing at the fixture port.
fn write_bundle(dir: &Path, control_port: u16) -> PathBuf {
    let bundle = dir.join("bundle");
    fs::create_dir_all(bundle.join("bin")).unwrap();
    fs::write(bundle.join("bin/api"), "api binary bytes").unwrap();

    let manifest = serde_json::json!({
        "schema_version": "1",
        "target": "desktop",
        "app": {"name": "Demo", "id": "com.example.demo"},
        "services": [{
            "id": "api",
            "type": "api",
            "binaries": {
                "linux-amd64": {"path": "bin/api"},
                "linux-arm64": {"path": "bin/api"},
                "darwin-amd64": {"path": "bin/api"},
                "darwin-arm64": {"path": "bin/api"}
            },
            "log_dir": "logs/api",
            "readiness": {"timeout_ms": 5000}
        }],
        "ipc": {"host": "127.0.0.1", "port": 0, "auth_token_path": "runtime/auth_token"},
        "secrets": [{"id": "API_KEY", "required": true}]
    });
    fs::write(
        bundle.join("bundle.json"),
        serde_json::to_string_pretty(&manifest).unwrap(),
    )
    .unwrap();

    let host = parse_platform_key(&host_platform_key()).unwrap();
    let runtime_dir = bundle
        .join("runtime")
        .join(desktop_bundler::package::runtime::runtime_dir_key(&host));
    fs::create_dir_all(&runtime_dir).unwrap();
    let script = format!(
        "#!/bin/sh\nmkdir -p \"$APP_DATA/runtime\"\n\
         printf 'fixture-token' > \"$APP_DATA/runtime/auth_token\"\n\
         printf '{control_port}' > \"$APP_DATA/runtime/ipc_port\"\n\
         sleep 120\n"
    );
    let runtime = runtime_dir.join("runtime");
    fs::write(&runtime, script).unwrap();
    desktop_bundler::paths::make_executable(&runtime).unwrap();

    bundle
}

fn base_request(bundle: &Path) -> PreflightRequest {
    PreflightRequest {
        bundle_manifest_path: bundle.join("bundle.json").display().to_string(),
        timeout_seconds: Some(10),
        ..Default::default()
    }
}

#[test]
fn dry_run_preflight_collects_everything() {
    let temp = tempfile::TempDir::new().unwrap();
    let control = FakeControlPlane::start(true);
    let bundle = write_bundle(temp.path(), control.port);

    let service = PreflightService::new();
    let request = PreflightRequest {
        log_tail_lines: 50,
        ..base_request(&bundle)
    };
    let response = service.run_bundle_preflight(&request).unwrap();

    assert_eq!(response.status, "ok");
    assert!(response.session_id.is_none());
    assert!(response.errors.is_empty(), "errors: {:?}", response.errors);

    assert!(response.validation.as_ref().unwrap().valid);
    assert_eq!(
        response.runtime_status.as_ref().unwrap().instance_id,
        "fixture-1"
    );

    let ready = response.ready.as_ref().unwrap();
    assert!(ready.ready);
    assert!(ready.waited_seconds.is_some());
    assert!(ready.snapshot_at.is_some());

    assert_eq!(response.secrets.len(), 1);
    assert!(response.secrets[0].has_value);

    assert_eq!(response.ports.as_ref().unwrap()["api"]["api"], 4400);
    assert_eq!(
        response.telemetry.as_ref().unwrap().path,
        "/tmp/telemetry/demo.jsonl"
    );
    assert!(response.log_tails["api"].content.contains("log line one"));

    // Fingerprint of the staged binary.
    let fingerprint = &response.service_fingerprints[0];
    assert_eq!(fingerprint.service_id, "api");
    assert_eq!(fingerprint.size, 16);
    assert_eq!(fingerprint.sha256.len(), 64);
    assert!(fingerprint.error.is_none());

    // Checks: everything passes except the steps that need started
    // services.
    let state_of = |id: &str| {
        response
            .checks
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.state)
            .unwrap()
    };
    assert_eq!(state_of("validation"), StepState::Pass);
    assert_eq!(state_of("runtime"), StepState::Pass);
    assert_eq!(state_of("secrets"), StepState::Pass);
    assert_eq!(state_of("services"), StepState::Skipped);
    assert_eq!(state_of("diagnostics"), StepState::Skipped);
}

#[test]
fn async_job_records_steps_and_partial_results() {
    let temp = tempfile::TempDir::new().unwrap();
    // Required secret left unfilled: the secrets step must warn.
    let control = FakeControlPlane::start(false);
    let bundle = write_bundle(temp.path(), control.port);

    let service = PreflightService::new();
    let request = base_request(&bundle);
    let job_id = service.jobs().create();
    service.run_preflight_job(&job_id, &request);

    let view = service.jobs().get(&job_id).unwrap();
    assert_eq!(view.status, JobState::Completed);
    assert!(view.err.is_none());

    let state_of = |id: &str| {
        view.steps
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.state)
            .unwrap()
    };
    assert_eq!(state_of("validation"), StepState::Pass);
    assert_eq!(state_of("runtime"), StepState::Pass);
    assert_eq!(state_of("secrets"), StepState::Warning);
    assert_eq!(state_of("services"), StepState::Skipped);
    assert_eq!(state_of("diagnostics"), StepState::Skipped);

    let result = view.result.unwrap();
    assert!(result.validation.as_ref().unwrap().valid);
    assert!(!result.secrets[0].has_value);
    assert_eq!(result.checks.len(), 5);
}

#[test]
fn session_lifecycle_start_status_stop() {
    let temp = tempfile::TempDir::new().unwrap();
    let control = FakeControlPlane::start(true);
    let bundle = write_bundle(temp.path(), control.port);

    let service = PreflightService::new();

    // Start a session with a 60 second TTL.
    let request = PreflightRequest {
        start_services: true,
        session_ttl_seconds: Some(60),
        ..base_request(&bundle)
    };
    let response = service.run_bundle_preflight(&request).unwrap();
    let session_id = response.session_id.clone().unwrap();

    let expires_at = time::OffsetDateTime::parse(
        response.expires_at.as_deref().unwrap(),
        &time::format_description::well_known::Rfc3339,
    )
    .unwrap();
    let delta = expires_at - time::OffsetDateTime::now_utc();
    assert!(delta > time::Duration::seconds(50) && delta <= time::Duration::seconds(61));

    // Status read binds to the session and refreshes the TTL.
    let status_request = PreflightRequest {
        status_only: true,
        session_id: Some(session_id.clone()),
        ..base_request(&bundle)
    };
    let status_response = service.run_bundle_preflight(&status_request).unwrap();
    assert_eq!(status_response.session_id.as_deref(), Some(session_id.as_str()));

    // Stop, then a second stop is a 404.
    let stop_request = PreflightRequest {
        session_stop: true,
        session_id: Some(session_id.clone()),
        ..base_request(&bundle)
    };
    let stopped = service.run_bundle_preflight(&stop_request).unwrap();
    assert_eq!(stopped.status, "stopped");

    let err = service.run_bundle_preflight(&stop_request).unwrap_err();
    assert_eq!(err.status, 404);
}

#[test]
fn expired_session_is_gone_on_next_read() {
    let temp = tempfile::TempDir::new().unwrap();
    let control = FakeControlPlane::start(true);
    let bundle = write_bundle(temp.path(), control.port);

    let service = PreflightService::new();
    let request = PreflightRequest {
        start_services: true,
        session_ttl_seconds: Some(1),
        ..base_request(&bundle)
    };
    let response = service.run_bundle_preflight(&request).unwrap();
    let session_id = response.session_id.unwrap();

    std::thread::sleep(Duration::from_millis(1200));

    let status_request = PreflightRequest {
        status_only: true,
        session_id: Some(session_id),
        ..base_request(&bundle)
    };
    let err = service.run_bundle_preflight(&status_request).unwrap_err();
    assert_eq!(err.status, 404);
}

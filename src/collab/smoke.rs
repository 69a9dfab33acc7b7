//! Smoke-test runner.
//!
//! Runs an app's Electron `smoke-test` npm script under a 30 second
//! budget, watching stdout for the telemetry upload markers
//! (`SMOKE_TEST_UPLOAD=ok|error`). On headless Linux (no `DISPLAY`) the
//! script runs under `xvfb-run`. Results are recorded in the smoke-test
//! store; the runner never propagates errors to its caller's request
//! path.

use anyhow::{Context, Result};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;

use crate::store::smoke::{SmokeTestState, SmokeTestStatus, SmokeTestStore};

/// Per-run budget.
pub const SMOKE_TEST_BUDGET: Duration = Duration::from_secs(30);

/// Stdout marker prefix for telemetry upload outcome.
const UPLOAD_MARKER: &str = "SMOKE_TEST_UPLOAD=";

#[derive(Debug, Clone, Default)]
struct RunOutcome {
    passed: bool,
    logs: Vec<String>,
    telemetry_uploaded: bool,
    telemetry_upload_error: Option<String>,
}

/// Run one smoke test synchronously, recording the result.
pub fn run_smoke_test(
    store: &SmokeTestStore,
    smoke_test_id: &str,
    scenario_name: &str,
    platform: &str,
    app_dir: &Path,
    artifact_path: &str,
) -> Result<SmokeTestStatus> {
    let mut status = SmokeTestStatus::new(smoke_test_id, scenario_name, platform);
    status.artifact_path = artifact_path.to_string();
    store.save(status)?;

    let outcome = execute(app_dir);
    store.update(smoke_test_id, |status| {
        status.completed_at = Some(OffsetDateTime::now_utc());
        match &outcome {
            Ok(run) => {
                status.status = if run.passed {
                    SmokeTestState::Passed
                } else {
                    SmokeTestState::Failed
                };
                status.logs = run.logs.clone();
                status.telemetry_uploaded = run.telemetry_uploaded;
                status.telemetry_upload_error = run.telemetry_upload_error.clone();
            }
            Err(err) => {
                status.status = SmokeTestState::Failed;
                status.logs.push(format!("{err:#}"));
            }
        }
    })
}

/// Run a smoke test on a background thread.
///
/// Panics are recovered into a failed status so a crashing runner cannot
/// leave the record stuck in `running`.
pub fn spawn_smoke_test(
    store: Arc<SmokeTestStore>,
    smoke_test_id: String,
    scenario_name: String,
    platform: String,
    app_dir: std::path::PathBuf,
    artifact_path: String,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            run_smoke_test(
                &store,
                &smoke_test_id,
                &scenario_name,
                &platform,
                &app_dir,
                &artifact_path,
            )
        }));
        if let Err(panic) = result {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("smoke test {smoke_test_id} panicked: {message}");
            let _ = store.update(&smoke_test_id, |status| {
                status.status = SmokeTestState::Failed;
                status.completed_at = Some(OffsetDateTime::now_utc());
                status.logs.push(format!("panic in smoke test: {message}"));
            });
        }
    })
}

fn execute(app_dir: &Path) -> Result<RunOutcome> {
    let mut cmd = smoke_command(app_dir);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning smoke test in '{}'", app_dir.display()))?;

    let stdout = child.stdout.take().context("capturing smoke test stdout")?;
    let stderr = child.stderr.take().context("capturing smoke test stderr")?;

    let (tx, rx) = mpsc::channel::<String>();
    let tx_err = tx.clone();
    std::thread::spawn(move || {
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    std::thread::spawn(move || {
        for line in BufReader::new(stderr).lines().map_while(Result::ok) {
            if tx_err.send(line).is_err() {
                break;
            }
        }
    });

    let deadline = Instant::now() + SMOKE_TEST_BUDGET;
    let mut outcome = RunOutcome::default();
    let mut timed_out = false;
    let mut exit_status = None;

    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => {
                if let Some(marker) = line.trim().strip_prefix(UPLOAD_MARKER) {
                    if marker.starts_with("ok") {
                        outcome.telemetry_uploaded = true;
                    } else {
                        outcome.telemetry_upload_error = Some(marker.to_string());
                    }
                }
                outcome.logs.push(line);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                if exit_status.is_none() {
                    exit_status = Some(child.wait()?);
                }
                break;
            }
        }

        if exit_status.is_none() {
            if let Some(status) = child.try_wait()? {
                exit_status = Some(status);
            }
        }

        if Instant::now() >= deadline {
            timed_out = true;
            let _ = child.kill();
            let _ = child.wait();
            break;
        }
    }

    // Drain whatever the reader threads still have buffered.
    while let Ok(line) = rx.try_recv() {
        if let Some(marker) = line.trim().strip_prefix(UPLOAD_MARKER) {
            if marker.starts_with("ok") {
                outcome.telemetry_uploaded = true;
            } else {
                outcome.telemetry_upload_error = Some(marker.to_string());
            }
        }
        outcome.logs.push(line);
    }

    if timed_out {
        outcome.passed = false;
        outcome.logs.push(format!(
            "smoke test exceeded its {}s budget and was killed",
            SMOKE_TEST_BUDGET.as_secs()
        ));
    } else {
        outcome.passed = exit_status.map(|s| s.success()).unwrap_or(false);
    }

    Ok(outcome)
}

/// `npm run smoke-test`, wrapped in `xvfb-run -a` on headless Linux.
fn smoke_command(app_dir: &Path) -> Command {
    let headless = cfg!(target_os = "linux")
        && std::env::var_os("DISPLAY").is_none()
        && which::which("xvfb-run").is_ok();

    let mut cmd = if headless {
        let mut cmd = Command::new("xvfb-run");
        cmd.args(["-a", "npm", "run", "smoke-test"]);
        cmd
    } else {
        let mut cmd = Command::new("npm");
        cmd.args(["run", "smoke-test"]);
        cmd
    };
    cmd.current_dir(app_dir);
    cmd
}

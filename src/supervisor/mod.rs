//! Supervisor process lifecycle.
//!
//! The supervisor is the bundled `runtime` binary: it starts declared
//! services, exposes the localhost control API, and writes its auth token
//! and IPC port under `<app_data>/runtime/`. This module owns exactly one
//! child process per supervisor and guarantees teardown removes the
//! temporary `app_data`.

pub mod client;

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::StageError;
use crate::platform::{host_platform_key, parse_platform_key};

/// Interval between checks for the auth token / IPC port files.
const FILE_WAIT_INTERVAL: Duration = Duration::from_millis(50);

/// Interval between `/healthz` probes while waiting for liveness.
const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub manifest_path: PathBuf,
    pub bundle_root: PathBuf,
    pub app_data: PathBuf,
    pub dry_run: bool,
}

/// An owned supervisor child process.
pub struct Supervisor {
    child: Child,
    config: SupervisorConfig,
    base_url: Option<String>,
    auth_token: Option<String>,
    finished: bool,
}

impl Supervisor {
    /// Spawn the bundled runtime for the host platform.
    pub fn start(config: SupervisorConfig) -> Result<Self> {
        let binary = runtime_binary_path(&config.bundle_root)?;
        fs::create_dir_all(&config.app_data).with_context(|| {
            format!("creating app data directory '{}'", config.app_data.display())
        })?;

        let mut cmd = Command::new(&binary);
        cmd.arg("--manifest")
            .arg(&config.manifest_path)
            .arg("--bundle-root")
            .arg(&config.bundle_root)
            .arg("--app-data")
            .arg(&config.app_data);
        if config.dry_run {
            cmd.arg("--dry-run");
        }
        cmd.env("APP_DATA", &config.app_data);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        log::info!(
            "starting supervisor '{}' (dry_run={})",
            binary.display(),
            config.dry_run
        );
        let child = cmd
            .spawn()
            .with_context(|| format!("spawning supervisor '{}'", binary.display()))?;

        Ok(Self {
            child,
            config,
            base_url: None,
            auth_token: None,
            finished: false,
        })
    }

    /// Wait for the auth token and IPC port files to appear, then bind
    /// the control base URL.
    pub fn wait_for_control_files(&mut self, budget: Duration) -> Result<()> {
        let runtime_dir = self.config.app_data.join("runtime");
        let token_path = runtime_dir.join("auth_token");
        let port_path = runtime_dir.join("ipc_port");

        let deadline = Instant::now() + budget;
        loop {
            if let (Some(token), Some(port)) = (
                read_nonempty(&token_path),
                read_nonempty(&port_path).and_then(|s| s.trim().parse::<u16>().ok()),
            ) {
                self.auth_token = Some(token.trim().to_string());
                self.base_url = Some(format!("http://127.0.0.1:{port}"));
                return Ok(());
            }

            if let Some(status) = self.child.try_wait()? {
                bail!("supervisor exited with {status} before writing its control files");
            }
            if Instant::now() >= deadline {
                bail!(
                    "supervisor did not write '{}' and '{}' within {:.1}s",
                    token_path.display(),
                    port_path.display(),
                    budget.as_secs_f64()
                );
            }
            std::thread::sleep(FILE_WAIT_INTERVAL);
        }
    }

    /// Poll `/healthz` until the control API answers 200.
    pub fn wait_healthy(&self, budget: Duration) -> Result<client::ControlClient> {
        let control = self.control_client()?;
        let deadline = Instant::now() + budget;
        loop {
            if control.healthz().is_ok() {
                return Ok(control);
            }
            if Instant::now() >= deadline {
                return Err(StageError::SupervisorUnreachable(budget.as_secs()).into());
            }
            std::thread::sleep(HEALTH_POLL_INTERVAL);
        }
    }

    /// Client bound to this supervisor's control surface.
    ///
    /// Fails until [`Supervisor::wait_for_control_files`] has succeeded.
    pub fn control_client(&self) -> Result<client::ControlClient> {
        let (Some(base_url), Some(token)) = (&self.base_url, &self.auth_token) else {
            bail!("supervisor control files not read yet");
        };
        Ok(client::ControlClient::new(base_url, token))
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn app_data(&self) -> &Path {
        &self.config.app_data
    }

    /// Kill the child, reap it, and remove `app_data`. Idempotent.
    pub fn shutdown(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let _ = self.child.kill();
        let _ = self.child.wait();
        if self.config.app_data.exists() {
            if let Err(err) = fs::remove_dir_all(&self.config.app_data) {
                log::warn!(
                    "failed to remove app data '{}': {err}",
                    self.config.app_data.display()
                );
            }
        }
        log::info!("supervisor shut down");
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Path of the bundled runtime binary for the host platform.
///
/// Runtime directories use the electron-style key, so the canonical host
/// key is translated before the lookup.
pub fn runtime_binary_path(bundle_root: &Path) -> Result<PathBuf> {
    let host = parse_platform_key(&host_platform_key())?;
    let dir_key = crate::package::runtime::runtime_dir_key(&host);
    let name = crate::platform::runtime_binary_name("runtime", &host.goos);
    let path = bundle_root.join("runtime").join(&dir_key).join(name);
    if !path.is_file() {
        bail!(StageError::NotFound(format!(
            "bundled runtime for '{dir_key}' at '{}'",
            path.display()
        )));
    }
    Ok(path)
}

fn read_nonempty(path: &Path) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    if content.trim().is_empty() {
        None
    } else {
        Some(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::make_executable;

    /// Stub runtime that writes control files and then sleeps.
    fn write_stub_runtime(bundle_root: &Path, port: u16) {
        let host = parse_platform_key(&host_platform_key()).unwrap();
        let dir = bundle_root
            .join("runtime")
            .join(crate::package::runtime::runtime_dir_key(&host));
        fs::create_dir_all(&dir).unwrap();
        let script = format!(
            "#!/bin/sh\nmkdir -p \"$APP_DATA/runtime\"\n\
             printf 'stub-token' > \"$APP_DATA/runtime/auth_token\"\n\
             printf '{port}' > \"$APP_DATA/runtime/ipc_port\"\n\
             sleep 60\n"
        );
        let path = dir.join("runtime");
        fs::write(&path, script).unwrap();
        make_executable(&path).unwrap();
    }

    #[test]
    fn missing_runtime_binary_is_not_found() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = runtime_binary_path(temp.path()).unwrap_err();
        assert_eq!(crate::error::ingress_status(&err), 404);
    }

    #[test]
    fn start_waits_for_control_files_and_tears_down() {
        let temp = tempfile::TempDir::new().unwrap();
        let bundle_root = temp.path().join("bundle");
        fs::create_dir_all(&bundle_root).unwrap();
        write_stub_runtime(&bundle_root, 45999);

        let app_data = temp.path().join("app-data");
        let mut supervisor = Supervisor::start(SupervisorConfig {
            manifest_path: bundle_root.join("bundle.json"),
            bundle_root: bundle_root.clone(),
            app_data: app_data.clone(),
            dry_run: true,
        })
        .unwrap();

        supervisor
            .wait_for_control_files(Duration::from_secs(5))
            .unwrap();
        assert_eq!(supervisor.auth_token(), Some("stub-token"));
        assert_eq!(supervisor.base_url(), Some("http://127.0.0.1:45999"));

        supervisor.shutdown();
        assert!(!app_data.exists());
        // A second shutdown is a no-op.
        supervisor.shutdown();
    }

    #[test]
    fn early_exit_is_reported() {
        let temp = tempfile::TempDir::new().unwrap();
        let bundle_root = temp.path().join("bundle");
        let host = parse_platform_key(&host_platform_key()).unwrap();
        let dir = bundle_root
            .join("runtime")
            .join(crate::package::runtime::runtime_dir_key(&host));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("runtime");
        fs::write(&path, "#!/bin/sh\nexit 3\n").unwrap();
        make_executable(&path).unwrap();

        let mut supervisor = Supervisor::start(SupervisorConfig {
            manifest_path: bundle_root.join("bundle.json"),
            bundle_root,
            app_data: temp.path().join("app-data"),
            dry_run: true,
        })
        .unwrap();

        let err = supervisor
            .wait_for_control_files(Duration::from_secs(5))
            .unwrap_err();
        assert!(err.to_string().contains("exited"));
    }
}

//! Preflight service.
//!
//! A preflight spins the bundled supervisor up (in a sandboxed dry run or
//! a TTL-bounded session), validates artifacts, applies secrets, waits for
//! readiness, and collects ports, telemetry, and log tails into one
//! response. The synchronous entry point surfaces whole-operation
//! failures as [`PreflightStatusError`]; partial failures travel as step
//! states inside the response. The async variant records the same
//! pipeline step-by-step in the job store.

pub mod job;
pub mod session;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::PreflightStatusError;
use crate::manifest::Manifest;
use crate::paths::normalize_bundle_path;
use crate::platform::host_platform_key;
use crate::supervisor::client::{
    ControlClient, PortsMap, ReadinessSnapshot, RuntimeStatusReport, SecretStatus,
    TelemetryReport, ValidationReport, MAX_LOG_TAIL_LINES,
};
use crate::supervisor::{Supervisor, SupervisorConfig};

use job::{JobState, JobStore, StepState};
use session::{SessionHandle, SessionStore};

/// Default and maximum dry-run timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_TIMEOUT: Duration = Duration::from_secs(120);

/// Minimum budget for the control-file wait.
const MIN_FILE_WAIT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PreflightRequest {
    pub bundle_manifest_path: String,
    pub bundle_root: Option<String>,
    pub start_services: bool,
    pub status_only: bool,
    pub session_id: Option<String>,
    pub session_stop: bool,
    pub session_ttl_seconds: Option<u64>,
    pub secrets: BTreeMap<String, String>,
    pub timeout_seconds: Option<u64>,
    pub log_tail_services: Vec<String>,
    pub log_tail_lines: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceFingerprint {
    pub service_id: String,
    pub platform: String,
    #[serde(default)]
    pub binary_path: String,
    #[serde(default)]
    pub resolved_path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<String>,
    #[serde(default)]
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogTail {
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckEntry {
    pub id: String,
    pub state: StepState,
    #[serde(default)]
    pub detail: String,
}

/// The accumulating preflight result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreflightResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_status: Option<RuntimeStatusReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready: Option<ReadinessSnapshot>,
    #[serde(default)]
    pub secrets: Vec<SecretStatus>,
    #[serde(default)]
    pub secrets_applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<PortsMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<TelemetryReport>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub log_tails: BTreeMap<String, LogTail>,
    #[serde(default)]
    pub checks: Vec<CheckEntry>,
    #[serde(default)]
    pub service_fingerprints: Vec<ServiceFingerprint>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

/// Owns the session and job stores and drives preflight runs.
pub struct PreflightService {
    sessions: Arc<SessionStore>,
    jobs: Arc<JobStore>,
}

/// What a preflight is bound to for the duration of one run.
enum Binding {
    Session(SessionHandle),
    DryRun {
        supervisor: Supervisor,
        // Backs the supervisor's app_data; cleaned on drop after the
        // supervisor removed its contents.
        _app_data: tempfile::TempDir,
    },
}

impl Binding {
    fn client(&self) -> Result<ControlClient> {
        match self {
            Binding::Session(handle) => {
                Ok(ControlClient::new(&handle.base_url, &handle.auth_token))
            }
            Binding::DryRun { supervisor, .. } => supervisor.control_client(),
        }
    }

    fn session(&self) -> Option<&SessionHandle> {
        match self {
            Binding::Session(handle) => Some(handle),
            Binding::DryRun { .. } => None,
        }
    }
}

impl PreflightService {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(SessionStore::new()),
            jobs: Arc::new(JobStore::new()),
        }
    }

    pub fn sessions(&self) -> Arc<SessionStore> {
        self.sessions.clone()
    }

    pub fn jobs(&self) -> Arc<JobStore> {
        self.jobs.clone()
    }

    /// Start the session and job janitors.
    pub fn spawn_janitors(&self) {
        session::spawn_janitor(self.sessions.clone());
        job::spawn_janitor(self.jobs.clone());
    }

    /// Run a full preflight synchronously.
    pub fn run_bundle_preflight(
        &self,
        request: &PreflightRequest,
    ) -> Result<PreflightResponse, PreflightStatusError> {
        if request.session_stop {
            return self.stop_session(request);
        }

        let (manifest, manifest_path, bundle_root) = load_inputs(request)?;
        let timeout = effective_timeout(request);
        let binding = self.bind(request, &manifest_path, &bundle_root, timeout)?;

        let client = binding
            .client()
            .map_err(|err| PreflightStatusError::new(500, err))?;

        let mut response = PreflightResponse {
            status: "ok".to_string(),
            ..Default::default()
        };
        if let Some(handle) = binding.session() {
            response.session_id = Some(handle.id.clone());
            response.expires_at = rfc3339(handle.expires_at);
        }

        // Collection order: status, fingerprints, secret push,
        // validation, secret summary, readiness, ports/telemetry, tails.
        collect_status(&client, &mut response);
        response.service_fingerprints = fingerprint_services(&manifest, &bundle_root);
        let apply_failed = apply_secrets(&client, request, &mut response);
        if !request.status_only {
            collect_validation(&client, &mut response);
            collect_secret_summary(&client, &mut response);
        }
        let ready_failed = collect_readiness(&client, &manifest, request, timeout, &mut response);
        let diag_failed = collect_diagnostics(&client, &manifest, request, &mut response);

        response.checks = derive_checks(
            &manifest,
            request,
            &response,
            &PhaseFailures {
                supervisor: false,
                secrets_apply: apply_failed,
                readiness: ready_failed,
                diagnostics: diag_failed,
            },
        );

        Ok(response)
    }

    /// Run the same pipeline as a job, emitting step transitions and
    /// partial results as each phase settles.
    pub fn run_preflight_job(&self, job_id: &str, request: &PreflightRequest) {
        let jobs = self.jobs.clone();
        let publish = |response: &PreflightResponse| {
            let snapshot = response.clone();
            let _ = jobs.set_result(job_id, move |_| snapshot);
        };

        let (manifest, manifest_path, bundle_root) = match load_inputs(request) {
            Ok(inputs) => inputs,
            Err(err) => {
                let _ = jobs.set_step(job_id, "validation", StepState::Fail, &err.to_string());
                let _ = jobs.finish(job_id, JobState::Failed, Some(err.to_string()));
                return;
            }
        };
        let timeout = effective_timeout(request);

        let binding = match self.bind(request, &manifest_path, &bundle_root, timeout) {
            Ok(binding) => binding,
            Err(err) => {
                let _ = jobs.set_step(job_id, "runtime", StepState::Fail, &err.to_string());
                let _ = jobs.finish(job_id, JobState::Failed, Some(err.to_string()));
                return;
            }
        };
        let client = match binding.client() {
            Ok(client) => client,
            Err(err) => {
                let _ = jobs.set_step(job_id, "runtime", StepState::Fail, &format!("{err:#}"));
                let _ = jobs.finish(job_id, JobState::Failed, Some(format!("{err:#}")));
                return;
            }
        };

        let mut response = PreflightResponse {
            status: "ok".to_string(),
            ..Default::default()
        };
        if let Some(handle) = binding.session() {
            response.session_id = Some(handle.id.clone());
            response.expires_at = rfc3339(handle.expires_at);
        }
        response.service_fingerprints = fingerprint_services(&manifest, &bundle_root);
        publish(&response);

        // validation
        let _ = jobs.set_step(job_id, "validation", StepState::Running, "");
        if !request.status_only {
            collect_validation(&client, &mut response);
        }
        let (state, detail) = validation_state(request, &response);
        let _ = jobs.set_step(job_id, "validation", state, &detail);
        publish(&response);

        // runtime
        let _ = jobs.set_step(job_id, "runtime", StepState::Running, "");
        collect_status(&client, &mut response);
        let (state, detail) = runtime_state(&response, false);
        let _ = jobs.set_step(job_id, "runtime", state, &detail);
        publish(&response);

        // secrets
        let _ = jobs.set_step(job_id, "secrets", StepState::Running, "");
        let apply_failed = apply_secrets(&client, request, &mut response);
        if !request.status_only {
            collect_secret_summary(&client, &mut response);
        }
        let (state, detail) = secrets_state(&manifest, &response, apply_failed);
        let _ = jobs.set_step(job_id, "secrets", state, &detail);
        publish(&response);

        // services
        let _ = jobs.set_step(job_id, "services", StepState::Running, "");
        let ready_failed = collect_readiness(&client, &manifest, request, timeout, &mut response);
        let (state, detail) = services_state(request, &response, ready_failed);
        let _ = jobs.set_step(job_id, "services", state, &detail);
        publish(&response);

        // diagnostics
        let _ = jobs.set_step(job_id, "diagnostics", StepState::Running, "");
        let diag_failed = collect_diagnostics(&client, &manifest, request, &mut response);
        let (state, detail) = diagnostics_state(request, &response, diag_failed);
        let _ = jobs.set_step(job_id, "diagnostics", state, &detail);

        response.checks = derive_checks(
            &manifest,
            request,
            &response,
            &PhaseFailures {
                supervisor: false,
                secrets_apply: apply_failed,
                readiness: ready_failed,
                diagnostics: diag_failed,
            },
        );
        publish(&response);

        let _ = jobs.finish(job_id, JobState::Completed, None);
    }

    fn stop_session(
        &self,
        request: &PreflightRequest,
    ) -> Result<PreflightResponse, PreflightStatusError> {
        let Some(id) = &request.session_id else {
            return Err(PreflightStatusError::bad_request(
                "session_stop requires session_id",
            ));
        };
        if !self.sessions.stop(id) {
            return Err(PreflightStatusError::not_found(format!("session '{id}'")));
        }
        Ok(PreflightResponse {
            status: "stopped".to_string(),
            ..Default::default()
        })
    }

    fn bind(
        &self,
        request: &PreflightRequest,
        manifest_path: &Path,
        bundle_root: &Path,
        timeout: Duration,
    ) -> Result<Binding, PreflightStatusError> {
        if request.status_only {
            let Some(id) = &request.session_id else {
                return Err(PreflightStatusError::bad_request(
                    "status_only requires session_id",
                ));
            };
            let handle = self
                .sessions
                .refresh(id, request.session_ttl_seconds)
                .ok_or_else(|| PreflightStatusError::not_found(format!("session '{id}'")))?;
            return Ok(Binding::Session(handle));
        }

        if request.start_services {
            if let Some(id) = &request.session_id {
                self.sessions.stop(id);
            }
            let handle = self
                .sessions
                .create(
                    manifest_path.to_path_buf(),
                    bundle_root.to_path_buf(),
                    request.session_ttl_seconds,
                    file_wait_budget(timeout),
                )
                .map_err(|err| PreflightStatusError::new(500, err))?;

            let client = ControlClient::new(&handle.base_url, &handle.auth_token);
            if let Err(err) = wait_healthz(&client, timeout) {
                self.sessions.stop(&handle.id);
                return Err(PreflightStatusError::new(500, err));
            }
            return Ok(Binding::Session(handle));
        }

        // Ephemeral dry-run supervisor scoped to this call.
        let app_data = tempfile::Builder::new()
            .prefix("preflight-dryrun-")
            .tempdir()
            .context("creating dry-run app data directory")
            .map_err(|err| PreflightStatusError::new(500, err))?;

        let mut supervisor = Supervisor::start(SupervisorConfig {
            manifest_path: manifest_path.to_path_buf(),
            bundle_root: bundle_root.to_path_buf(),
            app_data: app_data.path().to_path_buf(),
            dry_run: true,
        })
        .map_err(|err| PreflightStatusError::new(500, err))?;

        supervisor
            .wait_for_control_files(file_wait_budget(timeout))
            .map_err(|err| PreflightStatusError::new(500, err))?;
        supervisor
            .wait_healthy(timeout)
            .map_err(|err| PreflightStatusError::new(500, err))?;

        Ok(Binding::DryRun {
            supervisor,
            _app_data: app_data,
        })
    }
}

impl Default for PreflightService {
    fn default() -> Self {
        Self::new()
    }
}

fn load_inputs(
    request: &PreflightRequest,
) -> Result<(Manifest, PathBuf, PathBuf), PreflightStatusError> {
    if request.bundle_manifest_path.is_empty() {
        return Err(PreflightStatusError::bad_request(
            "bundle_manifest_path is required",
        ));
    }
    let manifest_path = PathBuf::from(&request.bundle_manifest_path);
    let manifest =
        Manifest::load(&manifest_path).map_err(|err| PreflightStatusError::new(400, err))?;
    let bundle_root = request
        .bundle_root
        .as_ref()
        .map(PathBuf::from)
        .or_else(|| manifest_path.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((manifest, manifest_path, bundle_root))
}

fn effective_timeout(request: &PreflightRequest) -> Duration {
    match request.timeout_seconds {
        None | Some(0) => DEFAULT_TIMEOUT,
        Some(secs) => Duration::from_secs(secs).min(MAX_TIMEOUT),
    }
}

fn file_wait_budget(timeout: Duration) -> Duration {
    (timeout / 3).max(MIN_FILE_WAIT)
}

fn wait_healthz(client: &ControlClient, budget: Duration) -> Result<()> {
    let deadline = std::time::Instant::now() + budget;
    loop {
        if client.healthz().is_ok() {
            return Ok(());
        }
        if std::time::Instant::now() >= deadline {
            return Err(crate::error::StageError::SupervisorUnreachable(budget.as_secs()).into());
        }
        std::thread::sleep(Duration::from_millis(250));
    }
}

fn rfc3339(ts: OffsetDateTime) -> Option<String> {
    ts.format(&Rfc3339).ok()
}

// ---- collection phases -------------------------------------------------

fn collect_status(client: &ControlClient, response: &mut PreflightResponse) {
    match client.status() {
        Ok(status) => response.runtime_status = Some(status),
        Err(err) => response.errors.push(format!("status: {err:#}")),
    }
}

fn collect_validation(client: &ControlClient, response: &mut PreflightResponse) {
    match client.validate() {
        Ok(report) => response.validation = Some(report),
        Err(err) => response.errors.push(format!("validate: {err:#}")),
    }
}

fn collect_secret_summary(client: &ControlClient, response: &mut PreflightResponse) {
    match client.secrets() {
        Ok(report) => response.secrets = report.secrets,
        Err(err) => response.errors.push(format!("secrets: {err:#}")),
    }
}

/// Push caller-supplied secrets; returns true when the push failed.
fn apply_secrets(
    client: &ControlClient,
    request: &PreflightRequest,
    response: &mut PreflightResponse,
) -> bool {
    if request.secrets.is_empty() {
        return false;
    }
    match client.apply_secrets(&request.secrets) {
        Ok(applied) => {
            response.secrets_applied = applied;
            false
        }
        Err(err) => {
            response.errors.push(format!("apply secrets: {err:#}"));
            true
        }
    }
}

/// Fetch readiness, polling when services were started. Returns true when
/// the fetch itself failed.
fn collect_readiness(
    client: &ControlClient,
    manifest: &Manifest,
    request: &PreflightRequest,
    timeout: Duration,
    response: &mut PreflightResponse,
) -> bool {
    let poll = request.start_services && !request.status_only;
    let budget = if poll {
        timeout.min(Duration::from_millis(manifest.max_readiness_timeout_ms()))
    } else {
        Duration::ZERO
    };

    match client.wait_ready(budget) {
        Ok((mut snapshot, waited)) => {
            snapshot.waited_seconds = Some(waited);
            snapshot.snapshot_at = rfc3339(OffsetDateTime::now_utc());
            response.ready = Some(snapshot);
            false
        }
        Err(err) => {
            response.errors.push(format!("readyz: {err:#}"));
            true
        }
    }
}

/// Fetch ports, telemetry, and log tails. Returns true when any fetch
/// failed outright.
fn collect_diagnostics(
    client: &ControlClient,
    manifest: &Manifest,
    request: &PreflightRequest,
    response: &mut PreflightResponse,
) -> bool {
    let mut failed = false;

    match client.ports() {
        Ok(ports) => response.ports = Some(ports),
        Err(err) => {
            response.errors.push(format!("ports: {err:#}"));
            failed = true;
        }
    }
    match client.telemetry() {
        Ok(telemetry) => response.telemetry = Some(telemetry),
        Err(err) => {
            response.errors.push(format!("telemetry: {err:#}"));
            failed = true;
        }
    }

    if request.log_tail_lines > 0 {
        let lines = request.log_tail_lines.min(MAX_LOG_TAIL_LINES);
        for service_id in log_tail_targets(manifest, request) {
            let entry = match client.log_tail(&service_id, lines) {
                Ok(content) => LogTail {
                    content,
                    error: None,
                },
                Err(err) => LogTail {
                    content: String::new(),
                    error: Some(format!("{err:#}")),
                },
            };
            response.log_tails.insert(service_id, entry);
        }
    }

    failed
}

/// Services whose logs get tailed: the caller's list when given,
/// otherwise every service with a log directory. Deduplicated.
fn log_tail_targets(manifest: &Manifest, request: &PreflightRequest) -> Vec<String> {
    let candidates: Vec<String> = if request.log_tail_services.is_empty() {
        manifest
            .services
            .iter()
            .filter(|s| !s.log_dir.is_empty())
            .map(|s| s.id.clone())
            .collect()
    } else {
        request.log_tail_services.clone()
    };

    let mut seen = BTreeSet::new();
    candidates
        .into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// Stat and hash each service's host-platform binary under the bundle.
fn fingerprint_services(manifest: &Manifest, bundle_root: &Path) -> Vec<ServiceFingerprint> {
    let host = host_platform_key();
    manifest
        .services
        .iter()
        .map(|service| {
            let mut fingerprint = ServiceFingerprint {
                service_id: service.id.clone(),
                platform: host.clone(),
                ..Default::default()
            };

            let Some((_, spec)) = service.binary_for_platform(&host) else {
                fingerprint.error = Some(format!("no binary declared for platform '{host}'"));
                return fingerprint;
            };
            fingerprint.binary_path = spec.path.clone();

            let resolved = bundle_root.join(normalize_bundle_path(&spec.path));
            fingerprint.resolved_path = resolved.display().to_string();

            match std::fs::metadata(&resolved) {
                Ok(meta) if meta.is_file() => {
                    fingerprint.size = meta.len();
                    fingerprint.mtime = meta
                        .modified()
                        .ok()
                        .map(OffsetDateTime::from)
                        .and_then(rfc3339);
                    match sha256_file(&resolved) {
                        Ok(sha) => fingerprint.sha256 = sha,
                        Err(err) => fingerprint.error = Some(format!("{err:#}")),
                    }
                }
                Ok(_) => {
                    fingerprint.error =
                        Some(format!("'{}' is not a regular file", resolved.display()));
                }
                Err(err) => {
                    fingerprint.error = Some(format!("stat '{}': {err}", resolved.display()));
                }
            }
            fingerprint
        })
        .collect()
}

fn sha256_file(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening '{}'", path.display()))?;
    let mut reader = std::io::BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

// ---- check derivation --------------------------------------------------

struct PhaseFailures {
    supervisor: bool,
    secrets_apply: bool,
    readiness: bool,
    diagnostics: bool,
}

fn validation_state(request: &PreflightRequest, response: &PreflightResponse) -> (StepState, String) {
    if request.status_only {
        return (StepState::Skipped, "status-only run".to_string());
    }
    match &response.validation {
        None => (StepState::Skipped, "no validation collected".to_string()),
        Some(report) if report.valid => (StepState::Pass, "bundle valid".to_string()),
        Some(report) => (
            StepState::Fail,
            format!(
                "{} error(s), {} missing asset(s)",
                report.errors.len(),
                report.missing_assets.len()
            ),
        ),
    }
}

fn runtime_state(response: &PreflightResponse, supervisor_failed: bool) -> (StepState, String) {
    if supervisor_failed {
        return (StepState::Fail, "supervisor start failed".to_string());
    }
    match &response.runtime_status {
        Some(status) => (
            StepState::Pass,
            format!("instance {}", status.instance_id),
        ),
        None => (StepState::Pass, "control api reachable".to_string()),
    }
}

fn secrets_state(
    manifest: &Manifest,
    response: &PreflightResponse,
    apply_failed: bool,
) -> (StepState, String) {
    if apply_failed {
        return (StepState::Fail, "secret push failed".to_string());
    }
    if manifest.secrets.is_empty() && response.secrets.is_empty() {
        return (StepState::Skipped, "no secrets declared".to_string());
    }
    let missing: Vec<&str> = response
        .secrets
        .iter()
        .filter(|s| s.required && !s.has_value)
        .map(|s| s.id.as_str())
        .collect();
    if missing.is_empty() {
        (StepState::Pass, "all required secrets set".to_string())
    } else {
        (
            StepState::Warning,
            format!("missing required secret(s): {}", missing.join(", ")),
        )
    }
}

fn services_state(
    request: &PreflightRequest,
    response: &PreflightResponse,
    fetch_failed: bool,
) -> (StepState, String) {
    if !request.start_services || request.status_only {
        return (StepState::Skipped, "services not started".to_string());
    }
    if fetch_failed {
        return (StepState::Fail, "readiness fetch failed".to_string());
    }
    match &response.ready {
        Some(snapshot) if snapshot.ready => (StepState::Pass, "all services ready".to_string()),
        Some(snapshot) => (
            StepState::Warning,
            format!(
                "not ready after {:.1}s",
                snapshot.waited_seconds.unwrap_or(0.0)
            ),
        ),
        None => (StepState::Fail, "readiness fetch failed".to_string()),
    }
}

fn diagnostics_state(
    request: &PreflightRequest,
    response: &PreflightResponse,
    fetch_failed: bool,
) -> (StepState, String) {
    if !request.start_services {
        return (StepState::Skipped, "services not started".to_string());
    }
    if fetch_failed {
        return (StepState::Fail, "diagnostics fetch failed".to_string());
    }
    let collected = response.ports.is_some()
        || response.telemetry.is_some()
        || !response.log_tails.is_empty();
    if collected {
        (StepState::Pass, "diagnostics collected".to_string())
    } else {
        (StepState::Warning, "no diagnostics collected".to_string())
    }
}

/// Summarize the run as a check list, expanding asset-related validation
/// issues into individual entries keyed `service:path`.
fn derive_checks(
    manifest: &Manifest,
    request: &PreflightRequest,
    response: &PreflightResponse,
    failures: &PhaseFailures,
) -> Vec<CheckEntry> {
    let mut checks = Vec::new();

    let (state, detail) = validation_state(request, response);
    checks.push(CheckEntry {
        id: "validation".to_string(),
        state,
        detail,
    });
    let (state, detail) = runtime_state(response, failures.supervisor);
    checks.push(CheckEntry {
        id: "runtime".to_string(),
        state,
        detail,
    });
    let (state, detail) = secrets_state(manifest, response, failures.secrets_apply);
    checks.push(CheckEntry {
        id: "secrets".to_string(),
        state,
        detail,
    });
    let (state, detail) = services_state(request, response, failures.readiness);
    checks.push(CheckEntry {
        id: "services".to_string(),
        state,
        detail,
    });
    let (state, detail) = diagnostics_state(request, response, failures.diagnostics);
    checks.push(CheckEntry {
        id: "diagnostics".to_string(),
        state,
        detail,
    });

    if let Some(validation) = &response.validation {
        for (issues, state) in [
            (&validation.errors, StepState::Fail),
            (&validation.warnings, StepState::Warning),
        ] {
            for issue in issues.iter().filter(|i| i.path.is_some()) {
                let service = issue.service.as_deref().unwrap_or("bundle");
                let path = issue.path.as_deref().unwrap_or_default();
                checks.push(CheckEntry {
                    id: format!("{service}:{path}"),
                    state,
                    detail: issue.message.clone(),
                });
            }
        }
    }

    checks
}

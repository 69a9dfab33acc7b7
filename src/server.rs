//! HTTP ingress for the preflight job/session surface.
//!
//! Routing stays deliberately thin: each handler parses the request,
//! calls into the core, and maps errors to statuses
//! (`PreflightStatusError.status` honored, unknown ids 404, bad input
//! 400, everything else 500). One thread per request; jobs run on their
//! own background thread.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tiny_http::{Header, Method, Request, Response, Server};

use crate::preflight::{PreflightRequest, PreflightService};
use crate::store::build::{spawn_recorded_build, BuildState, BuildStatus, BuildStore};
use crate::store::desktop::DesktopRecordStore;
use crate::store::smoke::SmokeTestStore;

const DEFAULT_BIND: &str = "127.0.0.1:4820";

/// Server settings, loadable from a TOML file.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub state_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            state_dir: default_state_dir(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServerToml {
    server: ServerSectionToml,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServerSectionToml {
    bind: Option<String>,
    state_dir: Option<PathBuf>,
}

/// Load server settings from a TOML config file.
pub fn load_server_config(path: &std::path::Path) -> Result<ServerConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading server config '{}'", path.display()))?;
    let parsed: ServerToml = toml::from_str(&raw)
        .with_context(|| format!("parsing server config '{}'", path.display()))?;

    let defaults = ServerConfig::default();
    Ok(ServerConfig {
        bind: parsed.server.bind.unwrap_or(defaults.bind),
        state_dir: parsed.server.state_dir.unwrap_or(defaults.state_dir),
    })
}

fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("desktop-bundler")
}

/// Shared state behind the ingress.
pub struct AppState {
    pub preflight: Arc<PreflightService>,
    pub builds: Arc<BuildStore>,
    pub desktop_records: DesktopRecordStore,
    pub smoke_tests: SmokeTestStore,
}

impl AppState {
    pub fn open(config: &ServerConfig) -> Result<Self> {
        let preflight = Arc::new(PreflightService::new());
        preflight.spawn_janitors();
        Ok(Self {
            preflight,
            builds: Arc::new(BuildStore::new()),
            desktop_records: DesktopRecordStore::open(
                config.state_dir.join("desktop_records.json"),
            )?,
            smoke_tests: SmokeTestStore::open(config.state_dir.join("smoke_tests.json"))?,
        })
    }
}

/// Body of `POST /package`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PackageApiRequest {
    app_path: String,
    manifest_path: Option<String>,
    platforms: Vec<String>,
    scenario_name: Option<String>,
}

/// Queue a packaging run on a background thread, tracked in the build
/// store. Failures and panics land in the build's error log.
fn queue_package(state: &AppState, request: PackageApiRequest) -> Result<String> {
    if request.app_path.is_empty() {
        anyhow::bail!(crate::error::StageError::BadInput(
            "app_path is required".into()
        ));
    }

    let app_path = PathBuf::from(&request.app_path);
    let manifest_path = request
        .manifest_path
        .map(PathBuf::from)
        .unwrap_or_else(|| app_path.join("bundle.json"));
    let scenario = request.scenario_name.unwrap_or_else(|| {
        app_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "app".to_string())
    });

    let build_id = new_build_id();
    state.builds.save(BuildStatus::new(
        &build_id,
        &scenario,
        request.platforms.clone(),
    ))?;

    let builds = state.builds.clone();
    let task_builds = builds.clone();
    let task_build_id = build_id.clone();
    spawn_recorded_build(builds, build_id.clone(), move || {
        let report = crate::package::package(&app_path, &manifest_path, &request.platforms)?;
        task_builds.update(&task_build_id, |build| {
            build.status = BuildState::Ready;
            build.completed_at = Some(time::OffsetDateTime::now_utc());
            build.output_path = report.bundle_dir.display().to_string();
            build.platforms_requested = report.platforms.clone();
            for artifacts in &report.runtime {
                build.artifacts.insert(
                    artifacts.platform_key.clone(),
                    artifacts.runtime.display().to_string(),
                );
            }
            build
                .build_log
                .push(format!("bundle staged at {}", report.bundle_dir.display()));
            if let Some(warning) = &report.size.warning {
                build
                    .build_log
                    .push(format!("size {}: {}", warning.level, warning.message));
            }
        })?;
        Ok(())
    });

    Ok(build_id)
}

/// Body of `POST /desktop/records`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DesktopRecordApiRequest {
    build_id: String,
    scenario_name: String,
    output_path: String,
    destination_path: String,
    location_mode: Option<crate::store::desktop::LocationMode>,
    staging_path: Option<String>,
    custom_path: Option<String>,
}

fn record_desktop_location(
    state: &AppState,
    request: DesktopRecordApiRequest,
) -> Result<crate::store::desktop::DesktopAppRecord> {
    if request.scenario_name.is_empty() || request.output_path.is_empty() {
        anyhow::bail!(crate::error::StageError::BadInput(
            "scenario_name and output_path are required".into()
        ));
    }
    let mut record = crate::store::desktop::new_record(
        &request.build_id,
        &request.scenario_name,
        &request.output_path,
        &request.destination_path,
        request
            .location_mode
            .unwrap_or(crate::store::desktop::LocationMode::Proper),
    );
    record.staging_path = request.staging_path;
    record.custom_path = request.custom_path;
    state.desktop_records.record_location(record)
}

fn new_build_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("build-{nanos:x}-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Serve until the process is killed.
pub fn serve(config: ServerConfig) -> Result<()> {
    let state = Arc::new(AppState::open(&config)?);
    let server = Server::http(&config.bind)
        .map_err(|err| anyhow::anyhow!("binding '{}': {err}", config.bind))?;
    log::info!("preflight server listening on {}", config.bind);

    for request in server.incoming_requests() {
        let state = state.clone();
        std::thread::spawn(move || {
            handle_request(&state, request);
        });
    }
    Ok(())
}

/// Dispatch a single request. Public so tests can drive an ephemeral
/// server without the outer accept loop.
pub fn handle_request(state: &AppState, mut request: Request) {
    let method = request.method().clone();
    let url = request.url().to_string();
    let path = url.split('?').next().unwrap_or("").to_string();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let outcome = match (&method, segments.as_slice()) {
        (Method::Get, ["healthz"]) => json_ok(serde_json::json!({"status": "ok"})),
        (Method::Post, ["preflight"]) => match read_json::<PreflightRequest>(&mut request) {
            Ok(preflight_request) => {
                match state.preflight.run_bundle_preflight(&preflight_request) {
                    Ok(response) => json_ok(response),
                    Err(err) => json_error(err.status, &err.to_string()),
                }
            }
            Err(err) => json_error(400, &format!("{err:#}")),
        },
        (Method::Post, ["preflight", "jobs"]) => match read_json::<PreflightRequest>(&mut request)
        {
            Ok(preflight_request) => {
                let job_id = state.preflight.jobs().create();
                let preflight = state.preflight.clone();
                let thread_job_id = job_id.clone();
                std::thread::spawn(move || {
                    preflight.run_preflight_job(&thread_job_id, &preflight_request);
                });
                json_with_status(202, serde_json::json!({"job_id": job_id}))
            }
            Err(err) => json_error(400, &format!("{err:#}")),
        },
        (Method::Get, ["preflight", "jobs", id]) => match state.preflight.jobs().get(id) {
            Some(view) => json_ok(view),
            None => json_error(404, &format!("job '{id}' not found")),
        },
        (Method::Get, ["preflight", "sessions", id]) => {
            match state.preflight.sessions().refresh(id, None) {
                Some(handle) => json_ok(serde_json::json!({
                    "session_id": handle.id,
                    "base_url": handle.base_url,
                    "expires_at": handle
                        .expires_at
                        .format(&time::format_description::well_known::Rfc3339)
                        .ok(),
                })),
                None => json_error(404, &format!("session '{id}' not found")),
            }
        }
        (Method::Delete, ["preflight", "sessions", id]) => {
            if state.preflight.sessions().stop(id) {
                json_ok(serde_json::json!({"status": "stopped"}))
            } else {
                json_error(404, &format!("session '{id}' not found"))
            }
        }
        (Method::Post, ["package"]) => match read_json::<PackageApiRequest>(&mut request) {
            Ok(package_request) => match queue_package(state, package_request) {
                Ok(build_id) => {
                    json_with_status(202, serde_json::json!({"build_id": build_id}))
                }
                Err(err) => json_error(crate::error::ingress_status(&err), &format!("{err:#}")),
            },
            Err(err) => json_error(400, &format!("{err:#}")),
        },
        (Method::Get, ["builds", id]) => match state.builds.get(id) {
            Some(build) => json_ok(build),
            None => json_error(404, &format!("build '{id}' not found")),
        },
        (Method::Get, ["builds"]) => json_ok(state.builds.snapshot()),
        (Method::Get, ["desktop", "records"]) => json_ok(state.desktop_records.snapshot()),
        (Method::Post, ["desktop", "records"]) => {
            match read_json::<DesktopRecordApiRequest>(&mut request) {
                Ok(record_request) => match record_desktop_location(state, record_request) {
                    Ok(record) => json_ok(record),
                    Err(err) => {
                        json_error(crate::error::ingress_status(&err), &format!("{err:#}"))
                    }
                },
                Err(err) => json_error(400, &format!("{err:#}")),
            }
        }
        (Method::Delete, ["desktop", "records", scenario]) => {
            match state.desktop_records.delete_by_scenario(scenario) {
                Ok(0) => json_error(404, &format!("no records for scenario '{scenario}'")),
                Ok(removed) => json_ok(serde_json::json!({"removed": removed})),
                Err(err) => json_error(500, &format!("{err:#}")),
            }
        }
        (Method::Get, ["smoke-tests"]) => json_ok(state.smoke_tests.snapshot()),
        _ => json_error(404, &format!("no route for {method} {path}")),
    };

    let _ = request.respond(outcome);
}

fn read_json<T: serde::de::DeserializeOwned>(request: &mut Request) -> Result<T> {
    let mut body = String::new();
    request
        .as_reader()
        .read_to_string(&mut body)
        .context("reading request body")?;
    if body.trim().is_empty() {
        serde_json::from_str("{}").context("decoding empty request body")
    } else {
        serde_json::from_str(&body).context("decoding request body")
    }
}

type JsonResponse = Response<std::io::Cursor<Vec<u8>>>;

fn json_ok<T: serde::Serialize>(value: T) -> JsonResponse {
    json_with_status(200, value)
}

fn json_with_status<T: serde::Serialize>(status: u16, value: T) -> JsonResponse {
    let body = serde_json::to_string(&value).unwrap_or_else(|_| "{}".to_string());
    Response::from_string(body)
        .with_status_code(status)
        .with_header(json_header())
}

fn json_error(status: u16, message: &str) -> JsonResponse {
    json_with_status(status, serde_json::json!({"error": message}))
}

fn json_header() -> Header {
    Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
        .expect("static content-type header")
}

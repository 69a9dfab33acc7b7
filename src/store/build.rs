//! Build status records and the in-memory build store.
//!
//! Packaging runs are tracked per scenario: overall state, per-platform
//! results, accumulated logs, and produced artifacts. Background packaging
//! tasks never propagate errors to the request path — they record them
//! here and transition the build to `failed`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use time::OffsetDateTime;

use super::{IndexedStore, StoreRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Building,
    Ready,
    Failed,
    Partial,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformResult {
    pub status: BuildState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub error_log: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildStatus {
    pub build_id: String,
    pub scenario_name: String,
    pub status: BuildState,
    pub platforms_requested: Vec<String>,
    #[serde(default)]
    pub platform_results: BTreeMap<String, PlatformResult>,
    #[serde(default)]
    pub output_path: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub build_log: Vec<String>,
    #[serde(default)]
    pub error_log: Vec<String>,
    #[serde(default)]
    pub artifacts: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl BuildStatus {
    pub fn new(build_id: &str, scenario_name: &str, platforms: Vec<String>) -> Self {
        Self {
            build_id: build_id.to_string(),
            scenario_name: scenario_name.to_string(),
            status: BuildState::Building,
            platforms_requested: platforms,
            platform_results: BTreeMap::new(),
            output_path: String::new(),
            created_at: OffsetDateTime::now_utc(),
            completed_at: None,
            build_log: Vec::new(),
            error_log: Vec::new(),
            artifacts: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }
}

impl StoreRecord for BuildStatus {
    fn store_key(&self) -> &str {
        &self.build_id
    }
}

/// In-memory store of build statuses for the process lifetime.
pub type BuildStore = IndexedStore<BuildStatus>;

/// Run a packaging task on a background thread, recording the outcome.
///
/// Errors land in the build's error log with `status=failed`; panics are
/// recovered and recorded the same way so a crashing backend cannot take
/// the server down or leave the build stuck in `building`.
pub fn spawn_recorded_build<F>(
    store: Arc<BuildStore>,
    build_id: String,
    task: F,
) -> std::thread::JoinHandle<()>
where
    F: FnOnce() -> anyhow::Result<()> + Send + std::panic::UnwindSafe + 'static,
{
    std::thread::spawn(move || {
        let outcome = std::panic::catch_unwind(task);
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(format!("{err:#}")),
            Err(panic) => Some(format!("panic in build task: {}", panic_message(&panic))),
        };
        if let Some(message) = failure {
            log::error!("build {build_id} failed: {message}");
            let _ = store.update(&build_id, |build| {
                build.status = BuildState::Failed;
                build.completed_at = Some(OffsetDateTime::now_utc());
                build.error_log.push(message.clone());
            });
        }
    })
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

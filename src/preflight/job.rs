//! Preflight job store.
//!
//! An async preflight is observable step-by-step: five fixed steps move
//! from `pending` through `running` to a terminal state while the partial
//! result accumulates. The result snapshot is an immutable value swapped
//! under the lock — readers clone an `Arc` and never contend with the
//! writer.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;

use super::PreflightResponse;
use crate::error::StageError;

/// Fixed, ordered step ids every job carries.
pub const STEP_IDS: [&str; 5] = ["validation", "runtime", "secrets", "services", "diagnostics"];

/// Jobs whose status is no longer `running` are reaped after this long
/// without an update.
pub const JOB_RETENTION: Duration = Duration::from_secs(15 * 60);

/// Janitor sweep interval.
const JANITOR_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    Pass,
    Warning,
    Fail,
    Skipped,
}

impl StepState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepState::Pass | StepState::Warning | StepState::Fail | StepState::Skipped
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStep {
    pub id: String,
    pub state: StepState,
    #[serde(default)]
    pub detail: String,
}

/// Caller-facing job snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub id: String,
    pub status: JobState,
    pub steps: Vec<JobStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<PreflightResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

struct Job {
    status: JobState,
    steps: Vec<JobStep>,
    result: Option<Arc<PreflightResponse>>,
    err: Option<String>,
    started_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl Job {
    fn new() -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            status: JobState::Running,
            steps: STEP_IDS
                .iter()
                .map(|id| JobStep {
                    id: (*id).to_string(),
                    state: StepState::Pending,
                    detail: String::new(),
                })
                .collect(),
            result: None,
            err: None,
            started_at: now,
            updated_at: now,
        }
    }

    fn view(&self, id: &str) -> JobView {
        JobView {
            id: id.to_string(),
            status: self.status,
            steps: self.steps.clone(),
            result: self.result.as_deref().cloned(),
            err: self.err.clone(),
            started_at: self.started_at,
            updated_at: self.updated_at,
        }
    }
}

/// Mutex-guarded registry of preflight jobs.
pub struct JobStore {
    jobs: Mutex<HashMap<String, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Register a fresh running job with all steps pending.
    pub fn create(&self) -> String {
        let id = new_job_id();
        let mut jobs = self.jobs.lock().expect("job lock poisoned");
        jobs.insert(id.clone(), Job::new());
        id
    }

    pub fn get(&self, id: &str) -> Option<JobView> {
        let jobs = self.jobs.lock().expect("job lock poisoned");
        jobs.get(id).map(|job| job.view(id))
    }

    /// Update one step's state and detail.
    ///
    /// Terminal states stick: a step that already passed, warned, failed,
    /// or was skipped never reverts to `running`.
    pub fn set_step(&self, id: &str, step_id: &str, state: StepState, detail: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().expect("job lock poisoned");
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StageError::UnknownId(id.to_string()))?;
        let step = job
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or_else(|| StageError::BadInput(format!("unknown step '{step_id}'")))?;

        if step.state.is_terminal() && !state.is_terminal() {
            return Ok(());
        }
        step.state = state;
        step.detail = detail.to_string();
        job.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    /// Replace the job's result snapshot.
    ///
    /// The updater receives the previous snapshot (default when none) and
    /// returns the next one; the swap happens atomically under the lock.
    pub fn set_result<F>(&self, id: &str, updater: F) -> Result<()>
    where
        F: FnOnce(&PreflightResponse) -> PreflightResponse,
    {
        let mut jobs = self.jobs.lock().expect("job lock poisoned");
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StageError::UnknownId(id.to_string()))?;
        let previous = job.result.clone().unwrap_or_default();
        job.result = Some(Arc::new(updater(&previous)));
        job.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    /// Write the final status.
    pub fn finish(&self, id: &str, status: JobState, err: Option<String>) -> Result<()> {
        let mut jobs = self.jobs.lock().expect("job lock poisoned");
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StageError::UnknownId(id.to_string()))?;
        job.status = status;
        job.err = err;
        job.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    /// Delete settled jobs idle past the retention window.
    pub fn sweep_settled(&self) -> usize {
        let cutoff = OffsetDateTime::now_utc() - JOB_RETENTION;
        let mut jobs = self.jobs.lock().expect("job lock poisoned");
        let before = jobs.len();
        jobs.retain(|_, job| job.status == JobState::Running || job.updated_at > cutoff);
        before - jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().expect("job lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Reap settled jobs every minute until the store is dropped.
pub fn spawn_janitor(store: Arc<JobStore>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || loop {
        std::thread::sleep(JANITOR_INTERVAL);
        if Arc::strong_count(&store) == 1 {
            return;
        }
        let reaped = store.sweep_settled();
        if reaped > 0 {
            log::info!("janitor reaped {reaped} settled job(s)");
        }
    })
}

fn new_job_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("job-{nanos:x}-{seq}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_initializes_fixed_pending_steps() {
        let store = JobStore::new();
        let id = store.create();
        let view = store.get(&id).unwrap();

        assert_eq!(view.status, JobState::Running);
        let ids: Vec<&str> = view.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, STEP_IDS);
        assert!(view.steps.iter().all(|s| s.state == StepState::Pending));
        assert!(view.result.is_none());
    }

    #[test]
    fn step_transitions_and_terminal_stickiness() {
        let store = JobStore::new();
        let id = store.create();

        store
            .set_step(&id, "validation", StepState::Running, "")
            .unwrap();
        store
            .set_step(&id, "validation", StepState::Pass, "all good")
            .unwrap();
        // Terminal state does not revert to running.
        store
            .set_step(&id, "validation", StepState::Running, "again")
            .unwrap();

        let view = store.get(&id).unwrap();
        assert_eq!(view.steps[0].state, StepState::Pass);
        assert_eq!(view.steps[0].detail, "all good");
    }

    #[test]
    fn unknown_ids_are_reported() {
        let store = JobStore::new();
        assert!(store
            .set_step("nope", "validation", StepState::Running, "")
            .is_err());
        assert!(store.finish("nope", JobState::Completed, None).is_err());

        let id = store.create();
        assert!(store
            .set_step(&id, "not-a-step", StepState::Running, "")
            .is_err());
    }

    #[test]
    fn result_accumulates_through_updater() {
        let store = JobStore::new();
        let id = store.create();

        store
            .set_result(&id, |prev| {
                let mut next = prev.clone();
                next.errors.push("first".to_string());
                next
            })
            .unwrap();
        store
            .set_result(&id, |prev| {
                let mut next = prev.clone();
                next.errors.push("second".to_string());
                next
            })
            .unwrap();

        let view = store.get(&id).unwrap();
        let result = view.result.unwrap();
        assert_eq!(result.errors, vec!["first", "second"]);
    }

    #[test]
    fn sweep_keeps_running_jobs() {
        let store = JobStore::new();
        let running = store.create();
        let settled = store.create();
        store
            .finish(&settled, JobState::Completed, None)
            .unwrap();

        // Nothing is old enough to reap yet.
        assert_eq!(store.sweep_settled(), 0);
        assert!(store.get(&running).is_some());
        assert!(store.get(&settled).is_some());

        // Age the settled job past retention by rewinding updated_at.
        {
            let mut jobs = store.jobs.lock().unwrap();
            jobs.get_mut(&settled).unwrap().updated_at =
                OffsetDateTime::now_utc() - JOB_RETENTION - Duration::from_secs(1);
            jobs.get_mut(&running).unwrap().updated_at =
                OffsetDateTime::now_utc() - JOB_RETENTION - Duration::from_secs(1);
        }
        assert_eq!(store.sweep_settled(), 1);
        assert!(store.get(&running).is_some(), "running jobs are never reaped");
        assert!(store.get(&settled).is_none());
    }
}

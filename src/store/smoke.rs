//! Persistent smoke-test results.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::OffsetDateTime;

use super::{path_is_test_output, IndexedStore, StoreRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmokeTestState {
    Running,
    Passed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmokeTestStatus {
    pub smoke_test_id: String,
    pub scenario_name: String,
    pub platform: String,
    pub status: SmokeTestState,
    #[serde(default)]
    pub artifact_path: String,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub telemetry_uploaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry_upload_error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub completed_at: Option<OffsetDateTime>,
}

impl SmokeTestStatus {
    pub fn new(smoke_test_id: &str, scenario_name: &str, platform: &str) -> Self {
        Self {
            smoke_test_id: smoke_test_id.to_string(),
            scenario_name: scenario_name.to_string(),
            platform: platform.to_string(),
            status: SmokeTestState::Running,
            artifact_path: String::new(),
            logs: Vec::new(),
            telemetry_uploaded: false,
            telemetry_upload_error: None,
            created_at: OffsetDateTime::now_utc(),
            completed_at: None,
        }
    }
}

impl StoreRecord for SmokeTestStatus {
    fn store_key(&self) -> &str {
        &self.smoke_test_id
    }

    fn is_test_artifact(&self) -> bool {
        path_is_test_output(&self.artifact_path)
    }
}

/// JSON-backed store of smoke-test statuses.
pub struct SmokeTestStore {
    inner: IndexedStore<SmokeTestStatus>,
}

impl SmokeTestStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        Ok(Self {
            inner: IndexedStore::open(path)?,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            inner: IndexedStore::new(),
        }
    }

    pub fn save(&self, status: SmokeTestStatus) -> Result<()> {
        self.inner.save(status)
    }

    pub fn get(&self, id: &str) -> Option<SmokeTestStatus> {
        self.inner.get(id)
    }

    pub fn update<F>(&self, id: &str, mutate: F) -> Result<SmokeTestStatus>
    where
        F: FnOnce(&mut SmokeTestStatus),
    {
        self.inner.update(id, mutate)
    }

    pub fn snapshot(&self) -> Vec<SmokeTestStatus> {
        self.inner.snapshot()
    }

    pub fn delete_by_scenario(&self, scenario: &str) -> Result<usize> {
        self.inner
            .remove_where(|status| status.scenario_name == scenario)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoke_lifecycle_and_persistence() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("smoke_tests.json");

        {
            let store = SmokeTestStore::open(path.clone()).unwrap();
            store
                .save(SmokeTestStatus::new("s1", "demo", "linux-amd64"))
                .unwrap();
            store
                .update("s1", |status| {
                    status.status = SmokeTestState::Passed;
                    status.telemetry_uploaded = true;
                    status.completed_at = Some(OffsetDateTime::now_utc());
                })
                .unwrap();
        }

        let reopened = SmokeTestStore::open(path).unwrap();
        let status = reopened.get("s1").unwrap();
        assert_eq!(status.status, SmokeTestState::Passed);
        assert!(status.telemetry_uploaded);
    }

    #[test]
    fn update_unknown_id_fails() {
        let store = SmokeTestStore::in_memory();
        assert!(store.update("missing", |_| {}).is_err());
    }
}

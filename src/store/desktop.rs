//! Persistent ledger of where desktop builds landed.
//!
//! A scenario has exactly one canonical destination; staging and custom
//! paths are auxiliary. The ledger survives restarts via a JSON file that
//! is rewritten after every mutation.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::OffsetDateTime;

use super::{path_is_test_output, IndexedStore, StoreRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationMode {
    Proper,
    Staging,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesktopAppRecord {
    pub id: String,
    pub build_id: String,
    pub scenario_name: String,
    pub output_path: String,
    pub destination_path: String,
    pub location_mode: LocationMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_path: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl StoreRecord for DesktopAppRecord {
    fn store_key(&self) -> &str {
        &self.id
    }

    fn is_test_artifact(&self) -> bool {
        path_is_test_output(&self.output_path)
    }
}

/// JSON-backed store of desktop app records.
pub struct DesktopRecordStore {
    inner: IndexedStore<DesktopAppRecord>,
}

impl DesktopRecordStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        Ok(Self {
            inner: IndexedStore::open(path)?,
        })
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            inner: IndexedStore::new(),
        }
    }

    /// Record where a scenario's build landed.
    ///
    /// Replaces any prior record for the scenario so the canonical
    /// destination stays unique.
    pub fn record_location(&self, mut record: DesktopAppRecord) -> Result<DesktopAppRecord> {
        let scenario = record.scenario_name.clone();
        self.inner
            .remove_where(|existing| existing.scenario_name == scenario)?;
        record.updated_at = OffsetDateTime::now_utc();
        self.inner.save(record.clone())?;
        Ok(record)
    }

    pub fn get(&self, id: &str) -> Option<DesktopAppRecord> {
        self.inner.get(id)
    }

    pub fn for_scenario(&self, scenario: &str) -> Option<DesktopAppRecord> {
        self.inner
            .snapshot()
            .into_iter()
            .find(|r| r.scenario_name == scenario)
    }

    pub fn snapshot(&self) -> Vec<DesktopAppRecord> {
        self.inner.snapshot()
    }

    /// Remove every record for a scenario and persist.
    pub fn delete_by_scenario(&self, scenario: &str) -> Result<usize> {
        self.inner
            .remove_where(|record| record.scenario_name == scenario)
    }
}

pub fn new_record(
    build_id: &str,
    scenario_name: &str,
    output_path: &str,
    destination_path: &str,
    location_mode: LocationMode,
) -> DesktopAppRecord {
    let now = OffsetDateTime::now_utc();
    DesktopAppRecord {
        id: format!("{scenario_name}-{build_id}"),
        build_id: build_id.to_string(),
        scenario_name: scenario_name.to_string(),
        output_path: output_path.to_string(),
        destination_path: destination_path.to_string(),
        location_mode,
        staging_path: None,
        custom_path: None,
        created_at: now,
        updated_at: now,
    }
}

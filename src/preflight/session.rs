//! Preflight session store.
//!
//! A session keeps a started supervisor alive across multiple preflight
//! calls, bounded by a TTL. Expiry is deterministic: a stale `get` or the
//! janitor sweep removes the entry and tears the supervisor down.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;

use crate::supervisor::{Supervisor, SupervisorConfig};

/// Default session TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(120);

/// TTL clamp bounds.
pub const MIN_TTL: Duration = Duration::from_secs(1);
pub const MAX_TTL: Duration = Duration::from_secs(900);

/// Janitor sweep interval.
const JANITOR_INTERVAL: Duration = Duration::from_secs(60);

/// Clamp a requested TTL (seconds) into the allowed range.
pub fn clamp_ttl(requested: Option<u64>) -> Duration {
    match requested {
        None => DEFAULT_TTL,
        Some(secs) => Duration::from_secs(secs).clamp(MIN_TTL, MAX_TTL),
    }
}

/// Caller-facing view of a live session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: String,
    pub base_url: String,
    pub auth_token: String,
    pub bundle_root: PathBuf,
    pub manifest_path: PathBuf,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

struct SessionEntry {
    handle: SessionHandle,
    supervisor: Supervisor,
    // Owns the temp dir backing the supervisor's app_data; the supervisor
    // removes the directory on shutdown and the TempDir drop tolerates it
    // already being gone.
    _app_data: tempfile::TempDir,
}

/// Mutex-guarded registry of live sessions.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Start a supervisor and register it under a fresh session id.
    ///
    /// `startup_budget` bounds the wait for the supervisor's control
    /// files before the session is considered failed.
    pub fn create(
        &self,
        manifest_path: PathBuf,
        bundle_root: PathBuf,
        ttl: Option<u64>,
        startup_budget: Duration,
    ) -> Result<SessionHandle> {
        let app_data = tempfile::Builder::new()
            .prefix("preflight-session-")
            .tempdir()
            .context("creating session app data directory")?;

        let mut supervisor = Supervisor::start(SupervisorConfig {
            manifest_path: manifest_path.clone(),
            bundle_root: bundle_root.clone(),
            app_data: app_data.path().to_path_buf(),
            dry_run: false,
        })?;
        supervisor.wait_for_control_files(startup_budget)?;

        let now = OffsetDateTime::now_utc();
        let ttl = clamp_ttl(ttl);
        let handle = SessionHandle {
            id: new_session_id(),
            base_url: supervisor
                .base_url()
                .unwrap_or_default()
                .to_string(),
            auth_token: supervisor
                .auth_token()
                .unwrap_or_default()
                .to_string(),
            bundle_root,
            manifest_path,
            created_at: now,
            expires_at: now + ttl,
        };

        let mut sessions = self.sessions.lock().expect("session lock poisoned");
        sessions.insert(
            handle.id.clone(),
            SessionEntry {
                handle: handle.clone(),
                supervisor,
                _app_data: app_data,
            },
        );
        log::info!(
            "session {} created, expires {}",
            handle.id,
            handle.expires_at
        );
        Ok(handle)
    }

    /// Fetch a live session.
    ///
    /// An expired session is removed, torn down asynchronously, and
    /// reported as absent.
    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        let mut sessions = self.sessions.lock().expect("session lock poisoned");
        let expired = match sessions.get(id) {
            None => return None,
            Some(entry) => entry.handle.expires_at <= OffsetDateTime::now_utc(),
        };
        if expired {
            if let Some(entry) = sessions.remove(id) {
                shutdown_async(entry);
            }
            return None;
        }
        sessions.get(id).map(|entry| entry.handle.clone())
    }

    /// Bump a session's expiry.
    pub fn refresh(&self, id: &str, ttl: Option<u64>) -> Option<SessionHandle> {
        let mut sessions = self.sessions.lock().expect("session lock poisoned");
        let expired = match sessions.get(id) {
            None => return None,
            Some(entry) => entry.handle.expires_at <= OffsetDateTime::now_utc(),
        };
        if expired {
            if let Some(entry) = sessions.remove(id) {
                shutdown_async(entry);
            }
            return None;
        }
        let entry = sessions.get_mut(id)?;
        entry.handle.expires_at = OffsetDateTime::now_utc() + clamp_ttl(ttl);
        Some(entry.handle.clone())
    }

    /// Remove and shut down a session in the caller's thread.
    ///
    /// Safe on unknown ids; returns whether a session existed.
    pub fn stop(&self, id: &str) -> bool {
        let entry = {
            let mut sessions = self.sessions.lock().expect("session lock poisoned");
            sessions.remove(id)
        };
        match entry {
            Some(mut entry) => {
                entry.supervisor.shutdown();
                log::info!("session {id} stopped");
                true
            }
            None => false,
        }
    }

    /// Remove and tear down every expired session. Returns the count.
    pub fn sweep_expired(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        let expired: Vec<SessionEntry> = {
            let mut sessions = self.sessions.lock().expect("session lock poisoned");
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, entry)| entry.handle.expires_at <= now)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| sessions.remove(&id))
                .collect()
        };

        let count = expired.len();
        for mut entry in expired {
            log::info!("session {} expired, tearing down", entry.handle.id);
            entry.supervisor.shutdown();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Sweep expired sessions every minute until the store is dropped.
pub fn spawn_janitor(store: Arc<SessionStore>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || loop {
        std::thread::sleep(JANITOR_INTERVAL);
        if Arc::strong_count(&store) == 1 {
            return;
        }
        let reaped = store.sweep_expired();
        if reaped > 0 {
            log::info!("janitor reaped {reaped} expired session(s)");
        }
    })
}

fn shutdown_async(mut entry: SessionEntry) {
    std::thread::spawn(move || {
        entry.supervisor.shutdown();
    });
}

fn new_session_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("pf-{nanos:x}-{seq}")
}

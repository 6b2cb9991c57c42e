//! Transport-agnostic application state.
//!
//! Holds the live configuration, the database location and the intake
//! service with its draft store. Wrapped in `Arc` at startup and shared by
//! the HTTP handlers and the background draft sweeper.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;

use crate::config::{ConfigError, ConfigHandle, IntakeRuntime};
use crate::db;
use crate::drafts::{Clock, DraftSessionStore, SystemClock};
use crate::pipeline::processor::IntakeService;

/// Sleep granularity of the sweeper thread, for shutdown responsiveness.
const SWEEP_GRANULARITY: Duration = Duration::from_secs(1);

// ═══════════════════════════════════════════════════════════
// CoreState
// ═══════════════════════════════════════════════════════════

pub struct CoreState {
    config: ConfigHandle,
    db_path: PathBuf,
    intake: IntakeService,
}

impl CoreState {
    pub fn new(config: ConfigHandle, db_path: PathBuf) -> Self {
        Self::with_clock(config, db_path, Arc::new(SystemClock))
    }

    /// State whose draft store reads time from `clock`.
    pub fn with_clock(config: ConfigHandle, db_path: PathBuf, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            db_path,
            intake: IntakeService::with_drafts(DraftSessionStore::new(clock)),
        }
    }

    // ── Config ──────────────────────────────────────────────

    /// Runtime snapshot for one operation.
    pub fn runtime(&self) -> Arc<IntakeRuntime> {
        self.config.current()
    }

    pub fn config_source(&self) -> Option<&Path> {
        self.config.source()
    }

    /// Re-read the config file. The previous runtime stays active on error.
    pub fn reload_config(&self) -> Result<Arc<IntakeRuntime>, CoreError> {
        Ok(self.config.reload()?)
    }

    // ── Database ────────────────────────────────────────────

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Open a connection with the configured busy timeout.
    pub fn open_db(&self) -> Result<Connection, CoreError> {
        let timeout = self.runtime().config.allocator.busy_timeout();
        db::open_database(&self.db_path, timeout).map_err(CoreError::Database)
    }

    // ── Intake ──────────────────────────────────────────────

    pub fn intake(&self) -> &IntakeService {
        &self.intake
    }

    /// Expire idle drafts and archive everything queued for export.
    pub fn sweep_drafts(&self) -> Result<usize, CoreError> {
        let runtime = self.runtime();
        let expired = self.intake.drafts().expire(runtime.ttls());
        let conn = self.open_db()?;
        self.intake.flush_exports(&conn);
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Idle drafts expired");
        }
        Ok(expired.len())
    }
}

// ═══════════════════════════════════════════════════════════
// Error type
// ═══════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] db::DatabaseError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

// ═══════════════════════════════════════════════════════════
// Background draft sweeper
// ═══════════════════════════════════════════════════════════

/// Handle for the sweeper thread. Stops the thread on drop.
pub struct SweeperHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl SweeperHandle {
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Sweep drafts every `interval` on a dedicated thread.
///
/// Expiry is also evaluated lazily on every store access, so the sweeper
/// only bounds how long an untouched draft waits for its archive row.
pub fn start_draft_sweeper(core: Arc<CoreState>, interval: Duration) -> SweeperHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();

    let handle = std::thread::Builder::new()
        .name("draft-sweeper".into())
        .spawn(move || {
            tracing::info!(interval_secs = interval.as_secs(), "Draft sweeper started");
            while !flag.load(Ordering::Relaxed) {
                if let Err(e) = core.sweep_drafts() {
                    tracing::warn!(error = %e, "Draft sweep failed");
                }
                let mut slept = Duration::ZERO;
                while slept < interval && !flag.load(Ordering::Relaxed) {
                    std::thread::sleep(SWEEP_GRANULARITY.min(interval));
                    slept += SWEEP_GRANULARITY.min(interval);
                }
            }
            tracing::info!("Draft sweeper stopped");
        });

    let handle = match handle {
        Ok(h) => Some(h),
        Err(e) => {
            tracing::error!(error = %e, "Failed to spawn draft sweeper");
            None
        }
    };

    SweeperHandle { shutdown, handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::list_archive_entries;
    use crate::drafts::ManualClock;
    use crate::models::enums::DraftState;
    use crate::models::CaseKey;
    use crate::pipeline::processor::UploadRequest;
    use chrono::Utc;

    fn state_in(dir: &Path, clock: Arc<ManualClock>) -> CoreState {
        let config = ConfigHandle::load(None).unwrap();
        CoreState::with_clock(config, dir.join("intake.db"), clock)
    }

    #[test]
    fn open_db_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let core = state_in(dir.path(), Arc::new(ManualClock::new(Utc::now())));
        let conn = core.open_db().unwrap();
        assert!(db::count_tables(&conn).unwrap() > 0);
        assert!(core.db_path().exists());
    }

    #[test]
    fn sweep_expires_and_archives_idle_drafts() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let core = state_in(dir.path(), clock.clone());

        let conn = core.open_db().unwrap();
        core.intake()
            .upload(
                &core.runtime(),
                &conn,
                UploadRequest {
                    filename: "C100_2-24.txt".into(),
                    bytes: "项目名称：某某道路改造工程".as_bytes().to_vec(),
                    case_key: None,
                },
            )
            .unwrap();

        assert_eq!(core.sweep_drafts().unwrap(), 0);
        clock.advance(chrono::Duration::hours(25));
        assert_eq!(core.sweep_drafts().unwrap(), 1);

        let archived = list_archive_entries(&conn, &CaseKey::new("C100").unwrap()).unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].final_state, DraftState::Expired);
    }

    #[test]
    fn failed_reload_keeps_previous_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intake.json");
        std::fs::write(&path, "{}").unwrap();
        let core = CoreState::new(
            ConfigHandle::load(Some(path.clone())).unwrap(),
            dir.path().join("intake.db"),
        );
        let before = core.runtime().loaded_at;

        std::fs::write(&path, r#"{"case_key":{"filename_pattern":"("}}"#).unwrap();
        assert!(matches!(core.reload_config(), Err(CoreError::Config(_))));
        assert_eq!(core.runtime().loaded_at, before);
    }

    #[test]
    fn sweeper_stops_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let core = Arc::new(state_in(dir.path(), Arc::new(ManualClock::new(Utc::now()))));
        let handle = start_draft_sweeper(core, Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(30));
        drop(handle);
    }
}

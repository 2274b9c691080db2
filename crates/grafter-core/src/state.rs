//! Persisted session ledger.
//!
//! The ledger is the single source of truth for what a session has done. It
//! is written atomically after every file transition and read once at
//! startup; its absence means a new session.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::errors::{GraftError, GraftResult};
use crate::files::{write_atomic, Checkpoint};
use crate::models::{
    BackupInfo, Conflict, ConflictResolution, IntegrationAction, NodeStatus, SessionStatus,
};
use crate::verify::BuildDiagnostic;

pub const STATE_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedFile {
    pub target: PathBuf,
    pub action: IntegrationAction,
    pub source_hash: String,
    /// The candidate was removed from the source directory.
    pub source_deleted: bool,
    pub completed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub reason: String,
    pub target: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Conflict>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<BuildDiagnostic>,
    pub failed_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            target: None,
            conflicts: Vec::new(),
            diagnostics: Vec::new(),
            failed_at: Utc::now(),
        }
    }

    pub fn awaits_resolution(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipRecord {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cycle: Vec<String>,
}

/// The step that was running when the ledger was last written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlight {
    pub file: String,
    pub checkpoint: Checkpoint,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntegrationState {
    pub version: u32,
    pub session_id: String,
    pub status: SessionStatus,
    /// Configuration the session started with.
    pub config: Config,
    pub total: usize,
    /// Files in the order they reached a terminal state.
    pub processed: Vec<String>,
    pub completed: IndexMap<String, CompletedFile>,
    pub failed: IndexMap<String, FailureRecord>,
    pub skipped: IndexMap<String, SkipRecord>,
    pub current: Option<String>,
    pub in_flight: Option<InFlight>,
    pub backups: Vec<BackupInfo>,
    pub created: Vec<PathBuf>,
    #[serde(default)]
    pub resolutions: BTreeMap<String, ConflictResolution>,
    /// Build error keys present before the session touched anything.
    pub baseline_errors: Option<BTreeSet<String>>,
    #[serde(default)]
    pub rolled_back: bool,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl IntegrationState {
    pub fn new(config: &Config) -> Self {
        let now = Utc::now();
        let salt = format!(
            "{}|{}|{}",
            config.source_dir.display(),
            config.target_root.display(),
            now.timestamp_nanos_opt().unwrap_or_default()
        );
        Self {
            version: STATE_VERSION,
            session_id: format!(
                "{}-{:08x}",
                now.format("%Y%m%dT%H%M%S"),
                crc32fast::hash(salt.as_bytes())
            ),
            status: SessionStatus::NotStarted,
            config: config.clone(),
            total: 0,
            processed: Vec::new(),
            completed: IndexMap::new(),
            failed: IndexMap::new(),
            skipped: IndexMap::new(),
            current: None,
            in_flight: None,
            backups: Vec::new(),
            created: Vec::new(),
            resolutions: BTreeMap::new(),
            baseline_errors: None,
            rolled_back: false,
            started_at: now,
            updated_at: now,
            ended_at: None,
        }
    }

    pub fn status_of(&self, path: &str) -> NodeStatus {
        if self.completed.contains_key(path) {
            NodeStatus::Completed
        } else if self.failed.contains_key(path) {
            NodeStatus::Failed
        } else if self.skipped.contains_key(path) {
            NodeStatus::Skipped
        } else if self.current.as_deref() == Some(path) {
            NodeStatus::InProgress
        } else {
            NodeStatus::Pending
        }
    }

    fn settle(&mut self, path: &str) {
        self.failed.shift_remove(path);
        self.skipped.shift_remove(path);
        self.processed.retain(|p| p != path);
        self.processed.push(path.to_string());
        if self.current.as_deref() == Some(path) {
            self.current = None;
        }
        self.in_flight = None;
    }

    pub fn mark_in_progress(&mut self, path: &str) {
        self.current = Some(path.to_string());
    }

    pub fn mark_completed(&mut self, path: &str, record: CompletedFile) {
        self.settle(path);
        self.resolutions.remove(path);
        self.completed.insert(path.to_string(), record);
    }

    pub fn mark_failed(&mut self, path: &str, record: FailureRecord) {
        self.settle(path);
        self.failed.insert(path.to_string(), record);
    }

    pub fn mark_skipped(&mut self, path: &str, record: SkipRecord) {
        self.settle(path);
        self.skipped.insert(path.to_string(), record);
    }

    /// Forget failed and skipped outcomes so a resumed run re-evaluates them.
    pub fn reopen_unfinished(&mut self) {
        let reopened: Vec<String> = self
            .failed
            .keys()
            .chain(self.skipped.keys())
            .cloned()
            .collect();
        self.failed.clear();
        self.skipped.clear();
        self.processed.retain(|p| !reopened.contains(p));
        self.ended_at = None;
    }

    /// Completed sources mapped to where they now live.
    pub fn integrated(&self) -> BTreeMap<String, PathBuf> {
        self.completed
            .iter()
            .map(|(path, done)| (path.clone(), done.target.clone()))
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.total
            .saturating_sub(self.completed.len() + self.failed.len() + self.skipped.len())
    }

    /// Files whose merge stopped on conflicts.
    pub fn awaiting_resolution(&self) -> impl Iterator<Item = (&String, &FailureRecord)> {
        self.failed.iter().filter(|(_, f)| f.awaits_resolution())
    }
}

/// Reads and writes the ledger file and archives finished sessions.
#[derive(Clone, Debug)]
pub struct StateStore {
    path: PathBuf,
    archive_dir: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>, archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            archive_dir: archive_dir.into(),
        }
    }

    pub fn for_config(config: &Config) -> Self {
        Self::new(config.state_file(), config.state_dir().join("sessions"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn error(&self, message: impl std::fmt::Display) -> GraftError {
        GraftError::StateFile {
            path: self.path.clone(),
            message: message.to_string(),
        }
    }

    /// Load the ledger; `None` when no session is in progress.
    pub fn load(&self) -> GraftResult<Option<IntegrationState>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.error(e)),
        };
        let state: IntegrationState =
            serde_json::from_slice(&bytes).map_err(|e| self.error(format!("unreadable: {e}")))?;
        if state.version != STATE_VERSION {
            return Err(self.error(format!(
                "ledger version {} is not supported (expected {STATE_VERSION})",
                state.version
            )));
        }
        debug!("Loaded session {} from {}", state.session_id, self.path.display());
        Ok(Some(state))
    }

    pub fn save(&self, state: &mut IntegrationState) -> GraftResult<()> {
        state.updated_at = Utc::now();
        let bytes = serde_json::to_vec_pretty(state).map_err(|e| self.error(e))?;
        write_atomic(&self.path, &bytes).map_err(|e| self.error(e))
    }

    /// Move the ledger into the session archive. Returns the archived path.
    pub fn archive(&self, state: &mut IntegrationState) -> GraftResult<PathBuf> {
        if state.ended_at.is_none() {
            state.ended_at = Some(Utc::now());
        }
        let archived = self
            .archive_dir
            .join(format!("{}.json", state.session_id));
        let bytes = serde_json::to_vec_pretty(state).map_err(|e| self.error(e))?;
        write_atomic(&archived, &bytes).map_err(|e| self.error(e))?;
        self.clear()?;
        info!("Session {} archived to {}", state.session_id, archived.display());
        Ok(archived)
    }

    pub fn clear(&self) -> GraftResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(root: &Path) -> StateStore {
        StateStore::new(root.join("state.json"), root.join("sessions"))
    }

    #[test]
    fn test_missing_ledger_means_no_session() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store(dir.path()).load().unwrap().is_none());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut state = IntegrationState::new(&Config::new("in", "src"));
        state.total = 3;
        state.mark_in_progress("a.ts");
        state.mark_completed(
            "a.ts",
            CompletedFile {
                target: PathBuf::from("src/utils/a.ts"),
                action: IntegrationAction::Created,
                source_hash: "abc".to_string(),
                source_deleted: true,
                completed_at: Utc::now(),
            },
        );
        state.mark_failed("b.ts", FailureRecord::new("conflict"));
        state.resolutions.insert("b.ts".to_string(), ConflictResolution::KeepExisting);
        store.save(&mut state).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.status_of("a.ts"), NodeStatus::Completed);
        assert_eq!(loaded.status_of("b.ts"), NodeStatus::Failed);
        assert_eq!(loaded.status_of("c.ts"), NodeStatus::Pending);
        assert_eq!(loaded.pending_count(), 1);
        assert_eq!(loaded.processed, vec!["a.ts", "b.ts"]);
    }

    #[test]
    fn test_corrupt_ledger_is_a_state_file_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        fs::write(store.path(), b"{ not json").unwrap();
        let err = store.load().unwrap_err();
        assert!(matches!(err, GraftError::StateFile { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_reopen_unfinished_keeps_completed() {
        let mut state = IntegrationState::new(&Config::new("in", "src"));
        state.total = 3;
        state.mark_completed(
            "a.ts",
            CompletedFile {
                target: PathBuf::from("src/a.ts"),
                action: IntegrationAction::Merged,
                source_hash: String::new(),
                source_deleted: true,
                completed_at: Utc::now(),
            },
        );
        state.mark_failed("b.ts", FailureRecord::new("build failed"));
        state.mark_skipped(
            "c.ts",
            SkipRecord {
                reason: "cycle".to_string(),
                cycle: vec!["c.ts".to_string(), "c.ts".to_string()],
            },
        );
        state.reopen_unfinished();
        assert_eq!(state.processed, vec!["a.ts"]);
        assert!(state.failed.is_empty() && state.skipped.is_empty());
        assert_eq!(state.pending_count(), 2);
    }

    #[test]
    fn test_archive_moves_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut state = IntegrationState::new(&Config::new("in", "src"));
        store.save(&mut state).unwrap();
        let archived = store.archive(&mut state).unwrap();
        assert!(archived.exists());
        assert!(!store.path().exists());
        assert!(state.ended_at.is_some());
        assert!(store.load().unwrap().is_none());
    }
}

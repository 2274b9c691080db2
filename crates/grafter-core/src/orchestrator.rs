//! Integration Orchestrator: the session state machine.
//!
//! One session analyzes every pending candidate, plans a safe order and then
//! integrates, verifies and finalizes one file at a time. The ledger is
//! written after every transition so an interrupted or paused session
//! resumes where it stopped.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::analyzer::pipeline::analyze_candidates;
use crate::config::Config;
use crate::engine::IntegrationEngine;
use crate::errors::{GraftError, GraftResult};
use crate::files::rewrite::RelocationMap;
use crate::files::{write_atomic, FileManager};
use crate::graph::{BlockReason, BlockedFile, DependencyGraph};
use crate::models::{
    Category, ConflictResolution, FileAnalysis, IntegrationAction, NodeStatus, SessionStatus,
};
use crate::state::{
    CompletedFile, FailureRecord, InFlight, IntegrationState, SkipRecord, StateStore,
};
use crate::verify::BuildVerifier;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannedAction {
    Create,
    Merge,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedFile {
    pub path: String,
    pub category: Category,
    pub target: PathBuf,
    pub action: PlannedAction,
    pub depends_on: Vec<String>,
    pub warnings: Vec<String>,
}

/// What a run would do, computed without touching anything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub order: Vec<PlannedFile>,
    pub blocked: Vec<BlockedFile>,
    pub cycles: Vec<Vec<String>>,
    /// `(path, parse error)` for candidates that could not be analyzed.
    pub unparsable: Vec<(String, String)>,
    pub already_completed: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub path: String,
    pub status: NodeStatus,
    pub target: Option<PathBuf>,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub status: SessionStatus,
    pub files: Vec<FileOutcome>,
    pub source_dir_removed: bool,
    pub error: Option<String>,
}

impl SessionReport {
    fn from_state(state: &IntegrationState, pending: &[String]) -> Self {
        let mut files: Vec<FileOutcome> = Vec::new();
        for path in &state.processed {
            let outcome = if let Some(done) = state.completed.get(path) {
                FileOutcome {
                    path: path.clone(),
                    status: NodeStatus::Completed,
                    target: Some(done.target.clone()),
                    detail: format!("{:?}", done.action).to_lowercase(),
                }
            } else if let Some(failure) = state.failed.get(path) {
                FileOutcome {
                    path: path.clone(),
                    status: NodeStatus::Failed,
                    target: failure.target.clone(),
                    detail: failure.reason.clone(),
                }
            } else if let Some(skip) = state.skipped.get(path) {
                FileOutcome {
                    path: path.clone(),
                    status: NodeStatus::Skipped,
                    target: None,
                    detail: skip.reason.clone(),
                }
            } else {
                continue;
            };
            files.push(outcome);
        }
        files.extend(pending.iter().map(|path| FileOutcome {
            path: path.clone(),
            status: NodeStatus::Pending,
            target: None,
            detail: "not started".to_string(),
        }));
        Self {
            session_id: state.session_id.clone(),
            status: state.status,
            files,
            source_dir_removed: false,
            error: None,
        }
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
    }

    /// 0 completed, 1 paused awaiting attention, 2 fatal.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            SessionStatus::Completed => 0,
            SessionStatus::Paused | SessionStatus::Running => 1,
            SessionStatus::Failed | SessionStatus::NotStarted => 2,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub restored: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub recreated: Vec<PathBuf>,
    pub unrecoverable: Vec<(PathBuf, String)>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.unrecoverable.is_empty()
    }
}

enum StepOutcome {
    Completed,
    Failed,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<V: BuildVerifier> {
    config: Config,
    verifier: V,
    store: StateStore,
    pause: Arc<AtomicBool>,
}

impl<V: BuildVerifier> Orchestrator<V> {
    pub fn new(config: Config, verifier: V) -> GraftResult<Self> {
        config.validate()?;
        let store = StateStore::for_config(&config);
        Ok(Self {
            config,
            verifier,
            store,
            pause: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Use an externally owned pause flag, checked between files.
    pub fn with_pause_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.pause = flag;
        self
    }

    /// The persisted ledger, if a session is in progress.
    pub fn status(&self) -> GraftResult<Option<IntegrationState>> {
        self.store.load()
    }

    fn file_manager(config: &Config, state: &IntegrationState) -> FileManager {
        FileManager::new(
            config.backup_dir(),
            config.journal_dir(),
            config.create_backups,
            config.retry,
        )
        .with_ledger(state.backups.clone(), state.created.clone())
    }

    fn sync_ledger(state: &mut IntegrationState, files: &FileManager) {
        state.backups = files.backups();
        state.created = files.created();
    }

    fn relocations(
        config: &Config,
        state: &IntegrationState,
        analyses: &[&FileAnalysis],
    ) -> RelocationMap {
        let mut map = RelocationMap {
            aliases: config.alias_dirs(),
            ..RelocationMap::default()
        };
        for (path, done) in &state.completed {
            map.insert(&config.source_dir.join(path), &done.target);
        }
        for analysis in analyses {
            map.insert(&analysis.absolute_path, &analysis.target);
        }
        map
    }

    /// Analyze and order the pending candidates without mutating anything.
    pub fn plan(&self) -> GraftResult<Plan> {
        let state = self.store.load()?;
        let config = state.as_ref().map(|s| &s.config).unwrap_or(&self.config);
        let integrated = state.as_ref().map(|s| s.integrated()).unwrap_or_default();

        let report = analyze_candidates(config, &integrated)?;
        let graph = DependencyGraph::build(report.analyses);
        let graph_plan = graph.plan();

        let order = graph_plan
            .order
            .iter()
            .filter_map(|path| graph.node(path))
            .map(|node| {
                let a = &node.analysis;
                PlannedFile {
                    path: a.path.clone(),
                    category: a.category.clone(),
                    target: a.target.clone(),
                    action: if a.target.exists() {
                        PlannedAction::Merge
                    } else {
                        PlannedAction::Create
                    },
                    depends_on: a.candidate_dependencies().map(str::to_string).collect(),
                    warnings: a.warnings.clone(),
                }
            })
            .collect();

        Ok(Plan {
            order,
            blocked: graph_plan.blocked,
            cycles: graph_plan.cycles,
            unparsable: report
                .failures
                .into_iter()
                .map(|f| (f.path, f.error.to_string()))
                .collect(),
            already_completed: integrated.into_keys().collect(),
        })
    }

    /// Start a new session or resume the persisted one.
    pub fn run(&mut self) -> GraftResult<SessionReport> {
        let mut state = match self.store.load()? {
            Some(mut state) => {
                info!(
                    "Resuming session {} ({} file(s) already completed)",
                    state.session_id,
                    state.completed.len()
                );
                if state.config != self.config {
                    warn!("Configuration differs from the session's; continuing with the session's configuration");
                }
                state.reopen_unfinished();
                state
            }
            None => {
                let state = IntegrationState::new(&self.config);
                info!("Starting session {}", state.session_id);
                state
            }
        };
        let config = state.config.clone();
        let mut files = Self::file_manager(&config, &state);

        match self.drive(&config, &mut state, &mut files) {
            Ok(report) => Ok(report),
            Err(e) => {
                error!("Session {} aborted: {e}", state.session_id);
                state.status = SessionStatus::Failed;
                if e.is_fatal() {
                    let rollback = Self::rollback_session(&config, &mut state, &mut files);
                    if !rollback.is_clean() {
                        error!(
                            "Rollback left {} path(s) unrecoverable",
                            rollback.unrecoverable.len()
                        );
                    }
                    if let Err(archive_err) = self.store.archive(&mut state) {
                        warn!("Could not archive the session ledger: {archive_err}");
                    }
                } else {
                    Self::sync_ledger(&mut state, &files);
                    if let Err(save_err) = self.store.save(&mut state) {
                        warn!("Could not persist the failed session: {save_err}");
                    }
                }
                Err(e)
            }
        }
    }

    fn drive(
        &self,
        config: &Config,
        state: &mut IntegrationState,
        files: &mut FileManager,
    ) -> GraftResult<SessionReport> {
        // A step interrupted mid-way is undone before anything else.
        if let Some(in_flight) = state.in_flight.take() {
            warn!("Reverting interrupted step for {}", in_flight.file);
            files.revert(&in_flight.checkpoint)?;
            let original = config.source_dir.join(&in_flight.file);
            if !original.exists() {
                if let Some(info) = files.backup_for(&original).cloned() {
                    files.restore(&info)?;
                }
            }
            state.current = None;
        }
        state.status = SessionStatus::Running;
        Self::sync_ledger(state, files);
        self.store.save(state)?;

        let report = analyze_candidates(config, &state.integrated())?;
        for failure in &report.failures {
            state.mark_skipped(
                &failure.path,
                SkipRecord {
                    reason: failure.error.to_string(),
                    cycle: Vec::new(),
                },
            );
        }
        state.total = state.completed.len() + report.analyses.len() + report.failures.len();

        let mut graph = DependencyGraph::build(report.analyses);
        let plan = graph.plan();
        for blocked in &plan.blocked {
            warn!("Skipping {}: {}", blocked.path, blocked.reason);
            let cycle = match &blocked.reason {
                BlockReason::Cycle { cycle } => cycle.clone(),
                _ => Vec::new(),
            };
            state.mark_skipped(
                &blocked.path,
                SkipRecord {
                    reason: blocked.to_error().to_string(),
                    cycle,
                },
            );
            graph.set_status(&blocked.path, NodeStatus::Skipped);
        }
        let analyses: Vec<&FileAnalysis> = graph.nodes().map(|(_, n)| &n.analysis).collect();
        let relocations = Self::relocations(config, state, &analyses);
        self.store.save(state)?;
        info!(
            "{} file(s) to integrate, {} skipped, {} already completed",
            plan.order.len(),
            state.skipped.len(),
            state.completed.len()
        );

        if config.verify_after_each
            && config.verify.tolerate_baseline_errors
            && state.baseline_errors.is_none()
            && !plan.order.is_empty()
        {
            let baseline = self.verifier.verify()?;
            if baseline.success {
                state.baseline_errors = Some(Default::default());
            } else if baseline.is_structured() {
                warn!(
                    "Project already has {} build error(s); only new errors will fail a file",
                    baseline.errors.len()
                );
                state.baseline_errors = Some(baseline.error_keys());
            } else {
                return Err(GraftError::Build(format!(
                    "the project does not build before integration and reported no diagnostics: {}",
                    baseline.summary(None)
                )));
            }
            self.store.save(state)?;
        }

        let mut halted = false;
        let mut pending: Vec<String> = Vec::new();
        for path in &plan.order {
            if halted || self.pause.load(Ordering::SeqCst) {
                if !halted {
                    info!("Pause requested; stopping before {path}");
                }
                halted = true;
                pending.push(path.clone());
                continue;
            }
            let Some(analysis) = graph.node(path).map(|n| n.analysis.clone()) else {
                continue;
            };

            let unfinished = analysis
                .candidate_dependencies()
                .find(|dep| graph.status(dep) != Some(NodeStatus::Completed))
                .map(str::to_string);
            if let Some(dependency) = unfinished {
                let reason = BlockReason::DependsOnBlocked { dependency };
                warn!("Skipping {path}: {reason}");
                state.mark_skipped(
                    path,
                    SkipRecord {
                        reason: reason.to_string(),
                        cycle: Vec::new(),
                    },
                );
                graph.set_status(path, NodeStatus::Skipped);
                self.store.save(state)?;
                continue;
            }

            graph.set_status(path, NodeStatus::InProgress);
            let outcome = match self.integrate_file(config, state, files, &relocations, &analysis) {
                Ok(outcome) => outcome,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("{path} failed: {e}");
                    if let Some(in_flight) = state.in_flight.take() {
                        if let Err(revert_err) = files.revert(&in_flight.checkpoint) {
                            error!("Could not revert {path}: {revert_err}");
                        }
                    }
                    let mut record = FailureRecord::new(e.to_string());
                    record.target = Some(analysis.target.clone());
                    state.mark_failed(path, record);
                    Self::sync_ledger(state, files);
                    self.store.save(state)?;
                    StepOutcome::Failed
                }
            };
            match outcome {
                StepOutcome::Completed => graph.set_status(path, NodeStatus::Completed),
                StepOutcome::Failed => {
                    graph.set_status(path, NodeStatus::Failed);
                    if config.stop_on_error {
                        info!("stop_on_error is set; pausing after {path}");
                        halted = true;
                    }
                }
            }
        }

        let mut source_dir_removed = false;
        if halted {
            state.status = SessionStatus::Paused;
        } else {
            if config.delete_after_success {
                source_dir_removed = files.remove_empty_dirs(&config.source_dir)?;
                if source_dir_removed {
                    info!("Removed source directory {}", config.source_dir.display());
                } else if config.source_dir.exists() {
                    info!(
                        "Source directory {} still holds files; left in place",
                        config.source_dir.display()
                    );
                }
            }
            // Any failed or skipped file keeps the ledger and backups until a
            // later run finishes it or `rollback` discards the session.
            state.status = if state.failed.is_empty() && state.skipped.is_empty() {
                SessionStatus::Completed
            } else {
                SessionStatus::Paused
            };
        }

        Self::sync_ledger(state, files);
        let mut report = SessionReport::from_state(state, &pending);
        report.source_dir_removed = source_dir_removed;

        if state.status == SessionStatus::Completed {
            files.discard_backups()?;
            Self::sync_ledger(state, files);
            self.store.archive(state)?;
            info!("Session {} completed", state.session_id);
        } else {
            self.store.save(state)?;
            info!(
                "Session {} paused: {} completed, {} failed, {} skipped, {} pending",
                state.session_id,
                state.completed.len(),
                state.failed.len(),
                state.skipped.len(),
                pending.len()
            );
        }
        Ok(report)
    }

    /// Integrate, verify and finalize one file.
    fn integrate_file(
        &self,
        config: &Config,
        state: &mut IntegrationState,
        files: &mut FileManager,
        relocations: &RelocationMap,
        analysis: &FileAnalysis,
    ) -> GraftResult<StepOutcome> {
        let path = analysis.path.as_str();
        info!("Integrating {path} -> {}", analysis.target.display());
        state.mark_in_progress(path);
        let checkpoint = files.checkpoint(&analysis.target)?;
        state.in_flight = Some(InFlight {
            file: path.to_string(),
            checkpoint: checkpoint.clone(),
        });
        Self::sync_ledger(state, files);
        self.store.save(state)?;

        let resolution = state.resolutions.get(path).copied();
        let result = IntegrationEngine::new(files, &config.merge, relocations)
            .integrate(analysis, resolution)?;

        if !result.success {
            files.commit(&checkpoint)?;
            let mut record = FailureRecord::new(
                result
                    .error
                    .clone()
                    .unwrap_or_else(|| "integration failed".to_string()),
            );
            record.target = Some(result.target.clone());
            record.conflicts = result.conflicts;
            state.mark_failed(path, record);
            Self::sync_ledger(state, files);
            self.store.save(state)?;
            return Ok(StepOutcome::Failed);
        }

        if config.verify_after_each && result.action != IntegrationAction::Skipped {
            let build = self.verifier.verify()?;
            let baseline = state.baseline_errors.as_ref();
            if !build.passes_against(baseline) {
                let reason = build.summary(baseline);
                warn!("Build check failed after {path}: {reason}; reverting");
                files.revert(&checkpoint)?;
                let mut record = FailureRecord::new(reason);
                record.target = Some(result.target.clone());
                record.diagnostics = match baseline {
                    Some(b) => build.new_errors(b).into_iter().cloned().collect(),
                    None => build.errors.clone(),
                };
                state.mark_failed(path, record);
                Self::sync_ledger(state, files);
                self.store.save(state)?;
                return Ok(StepOutcome::Failed);
            }
        }
        files.commit(&checkpoint)?;

        let mut source_deleted = false;
        if config.delete_after_success {
            match files.delete(&analysis.absolute_path) {
                Ok(()) => source_deleted = true,
                Err(e) => warn!("{path} integrated but the original could not be removed: {e}"),
            }
        }
        for warning in &result.warnings {
            debug!("{path}: {warning}");
        }
        state.mark_completed(
            path,
            CompletedFile {
                target: result.target.clone(),
                action: result.action,
                source_hash: analysis.content_hash.clone(),
                source_deleted,
                completed_at: Utc::now(),
            },
        );
        Self::sync_ledger(state, files);
        self.store.save(state)?;
        info!("Completed {path} ({:?})", result.action);
        Ok(StepOutcome::Completed)
    }

    /// Record an operator decision for a file that failed on conflicts and
    /// return it to pending for the next run.
    pub fn resolve(&mut self, file: &str, resolution: ConflictResolution) -> GraftResult<()> {
        let mut state = self.store.load()?.ok_or(GraftError::NoSession)?;
        let Some(failure) = state.failed.get(file) else {
            return Err(match state.status_of(file) {
                NodeStatus::Pending => GraftError::UnknownFile(file.to_string()),
                _ => GraftError::NotResolvable {
                    path: file.to_string(),
                },
            });
        };
        if !failure.awaits_resolution() {
            return Err(GraftError::NotResolvable {
                path: file.to_string(),
            });
        }
        state.failed.shift_remove(file);
        state.processed.retain(|p| p != file);
        state.resolutions.insert(file.to_string(), resolution);
        self.store.save(&mut state)?;
        info!("{file}: {resolution:?} recorded; it will be merged on the next run");
        Ok(())
    }

    /// Return every touched file to its pre-session state and close the session.
    pub fn rollback(&mut self) -> GraftResult<RollbackReport> {
        let mut state = self.store.load()?.ok_or(GraftError::NoSession)?;
        let config = state.config.clone();
        let mut files = Self::file_manager(&config, &state);
        let report = Self::rollback_session(&config, &mut state, &mut files);
        self.store.archive(&mut state)?;
        Ok(report)
    }

    fn rollback_session(
        config: &Config,
        state: &mut IntegrationState,
        files: &mut FileManager,
    ) -> RollbackReport {
        info!("Rolling back session {}", state.session_id);
        let mut report = RollbackReport::default();

        if let Some(in_flight) = state.in_flight.take() {
            if let Err(e) = files.revert(&in_flight.checkpoint) {
                report
                    .unrecoverable
                    .push((in_flight.checkpoint.path.clone(), e.to_string()));
            }
        }

        // Originals deleted without a backup are rebuilt from their target.
        let mut recreate: Vec<(PathBuf, Vec<u8>)> = Vec::new();
        for (path, done) in &state.completed {
            let original = config.source_dir.join(path);
            if original.exists() || files.backup_for(&original).is_some() {
                continue;
            }
            match files.read(&done.target) {
                Ok(bytes) => recreate.push((original, bytes)),
                Err(e) => report.unrecoverable.push((original, e.to_string())),
            }
        }

        let (restored, failed) = files.restore_all();
        report.restored = restored;
        report
            .unrecoverable
            .extend(failed.into_iter().map(|(path, e)| (path, e.to_string())));

        for path in files.created() {
            match files.remove_created(&path) {
                Ok(()) => {
                    files.prune_empty_parents(&path, &config.target_root);
                    report.removed.push(path);
                }
                Err(e) => report.unrecoverable.push((path, e.to_string())),
            }
        }

        for (original, bytes) in recreate {
            match write_atomic(&original, &bytes) {
                Ok(()) => report.recreated.push(original),
                Err(e) => report.unrecoverable.push((original, e.to_string())),
            }
        }

        Self::sync_ledger(state, files);
        state.rolled_back = true;
        state.current = None;
        state.ended_at = Some(Utc::now());
        info!(
            "Rollback: {} restored, {} removed, {} recreated, {} unrecoverable",
            report.restored.len(),
            report.removed.len(),
            report.recreated.len(),
            report.unrecoverable.len()
        );
        report
    }
}

/// `path` relative to `root` for display, falling back to the full path.
pub fn display_relative(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

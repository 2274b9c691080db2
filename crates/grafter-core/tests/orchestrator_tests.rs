//! End-to-end sessions driven through the orchestrator with a scripted
//! build check.

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use grafter_core::config::{Config, RetryPolicy};
use grafter_core::errors::{GraftError, GraftResult};
use grafter_core::files::FileManager;
use grafter_core::models::{ConflictKind, ConflictResolution, NodeStatus, SessionStatus};
use grafter_core::orchestrator::{Orchestrator, PlannedAction};
use grafter_core::state::{InFlight, StateStore};
use grafter_core::verify::{BuildResult, BuildVerifier};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct ScriptedVerifier {
    script: Arc<Mutex<VecDeque<BuildResult>>>,
    calls: Arc<AtomicUsize>,
    pause_at: Option<(usize, Arc<AtomicBool>)>,
}

impl ScriptedVerifier {
    fn with_script(results: Vec<BuildResult>) -> Self {
        Self {
            script: Arc::new(Mutex::new(results.into())),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BuildVerifier for ScriptedVerifier {
    fn verify(&self) -> GraftResult<BuildResult> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((at, flag)) = &self.pause_at {
            if n >= *at {
                flag.store(true, Ordering::SeqCst);
            }
        }
        Ok(self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(BuildResult::passed))
    }
}

struct Project {
    _dir: tempfile::TempDir,
    root: PathBuf,
}

impl Project {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        fs::create_dir_all(root.join("incoming")).unwrap();
        fs::create_dir_all(root.join("app/src")).unwrap();
        Self { _dir: dir, root }
    }

    fn source(&self) -> PathBuf {
        self.root.join("incoming")
    }

    fn target(&self) -> PathBuf {
        self.root.join("app/src")
    }

    fn candidate(&self, rel: &str, content: &str) {
        let path = self.source().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn existing(&self, rel: &str, content: &str) {
        let path = self.target().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn read_target(&self, rel: &str) -> String {
        fs::read_to_string(self.target().join(rel)).unwrap()
    }

    fn config(&self) -> Config {
        let mut config = Config::new(self.source(), self.target());
        config.verify_after_each = false;
        config.retry = RetryPolicy {
            attempts: 2,
            base_delay_ms: 1,
        };
        config
    }
}

fn failing_build(line: &str) -> BuildResult {
    BuildResult::from_output(Some(2), format!("{line}\n"))
}

const UTIL_B: &str = "export function double(n: number): number {\n  return n * 2;\n}\n";
const HOOK_A: &str = "import { double } from './util-b';\n\nexport function useA(n: number): number {\n  return double(n);\n}\n";
const COMP_C: &str = "import { useA } from './hook-a';\n\nexport function CompC() {\n  return <div>{useA(2)}</div>;\n}\n";

const MATH_EXISTING: &str = "export function x() {\n  return 1;\n}\n\nexport function y(a: number) {\n  return a + 1;\n}\n";

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

#[test]
fn test_dry_run_plans_without_touching_files() {
    let project = Project::new();
    project.candidate("comp-c.tsx", COMP_C);
    project.candidate("hook-a.ts", HOOK_A);
    project.candidate("util-b.ts", UTIL_B);

    let orchestrator = Orchestrator::new(project.config(), ScriptedVerifier::default()).unwrap();
    let plan = orchestrator.plan().unwrap();

    let order: Vec<&str> = plan.order.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(order, vec!["util-b.ts", "hook-a.ts", "comp-c.tsx"]);
    assert!(plan.order.iter().all(|f| f.action == PlannedAction::Create));
    assert_eq!(plan.order[0].target, project.target().join("utils/util-b.ts"));
    assert_eq!(plan.order[1].target, project.target().join("hooks/hook-a.ts"));
    assert_eq!(plan.order[2].target, project.target().join("components/comp-c.tsx"));
    assert_eq!(plan.order[1].depends_on, vec!["util-b.ts"]);

    assert!(project.source().join("util-b.ts").exists());
    assert!(!project.target().join("utils").exists());
    assert!(orchestrator.status().unwrap().is_none());
}

// ---------------------------------------------------------------------------
// End to end
// ---------------------------------------------------------------------------

#[test]
fn test_end_to_end_chain_integrates_in_dependency_order() {
    let project = Project::new();
    project.candidate("util-b.ts", UTIL_B);
    project.candidate("hook-a.ts", HOOK_A);
    project.candidate("comp-c.tsx", COMP_C);

    let mut config = project.config();
    config.verify_after_each = true;
    let verifier = ScriptedVerifier::default();
    let mut orchestrator = Orchestrator::new(config.clone(), verifier.clone()).unwrap();
    let report = orchestrator.run().unwrap();

    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.exit_code(), 0);
    let processed: Vec<&str> = report.files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(processed, vec!["util-b.ts", "hook-a.ts", "comp-c.tsx"]);
    assert_eq!(report.count(NodeStatus::Completed), 3);
    // One baseline check plus one per file.
    assert_eq!(verifier.calls(), 4);

    assert_eq!(project.read_target("utils/util-b.ts"), UTIL_B);
    assert_eq!(
        project.read_target("hooks/hook-a.ts"),
        HOOK_A.replace("'./util-b'", "'../utils/util-b'")
    );
    assert_eq!(
        project.read_target("components/comp-c.tsx"),
        COMP_C.replace("'./hook-a'", "'../hooks/hook-a'")
    );

    assert!(report.source_dir_removed);
    assert!(!project.source().exists());
    assert!(!config.state_file().exists());
    let archived: Vec<_> = fs::read_dir(config.state_dir().join("sessions"))
        .unwrap()
        .collect();
    assert_eq!(archived.len(), 1);
    assert!(orchestrator.status().unwrap().is_none());
}

#[test]
fn test_cycle_is_isolated_from_independent_files() {
    let project = Project::new();
    project.candidate("cyc-a.ts", "import { b } from './cyc-b';\nexport const a = () => b();\n");
    project.candidate("cyc-b.ts", "import { c } from './cyc-c';\nexport const b = () => c();\n");
    project.candidate("cyc-c.ts", "import { a } from './cyc-a';\nexport const c = () => a();\n");
    for i in 0..7 {
        project.candidate(
            &format!("free-{i}.ts"),
            &format!("export function free{i}(): number {{\n  return {i};\n}}\n"),
        );
    }

    let mut orchestrator = Orchestrator::new(project.config(), ScriptedVerifier::default()).unwrap();
    let report = orchestrator.run().unwrap();

    assert_eq!(report.count(NodeStatus::Completed), 7);
    assert_eq!(report.count(NodeStatus::Skipped), 3);
    assert_eq!(report.status, SessionStatus::Paused);
    assert_eq!(report.exit_code(), 1);

    let state = orchestrator.status().unwrap().unwrap();
    let skipped = &state.skipped["cyc-a.ts"];
    assert_eq!(skipped.cycle, vec!["cyc-a.ts", "cyc-b.ts", "cyc-c.ts", "cyc-a.ts"]);
    assert!(skipped.reason.contains("cyc-a.ts -> cyc-b.ts -> cyc-c.ts -> cyc-a.ts"));

    // Skipped files keep the source directory alive.
    assert!(!report.source_dir_removed);
    assert!(project.source().join("cyc-b.ts").exists());
    assert!(!project.source().join("free-0.ts").exists());

    // The session stays open with its ledger until the cycle is fixed or rolled back.
    assert!(project.config().state_file().exists());
    let rerun = orchestrator.run().unwrap();
    assert_eq!(rerun.status, SessionStatus::Paused);
    assert_eq!(rerun.count(NodeStatus::Skipped), 3);
}

#[test]
fn test_parse_errors_skip_the_file_and_its_dependents() {
    let project = Project::new();
    project.candidate("broken.ts", "export function (\n");
    project.candidate("dependent.ts", "import { x } from './broken';\nexport const y = () => x;\n");
    project.candidate("fine.ts", "export const ok = (): boolean => true;\n");

    let mut orchestrator = Orchestrator::new(project.config(), ScriptedVerifier::default()).unwrap();
    let report = orchestrator.run().unwrap();

    assert_eq!(report.count(NodeStatus::Completed), 1);
    let state = orchestrator.status().unwrap().unwrap();
    assert!(state.skipped["broken.ts"].reason.contains("Parse error"));
    assert!(state.skipped["dependent.ts"].reason.contains("broken.ts"));
    assert!(project.source().join("broken.ts").exists());
    assert!(project.source().join("dependent.ts").exists());
}

#[test]
fn test_import_relative_to_its_new_location_does_not_block() {
    let project = Project::new();
    project.existing("lib/db.ts", "export const db = {\n  find: (id: string) => id,\n};\n");
    let service = "import { db } from '../lib/db';\n\nexport async function getUser(id: string) {\n  return db.find(id);\n}\n";
    project.candidate("userService.ts", service);

    let mut orchestrator = Orchestrator::new(project.config(), ScriptedVerifier::default()).unwrap();
    let plan = orchestrator.plan().unwrap();
    let order: Vec<&str> = plan.order.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(order, vec!["userService.ts"]);
    assert!(plan.blocked.is_empty(), "{:?}", plan.blocked);
    assert_eq!(
        plan.order[0].target,
        project.target().join("services/userService.ts")
    );

    let report = orchestrator.run().unwrap();
    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(project.read_target("services/userService.ts"), service);
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

#[test]
fn test_merge_preserves_existing_and_adds_new_exports() {
    let project = Project::new();
    project.existing("utils/math.ts", MATH_EXISTING);
    project.candidate(
        "math.ts",
        "export function y(a: number) {\n  return a + 1;\n}\n\nexport function z() {\n  return 3;\n}\n",
    );

    let mut orchestrator = Orchestrator::new(project.config(), ScriptedVerifier::default()).unwrap();
    let report = orchestrator.run().unwrap();

    assert_eq!(report.status, SessionStatus::Completed);
    let merged = project.read_target("utils/math.ts");
    assert!(merged.starts_with(MATH_EXISTING.trim_end()));
    for name in ["function x()", "function y(a: number)", "function z()"] {
        assert_eq!(merged.matches(name).count(), 1, "{name} in {merged}");
    }
    assert!(!project.source().join("math.ts").exists());
}

#[test]
fn test_conflict_fails_the_file_until_resolved() {
    let project = Project::new();
    project.existing("utils/math.ts", MATH_EXISTING);
    project.candidate(
        "math.ts",
        "export function y(a: number) {\n  return a + 2;\n}\n\nexport function z() {\n  return 3;\n}\n",
    );

    let mut orchestrator = Orchestrator::new(project.config(), ScriptedVerifier::default()).unwrap();
    let report = orchestrator.run().unwrap();

    assert_eq!(report.status, SessionStatus::Paused);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.count(NodeStatus::Failed), 1);
    assert_eq!(project.read_target("utils/math.ts"), MATH_EXISTING);
    assert!(project.source().join("math.ts").exists());

    let state = orchestrator.status().unwrap().unwrap();
    let failure = &state.failed["math.ts"];
    assert_eq!(failure.conflicts.len(), 1);
    assert_eq!(failure.conflicts[0].symbol, "y");
    assert_eq!(failure.conflicts[0].kind, ConflictKind::DuplicateExport);

    assert!(matches!(
        orchestrator.resolve("nope.ts", ConflictResolution::KeepExisting),
        Err(GraftError::UnknownFile(_))
    ));
    orchestrator
        .resolve("math.ts", ConflictResolution::KeepExisting)
        .unwrap();
    let report = orchestrator.run().unwrap();

    assert_eq!(report.status, SessionStatus::Completed);
    let merged = project.read_target("utils/math.ts");
    assert!(merged.contains("return a + 1;"));
    assert!(!merged.contains("return a + 2;"));
    assert!(merged.contains("export function z()"));
    assert!(!project.source().join("math.ts").exists());
}

#[test]
fn test_stop_on_error_pauses_before_the_next_file() {
    let project = Project::new();
    project.existing("utils/math.ts", MATH_EXISTING);
    project.candidate("math.ts", "export function x() {\n  return 42;\n}\n");
    project.candidate("zeta.ts", "export const zeta = (): number => 1;\n");

    let mut config = project.config();
    config.stop_on_error = true;
    let mut orchestrator = Orchestrator::new(config, ScriptedVerifier::default()).unwrap();
    let report = orchestrator.run().unwrap();

    assert_eq!(report.status, SessionStatus::Paused);
    assert_eq!(report.count(NodeStatus::Failed), 1);
    assert_eq!(report.count(NodeStatus::Pending), 1);
    assert!(project.source().join("zeta.ts").exists());
    assert!(!project.target().join("utils/zeta.ts").exists());
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

#[test]
fn test_failed_build_reverts_only_that_file() {
    let project = Project::new();
    project.existing("utils/math.ts", MATH_EXISTING);
    project.candidate("math.ts", "export function z() {\n  return 3;\n}\n");
    project.candidate("other.ts", "export const other = (): number => 7;\n");

    let mut config = project.config();
    config.verify_after_each = true;
    let verifier = ScriptedVerifier::with_script(vec![
        BuildResult::passed(),
        failing_build("app/src/utils/math.ts(9,10): error TS2304: Cannot find name 'q'."),
        BuildResult::passed(),
    ]);
    let mut orchestrator = Orchestrator::new(config.clone(), verifier).unwrap();
    let report = orchestrator.run().unwrap();

    assert_eq!(report.count(NodeStatus::Failed), 1);
    assert_eq!(report.count(NodeStatus::Completed), 1);
    assert_eq!(project.read_target("utils/math.ts"), MATH_EXISTING);
    assert!(project.source().join("math.ts").exists());
    assert!(!project.source().join("other.ts").exists());

    let state = orchestrator.status().unwrap().unwrap();
    let failure = &state.failed["math.ts"];
    assert_eq!(failure.diagnostics.len(), 1);
    assert_eq!(failure.diagnostics[0].code.as_deref(), Some("TS2304"));
}

#[test]
fn test_failed_build_removes_a_created_target() {
    let project = Project::new();
    project.candidate("fresh.ts", "export const fresh = (): number => 1;\n");

    let mut config = project.config();
    config.verify_after_each = true;
    let verifier = ScriptedVerifier::with_script(vec![
        BuildResult::passed(),
        failing_build("app/src/utils/fresh.ts(1,1): error TS1005: ';' expected."),
    ]);
    let mut orchestrator = Orchestrator::new(config, verifier).unwrap();
    let report = orchestrator.run().unwrap();

    assert_eq!(report.count(NodeStatus::Failed), 1);
    assert!(!project.target().join("utils/fresh.ts").exists());
    assert!(project.source().join("fresh.ts").exists());
}

#[test]
fn test_pre_existing_build_errors_are_tolerated() {
    let project = Project::new();
    project.candidate("fresh.ts", "export const fresh = (): number => 1;\n");

    let legacy = "app/src/legacy.ts(3,1): error TS2304: Cannot find name 'old'.";
    let mut config = project.config();
    config.verify_after_each = true;
    let verifier = ScriptedVerifier::with_script(vec![failing_build(legacy), failing_build(legacy)]);
    let mut orchestrator = Orchestrator::new(config, verifier).unwrap();
    let report = orchestrator.run().unwrap();

    assert_eq!(report.status, SessionStatus::Completed);
    assert!(project.target().join("utils/fresh.ts").exists());
}

#[test]
fn test_unstructured_baseline_failure_aborts_before_any_change() {
    let project = Project::new();
    project.candidate("fresh.ts", "export const fresh = (): number => 1;\n");

    let mut config = project.config();
    config.verify_after_each = true;
    let verifier = ScriptedVerifier::with_script(vec![BuildResult::from_output(
        Some(1),
        "tsc: command exploded\n".to_string(),
    )]);
    let mut orchestrator = Orchestrator::new(config, verifier).unwrap();
    let err = orchestrator.run().unwrap_err();

    assert!(matches!(err, GraftError::Build(_)));
    assert!(!project.target().join("utils/fresh.ts").exists());
    assert!(project.source().join("fresh.ts").exists());
}

// ---------------------------------------------------------------------------
// Resume
// ---------------------------------------------------------------------------

#[test]
fn test_resume_only_processes_remaining_files() {
    let project = Project::new();
    for name in ["a", "b", "c", "d", "e"] {
        project.candidate(
            &format!("{name}.ts"),
            &format!("export const {name} = (): string => '{name}';\n"),
        );
    }
    let mut config = project.config();
    config.verify_after_each = true;

    // Baseline is call 1; the pause lands after the second file's check.
    let pause = Arc::new(AtomicBool::new(false));
    let first = ScriptedVerifier {
        pause_at: Some((3, Arc::clone(&pause))),
        ..ScriptedVerifier::default()
    };
    let mut orchestrator = Orchestrator::new(config.clone(), first)
        .unwrap()
        .with_pause_flag(Arc::clone(&pause));
    let report = orchestrator.run().unwrap();

    assert_eq!(report.status, SessionStatus::Paused);
    assert_eq!(report.count(NodeStatus::Completed), 2);
    assert_eq!(report.count(NodeStatus::Pending), 3);
    let completed_a = project.read_target("utils/a.ts");

    // A fresh process picks the ledger up.
    let second = ScriptedVerifier::default();
    let mut restarted = Orchestrator::new(config, second.clone()).unwrap();
    let report = restarted.run().unwrap();

    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(second.calls(), 3);
    let processed_now: Vec<&str> = report
        .files
        .iter()
        .map(|f| f.path.as_str())
        .collect();
    assert_eq!(processed_now, vec!["a.ts", "b.ts", "c.ts", "d.ts", "e.ts"]);
    assert_eq!(project.read_target("utils/a.ts"), completed_a);
    assert!(!project.source().exists());
}

#[test]
fn test_interrupted_step_is_reverted_on_resume() {
    let project = Project::new();
    project.candidate("a.ts", "export const a = (): number => 1;\n");
    project.candidate("b.ts", "export const b = (): number => 2;\n");
    let config = project.config();

    let pause = Arc::new(AtomicBool::new(false));
    let mut orchestrator = Orchestrator::new(config.clone(), ScriptedVerifier::default())
        .unwrap()
        .with_pause_flag(Arc::clone(&pause));
    // Paused before the first file: only the ledger exists.
    pause.store(true, Ordering::SeqCst);
    let report = orchestrator.run().unwrap();
    assert_eq!(report.count(NodeStatus::Pending), 2);

    // Simulate a crash half-way through writing b's target.
    let target_b = project.target().join("utils/b.ts");
    let store = StateStore::for_config(&config);
    let mut state = store.load().unwrap().unwrap();
    let files = FileManager::new(
        config.backup_dir(),
        config.journal_dir(),
        true,
        config.retry,
    );
    let checkpoint = files.checkpoint(&target_b).unwrap();
    fs::create_dir_all(target_b.parent().unwrap()).unwrap();
    fs::write(&target_b, "garbage").unwrap();
    state.current = Some("b.ts".to_string());
    state.in_flight = Some(InFlight {
        file: "b.ts".to_string(),
        checkpoint,
    });
    store.save(&mut state).unwrap();

    let mut restarted = Orchestrator::new(config, ScriptedVerifier::default()).unwrap();
    let report = restarted.run().unwrap();

    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(project.read_target("utils/b.ts"), "export const b = (): number => 2;\n");
}

// ---------------------------------------------------------------------------
// Rollback
// ---------------------------------------------------------------------------

#[test]
fn test_full_rollback_restores_pre_session_state() {
    let project = Project::new();
    project.existing("utils/math.ts", MATH_EXISTING);
    project.existing("utils/zz.ts", "export const zz = 1;\n");
    project.candidate("fresh.ts", "export const fresh = (): number => 1;\n");
    project.candidate("math.ts", "export function z() {\n  return 3;\n}\n");
    project.candidate("zz.ts", "export const zz = 2;\n");

    let mut config = project.config();
    config.stop_on_error = true;
    let mut orchestrator = Orchestrator::new(config.clone(), ScriptedVerifier::default()).unwrap();
    let report = orchestrator.run().unwrap();
    assert_eq!(report.status, SessionStatus::Paused);
    assert_eq!(report.count(NodeStatus::Completed), 2);
    assert!(project.read_target("utils/math.ts").contains("function z()"));
    assert!(!project.source().join("fresh.ts").exists());

    let rollback = orchestrator.rollback().unwrap();

    assert!(rollback.is_clean(), "{:?}", rollback.unrecoverable);
    assert_eq!(project.read_target("utils/math.ts"), MATH_EXISTING);
    assert!(!project.target().join("utils/fresh.ts").exists());
    assert_eq!(
        fs::read_to_string(project.source().join("fresh.ts")).unwrap(),
        "export const fresh = (): number => 1;\n"
    );
    assert_eq!(
        fs::read_to_string(project.source().join("math.ts")).unwrap(),
        "export function z() {\n  return 3;\n}\n"
    );
    assert!(rollback.removed.contains(&project.target().join("utils/fresh.ts")));
    assert!(orchestrator.status().unwrap().is_none());
    assert!(matches!(orchestrator.rollback(), Err(GraftError::NoSession)));
}

#[test]
fn test_rollback_without_backups_recreates_originals_from_targets() {
    let project = Project::new();
    project.candidate("fresh.ts", "export const fresh = (): number => 1;\n");
    project.candidate("later.ts", "export const later = (): number => 2;\n");

    let mut config = project.config();
    config.create_backups = false;
    config.verify_after_each = true;
    // Baseline is call 1; pause once the first file has been checked.
    let pause = Arc::new(AtomicBool::new(false));
    let verifier = ScriptedVerifier {
        pause_at: Some((2, Arc::clone(&pause))),
        ..ScriptedVerifier::default()
    };
    let mut orchestrator = Orchestrator::new(config, verifier)
        .unwrap()
        .with_pause_flag(pause);
    let report = orchestrator.run().unwrap();
    assert_eq!(report.count(NodeStatus::Completed), 1);
    assert!(!project.source().join("fresh.ts").exists());

    let rollback = orchestrator.rollback().unwrap();

    assert!(rollback.is_clean());
    assert_eq!(rollback.recreated, vec![project.source().join("fresh.ts")]);
    assert!(!project.target().join("utils/fresh.ts").exists());
    assert_eq!(
        fs::read_to_string(project.source().join("fresh.ts")).unwrap(),
        "export const fresh = (): number => 1;\n"
    );
    assert!(project.source().join("later.ts").exists());
}

#[test]
fn test_status_and_resolve_without_session() {
    let project = Project::new();
    let mut orchestrator = Orchestrator::new(project.config(), ScriptedVerifier::default()).unwrap();
    assert!(orchestrator.status().unwrap().is_none());
    assert!(matches!(
        orchestrator.resolve("a.ts", ConflictResolution::TakeCandidate),
        Err(GraftError::NoSession)
    ));
}

#[test]
fn test_invalid_configuration_is_rejected() {
    let project = Project::new();
    let mut config = project.config();
    config.merge.preserve_existing = false;
    let err = Orchestrator::new(config, ScriptedVerifier::default()).err().unwrap();
    assert!(err.is_fatal());
}

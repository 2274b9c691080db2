use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::{ColoredString, Colorize};
use tracing::{info, warn};

use grafter_core::analyzer::resolve::PackageManifest;
use grafter_core::models::{ConflictResolution, NodeStatus, SessionStatus};
use grafter_core::orchestrator::{display_relative, Plan, PlannedAction};
use grafter_core::state::IntegrationState;
use grafter_core::{CommandVerifier, Config, Orchestrator, RollbackReport, SessionReport};

use crate::cli::{Cli, Command, ResolveArgs, RunArgs};

/// Exit code for a session that could not run at all.
pub const EXIT_FATAL: u8 = 2;

pub fn dispatch(cli: Cli) -> Result<u8> {
    let mut config = load_config(&cli)?;
    match cli.command {
        Command::Run(args) => {
            apply_run_overrides(&mut config, &args);
            run(config, &args)
        }
        Command::Rollback => rollback(config),
        Command::Status { json } => status(config, json),
        Command::Resolve(args) => resolve(config, &args),
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(source) = &cli.source {
        config.source_dir = source.clone();
    }
    if let Some(target) = &cli.target {
        config.target_root = target.clone();
    }
    if !config.source_dir.as_os_str().is_empty() {
        config.source_dir = std::path::absolute(&config.source_dir)
            .with_context(|| format!("resolving {}", config.source_dir.display()))?;
    }
    if !config.target_root.as_os_str().is_empty() {
        config.target_root = std::path::absolute(&config.target_root)
            .with_context(|| format!("resolving {}", config.target_root.display()))?;
    }
    Ok(config)
}

fn apply_run_overrides(config: &mut Config, args: &RunArgs) {
    if args.no_verify {
        config.verify_after_each = false;
    }
    if args.keep_sources {
        config.delete_after_success = false;
    }
    if args.no_backups {
        config.create_backups = false;
    }
    if args.stop_on_error {
        config.stop_on_error = true;
    }
    if args.no_rewrite_imports {
        config.merge.rewrite_imports = false;
    }
    if args.no_add_new {
        config.merge.add_new_non_conflicting = false;
    }
}

fn orchestrator(config: Config) -> Result<Orchestrator<CommandVerifier>> {
    // The checker runs from the project root, i.e. next to package.json.
    let project_root = PackageManifest::discover(&config.target_root)
        .map(|m| m.root)
        .unwrap_or_else(|| config.target_root.clone());
    let verifier = CommandVerifier::from_config(&config.verify, project_root);
    Ok(Orchestrator::new(config, verifier)?)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn run(config: Config, args: &RunArgs) -> Result<u8> {
    let orchestrator = orchestrator(config)?;

    if args.dry_run {
        let plan = orchestrator.plan()?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&plan)?);
        } else {
            print_plan(&plan, &orchestrator.config().target_root);
        }
        return Ok(0);
    }

    let pause = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&pause);
    if let Err(e) = ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            // Second interrupt: give up now; the journal reverts the step on resume.
            std::process::exit(130);
        }
        eprintln!(
            "{}",
            "Pause requested; finishing the current file (Ctrl-C again to abort)".yellow()
        );
    }) {
        warn!("Could not install the Ctrl-C handler: {e}");
    }

    let mut orchestrator = orchestrator.with_pause_flag(pause);
    let report = orchestrator.run()?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, &orchestrator.config().target_root);
    }
    Ok(u8::try_from(report.exit_code()).unwrap_or(EXIT_FATAL))
}

fn rollback(config: Config) -> Result<u8> {
    let mut orchestrator = orchestrator(config)?;
    let report = orchestrator.rollback()?;
    print_rollback(&report);
    Ok(if report.is_clean() { 0 } else { EXIT_FATAL })
}

fn status(config: Config, json: bool) -> Result<u8> {
    let orchestrator = orchestrator(config)?;
    let Some(state) = orchestrator.status()? else {
        if json {
            println!("null");
        } else {
            println!("No integration session in progress.");
        }
        return Ok(0);
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        print_state(&state);
    }
    Ok(match state.status {
        SessionStatus::Completed => 0,
        SessionStatus::Failed => EXIT_FATAL,
        _ => 1,
    })
}

fn resolve(config: Config, args: &ResolveArgs) -> Result<u8> {
    let resolution = if args.take_candidate {
        ConflictResolution::TakeCandidate
    } else {
        ConflictResolution::KeepExisting
    };
    let mut orchestrator = orchestrator(config)?;
    orchestrator.resolve(&args.file, resolution)?;
    info!("{} will be merged on the next run", args.file);
    println!(
        "{} {} ({})",
        "Resolved".green(),
        args.file,
        match resolution {
            ConflictResolution::KeepExisting => "keep existing",
            ConflictResolution::TakeCandidate => "take candidate",
        }
    );
    Ok(0)
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn status_label(status: NodeStatus) -> ColoredString {
    match status {
        NodeStatus::Completed => "done".green(),
        NodeStatus::Failed => "failed".red(),
        NodeStatus::Skipped => "skipped".yellow(),
        NodeStatus::InProgress => "running".cyan(),
        NodeStatus::Pending => "pending".dimmed(),
    }
}

fn session_label(status: SessionStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        SessionStatus::Completed => text.green().bold(),
        SessionStatus::Paused => text.yellow().bold(),
        SessionStatus::Failed => text.red().bold(),
        _ => text.cyan().bold(),
    }
}

fn print_plan(plan: &Plan, target_root: &Path) {
    println!("{}", "Planned order".bold());
    for (i, file) in plan.order.iter().enumerate() {
        let action = match file.action {
            PlannedAction::Create => "create".green(),
            PlannedAction::Merge => "merge".cyan(),
        };
        println!(
            "{:>4}. {} -> {} [{}] ({})",
            i + 1,
            file.path,
            display_relative(&file.target, target_root),
            action,
            file.category
        );
        if !file.depends_on.is_empty() {
            println!("        after {}", file.depends_on.join(", "));
        }
        for warning in &file.warnings {
            println!("        {} {warning}", "warning:".yellow());
        }
    }
    if !plan.cycles.is_empty() {
        println!("{}", "Cycles".bold());
        for cycle in &plan.cycles {
            println!("  {}", cycle.join(" -> ").yellow());
        }
    }
    if !plan.blocked.is_empty() {
        println!("{}", "Blocked".bold());
        for blocked in &plan.blocked {
            println!("  {} {}: {}", "skip".yellow(), blocked.path, blocked.reason);
        }
    }
    for (path, error) in &plan.unparsable {
        println!("  {} {path}: {error}", "unparsable".red());
    }
    if !plan.already_completed.is_empty() {
        println!(
            "{} file(s) already integrated by this session",
            plan.already_completed.len()
        );
    }
}

fn print_report(report: &SessionReport, target_root: &Path) {
    for file in &report.files {
        let target = file
            .target
            .as_deref()
            .map(|t| format!(" -> {}", display_relative(t, target_root)))
            .unwrap_or_default();
        println!(
            "{:>8}  {}{}  {}",
            status_label(file.status),
            file.path,
            target,
            file.detail.dimmed()
        );
    }
    println!(
        "Session {} {}: {} done, {} failed, {} skipped, {} pending",
        report.session_id,
        session_label(report.status),
        report.count(NodeStatus::Completed),
        report.count(NodeStatus::Failed),
        report.count(NodeStatus::Skipped),
        report.count(NodeStatus::Pending)
    );
    if report.source_dir_removed {
        println!("Source directory removed.");
    }
    if report.status == SessionStatus::Paused {
        println!("Fix the reported files and run again to resume, or `grafter rollback`.");
    }
}

fn print_state(state: &IntegrationState) {
    println!(
        "Session {} {} (started {})",
        state.session_id,
        session_label(state.status),
        state.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "  {} done, {} failed, {} skipped, {} pending",
        state.completed.len(),
        state.failed.len(),
        state.skipped.len(),
        state.pending_count()
    );
    if let Some(current) = &state.current {
        println!("  in progress: {current}");
    }
    let root = &state.config.target_root;
    for (path, done) in &state.completed {
        println!(
            "{:>8}  {path} -> {}",
            status_label(NodeStatus::Completed),
            display_relative(&done.target, root)
        );
    }
    for (path, failure) in &state.failed {
        println!("{:>8}  {path}: {}", status_label(NodeStatus::Failed), failure.reason);
        for conflict in &failure.conflicts {
            println!("            {} `{}`: {}", conflict.kind, conflict.symbol, conflict.description);
        }
        for diagnostic in &failure.diagnostics {
            println!("            {diagnostic}");
        }
    }
    for (path, skip) in &state.skipped {
        println!("{:>8}  {path}: {}", status_label(NodeStatus::Skipped), skip.reason);
    }
    let awaiting: Vec<&String> = state.awaiting_resolution().map(|(p, _)| p).collect();
    if !awaiting.is_empty() {
        println!(
            "Awaiting resolution ({}): grafter resolve FILE --keep-existing|--take-candidate",
            awaiting
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
}

fn print_rollback(report: &RollbackReport) {
    for path in &report.restored {
        println!("{:>10}  {}", "restored".green(), path.display());
    }
    for path in &report.removed {
        println!("{:>10}  {}", "removed".green(), path.display());
    }
    for path in &report.recreated {
        println!("{:>10}  {}", "recreated".green(), path.display());
    }
    for (path, error) in &report.unrecoverable {
        println!("{:>10}  {}: {error}", "FAILED".red().bold(), path.display());
    }
    if report.is_clean() {
        println!("{}", "Rollback complete.".green().bold());
    } else {
        println!(
            "{}",
            format!(
                "Rollback incomplete: {} path(s) need manual attention.",
                report.unrecoverable.len()
            )
            .red()
            .bold()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_run_overrides_only_touch_named_settings() {
        let cli = Cli::parse_from(["grafter", "run", "--no-verify", "--keep-sources", "--no-add-new"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let mut config = Config::new("in", "src");
        apply_run_overrides(&mut config, &args);
        assert!(!config.verify_after_each);
        assert!(!config.delete_after_success);
        assert!(!config.merge.add_new_non_conflicting);
        assert!(config.create_backups);
        assert!(config.merge.rewrite_imports);
        assert!(!config.stop_on_error);
    }
}

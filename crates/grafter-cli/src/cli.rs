use std::path::PathBuf;

use clap::{ArgAction, ArgGroup, Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "grafter", version)]
#[command(about = "Integrate loose TypeScript files into an existing project in dependency order", long_about = None)]
pub struct Cli {
    /// Configuration file (default: ./grafter.toml when present)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory holding the files to integrate
    #[arg(long, global = true, value_name = "DIR")]
    pub source: Option<PathBuf>,

    /// Root of the project source tree receiving them
    #[arg(long, global = true, value_name = "DIR")]
    pub target: Option<PathBuf>,

    /// More output (-v debug, -vv trace). GRAFTER_LOG takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a session or resume the one in progress
    Run(RunArgs),
    /// Undo every change made by the current session
    Rollback,
    /// Show the current session
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Record how to settle a file whose merge stopped on conflicts
    Resolve(ResolveArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Print the planned order and targets without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the build check after each file
    #[arg(long)]
    pub no_verify: bool,

    /// Leave integrated originals in the source directory
    #[arg(long)]
    pub keep_sources: bool,

    /// Do not back up files before overwriting or deleting them
    #[arg(long)]
    pub no_backups: bool,

    /// Pause the session at the first failed file
    #[arg(long)]
    pub stop_on_error: bool,

    /// Keep relative imports exactly as written
    #[arg(long)]
    pub no_rewrite_imports: bool,

    /// Only merge into existing files, never append new exports
    #[arg(long)]
    pub no_add_new: bool,

    /// Machine-readable output
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("resolution").required(true).args(["keep_existing", "take_candidate"])))]
pub struct ResolveArgs {
    /// File path relative to the source directory
    pub file: String,

    /// Keep the project's declarations and add only the non-conflicting ones
    #[arg(long)]
    pub keep_existing: bool,

    /// Replace the project's conflicting declarations with the incoming ones
    #[arg(long)]
    pub take_candidate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::parse_from([
            "grafter",
            "--source",
            "incoming",
            "run",
            "--dry-run",
            "--no-verify",
        ]);
        assert_eq!(cli.source, Some(PathBuf::from("incoming")));
        match cli.command {
            Command::Run(args) => {
                assert!(args.dry_run && args.no_verify);
                assert!(!args.keep_sources);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_resolve_requires_exactly_one_choice() {
        assert!(Cli::try_parse_from(["grafter", "resolve", "a.ts"]).is_err());
        assert!(Cli::try_parse_from([
            "grafter",
            "resolve",
            "a.ts",
            "--keep-existing",
            "--take-candidate"
        ])
        .is_err());
        let cli = Cli::parse_from(["grafter", "resolve", "a.ts", "--take-candidate"]);
        assert!(matches!(
            cli.command,
            Command::Resolve(ResolveArgs {
                take_candidate: true,
                ..
            })
        ));
    }
}

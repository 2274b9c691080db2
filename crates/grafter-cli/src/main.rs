mod cli;
mod commands;
mod logging;

use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use tracing::error;

use cli::Cli;

fn main() -> ExitCode {
    let args = Cli::parse();
    logging::init_logger(args.verbose);

    match commands::dispatch(args) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!("{err:#}");
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::from(commands::EXIT_FATAL)
        }
    }
}

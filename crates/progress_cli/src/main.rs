mod app;
mod args;
mod config;
mod output;

use std::process::ExitCode;

use clap::Parser;
use progress_logging::{progress_error, LogDestination};

use args::{Cli, Command};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let destination = match cli.log_file.clone() {
        Some(path) => LogDestination::Both(path),
        None => LogDestination::Terminal,
    };
    if !progress_logging::initialize(destination, cli.log_level.into()) {
        eprintln!("Warning: logging could not be initialized");
    }

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(err) => {
            progress_error!("{:#}", err);
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<bool> {
    match cli.command {
        Command::Watch(args) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(app::run_watch(args))
        }
        Command::Parse(args) => {
            app::run_parse(args)?;
            Ok(true)
        }
    }
}

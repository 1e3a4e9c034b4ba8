use std::process::ExitCode;

use clap::Parser;
use log::error;

use taskq::app::cli::{self, Cli, SubCommand};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.command == SubCommand::Daemon { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    match cli::run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

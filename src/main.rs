mod anthropic;
mod collect;
mod config;
mod diff;
mod error;
mod git;
mod instruction;
mod output;
mod prompt;
mod review;
mod run;

use std::process::ExitCode;

use clap::Parser;

use crate::config::{Cli, load_config};
use crate::output::Console;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level()))
        .format_timestamp(None)
        .init();

    let mut console = Console::stdout();
    let result = load_config(&cli).and_then(|config| run::run(&cli, &config, &mut console));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            console.error(&format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}

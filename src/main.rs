//! `mediamove` - rename and relocate media files with full rollback.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mediamove::cli::{Cli, Command};
use mediamove::exit_codes::exit;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let exit_code = match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:?}");
            exit::OPERATIONAL_FAILURE
        }
    };
    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    let global = cli.global;
    match cli.command {
        Command::Schema => {
            println!("{}", mediamove::model::generate_schema()?);
            Ok(exit::SUCCESS)
        }
        Command::Validate(args) => mediamove::engine::validate(&global, args),
        Command::Apply(args) => mediamove::engine::apply(&global, args),
        Command::Rollback(args) => mediamove::engine::rollback(&global, args),
        Command::List => mediamove::engine::list(&global),
        Command::Show(args) => mediamove::engine::show(&global, args),
    }
}

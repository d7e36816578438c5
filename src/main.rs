use clap::Parser;
use std::process;

use taskclock::cli;
use taskclock::cli::commands::{Cli, Commands};

fn main() {
    if let Err(e) = init_tracing() {
        eprintln!("Warning: {e:#}");
    }

    let cli_args = Cli::parse();
    let json_output = cli_args.json;

    let exit_code = match cli_args.command {
        Commands::Init => cli::init::run(json_output),
        Commands::Task(cmd) => cli::task::run(cmd, json_output),
        Commands::Timer(cmd) => cli::timer::run(cmd, json_output),
        Commands::Status => cli::status::run(json_output),
    };

    process::exit(exit_code);
}

fn init_tracing() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_env("TASKCLOCK_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

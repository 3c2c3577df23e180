mod cli;
mod paths;
mod run;

use anyhow::Result;
use cli::Command;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    let config = run::resolve_config(&cli.config)?;
    let programs = cli.config.programs();
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run::run_window(config, programs),
        Command::Headless(args) => run::run_headless(config, programs, &args),
        Command::Verify(args) => run::run_verify(config, programs, &args),
        Command::Config => run::print_config(&config),
    }
}

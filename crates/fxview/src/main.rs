mod bindings;
mod cli;
mod preview;
mod run;
mod scene;

use std::process::ExitCode;

use anyhow::Result;

fn main() -> Result<ExitCode> {
    let cli = cli::parse();
    run::initialise_tracing();
    run::run(cli.command)
}

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

mod bootstrap;
mod cli;
mod progress;
mod runner;

use cli::RegressionArgs;

fn main() -> ExitCode {
    let args = RegressionArgs::parse();
    bootstrap::init_tracing(args.verbose);

    let wiring = match bootstrap::build_wiring(&args) {
        Ok(wiring) => wiring,
        Err(err) => {
            error!(error = %err, "startup_failed");
            eprintln!("{err}");
            return ExitCode::from(runner::EXIT_USAGE);
        }
    };

    runner::run(wiring)
}

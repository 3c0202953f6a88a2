use std::io::{self, Write};
use std::process::ExitCode;

use engine::PointMassEngine;
use regression::{
    Engine, NoProgress, RegressionSuite, RegressionSuiteResult, ReportWriteError, SuiteObserver,
};
use tracing::{error, info};

use crate::bootstrap::RunWiring;
use crate::progress::ProgressBars;

pub(crate) const EXIT_FAILED_SCENES: u8 = 1;
pub(crate) const EXIT_USAGE: u8 = 2;

pub(crate) fn run(wiring: RunWiring) -> ExitCode {
    let mut engine = PointMassEngine::new();
    let mut bars;
    let mut quiet = NoProgress;
    let observer: &mut dyn SuiteObserver = if wiring.progress {
        bars = ProgressBars::new();
        &mut bars
    } else {
        &mut quiet
    };

    match execute(wiring, &mut engine, observer, &mut io::stdout().lock()) {
        Ok(result) => ExitCode::from(exit_code_for(&result)),
        Err(err) => {
            error!(error = %err, "report_write_failed");
            eprintln!("{err}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}

/// Runs the suite and prints the tally to `out`, then writes the report.
fn execute<E: Engine, W: Write>(
    wiring: RunWiring,
    engine: &mut E,
    observer: &mut dyn SuiteObserver,
    out: &mut W,
) -> Result<RegressionSuiteResult, ReportWriteError> {
    let result = RegressionSuite::new(wiring.config).run_with_observer(engine, observer);

    let printed = out
        .write_all(result.render_human_readable().as_bytes())
        .and_then(|()| out.flush());
    if let Err(err) = printed {
        error!(error = %err, "tally_write_failed");
    }

    if let Some(path) = wiring.report.as_deref() {
        result.write_json(path)?;
        info!(path = %path.display(), "report_written");
    }
    Ok(result)
}

fn exit_code_for(result: &RegressionSuiteResult) -> u8 {
    if result.success() {
        0
    } else {
        EXIT_FAILED_SCENES
    }
}

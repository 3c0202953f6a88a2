use std::path::PathBuf;
use std::time::Duration;

use regression::{
    env_path, resolve_input_roots, ManifestError, ManifestOptions, RunMode, StartupError,
    SuiteConfig, REFERENCES_DIR_ENV_VAR, REGRESSION_DIR_ENV_VAR,
};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::cli::RegressionArgs;

#[derive(Debug, Error)]
pub(crate) enum BootstrapError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error(transparent)]
    Filter(#[from] ManifestError),
    #[error("--scene-time-budget-secs must be greater than zero")]
    ZeroTimeBudget,
}

pub(crate) struct RunWiring {
    pub(crate) config: SuiteConfig,
    pub(crate) report: Option<PathBuf>,
    pub(crate) progress: bool,
}

pub(crate) fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

pub(crate) fn build_wiring(args: &RegressionArgs) -> Result<RunWiring, BootstrapError> {
    let input_roots = resolve_input_roots(args.input.as_deref())?;

    let mut manifest = ManifestOptions {
        filter: None,
        regression_dir: env_path(REGRESSION_DIR_ENV_VAR)?,
        references_dir_fallback: env_path(REFERENCES_DIR_ENV_VAR)?,
    };
    if let Some(pattern) = args.filter.as_deref() {
        manifest = manifest.with_filter(pattern)?;
    }

    let scene_time_budget = match args.scene_time_budget_secs {
        Some(0) => return Err(BootstrapError::ZeroTimeBudget),
        Some(secs) => Some(Duration::from_secs(secs)),
        None => None,
    };

    let mode = if args.write_references {
        RunMode::Capture
    } else {
        RunMode::Compare
    };

    Ok(RunWiring {
        config: SuiteConfig {
            input_roots,
            mode,
            manifest,
            format: args.format.map(Into::into),
            error_policy: args.error_policy.map(Into::into),
            scene_time_budget,
        },
        report: args.report.clone(),
        progress: !args.disable_progress_bar,
    })
}

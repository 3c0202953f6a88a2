use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use regression::{ErrorPolicy, ReferenceFormat};

/// Runs physics regression manifests against recorded reference trajectories.
#[derive(Parser, Debug)]
#[command(
    name = "regression",
    version,
    about = "Compare simulated trajectories against stored references",
    after_help = "Environment:\n  REGRESSION_SCENES_DIR      default for --input\n  REGRESSION_DIR             substituted for $REGRESSION_DIR in manifests\n  REGRESSION_REFERENCES_DIR  fallback when a manifest's reference directory is missing\n  RUST_LOG                   log filter (default info)\n\nExamples:\n  regression --input scenes --write-references\n  regression --input 'scenes|more_scenes' --filter '^fem/' --report report.json"
)]
pub(crate) struct RegressionArgs {
    /// Directories scanned for `.regression-tests` manifests, separated by `|`
    #[arg(long, value_name = "DIR[|DIR...]")]
    pub(crate) input: Option<String>,

    /// Only run scenes whose manifest-relative path matches this regex
    #[arg(long, value_name = "REGEX")]
    pub(crate) filter: Option<String>,

    /// Capture new references instead of comparing
    #[arg(long)]
    pub(crate) write_references: bool,

    /// Reference format to write, or to read instead of detecting it
    #[arg(long, value_enum, value_name = "FORMAT")]
    pub(crate) format: Option<FormatArg>,

    /// Overrides the format's default error policy
    #[arg(long, value_enum, value_name = "POLICY")]
    pub(crate) error_policy: Option<ErrorPolicyArg>,

    /// Abort a scene that runs longer than this many seconds
    #[arg(long, value_name = "SECS")]
    pub(crate) scene_time_budget_secs: Option<u64>,

    /// Write the machine-readable report here
    #[arg(long, value_name = "PATH")]
    pub(crate) report: Option<PathBuf>,

    /// Hide the set, scene and step progress bars
    #[arg(long)]
    pub(crate) disable_progress_bar: bool,

    /// Log at debug level unless RUST_LOG is set
    #[arg(long, short)]
    pub(crate) verbose: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FormatArg {
    Json,
    Csv,
    Legacy,
}

impl From<FormatArg> for ReferenceFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Json => ReferenceFormat::JsonMap,
            FormatArg::Csv => ReferenceFormat::Csv,
            FormatArg::Legacy => ReferenceFormat::Legacy,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorPolicyArg {
    TotalDistance,
    MeanErrorPerDof,
}

impl From<ErrorPolicyArg> for ErrorPolicy {
    fn from(value: ErrorPolicyArg) -> Self {
        match value {
            ErrorPolicyArg::TotalDistance => ErrorPolicy::TotalDistance,
            ErrorPolicyArg::MeanErrorPerDof => ErrorPolicy::MeanErrorPerDof,
        }
    }
}

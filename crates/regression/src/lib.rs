use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

mod atomic_io;
mod clock;
pub mod codec;
mod comparator;
mod engine;
mod manifest;
mod progress;
mod report;
mod sampler;
mod selector;
mod suite;
#[cfg(test)]
mod test_support;
mod types;

pub use codec::{CodecError, DecodedReference, ReferenceFormat};
pub use comparator::{compare, CompareOptions};
pub use engine::{Engine, NodeId, PositionsView, StateObjectId};
pub use manifest::{
    parse_manifest, ManifestError, ManifestOptions, SkippedLine, TestCaseDescriptor, TestManifest,
};
pub use progress::{NoProgress, SuiteObserver};
pub use report::{
    ManifestFailure, RegressionSuiteResult, ReportWriteError, SceneLogEntry, SceneOutcome,
    SkippedManifestLine,
};
pub use sampler::{capture_schedule, sample, CaptureOptions, CaptureOutcome, WrittenReference};
pub use selector::{select_state_objects, StateObjectHandle};
pub use suite::{discover_manifests, RegressionSuite, RunMode, SuiteConfig, MANIFEST_SUFFIX};
pub use types::{
    ComparisonResult, ErrorPolicy, Keyframe, KeyframeAlignment, ObjectError, SceneError, Shape,
    Snapshot, Trajectory, TrajectoryError,
};

pub const SCENES_DIR_ENV_VAR: &str = "REGRESSION_SCENES_DIR";
pub const REGRESSION_DIR_ENV_VAR: &str = "REGRESSION_DIR";
pub const REFERENCES_DIR_ENV_VAR: &str = "REGRESSION_REFERENCES_DIR";
pub const INPUT_ROOT_SEPARATOR: char = '|';

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to read environment variable {var}: {source}")]
    EnvVar {
        var: &'static str,
        #[source]
        source: env::VarError,
    },
    #[error(
        "no input directory given; pass --input or set {env_var} \
(several directories may be separated with '{separator}')"
    )]
    NoInputRoots {
        env_var: &'static str,
        separator: char,
    },
    #[error("input directory does not exist: {path}")]
    InputRootMissing { path: PathBuf },
}

/// Resolves the directories scanned for manifests.
///
/// An explicit value wins over `REGRESSION_SCENES_DIR`. Both accept several
/// directories separated by `|`.
pub fn resolve_input_roots(explicit: Option<&str>) -> Result<Vec<PathBuf>, StartupError> {
    let raw = match explicit {
        Some(value) => value.to_string(),
        None => match env_var(SCENES_DIR_ENV_VAR)? {
            Some(value) => value,
            None => {
                return Err(StartupError::NoInputRoots {
                    env_var: SCENES_DIR_ENV_VAR,
                    separator: INPUT_ROOT_SEPARATOR,
                })
            }
        },
    };

    let roots = split_input_roots(&raw);
    if roots.is_empty() {
        return Err(StartupError::NoInputRoots {
            env_var: SCENES_DIR_ENV_VAR,
            separator: INPUT_ROOT_SEPARATOR,
        });
    }
    roots
        .into_iter()
        .map(|root| {
            if root.is_dir() {
                Ok(normalize_path(&root))
            } else {
                Err(StartupError::InputRootMissing { path: root })
            }
        })
        .collect()
}

pub fn split_input_roots(raw: &str) -> Vec<PathBuf> {
    raw.split(INPUT_ROOT_SEPARATOR)
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Reads an optional path-valued environment variable; empty values count as unset.
pub fn env_path(var: &'static str) -> Result<Option<PathBuf>, StartupError> {
    Ok(env_var(var)?.map(PathBuf::from))
}

fn env_var(var: &'static str) -> Result<Option<String>, StartupError> {
    match env::var(var) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(source) => Err(StartupError::EnvVar { var, source }),
    }
}

pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

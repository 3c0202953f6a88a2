use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::atomic_io::write_atomic;
use crate::manifest::SkippedLine;
use crate::sampler::CaptureOutcome;
use crate::suite::RunMode;
use crate::types::ComparisonResult;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SceneOutcome {
    Passed(ComparisonResult),
    /// Compared to the end but over tolerance.
    Failed(ComparisonResult),
    Captured(CaptureOutcome),
    /// Could not be run or compared; `kind` names the error variant.
    Errored { kind: String, message: String },
}

impl SceneOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Errored { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneLogEntry {
    pub manifest: PathBuf,
    pub scene: PathBuf,
    pub relative_scene: String,
    pub outcome: SceneOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestFailure {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedManifestLine {
    pub manifest: PathBuf,
    pub line_number: usize,
    pub reason: String,
}

impl SkippedManifestLine {
    pub(crate) fn new(manifest: &Path, skipped: &SkippedLine) -> Self {
        Self {
            manifest: manifest.to_path_buf(),
            line_number: skipped.line_number,
            reason: skipped.reason.clone(),
        }
    }
}

#[derive(Debug, Error)]
#[error("failed to write report {path}: {source}")]
pub struct ReportWriteError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegressionSuiteResult {
    pub mode: RunMode,
    /// Manifests that parsed and had their scenes run.
    pub sets_done: usize,
    pub scenes_run: usize,
    pub scenes_failed: usize,
    pub entries: Vec<SceneLogEntry>,
    pub manifest_failures: Vec<ManifestFailure>,
    pub skipped_lines: Vec<SkippedManifestLine>,
}

impl RegressionSuiteResult {
    pub(crate) fn new(mode: RunMode) -> Self {
        Self {
            mode,
            sets_done: 0,
            scenes_run: 0,
            scenes_failed: 0,
            entries: Vec::new(),
            manifest_failures: Vec::new(),
            skipped_lines: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, entry: SceneLogEntry) {
        self.scenes_run += 1;
        if entry.outcome.is_failure() {
            self.scenes_failed += 1;
        }
        self.entries.push(entry);
    }

    /// Manifest failures are reported but do not fail the run.
    pub fn success(&self) -> bool {
        self.scenes_failed == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &SceneLogEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.outcome.is_failure())
    }

    /// The `###` tally the historical scripts printed.
    pub fn render_human_readable(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "### Number of sets Done:  {}", self.sets_done);
        let _ = writeln!(out, "### Number of scenes Done:  {}", self.scenes_run);
        let _ = writeln!(out, "### Number of scenes failed:  {}", self.scenes_failed);

        for failure in &self.manifest_failures {
            let _ = writeln!(out, "### Failed set: {}", failure.path.display());
            let _ = writeln!(out, "    ### Error: {}", failure.message);
        }

        for entry in &self.entries {
            let scene = entry.scene.display();
            match &entry.outcome {
                SceneOutcome::Passed(result) => {
                    let _ = writeln!(
                        out,
                        "### Success: {scene} | Number of key frames compared without error: {}",
                        result.tested_frames
                    );
                }
                SceneOutcome::Failed(result) => {
                    let totals = result.objects.iter().map(|object| object.total_distance);
                    let by_dof = result.objects.iter().map(|object| object.error_by_dof);
                    let _ = writeln!(out, "### Failed: {scene}");
                    let _ = writeln!(
                        out,
                        "    ### Total Error per MechanicalObject: {}",
                        float_list(totals)
                    );
                    let _ = writeln!(out, "    ### Error by Dofs: {}", float_list(by_dof));
                }
                SceneOutcome::Captured(outcome) => {
                    let _ = writeln!(
                        out,
                        "### Written: {scene} | Number of key frames: {} | Files: {}",
                        outcome.keyframes,
                        outcome.files.len()
                    );
                }
                SceneOutcome::Errored { kind, message } => {
                    let _ = writeln!(out, "### Failed: {scene}");
                    let _ = writeln!(out, "    ### Error ({kind}): {message}");
                }
            }
        }
        out
    }

    pub fn write_json(&self, path: &Path) -> Result<(), ReportWriteError> {
        let wrap = |source: std::io::Error| ReportWriteError {
            path: path.to_path_buf(),
            source,
        };
        let mut bytes = serde_json::to_vec_pretty(self).map_err(|error| wrap(error.into()))?;
        bytes.push(b'\n');
        write_atomic(path, &bytes).map_err(wrap)
    }
}

fn float_list(values: impl Iterator<Item = f64>) -> String {
    let items = values
        .map(|value| format!("{value:?}"))
        .collect::<Vec<_>>();
    format!("[{}]", items.join(", "))
}

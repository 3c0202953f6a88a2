use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::codec::ReferenceFormat;
use crate::comparator::{compare_with_progress, CompareOptions};
use crate::engine::{Engine, NodeId};
use crate::manifest::{parse_manifest, ManifestOptions, TestCaseDescriptor};
use crate::progress::{NoProgress, SuiteObserver};
use crate::report::{
    ManifestFailure, RegressionSuiteResult, SceneLogEntry, SceneOutcome, SkippedManifestLine,
};
use crate::sampler::{sample_with_progress, CaptureOptions};
use crate::selector::{select_state_objects, StateObjectHandle};
use crate::types::{ErrorPolicy, SceneError};

pub const MANIFEST_SUFFIX: &str = ".regression-tests";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Compare,
    Capture,
}

#[derive(Debug, Clone, Default)]
pub struct SuiteConfig {
    pub input_roots: Vec<PathBuf>,
    pub mode: RunMode,
    pub manifest: ManifestOptions,
    /// Capture writes this format (JSON map when unset); compare detects
    /// the format on disk when unset.
    pub format: Option<ReferenceFormat>,
    /// Overrides the per-format default policy.
    pub error_policy: Option<ErrorPolicy>,
    pub scene_time_budget: Option<Duration>,
}

/// Every manifest below `roots`, sorted and without duplicates.
pub fn discover_manifests(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut manifests = Vec::new();
    for root in roots {
        for entry in WalkDir::new(root).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    warn!(root = %root.display(), error = %error, "manifest_discovery_error");
                    continue;
                }
            };
            let is_manifest = entry.file_type().is_file()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.ends_with(MANIFEST_SUFFIX));
            if is_manifest {
                manifests.push(entry.into_path());
            }
        }
    }
    manifests.sort();
    manifests.dedup();
    manifests
}

pub struct RegressionSuite {
    config: SuiteConfig,
}

impl RegressionSuite {
    pub fn new(config: SuiteConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    /// Runs every manifest found under the input roots. Scene and manifest
    /// failures are recorded in the result and never stop the run.
    pub fn run<E: Engine + ?Sized>(&self, engine: &mut E) -> RegressionSuiteResult {
        self.run_with_observer(engine, &mut NoProgress)
    }

    /// [`RegressionSuite::run`], reporting progress to `observer`.
    pub fn run_with_observer<E: Engine + ?Sized>(
        &self,
        engine: &mut E,
        observer: &mut dyn SuiteObserver,
    ) -> RegressionSuiteResult {
        let manifests = discover_manifests(&self.config.input_roots);
        info!(
            manifest_count = manifests.len(),
            mode = ?self.config.mode,
            "regression_suite_started"
        );
        observer.suite_started(manifests.len());

        let mut result = RegressionSuiteResult::new(self.config.mode);
        for manifest_path in &manifests {
            let manifest = match parse_manifest(manifest_path, &self.config.manifest) {
                Ok(manifest) => manifest,
                Err(error) => {
                    error!(
                        manifest = %manifest_path.display(),
                        error = %error,
                        "manifest_failed"
                    );
                    result.manifest_failures.push(ManifestFailure {
                        path: manifest_path.clone(),
                        message: error.to_string(),
                    });
                    observer.manifest_finished(manifest_path);
                    continue;
                }
            };

            result.sets_done += 1;
            observer.manifest_started(manifest_path, manifest.descriptors.len());
            result.skipped_lines.extend(
                manifest
                    .skipped_lines
                    .iter()
                    .map(|skipped| SkippedManifestLine::new(manifest_path, skipped)),
            );
            for descriptor in &manifest.descriptors {
                let outcome = self.run_scene(engine, descriptor, observer);
                result.record(SceneLogEntry {
                    manifest: manifest_path.clone(),
                    scene: descriptor.scene_path().to_path_buf(),
                    relative_scene: descriptor.relative_scene_path().to_string(),
                    outcome,
                });
            }
            observer.manifest_finished(manifest_path);
        }
        observer.suite_finished();

        info!(
            sets_done = result.sets_done,
            scenes_run = result.scenes_run,
            scenes_failed = result.scenes_failed,
            manifest_failures = result.manifest_failures.len(),
            "regression_suite_finished"
        );
        result
    }

    fn run_scene<E: Engine + ?Sized>(
        &self,
        engine: &mut E,
        descriptor: &TestCaseDescriptor,
        observer: &mut dyn SuiteObserver,
    ) -> SceneOutcome {
        let scene = descriptor.scene_path();
        info!(
            scene = %scene.display(),
            steps = descriptor.steps(),
            epsilon = descriptor.epsilon(),
            "scene_started"
        );
        observer.scene_started(descriptor.relative_scene_path(), descriptor.steps());

        let outcome = self
            .try_run_scene(engine, descriptor, &mut |step: u32| observer.step_finished(step))
            .unwrap_or_else(|error| {
                warn!(
                    scene = %scene.display(),
                    kind = error.kind(),
                    error = %error,
                    "scene_errored"
                );
                SceneOutcome::Errored {
                    kind: error.kind().to_string(),
                    message: error.to_string(),
                }
            });
        match &outcome {
            SceneOutcome::Failed(result) => warn!(
                scene = %scene.display(),
                measured_error = result.measured_error,
                epsilon = result.epsilon,
                "scene_compare_failed"
            ),
            SceneOutcome::Passed(result) => info!(
                scene = %scene.display(),
                tested_frames = result.tested_frames,
                "scene_compare_passed"
            ),
            SceneOutcome::Captured(_) | SceneOutcome::Errored { .. } => {}
        }
        observer.scene_finished(descriptor.relative_scene_path(), &outcome);
        outcome
    }

    fn try_run_scene<E: Engine + ?Sized>(
        &self,
        engine: &mut E,
        descriptor: &TestCaseDescriptor,
        on_step: &mut dyn FnMut(u32),
    ) -> Result<SceneOutcome, SceneError> {
        let scene_path = descriptor.scene_path();
        let root = engine
            .load_scene(scene_path)
            .map_err(|source| SceneError::SceneLoad {
                path: scene_path.to_path_buf(),
                source: Box::new(source),
            })?;
        let mut scene = LoadedScene { engine, root };
        let selected = select_state_objects(&*scene.engine, root, descriptor.include_mapped());

        match self.config.mode {
            RunMode::Capture => {
                let options = CaptureOptions {
                    format: self.config.format.unwrap_or(ReferenceFormat::JsonMap),
                    time_budget: self.config.scene_time_budget,
                };
                let outcome = sample_with_progress(
                    &mut *scene.engine,
                    root,
                    &selected,
                    descriptor,
                    &options,
                    on_step,
                )?;
                Ok(SceneOutcome::Captured(outcome))
            }
            RunMode::Compare => {
                let format = self
                    .config
                    .format
                    .unwrap_or_else(|| detect_format(descriptor, &selected));
                let mut options = CompareOptions::for_format(format);
                options.time_budget = self.config.scene_time_budget;
                if let Some(policy) = self.config.error_policy {
                    options.policy = policy;
                }
                let result = compare_with_progress(
                    &mut *scene.engine,
                    root,
                    &selected,
                    descriptor,
                    &options,
                    on_step,
                )?;
                Ok(if result.failed {
                    SceneOutcome::Failed(result)
                } else {
                    SceneOutcome::Passed(result)
                })
            }
        }
    }
}

/// Unloads the scene when dropped, whichever way the run ended.
struct LoadedScene<'e, E: Engine + ?Sized> {
    engine: &'e mut E,
    root: NodeId,
}

impl<E: Engine + ?Sized> Drop for LoadedScene<'_, E> {
    fn drop(&mut self) {
        self.engine.unload(self.root);
    }
}

/// Probes object 0's reference in each format; JSON map when none exists.
fn detect_format(descriptor: &TestCaseDescriptor, selected: &[StateObjectHandle]) -> ReferenceFormat {
    let Some(first) = selected.first() else {
        return ReferenceFormat::JsonMap;
    };
    ReferenceFormat::DETECTION_ORDER
        .into_iter()
        .find(|format| reference_exists(*format, descriptor.reference_prefix(), first))
        .unwrap_or(ReferenceFormat::JsonMap)
}

fn reference_exists(format: ReferenceFormat, prefix: &Path, handle: &StateObjectHandle) -> bool {
    format
        .reference_path(prefix, handle.index, &handle.name)
        .is_file()
}

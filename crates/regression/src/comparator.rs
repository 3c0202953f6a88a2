use std::time::Duration;

use approx::relative_eq;
use tracing::{debug, info, warn};

use crate::clock::SceneClock;
use crate::codec::{self, ReferenceFormat};
use crate::engine::{checked_timestep, step_scene, Engine, NodeId};
use crate::manifest::TestCaseDescriptor;
use crate::selector::StateObjectHandle;
use crate::types::{
    ComparisonResult, ErrorPolicy, Keyframe, KeyframeAlignment, ObjectError, SceneError,
    Trajectory,
};

const TIME_ABS_TOLERANCE: f64 = 1e-9;
const TIME_REL_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompareOptions {
    pub format: ReferenceFormat,
    pub alignment: KeyframeAlignment,
    pub policy: ErrorPolicy,
    pub time_budget: Option<Duration>,
}

impl CompareOptions {
    /// Alignment and policy the format's historical references were checked with.
    pub fn for_format(format: ReferenceFormat) -> Self {
        Self {
            format,
            alignment: format.default_alignment(),
            policy: format.default_policy(),
            time_budget: None,
        }
    }
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self::for_format(ReferenceFormat::JsonMap)
    }
}

struct LoadedReference<'a> {
    handle: &'a StateObjectHandle,
    trajectory: Trajectory,
}

/// Replays the loaded scene against the stored references of `selected`.
///
/// Exceeding epsilon is reported through [`ComparisonResult::failed`]; an
/// `Err` means the scene could not be compared at all.
pub fn compare<E: Engine + ?Sized>(
    engine: &mut E,
    root: NodeId,
    selected: &[StateObjectHandle],
    descriptor: &TestCaseDescriptor,
    options: &CompareOptions,
) -> Result<ComparisonResult, SceneError> {
    compare_with_progress(engine, root, selected, descriptor, options, &mut |_| {})
}

/// [`compare`], calling `on_step` with the number of steps taken after each step.
pub(crate) fn compare_with_progress<E: Engine + ?Sized>(
    engine: &mut E,
    root: NodeId,
    selected: &[StateObjectHandle],
    descriptor: &TestCaseDescriptor,
    options: &CompareOptions,
    on_step: &mut dyn FnMut(u32),
) -> Result<ComparisonResult, SceneError> {
    let scene = descriptor.scene_path();
    let dt = checked_timestep(engine, root, scene)?;
    let references = load_references(engine, selected, descriptor, options.format)?;

    let canonical = references
        .first()
        .map(|reference| reference.trajectory.times().collect::<Vec<_>>())
        .unwrap_or_default();
    if selected.is_empty() {
        warn!(scene = %scene.display(), "scene_has_no_state_objects");
    }
    if options.format.counts_keyframes() {
        for reference in &references {
            if reference.trajectory.len() != canonical.len() {
                return Err(SceneError::KeyframeCountMismatch {
                    index: reference.handle.index,
                    name: reference.handle.name.clone(),
                    expected: canonical.len(),
                    found: reference.trajectory.len(),
                });
            }
        }
    }

    let mut totals = vec![0.0; references.len()];
    let mut per_dof = vec![0.0; references.len()];
    let mut tested_frames = 0usize;
    let clock = SceneClock::start(options.time_budget);

    if !canonical.is_empty() {
        for step in 0..=descriptor.steps() {
            let time = dt * f64::from(step);
            let pending = canonical[tested_frames];
            if times_match(time, pending, options.alignment) {
                for (slot, reference) in references.iter().enumerate() {
                    let expected = reference_keyframe(reference, tested_frames, pending, options)?;
                    let live = reference.handle.snapshot(&*engine)?;
                    if live.shape() != expected.snapshot.shape() {
                        return Err(SceneError::ShapeMismatch {
                            index: reference.handle.index,
                            name: reference.handle.name.clone(),
                            live: live.shape(),
                            reference: expected.snapshot.shape(),
                            time: pending,
                        });
                    }
                    let distance = live.distance_to(&expected.snapshot);
                    let element_count = live.shape().element_count();
                    totals[slot] += distance;
                    if element_count > 0 {
                        per_dof[slot] += distance / element_count as f64;
                    }
                    debug!(
                        scene = %scene.display(),
                        step,
                        object = reference.handle.name.as_str(),
                        distance,
                        "keyframe_compared"
                    );
                }
                tested_frames += 1;
                if tested_frames == canonical.len() {
                    break;
                }
            }
            if step < descriptor.steps() {
                step_scene(engine, root, dt, scene, step)?;
                on_step(step + 1);
                clock.check(scene, step + 1)?;
            }
        }
    }

    if tested_frames < canonical.len() {
        warn!(
            scene = %scene.display(),
            tested_frames,
            expected_frames = canonical.len(),
            "keyframes_unmatched"
        );
    }

    let objects = references
        .iter()
        .zip(totals.iter().zip(&per_dof))
        .map(|(reference, (total, by_dof))| ObjectError {
            index: reference.handle.index,
            name: reference.handle.name.clone(),
            total_distance: *total,
            error_by_dof: *by_dof,
        })
        .collect::<Vec<_>>();
    let (measured_error, failed) = verdict(
        &objects,
        tested_frames,
        options.policy,
        descriptor.epsilon(),
    );

    info!(
        scene = %scene.display(),
        tested_frames,
        measured_error,
        epsilon = descriptor.epsilon(),
        failed,
        "scene_compared"
    );
    Ok(ComparisonResult {
        objects,
        tested_frames,
        expected_frames: canonical.len(),
        policy: options.policy,
        measured_error,
        epsilon: descriptor.epsilon(),
        failed,
    })
}

fn load_references<'a, E: Engine + ?Sized>(
    engine: &E,
    selected: &'a [StateObjectHandle],
    descriptor: &TestCaseDescriptor,
    format: ReferenceFormat,
) -> Result<Vec<LoadedReference<'a>>, SceneError> {
    let mut references = Vec::with_capacity(selected.len());
    for handle in selected {
        let path = format.reference_path(descriptor.reference_prefix(), handle.index, &handle.name);
        if !path.is_file() {
            return Err(SceneError::MissingReferenceFile { path });
        }
        let live_shape = engine.positions(handle.state).shape();
        let decoded = codec::read_reference(format, &path, live_shape).map_err(|source| {
            SceneError::ReadReference {
                path: path.clone(),
                source,
            }
        })?;
        if let Some(stored) = decoded.object_key {
            if stored != handle.key {
                return Err(SceneError::ReferenceKeyMismatch {
                    path,
                    stored,
                    live: handle.key.clone(),
                });
            }
        }
        references.push(LoadedReference {
            handle,
            trajectory: decoded.trajectory,
        });
    }
    Ok(references)
}

fn reference_keyframe<'r>(
    reference: &'r LoadedReference<'_>,
    frame: usize,
    time: f64,
    options: &CompareOptions,
) -> Result<&'r Keyframe, SceneError> {
    let keyframe = match options.alignment {
        KeyframeAlignment::Exact => reference.trajectory.at_exact_time(time),
        KeyframeAlignment::Tolerant => reference.trajectory.get(frame),
    };
    keyframe.ok_or_else(|| SceneError::MissingKeyframe {
        index: reference.handle.index,
        name: reference.handle.name.clone(),
        time,
    })
}

fn times_match(simulated: f64, keyframe: f64, alignment: KeyframeAlignment) -> bool {
    match alignment {
        KeyframeAlignment::Exact => simulated == keyframe,
        KeyframeAlignment::Tolerant => relative_eq!(
            simulated,
            keyframe,
            epsilon = TIME_ABS_TOLERANCE,
            max_relative = TIME_REL_TOLERANCE
        ),
    }
}

/// Returns the figure the policy compares with epsilon, and whether it fails.
/// A NaN figure fails.
fn verdict(
    objects: &[ObjectError],
    tested_frames: usize,
    policy: ErrorPolicy,
    epsilon: f64,
) -> (f64, bool) {
    match policy {
        ErrorPolicy::TotalDistance => {
            let failed = objects
                .iter()
                .any(|object| !(object.total_distance <= epsilon));
            let worst = objects
                .iter()
                .map(|object| object.total_distance)
                .fold(0.0, f64::max);
            (worst, failed)
        }
        ErrorPolicy::MeanErrorPerDof => {
            let samples = objects.len() * tested_frames;
            if samples == 0 {
                return (0.0, false);
            }
            let mean = objects.iter().map(|object| object.error_by_dof).sum::<f64>()
                / samples as f64;
            (mean, !(mean <= epsilon))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use approx::assert_relative_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::manifest::{parse_manifest, ManifestOptions};
    use crate::sampler::{sample, CaptureOptions};
    use crate::selector::select_state_objects;
    use crate::test_support::{FakeEngine, FakeScene};
    use crate::types::{Shape, Snapshot};

    fn descriptor(dir: &Path, steps: u32, epsilon: f64, stride: u32) -> TestCaseDescriptor {
        fs::create_dir_all(dir.join("refs")).expect("mkdir refs");
        let manifest = dir.join("suite.regression-tests");
        fs::write(
            &manifest,
            format!("refs\nbody.scn {steps} {epsilon:e} 0 {stride}\n"),
        )
        .expect("write manifest");
        parse_manifest(&manifest, &ManifestOptions::default())
            .expect("parse")
            .descriptors
            .remove(0)
    }

    fn capture(scene: FakeScene, descriptor: &TestCaseDescriptor, format: ReferenceFormat) {
        let mut engine = FakeEngine::new();
        let root = engine.load(scene);
        let selected = select_state_objects(&engine, root, false);
        let options = CaptureOptions {
            format,
            time_budget: None,
        };
        sample(&mut engine, root, &selected, descriptor, &options).expect("capture");
    }

    fn run_compare(
        scene: FakeScene,
        descriptor: &TestCaseDescriptor,
        options: &CompareOptions,
    ) -> Result<ComparisonResult, SceneError> {
        let mut engine = FakeEngine::new();
        let root = engine.load(scene);
        let selected = select_state_objects(&engine, root, false);
        compare(&mut engine, root, &selected, descriptor, options)
    }

    /// Writes a single-keyframe reference at t=0 holding `values`.
    fn write_single_frame(descriptor: &TestCaseDescriptor, shape: Shape, values: Vec<f64>) {
        let mut trajectory = Trajectory::new();
        trajectory
            .push(0.0, Snapshot::new(shape, values).expect("snapshot"))
            .expect("push");
        let format = ReferenceFormat::JsonMap;
        let path = format.reference_path(descriptor.reference_prefix(), 0, "dofs");
        let bytes = codec::encode(format, &trajectory, "").expect("encode");
        fs::write(path, bytes).expect("write reference");
    }

    #[test]
    fn unchanged_engine_matches_every_keyframe() {
        let temp = TempDir::new().expect("tempdir");
        let descriptor = descriptor(temp.path(), 100, 0.0, 10);
        for format in ReferenceFormat::DETECTION_ORDER {
            capture(FakeScene::single_body(4, 3), &descriptor, format);

            let result = run_compare(
                FakeScene::single_body(4, 3),
                &descriptor,
                &CompareOptions::for_format(format),
            )
            .expect("compare");

            assert_eq!(result.tested_frames, 11, "{format:?}");
            assert_eq!(result.expected_frames, 11);
            assert!(!result.failed);
            assert_eq!(result.objects[0].total_distance, 0.0);
        }
    }

    /// Rewrites a captured reference so its times are accumulated `t += dt`
    /// instead of `dt * step`, as engines that advance their own clock store them.
    fn accumulate_times(descriptor: &TestCaseDescriptor, format: ReferenceFormat, shape: Shape) {
        let path = format.reference_path(descriptor.reference_prefix(), 0, "dofs");
        let captured = codec::read_reference(format, &path, shape).expect("read capture");
        let mut retimed = Trajectory::new();
        let mut time = 0.0;
        for keyframe in captured.trajectory.keyframes() {
            retimed.push(time, keyframe.snapshot.clone()).expect("push");
            time += 0.01;
        }
        let bytes = codec::encode(format, &retimed, "root/body/dofs").expect("encode");
        fs::write(path, bytes).expect("rewrite reference");
    }

    #[test]
    fn tolerant_alignment_absorbs_accumulated_time_error() {
        let temp = TempDir::new().expect("tempdir");
        let descriptor = descriptor(temp.path(), 10, 0.0, 10);
        let shape = Shape::new(4, 3);
        for format in [ReferenceFormat::Csv, ReferenceFormat::Legacy] {
            capture(FakeScene::single_body(4, 3), &descriptor, format);
            accumulate_times(&descriptor, format, shape);

            let result = run_compare(
                FakeScene::single_body(4, 3),
                &descriptor,
                &CompareOptions::for_format(format),
            )
            .expect("compare");

            assert_eq!(result.tested_frames, 11, "{format:?}");
            assert_eq!(result.expected_frames, 11);
            assert!(!result.failed);
        }
    }

    #[test]
    fn exact_alignment_skips_accumulated_times() {
        let temp = TempDir::new().expect("tempdir");
        let descriptor = descriptor(temp.path(), 10, 0.0, 10);
        capture(FakeScene::single_body(4, 3), &descriptor, ReferenceFormat::JsonMap);
        accumulate_times(&descriptor, ReferenceFormat::JsonMap, Shape::new(4, 3));

        let result = run_compare(
            FakeScene::single_body(4, 3),
            &descriptor,
            &CompareOptions::default(),
        )
        .expect("compare");

        // 0.01 added six times is 0.060000000000000005, never equal to 0.01 * 6.
        assert_eq!(result.expected_frames, 11);
        assert_eq!(result.tested_frames, 6);
        assert!(!result.failed);
    }

    #[test]
    fn offset_fails_only_above_epsilon() {
        let temp = TempDir::new().expect("tempdir");
        let shape = Shape::new(2, 3);
        let live = FakeScene::single_body(2, 3);
        // Live values at t=0 are 0.0, 0.5, 1.0, 1.5, 2.0, 2.5.
        let mut shifted = (0..6).map(|i| i as f64 * 0.5).collect::<Vec<_>>();
        shifted[0] += 3.0;
        shifted[1] += 4.0;

        for (epsilon, should_fail) in [(5.0, false), (4.999, true), (10.0, false)] {
            let descriptor = descriptor(temp.path(), 5, epsilon, 1);
            write_single_frame(&descriptor, shape, shifted.clone());

            let result = run_compare(live.clone(), &descriptor, &CompareOptions::default())
                .expect("compare");

            assert_relative_eq!(result.measured_error, 5.0);
            assert_eq!(result.failed, should_fail, "epsilon {epsilon}");
            assert_eq!(result.tested_frames, 1);
        }
    }

    #[test]
    fn zero_distance_passes_with_zero_epsilon() {
        let temp = TempDir::new().expect("tempdir");
        let descriptor = descriptor(temp.path(), 3, 0.0, 1);
        let values = (0..3).map(|i| i as f64 * 0.5).collect();
        write_single_frame(&descriptor, Shape::new(1, 3), values);

        let result = run_compare(
            FakeScene::single_body(1, 3),
            &descriptor,
            &CompareOptions::default(),
        )
        .expect("compare");

        assert!(!result.failed);
    }

    #[test]
    fn shape_mismatch_is_a_hard_failure() {
        let temp = TempDir::new().expect("tempdir");
        let descriptor = descriptor(temp.path(), 10, 1e-3, 5);
        capture(FakeScene::single_body(50, 7), &descriptor, ReferenceFormat::JsonMap);

        let error = run_compare(
            FakeScene::single_body(50, 3),
            &descriptor,
            &CompareOptions::default(),
        )
        .expect_err("shape");

        let SceneError::ShapeMismatch {
            live, reference, ..
        } = error
        else {
            panic!("expected shape mismatch, got {error}");
        };
        assert_eq!(live, Shape::new(50, 3));
        assert_eq!(reference, Shape::new(50, 7));
    }

    #[test]
    fn missing_reference_file_is_reported() {
        let temp = TempDir::new().expect("tempdir");
        let descriptor = descriptor(temp.path(), 10, 1e-3, 5);

        let error = run_compare(
            FakeScene::single_body(2, 3),
            &descriptor,
            &CompareOptions::default(),
        )
        .expect_err("missing");

        assert!(matches!(error, SceneError::MissingReferenceFile { .. }));
    }

    #[test]
    fn csv_objects_must_agree_on_keyframe_count() {
        let temp = TempDir::new().expect("tempdir");
        let descriptor = descriptor(temp.path(), 10, 1e-3, 2);
        let two_bodies = || {
            let mut scene = FakeScene::single_body(2, 3);
            let root = scene.root();
            let second = scene.add_child(root, "second");
            scene.set_solver(second);
            scene.add_state(second, "other", 2, 3);
            scene
        };
        capture(two_bodies(), &descriptor, ReferenceFormat::Csv);

        let format = ReferenceFormat::Csv;
        let path = format.reference_path(descriptor.reference_prefix(), 1, "other");
        let mut short = Trajectory::new();
        short
            .push(0.0, Snapshot::new(Shape::new(2, 3), vec![0.0; 6]).expect("snapshot"))
            .expect("push");
        let bytes = codec::encode(format, &short, "root/second/other").expect("encode");
        fs::write(path, bytes).expect("overwrite");

        let error = run_compare(two_bodies(), &descriptor, &CompareOptions::for_format(format))
            .expect_err("count");

        assert!(matches!(
            error,
            SceneError::KeyframeCountMismatch {
                index: 1,
                expected: 3,
                found: 1,
                ..
            }
        ));
    }

    #[test]
    fn csv_key_must_match_live_object() {
        let temp = TempDir::new().expect("tempdir");
        let descriptor = descriptor(temp.path(), 4, 1e-3, 2);
        let format = ReferenceFormat::Csv;
        let mut trajectory = Trajectory::new();
        trajectory
            .push(0.0, Snapshot::new(Shape::new(1, 3), vec![0.0, 0.5, 1.0]).expect("snapshot"))
            .expect("push");
        let path = format.reference_path(descriptor.reference_prefix(), 0, "dofs");
        let bytes = codec::encode(format, &trajectory, "root/elsewhere/dofs").expect("encode");
        fs::write(path, bytes).expect("write");

        let error = run_compare(
            FakeScene::single_body(1, 3),
            &descriptor,
            &CompareOptions::for_format(format),
        )
        .expect_err("key");

        assert!(matches!(error, SceneError::ReferenceKeyMismatch { .. }));
    }

    #[test]
    fn mean_policy_averages_over_objects_and_frames() {
        let temp = TempDir::new().expect("tempdir");
        let descriptor = descriptor(temp.path(), 10, 0.05, 2);
        capture(FakeScene::single_body(1, 3), &descriptor, ReferenceFormat::Legacy);

        let mut drifting = FakeScene::single_body(1, 3);
        drifting.set_drift(crate::StateObjectId(0), 0.2);
        let result = run_compare(
            drifting,
            &descriptor,
            &CompareOptions::for_format(ReferenceFormat::Legacy),
        )
        .expect("compare");

        // Drift differs by 0.1 per step per dof; frames at steps 0, 5 and 10.
        let per_frame = [0.0, 0.5, 1.0].map(|offset: f64| (3.0 * offset * offset).sqrt() / 3.0);
        let expected = per_frame.iter().sum::<f64>() / 3.0;
        assert_eq!(result.policy, ErrorPolicy::MeanErrorPerDof);
        assert_relative_eq!(result.measured_error, expected, epsilon = 1e-12);
        assert!(result.failed);
    }

    #[test]
    fn scene_without_objects_passes_with_no_frames() {
        let temp = TempDir::new().expect("tempdir");
        let descriptor = descriptor(temp.path(), 10, 0.0, 5);

        let result = run_compare(
            FakeScene::new("root"),
            &descriptor,
            &CompareOptions::default(),
        )
        .expect("compare");

        assert_eq!(result.tested_frames, 0);
        assert!(!result.failed);
    }

    #[test]
    fn nan_distance_fails() {
        let objects = [ObjectError {
            index: 0,
            name: "dofs".to_string(),
            total_distance: f64::NAN,
            error_by_dof: f64::NAN,
        }];
        assert!(verdict(&objects, 1, ErrorPolicy::TotalDistance, 1.0).1);
        assert!(verdict(&objects, 1, ErrorPolicy::MeanErrorPerDof, 1.0).1);
    }
}

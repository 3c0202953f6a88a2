use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::atomic_io::write_atomic;
use crate::clock::SceneClock;
use crate::codec::{self, CodecError, ReferenceFormat};
use crate::engine::{checked_timestep, step_scene, Engine, NodeId};
use crate::manifest::TestCaseDescriptor;
use crate::selector::StateObjectHandle;
use crate::types::{SceneError, Trajectory};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureOptions {
    pub format: ReferenceFormat,
    pub time_budget: Option<Duration>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            format: ReferenceFormat::JsonMap,
            time_budget: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrittenReference {
    pub path: PathBuf,
    pub sha256_hex: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureOutcome {
    pub files: Vec<WrittenReference>,
    pub keyframes: usize,
}

/// Steps at which a capture happens: the first, the last, and every step
/// where at least `steps / stride` steps passed since the previous capture.
pub fn capture_schedule(steps: u32, stride: u32) -> Vec<u32> {
    let spacing = f64::from(steps) / f64::from(stride.max(1));
    let mut schedule = Vec::new();
    let mut since_capture = 0u32;
    for step in 0..=steps {
        if step == 0 || step == steps || f64::from(since_capture) >= spacing {
            schedule.push(step);
            since_capture = 0;
        }
        since_capture += 1;
    }
    schedule
}

/// Runs the loaded scene and writes one reference file per selected object.
///
/// The caller owns the scene and unloads it afterwards.
pub fn sample<E: Engine + ?Sized>(
    engine: &mut E,
    root: NodeId,
    selected: &[StateObjectHandle],
    descriptor: &TestCaseDescriptor,
    options: &CaptureOptions,
) -> Result<CaptureOutcome, SceneError> {
    sample_with_progress(engine, root, selected, descriptor, options, &mut |_| {})
}

/// [`sample`], calling `on_step` with the number of steps taken after each step.
pub(crate) fn sample_with_progress<E: Engine + ?Sized>(
    engine: &mut E,
    root: NodeId,
    selected: &[StateObjectHandle],
    descriptor: &TestCaseDescriptor,
    options: &CaptureOptions,
    on_step: &mut dyn FnMut(u32),
) -> Result<CaptureOutcome, SceneError> {
    let scene = descriptor.scene_path();
    let dt = checked_timestep(engine, root, scene)?;
    let schedule = capture_schedule(descriptor.steps(), descriptor.sample_stride());
    let clock = SceneClock::start(options.time_budget);
    let mut trajectories = vec![Trajectory::new(); selected.len()];
    let mut pending = schedule.iter().copied().peekable();

    for step in 0..=descriptor.steps() {
        if pending.next_if_eq(&step).is_some() {
            let time = dt * f64::from(step);
            for (handle, trajectory) in selected.iter().zip(&mut trajectories) {
                let snapshot = handle.snapshot(&*engine)?;
                trajectory
                    .push(time, snapshot)
                    .map_err(|source| SceneError::Capture {
                        index: handle.index,
                        name: handle.name.clone(),
                        source,
                    })?;
            }
            debug!(scene = %scene.display(), step, time, "keyframe_captured");
        }
        if step < descriptor.steps() {
            step_scene(engine, root, dt, scene, step)?;
            on_step(step + 1);
            clock.check(scene, step + 1)?;
        }
    }

    let mut files = Vec::with_capacity(selected.len());
    for (handle, trajectory) in selected.iter().zip(&trajectories) {
        let path = options
            .format
            .reference_path(descriptor.reference_prefix(), handle.index, &handle.name);
        let bytes = codec::encode(options.format, trajectory, &handle.key).map_err(|source| {
            SceneError::WriteReference {
                path: path.clone(),
                source,
            }
        })?;
        write_atomic(&path, &bytes).map_err(|source| SceneError::WriteReference {
            path: path.clone(),
            source: CodecError::Io(source),
        })?;
        files.push(WrittenReference {
            sha256_hex: sha256_hex(&bytes),
            path,
        });
    }

    info!(
        scene = %scene.display(),
        format = options.format.label(),
        objects = selected.len(),
        keyframes = schedule.len(),
        "references_written"
    );
    Ok(CaptureOutcome {
        files,
        keyframes: schedule.len(),
    })
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    to_hex_lower(&hasher.finalize())
}

fn to_hex_lower(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        use std::fmt::Write as _;
        let _ = write!(&mut output, "{byte:02x}");
    }
    output
}

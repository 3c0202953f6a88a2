use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::codec::CodecError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Shape {
    pub num_points: usize,
    pub dof_per_point: usize,
}

impl Shape {
    pub fn new(num_points: usize, dof_per_point: usize) -> Self {
        Self {
            num_points,
            dof_per_point,
        }
    }

    pub fn element_count(&self) -> usize {
        self.num_points * self.dof_per_point
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.num_points, self.dof_per_point)
    }
}

/// Deep copy of one state object's positions, row-major `points x dof`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    shape: Shape,
    values: Vec<f64>,
}

impl Snapshot {
    pub fn new(shape: Shape, values: Vec<f64>) -> Result<Self, TrajectoryError> {
        if shape.element_count() != values.len() {
            return Err(TrajectoryError::ElementCount {
                shape,
                found: values.len(),
            });
        }
        Ok(Self { shape, values })
    }

    /// Builds a snapshot from nested `[points][dof]` rows.
    ///
    /// `empty_dof` is used for the dof count when there are no rows at all.
    pub fn from_rows(rows: Vec<Vec<f64>>, empty_dof: usize) -> Result<Self, TrajectoryError> {
        let dof_per_point = rows.first().map_or(empty_dof, Vec::len);
        let num_points = rows.len();
        let mut values = Vec::with_capacity(num_points * dof_per_point);
        for (point, row) in rows.into_iter().enumerate() {
            if row.len() != dof_per_point {
                return Err(TrajectoryError::RaggedRow {
                    point,
                    expected: dof_per_point,
                    found: row.len(),
                });
            }
            values.extend(row);
        }
        Ok(Self {
            shape: Shape::new(num_points, dof_per_point),
            values,
        })
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.values.chunks(self.shape.dof_per_point.max(1))
    }

    /// Euclidean norm of `other - self`. Shapes must already match.
    pub fn distance_to(&self, other: &Snapshot) -> f64 {
        self.values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| (b - a) * (b - a))
            .sum::<f64>()
            .sqrt()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Keyframe {
    pub time: f64,
    pub snapshot: Snapshot,
}

/// Time-ordered keyframes of one state object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trajectory {
    keyframes: Vec<Keyframe>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, time: f64, snapshot: Snapshot) -> Result<(), TrajectoryError> {
        if !time.is_finite() {
            return Err(TrajectoryError::NonFiniteTime { time });
        }
        if let Some(previous) = self.keyframes.last() {
            if time <= previous.time {
                return Err(TrajectoryError::NonIncreasingTime {
                    previous: previous.time,
                    time,
                });
            }
        }
        self.keyframes.push(Keyframe { time, snapshot });
        Ok(())
    }

    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keyframes
    }

    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    pub fn times(&self) -> impl Iterator<Item = f64> + '_ {
        self.keyframes.iter().map(|keyframe| keyframe.time)
    }

    pub fn get(&self, index: usize) -> Option<&Keyframe> {
        self.keyframes.get(index)
    }

    /// Keyframe whose timestamp is bit-for-bit equal to `time`.
    pub fn at_exact_time(&self, time: f64) -> Option<&Keyframe> {
        let index = self.keyframes.partition_point(|keyframe| keyframe.time < time);
        self.keyframes
            .get(index)
            .filter(|keyframe| keyframe.time == time)
    }

    /// Shape shared by every keyframe, `None` when empty or inconsistent.
    pub fn uniform_shape(&self) -> Option<Shape> {
        let first = self.keyframes.first()?.snapshot.shape();
        self.keyframes
            .iter()
            .all(|keyframe| keyframe.snapshot.shape() == first)
            .then_some(first)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrajectoryError {
    #[error("snapshot of shape {shape} needs {} values, found {found}", .shape.element_count())]
    ElementCount { shape: Shape, found: usize },
    #[error("point {point} has {found} components, expected {expected}")]
    RaggedRow {
        point: usize,
        expected: usize,
        found: usize,
    },
    #[error("keyframe time {time} does not follow {previous}")]
    NonIncreasingTime { previous: f64, time: f64 },
    #[error("keyframe time {time} is not finite")]
    NonFiniteTime { time: f64 },
}

/// How accumulated error is turned into a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Fail when any object's distance, summed over matched keyframes, exceeds epsilon.
    TotalDistance,
    /// Fail when the error per dof, averaged over objects and keyframes, exceeds epsilon.
    MeanErrorPerDof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyframeAlignment {
    Exact,
    Tolerant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectError {
    pub index: usize,
    pub name: String,
    pub total_distance: f64,
    pub error_by_dof: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    pub objects: Vec<ObjectError>,
    pub tested_frames: usize,
    pub expected_frames: usize,
    pub policy: ErrorPolicy,
    pub measured_error: f64,
    pub epsilon: f64,
    pub failed: bool,
}

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("engine could not load scene {path}: {source}")]
    SceneLoad {
        path: PathBuf,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("engine failed at step {step} of scene {path}: {source}")]
    Step {
        path: PathBuf,
        step: u32,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("scene {path} reports an unusable timestep {dt}")]
    InvalidTimestep { path: PathBuf, dt: f64 },
    #[error("reference file missing: {path}")]
    MissingReferenceFile { path: PathBuf },
    #[error(
        "state object {index} ({name}) has shape {live} but the reference has {reference} at t={time}"
    )]
    ShapeMismatch {
        index: usize,
        name: String,
        live: Shape,
        reference: Shape,
        time: f64,
    },
    #[error("state object {index} ({name}) has {found} keyframes, expected {expected}")]
    KeyframeCountMismatch {
        index: usize,
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("state object {index} ({name}) has no keyframe at t={time}")]
    MissingKeyframe {
        index: usize,
        name: String,
        time: f64,
    },
    #[error("reference {path} was captured for '{stored}' but the live object is '{live}'")]
    ReferenceKeyMismatch {
        path: PathBuf,
        stored: String,
        live: String,
    },
    #[error("failed to read reference {path}: {source}")]
    ReadReference {
        path: PathBuf,
        #[source]
        source: CodecError,
    },
    #[error("state object {index} ({name}) exposes malformed positions: {source}")]
    InvalidPositions {
        index: usize,
        name: String,
        #[source]
        source: TrajectoryError,
    },
    #[error("failed to capture state object {index} ({name}): {source}")]
    Capture {
        index: usize,
        name: String,
        #[source]
        source: TrajectoryError,
    },
    #[error("failed to write reference {path}: {source}")]
    WriteReference {
        path: PathBuf,
        #[source]
        source: CodecError,
    },
    #[error("scene {path} exceeded its time budget of {budget:?} after {steps} steps")]
    TimeBudgetExceeded {
        path: PathBuf,
        budget: Duration,
        steps: u32,
    },
}

impl SceneError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SceneLoad { .. } => "scene_load",
            Self::Step { .. } => "step",
            Self::InvalidTimestep { .. } => "invalid_timestep",
            Self::MissingReferenceFile { .. } => "missing_reference_file",
            Self::ShapeMismatch { .. } => "shape_mismatch",
            Self::KeyframeCountMismatch { .. } => "keyframe_count_mismatch",
            Self::MissingKeyframe { .. } => "missing_keyframe",
            Self::ReferenceKeyMismatch { .. } => "reference_key_mismatch",
            Self::ReadReference { .. } => "read_reference",
            Self::InvalidPositions { .. } => "invalid_positions",
            Self::Capture { .. } => "capture",
            Self::WriteReference { .. } => "write_reference",
            Self::TimeBudgetExceeded { .. } => "time_budget_exceeded",
        }
    }
}

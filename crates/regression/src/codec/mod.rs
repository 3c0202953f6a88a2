//! On-disk reference formats.
//!
//! Every format is a gzip stream holding one state object's trajectory.
//! Floats are written with Rust's shortest round-trip formatting, so decoding
//! an encoded trajectory gives back the exact same values.

mod csv;
mod json_map;
mod legacy;

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use thiserror::Error;

use crate::types::{ErrorPolicy, KeyframeAlignment, Shape, Trajectory, TrajectoryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceFormat {
    JsonMap,
    Csv,
    Legacy,
}

impl ReferenceFormat {
    /// Probe order used when a comparison has to detect the format on disk.
    pub const DETECTION_ORDER: [ReferenceFormat; 3] = [Self::JsonMap, Self::Csv, Self::Legacy];

    pub fn label(self) -> &'static str {
        match self {
            Self::JsonMap => "json",
            Self::Csv => "csv",
            Self::Legacy => "legacy",
        }
    }

    pub fn reference_path(self, prefix: &Path, index: usize, object_name: &str) -> PathBuf {
        let suffix = match self {
            Self::JsonMap => format!(".reference_mstate_{index}_{object_name}.json.gz"),
            Self::Csv => format!(".reference_mstate_{index}_{object_name}.csv.gz"),
            Self::Legacy => format!(".reference_{index}_{object_name}_mstate.txt.gz"),
        };
        let mut raw = prefix.as_os_str().to_os_string();
        raw.push(suffix);
        PathBuf::from(raw)
    }

    /// JSON references were captured at `dt * step` and are matched bit for
    /// bit; the text formats carry accumulated engine time and need slack.
    pub fn default_alignment(self) -> KeyframeAlignment {
        match self {
            Self::JsonMap => KeyframeAlignment::Exact,
            Self::Csv | Self::Legacy => KeyframeAlignment::Tolerant,
        }
    }

    pub fn default_policy(self) -> ErrorPolicy {
        match self {
            Self::JsonMap | Self::Csv => ErrorPolicy::TotalDistance,
            Self::Legacy => ErrorPolicy::MeanErrorPerDof,
        }
    }

    /// Whether the format states how many keyframes every object holds.
    pub fn counts_keyframes(self) -> bool {
        !matches!(self, Self::JsonMap)
    }
}

impl std::str::FromStr for ReferenceFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" | "json-map" | "json_map" => Ok(Self::JsonMap),
            "csv" => Ok(Self::Csv),
            "legacy" | "txt" => Ok(Self::Legacy),
            other => Err(format!(
                "unknown reference format '{other}' (expected json, csv or legacy)"
            )),
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed JSON at '{path}': {message}")]
    Json { path: String, message: String },
    #[error("line {line}: {message}")]
    Format { line: usize, message: String },
    #[error("missing '{key}' metadata")]
    MissingMetadata { key: &'static str },
    #[error("keyframe {keyframe}: {source}")]
    Keyframe {
        keyframe: usize,
        #[source]
        source: TrajectoryError,
    },
    #[error("keyframe at t={time} has shape {found}, expected {expected}")]
    InconsistentShape {
        time: f64,
        expected: Shape,
        found: Shape,
    },
    #[error("non-finite value {value} at t={time}")]
    NonFiniteValue { time: f64, value: f64 },
}

/// A decoded reference file.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedReference {
    pub trajectory: Trajectory,
    /// Stable object key recorded by formats that carry metadata.
    pub object_key: Option<String>,
}

/// Encodes and compresses a trajectory.
///
/// `object_key` is persisted by formats with a metadata header.
pub fn encode(
    format: ReferenceFormat,
    trajectory: &Trajectory,
    object_key: &str,
) -> Result<Vec<u8>, CodecError> {
    check_finite(trajectory)?;
    let text = match format {
        ReferenceFormat::JsonMap => json_map::encode(trajectory)?,
        ReferenceFormat::Csv => csv::encode(trajectory, object_key)?,
        ReferenceFormat::Legacy => legacy::encode(trajectory),
    };
    gzip(text.as_bytes())
}

/// Decompresses and decodes a reference.
///
/// `live_shape` is the shape of the live state object. The legacy format
/// needs it to reshape its flat values; the others use it only for empty
/// snapshots.
pub fn decode(
    format: ReferenceFormat,
    bytes: &[u8],
    live_shape: Shape,
) -> Result<DecodedReference, CodecError> {
    let text = gunzip(bytes)?;
    match format {
        ReferenceFormat::JsonMap => json_map::decode(&text, live_shape),
        ReferenceFormat::Csv => csv::decode(&text),
        ReferenceFormat::Legacy => legacy::decode(&text, live_shape),
    }
}

pub fn read_reference(
    format: ReferenceFormat,
    path: &Path,
    live_shape: Shape,
) -> Result<DecodedReference, CodecError> {
    let bytes = fs::read(path)?;
    decode(format, &bytes, live_shape)
}

pub(crate) fn format_float(value: f64) -> String {
    format!("{value:?}")
}

pub(crate) fn parse_float(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok()
}

fn check_finite(trajectory: &Trajectory) -> Result<(), CodecError> {
    for keyframe in trajectory.keyframes() {
        if let Some(value) = keyframe
            .snapshot
            .values()
            .iter()
            .copied()
            .find(|value| !value.is_finite())
        {
            return Err(CodecError::NonFiniteValue {
                time: keyframe.time,
                value,
            });
        }
    }
    Ok(())
}

fn uniform_shape(trajectory: &Trajectory) -> Result<Shape, CodecError> {
    let Some(first) = trajectory.keyframes().first() else {
        return Ok(Shape::default());
    };
    let expected = first.snapshot.shape();
    for keyframe in trajectory.keyframes() {
        let found = keyframe.snapshot.shape();
        if found != expected {
            return Err(CodecError::InconsistentShape {
                time: keyframe.time,
                expected,
                found,
            });
        }
    }
    Ok(expected)
}

fn gzip(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

fn gunzip(bytes: &[u8]) -> Result<String, CodecError> {
    let mut text = String::new();
    GzDecoder::new(bytes).read_to_string(&mut text)?;
    Ok(text)
}

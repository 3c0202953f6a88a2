use std::collections::HashMap;
use std::fmt::Write as _;

use super::{format_float, parse_float, uniform_shape, CodecError, DecodedReference};
use crate::types::{Shape, Snapshot, Trajectory};

pub(super) const FORMAT_VERSION: u32 = 1;

pub(super) fn layout_description(dof_per_point: usize) -> &'static str {
    match dof_per_point {
        2 => "time,X0,Y0,...,Xn,Yn",
        3 => "time,X0,Y0,Z0,...,Xn,Yn,Zn",
        7 => "time,X0,Y0,Z0,Qx0,Qy0,Qz0,Qw0,...,Xn,Yn,Zn,Qxn,Qyn,Qzn,Qwn",
        _ => "unknown",
    }
}

pub(super) fn encode(trajectory: &Trajectory, object_key: &str) -> Result<String, CodecError> {
    let shape = uniform_shape(trajectory)?;
    let mut out = String::new();
    let _ = writeln!(out, "# format_version={FORMAT_VERSION}");
    let _ = writeln!(out, "# dof_per_point={}", shape.dof_per_point);
    let _ = writeln!(out, "# num_points={}", shape.num_points);
    let _ = writeln!(out, "# layout={}", layout_description(shape.dof_per_point));
    if !object_key.is_empty() {
        let _ = writeln!(out, "# object_key={object_key}");
    }

    for keyframe in trajectory.keyframes() {
        out.push_str(&format_float(keyframe.time));
        for value in keyframe.snapshot.values() {
            out.push(',');
            out.push_str(&format_float(*value));
        }
        out.push('\n');
    }
    Ok(out)
}

pub(super) fn decode(text: &str) -> Result<DecodedReference, CodecError> {
    let mut meta = HashMap::<String, String>::new();
    let mut rows = Vec::<(usize, &str)>::new();

    for (index, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            if let Some((key, value)) = comment.split_once('=') {
                meta.insert(key.trim().to_string(), value.trim().to_string());
            }
            continue;
        }
        rows.push((index + 1, line));
    }

    let dof_per_point = meta_count(&meta, "dof_per_point")?;
    let num_points = meta_count(&meta, "num_points")?;
    let shape = Shape::new(num_points, dof_per_point);
    let width = 1 + shape.element_count();

    let mut trajectory = Trajectory::new();
    for (keyframe, (line, row)) in rows.into_iter().enumerate() {
        let fields = row.split(',').collect::<Vec<_>>();
        if fields.len() != width {
            return Err(CodecError::Format {
                line,
                message: format!(
                    "expected {width} columns for {shape} points, found {}",
                    fields.len()
                ),
            });
        }
        let mut numbers = Vec::with_capacity(width);
        for (column, field) in fields.iter().enumerate() {
            let value = parse_float(field).ok_or_else(|| CodecError::Format {
                line,
                message: format!("column {column} is not a number: '{}'", field.trim()),
            })?;
            numbers.push(value);
        }
        let time = numbers.remove(0);
        let snapshot = Snapshot::new(shape, numbers)
            .map_err(|source| CodecError::Keyframe { keyframe, source })?;
        trajectory
            .push(time, snapshot)
            .map_err(|source| CodecError::Keyframe { keyframe, source })?;
    }

    Ok(DecodedReference {
        trajectory,
        object_key: meta.remove("object_key").filter(|key| !key.is_empty()),
    })
}

fn meta_count(meta: &HashMap<String, String>, key: &'static str) -> Result<usize, CodecError> {
    let raw = meta.get(key).ok_or(CodecError::MissingMetadata { key })?;
    raw.parse::<usize>().map_err(|_| CodecError::Format {
        line: 0,
        message: format!("metadata '{key}' is not a count: '{raw}'"),
    })
}

use super::{format_float, parse_float, CodecError, DecodedReference};
use crate::types::{Shape, Snapshot, Trajectory};

pub(super) fn encode(trajectory: &Trajectory) -> String {
    let mut out = String::new();
    for keyframe in trajectory.keyframes() {
        out.push_str("T= ");
        out.push_str(&format_float(keyframe.time));
        out.push_str("\n  X= ");
        let values = keyframe
            .snapshot
            .values()
            .iter()
            .map(|value| format_float(*value))
            .collect::<Vec<_>>();
        out.push_str(&values.join(" "));
        out.push('\n');
    }
    out
}

/// Reads `T=`/`X=` pairs. The file does not describe its shape, so the flat
/// values are reshaped with the live object's shape and must fill it exactly.
pub(super) fn decode(text: &str, live_shape: Shape) -> Result<DecodedReference, CodecError> {
    let mut trajectory = Trajectory::new();
    let mut pending_time: Option<(usize, f64)> = None;

    for (index, raw_line) in text.lines().enumerate() {
        let line_number = index + 1;
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("T=") {
            if let Some((time_line, _)) = pending_time {
                return Err(CodecError::Format {
                    line: line_number,
                    message: format!("time on line {time_line} has no X= line"),
                });
            }
            let time = parse_float(rest).ok_or_else(|| CodecError::Format {
                line: line_number,
                message: format!("invalid time '{}'", rest.trim()),
            })?;
            pending_time = Some((line_number, time));
        } else if let Some(rest) = line.strip_prefix("X=") {
            let Some((_, time)) = pending_time.take() else {
                return Err(CodecError::Format {
                    line: line_number,
                    message: "X= line without a preceding T= line".to_string(),
                });
            };
            let values = parse_values(rest, line_number)?;
            if values.len() != live_shape.element_count() {
                return Err(CodecError::Format {
                    line: line_number,
                    message: format!(
                        "found {} values, live state object {} needs {}",
                        values.len(),
                        live_shape,
                        live_shape.element_count()
                    ),
                });
            }
            let keyframe = trajectory.len();
            let snapshot = Snapshot::new(live_shape, values)
                .map_err(|source| CodecError::Keyframe { keyframe, source })?;
            trajectory
                .push(time, snapshot)
                .map_err(|source| CodecError::Keyframe { keyframe, source })?;
        } else if line.starts_with("V=") {
            continue;
        } else {
            return Err(CodecError::Format {
                line: line_number,
                message: format!("unrecognised line '{line}'"),
            });
        }
    }

    if let Some((time_line, _)) = pending_time {
        return Err(CodecError::Format {
            line: time_line,
            message: "time has no X= line".to_string(),
        });
    }

    Ok(DecodedReference {
        trajectory,
        object_key: None,
    })
}

fn parse_values(raw: &str, line: usize) -> Result<Vec<f64>, CodecError> {
    raw.split_whitespace()
        .map(|token| {
            parse_float(token).ok_or_else(|| CodecError::Format {
                line,
                message: format!("invalid value '{token}'"),
            })
        })
        .collect()
}

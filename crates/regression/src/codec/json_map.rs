use std::fmt;

use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, Serializer};

use super::{format_float, parse_float, CodecError, DecodedReference};
use crate::types::{Shape, Snapshot, Trajectory};

struct KeyframeMapOut<'a>(&'a Trajectory);

impl Serialize for KeyframeMapOut<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for keyframe in self.0.keyframes() {
            let rows = keyframe.snapshot.rows().collect::<Vec<_>>();
            map.serialize_entry(&timestamp_key(keyframe.time), &rows)?;
        }
        map.end()
    }
}

/// Timestamp key as the historical corpus spells it: fixed notation with a
/// trailing `.0` for `1e-4 <= |t| < 1e16`, otherwise scientific notation with
/// a signed exponent of at least two digits (`1e-05`, `2.5e+16`).
fn timestamp_key(time: f64) -> String {
    if time == 0.0 || !time.is_finite() {
        return format_float(time);
    }
    let scientific = format!("{time:e}");
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return format_float(time);
    };
    let Ok(exponent) = exponent.parse::<i32>() else {
        return format_float(time);
    };
    if (-4..16).contains(&exponent) {
        return format_float(time);
    }
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs())
}

/// Entries in document order; a plain map type would re-sort the keys.
struct KeyframeMapIn(Vec<(String, Vec<Vec<f64>>)>);

impl<'de> Deserialize<'de> for KeyframeMapIn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = KeyframeMapIn;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping timestamps to [points][dof] arrays")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(entry) = access.next_entry::<String, Vec<Vec<f64>>>()? {
                    entries.push(entry);
                }
                Ok(KeyframeMapIn(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

pub(super) fn encode(trajectory: &Trajectory) -> Result<String, CodecError> {
    serde_json::to_string(&KeyframeMapOut(trajectory)).map_err(|error| CodecError::Json {
        path: ".".to_string(),
        message: error.to_string(),
    })
}

pub(super) fn decode(text: &str, live_shape: Shape) -> Result<DecodedReference, CodecError> {
    let mut deserializer = serde_json::Deserializer::from_str(text);
    let entries: KeyframeMapIn =
        serde_path_to_error::deserialize(&mut deserializer).map_err(|error| {
            CodecError::Json {
                path: error.path().to_string(),
                message: error.inner().to_string(),
            }
        })?;
    deserializer.end().map_err(|error| CodecError::Json {
        path: ".".to_string(),
        message: error.to_string(),
    })?;

    let mut trajectory = Trajectory::new();
    for (keyframe, (key, rows)) in entries.0.into_iter().enumerate() {
        let time = parse_float(&key).ok_or_else(|| CodecError::Json {
            path: key.clone(),
            message: "timestamp key is not a number".to_string(),
        })?;
        let snapshot = Snapshot::from_rows(rows, live_shape.dof_per_point)
            .map_err(|source| CodecError::Keyframe { keyframe, source })?;
        trajectory
            .push(time, snapshot)
            .map_err(|source| CodecError::Keyframe { keyframe, source })?;
    }

    Ok(DecodedReference {
        trajectory,
        object_key: None,
    })
}

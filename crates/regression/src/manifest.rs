use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::normalize_path;

const COMMENT_MARKER: char = '#';
const REGRESSION_DIR_TOKEN: &str = "$REGRESSION_DIR";
const DESCRIPTOR_FIELD_COUNT: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct ManifestOptions {
    /// Only scenes whose relative path matches are kept.
    pub filter: Option<Regex>,
    /// Substituted for a leading `$REGRESSION_DIR` in the reference line.
    pub regression_dir: Option<PathBuf>,
    /// Used when the declared reference directory does not exist.
    pub references_dir_fallback: Option<PathBuf>,
}

impl ManifestOptions {
    pub fn with_filter(mut self, pattern: &str) -> Result<Self, ManifestError> {
        let filter = Regex::new(pattern).map_err(|source| ManifestError::InvalidFilter {
            pattern: pattern.to_string(),
            source,
        })?;
        self.filter = Some(filter);
        Ok(self)
    }
}

/// One scene to run, as declared by a manifest line.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCaseDescriptor {
    scene_path: PathBuf,
    relative_scene_path: String,
    reference_prefix: PathBuf,
    steps: u32,
    epsilon: f64,
    include_mapped: bool,
    sample_stride: u32,
}

impl TestCaseDescriptor {
    pub fn scene_path(&self) -> &Path {
        &self.scene_path
    }

    pub fn relative_scene_path(&self) -> &str {
        &self.relative_scene_path
    }

    /// Path every reference filename of this scene starts with.
    pub fn reference_prefix(&self) -> &Path {
        &self.reference_prefix
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn include_mapped(&self) -> bool {
        self.include_mapped
    }

    pub fn sample_stride(&self) -> u32 {
        self.sample_stride
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    pub line_number: usize,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct TestManifest {
    pub path: PathBuf,
    pub reference_dir: PathBuf,
    pub descriptors: Vec<TestCaseDescriptor>,
    pub skipped_lines: Vec<SkippedLine>,
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "manifest {path} has no content; its first non-comment line must be the reference directory"
    )]
    MissingReferenceLine { path: PathBuf },
    #[error(
        "manifest {path} line {line_number}: reference directory line must hold one token, found {token_count}"
    )]
    MalformedReferenceLine {
        path: PathBuf,
        line_number: usize,
        token_count: usize,
    },
    #[error("manifest {path} uses $REGRESSION_DIR but REGRESSION_DIR is not set")]
    RegressionDirUnset { path: PathBuf },
    #[error("manifest {path} declares reference directory {reference_dir}, which does not exist")]
    MissingReferenceDir {
        path: PathBuf,
        reference_dir: PathBuf,
    },
    #[error("invalid scene filter '{pattern}': {source}")]
    InvalidFilter {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

pub fn parse_manifest(
    path: &Path,
    options: &ManifestOptions,
) -> Result<TestManifest, ManifestError> {
    let raw = fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_manifest_text(path, &raw, options)
}

fn parse_manifest_text(
    path: &Path,
    raw: &str,
    options: &ManifestOptions,
) -> Result<TestManifest, ManifestError> {
    let manifest_dir = manifest_dir(path);
    let mut lines = significant_lines(raw);

    let (line_number, tokens) = lines
        .next()
        .ok_or_else(|| ManifestError::MissingReferenceLine {
            path: path.to_path_buf(),
        })?;
    let [declared] = tokens.as_slice() else {
        return Err(ManifestError::MalformedReferenceLine {
            path: path.to_path_buf(),
            line_number,
            token_count: tokens.len(),
        });
    };
    let reference_dir = resolve_reference_dir(path, &manifest_dir, declared, options)?;
    debug!(
        manifest = %path.display(),
        reference_dir = %reference_dir.display(),
        "manifest_reference_dir"
    );

    let mut descriptors = Vec::new();
    let mut skipped_lines = Vec::new();
    for (line_number, tokens) in lines {
        let fields = match DescriptorFields::parse(&tokens) {
            Ok(fields) => fields,
            Err(reason) => {
                warn!(
                    manifest = %path.display(),
                    line_number,
                    reason = %reason,
                    "manifest_line_skipped"
                );
                skipped_lines.push(SkippedLine {
                    line_number,
                    reason,
                });
                continue;
            }
        };

        if let Some(filter) = &options.filter {
            if !filter.is_match(fields.relative_scene_path) {
                debug!(
                    manifest = %path.display(),
                    scene = fields.relative_scene_path,
                    filter = filter.as_str(),
                    "manifest_scene_filtered_out"
                );
                continue;
            }
        }

        descriptors.push(TestCaseDescriptor {
            scene_path: manifest_dir.join(fields.relative_scene_path),
            relative_scene_path: fields.relative_scene_path.to_string(),
            reference_prefix: reference_dir.join(fields.relative_scene_path),
            steps: fields.steps,
            epsilon: fields.epsilon,
            include_mapped: fields.include_mapped,
            sample_stride: fields.sample_stride,
        });
    }

    info!(
        manifest = %path.display(),
        descriptor_count = descriptors.len(),
        skipped_count = skipped_lines.len(),
        "manifest_parsed"
    );

    Ok(TestManifest {
        path: path.to_path_buf(),
        reference_dir,
        descriptors,
        skipped_lines,
    })
}

fn manifest_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn significant_lines(raw: &str) -> impl Iterator<Item = (usize, Vec<&str>)> {
    raw.lines().enumerate().filter_map(|(index, line)| {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with(COMMENT_MARKER) {
            return None;
        }
        Some((index + 1, trimmed.split_whitespace().collect()))
    })
}

fn resolve_reference_dir(
    manifest_path: &Path,
    manifest_dir: &Path,
    declared: &str,
    options: &ManifestOptions,
) -> Result<PathBuf, ManifestError> {
    let primary = match declared.strip_prefix(REGRESSION_DIR_TOKEN) {
        Some(rest) => {
            let base = options.regression_dir.as_ref().ok_or_else(|| {
                ManifestError::RegressionDirUnset {
                    path: manifest_path.to_path_buf(),
                }
            })?;
            base.join(rest.trim_start_matches(['/', '\\']))
        }
        None => manifest_dir.join(declared),
    };
    if primary.is_dir() {
        return Ok(normalize_path(&primary));
    }

    if let Some(fallback) = &options.references_dir_fallback {
        let candidate = if fallback.is_absolute() {
            fallback.clone()
        } else {
            manifest_dir.join(fallback)
        };
        if candidate.is_dir() {
            info!(
                manifest = %manifest_path.display(),
                declared = %primary.display(),
                fallback = %candidate.display(),
                "manifest_reference_dir_fallback"
            );
            return Ok(normalize_path(&candidate));
        }
    }

    Err(ManifestError::MissingReferenceDir {
        path: manifest_path.to_path_buf(),
        reference_dir: primary,
    })
}

struct DescriptorFields<'a> {
    relative_scene_path: &'a str,
    steps: u32,
    epsilon: f64,
    include_mapped: bool,
    sample_stride: u32,
}

impl<'a> DescriptorFields<'a> {
    fn parse(tokens: &[&'a str]) -> Result<Self, String> {
        let [scene, steps, epsilon, include_mapped, stride] = tokens else {
            return Err(format!(
                "expected {DESCRIPTOR_FIELD_COUNT} fields (scene steps epsilon includeMapped sampleStride), found {}",
                tokens.len()
            ));
        };
        let epsilon_value = epsilon
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite() && *value >= 0.0)
            .ok_or_else(|| format!("epsilon must be a non-negative number, got '{epsilon}'"))?;
        let include_mapped_value = include_mapped
            .parse::<i64>()
            .map_err(|_| format!("includeMapped must be 0 or 1, got '{include_mapped}'"))?;

        Ok(Self {
            relative_scene_path: scene,
            steps: positive(steps, "steps")?,
            epsilon: epsilon_value,
            include_mapped: include_mapped_value != 0,
            sample_stride: positive(stride, "sampleStride")?,
        })
    }
}

fn positive(raw: &str, field: &str) -> Result<u32, String> {
    raw.parse::<u32>()
        .ok()
        .filter(|value| *value > 0)
        .ok_or_else(|| format!("{field} must be a positive integer, got '{raw}'"))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn write_manifest(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("list.regression-tests");
        fs::write(&path, body).expect("write manifest");
        path
    }

    #[test]
    fn one_descriptor_per_well_formed_line_in_file_order() {
        let temp = TempDir::new().expect("tempdir");
        fs::create_dir_all(temp.path().join("refs")).expect("mkdir refs");
        let path = write_manifest(
            temp.path(),
            "# scenes\n\
refs\n\
\n\
a/first.scn 100 1e-3 0 10\n\
# disabled.scn 10 1e-3 0 1\n\
second.scn 10 0.5 1\n\
third.scn 20 0 1 2 extra\n\
fourth.scn 5 2e-4 1 5\n",
        );

        let manifest = parse_manifest(&path, &ManifestOptions::default()).expect("parse");

        let scenes = manifest
            .descriptors
            .iter()
            .map(TestCaseDescriptor::relative_scene_path)
            .collect::<Vec<_>>();
        assert_eq!(scenes, vec!["a/first.scn", "fourth.scn"]);
        let lines = manifest
            .skipped_lines
            .iter()
            .map(|skipped| skipped.line_number)
            .collect::<Vec<_>>();
        assert_eq!(lines, vec![6, 7]);

        let first = &manifest.descriptors[0];
        assert_eq!(first.steps(), 100);
        assert_eq!(first.epsilon(), 1e-3);
        assert!(!first.include_mapped());
        assert_eq!(first.sample_stride(), 10);
        assert_eq!(first.scene_path(), temp.path().join("a/first.scn"));
        assert_eq!(
            first.reference_prefix(),
            normalize_path(&temp.path().join("refs")).join("a/first.scn")
        );
        assert!(manifest.descriptors[1].include_mapped());
    }

    #[test]
    fn unparsable_fields_skip_the_line() {
        let temp = TempDir::new().expect("tempdir");
        fs::create_dir_all(temp.path().join("refs")).expect("mkdir refs");
        let path = write_manifest(
            temp.path(),
            "refs\n\
zero_steps.scn 0 1e-3 0 1\n\
negative_eps.scn 10 -1 0 1\n\
bad_flag.scn 10 1e-3 yes 1\n\
zero_stride.scn 10 1e-3 0 0\n\
ok.scn 10 1e-3 0 1\n",
        );

        let manifest = parse_manifest(&path, &ManifestOptions::default()).expect("parse");

        assert_eq!(manifest.descriptors.len(), 1);
        assert_eq!(manifest.skipped_lines.len(), 4);
        assert!(manifest.skipped_lines[0].reason.contains("steps"));
    }

    #[test]
    fn missing_reference_dir_is_fatal() {
        let temp = TempDir::new().expect("tempdir");
        let path = write_manifest(temp.path(), "missing_refs\nscene.scn 10 1e-3 0 1\n");

        let error = parse_manifest(&path, &ManifestOptions::default()).expect_err("missing");
        assert!(matches!(error, ManifestError::MissingReferenceDir { .. }));
    }

    #[test]
    fn reference_line_must_be_a_single_token() {
        let temp = TempDir::new().expect("tempdir");
        let path = write_manifest(temp.path(), "# only comments\nrefs other\n");

        let error = parse_manifest(&path, &ManifestOptions::default()).expect_err("tokens");
        assert!(matches!(
            error,
            ManifestError::MalformedReferenceLine {
                line_number: 2,
                token_count: 2,
                ..
            }
        ));

        let empty = write_manifest(temp.path(), "# nothing here\n\n");
        let error = parse_manifest(&empty, &ManifestOptions::default()).expect_err("empty");
        assert!(matches!(error, ManifestError::MissingReferenceLine { .. }));
    }

    #[test]
    fn filter_keeps_matching_scenes_only() {
        let temp = TempDir::new().expect("tempdir");
        fs::create_dir_all(temp.path().join("refs")).expect("mkdir refs");
        let path = write_manifest(
            temp.path(),
            "refs\nfem/beam.scn 10 1e-3 0 1\nrigid/box.scn 10 1e-3 0 1\nfem/liver.scn 10 1e-3 0 1\n",
        );
        let options = ManifestOptions::default()
            .with_filter("^fem/")
            .expect("filter");

        let manifest = parse_manifest(&path, &options).expect("parse");

        let scenes = manifest
            .descriptors
            .iter()
            .map(TestCaseDescriptor::relative_scene_path)
            .collect::<Vec<_>>();
        assert_eq!(scenes, vec!["fem/beam.scn", "fem/liver.scn"]);
        assert!(manifest.skipped_lines.is_empty());
    }

    #[test]
    fn invalid_filter_is_reported() {
        let error = ManifestOptions::default()
            .with_filter("(unclosed")
            .expect_err("bad regex");
        assert!(matches!(error, ManifestError::InvalidFilter { .. }));
    }

    #[test]
    fn regression_dir_token_is_substituted() {
        let temp = TempDir::new().expect("tempdir");
        let shared = temp.path().join("shared");
        fs::create_dir_all(shared.join("references").join("fem")).expect("mkdir");
        let scenes = temp.path().join("scenes");
        fs::create_dir_all(&scenes).expect("mkdir scenes");
        let path = write_manifest(
            &scenes,
            "$REGRESSION_DIR/references/fem\nbeam.scn 10 1e-3 0 1\n",
        );

        let unset = parse_manifest(&path, &ManifestOptions::default()).expect_err("unset");
        assert!(matches!(unset, ManifestError::RegressionDirUnset { .. }));

        let options = ManifestOptions {
            regression_dir: Some(shared.clone()),
            ..ManifestOptions::default()
        };
        let manifest = parse_manifest(&path, &options).expect("parse");
        assert_eq!(
            manifest.reference_dir,
            normalize_path(&shared.join("references").join("fem"))
        );
    }

    #[test]
    fn fallback_reference_dir_is_used_when_declared_one_is_missing() {
        let temp = TempDir::new().expect("tempdir");
        let fallback = temp.path().join("external_refs");
        fs::create_dir_all(&fallback).expect("mkdir");
        let path = write_manifest(temp.path(), "not_here\nbeam.scn 10 1e-3 0 1\n");
        let options = ManifestOptions {
            references_dir_fallback: Some(fallback.clone()),
            ..ManifestOptions::default()
        };

        let manifest = parse_manifest(&path, &options).expect("parse");

        assert_eq!(manifest.reference_dir, normalize_path(&fallback));
        assert_eq!(
            manifest.descriptors[0].reference_prefix(),
            normalize_path(&fallback).join("beam.scn")
        );
    }
}

//! Line-prefix output contract of the analysis executable.
//!
//! Two lines carry meaning, in any order: `Prediction: <label>` (required) and
//! `Heatmap saved at: <path>` (optional). Every other line is ignored. Only the
//! first line carrying each prefix is considered.

use std::path::{Component, Path, PathBuf};

pub const PREDICTION_PREFIX: &str = "Prediction:";
pub const HEATMAP_PREFIX: &str = "Heatmap saved at:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResult {
    pub label: String,
    pub artifact_path: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("no `Prediction:` line in analyzer output")]
    MissingLabel,
    #[error("`Prediction:` line has an empty label")]
    EmptyLabel,
}

/// Parses analyzer stdout. Relative artifact paths are resolved against `base_dir`,
/// the directory the analyzer ran in.
pub fn parse_output(stdout: &str, base_dir: &Path) -> Result<ParsedResult, ParseError> {
    let label = find_value(stdout, PREDICTION_PREFIX).ok_or(ParseError::MissingLabel)?;
    if label.is_empty() {
        return Err(ParseError::EmptyLabel);
    }

    let artifact_path = find_value(stdout, HEATMAP_PREFIX)
        .filter(|p| !p.is_empty())
        .map(|p| resolve(base_dir, Path::new(p)));

    Ok(ParsedResult {
        label: label.to_string(),
        artifact_path,
    })
}

fn find_value<'a>(stdout: &'a str, prefix: &str) -> Option<&'a str> {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix(prefix))
        .map(str::trim)
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

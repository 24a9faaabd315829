//! Checkpoint naming and discovery.
//!
//! A checkpoint for global step `n` is the pair `checkpoint-<n>.pt` (actor
//! parameters) and `checkpoint-<n>.json` ([`CheckpointMeta`]) inside a model
//! directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::OptimizerKind;
use crate::error::LearnerError;

const PREFIX: &str = "checkpoint";
/// Extension of the parameter file.
pub const WEIGHTS_EXTENSION: &str = "pt";
/// Extension of the metadata file.
pub const METADATA_EXTENSION: &str = "json";

/// Which checkpoint to restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointSelector {
    /// The highest step found in the directory.
    Latest,
    Step(u64),
}

/// Optimizer settings persisted with the actor parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    pub kind: OptimizerKind,
    pub learning_rate: f64,
}

/// Metadata written next to the parameter file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub global_step: u64,
    /// Completed training episodes when the checkpoint was taken.
    pub episodes: u64,
    pub optimizer: OptimizerState,
}

/// Path of the parameter file for `step`.
pub fn weights_path(dir: &Path, step: u64) -> PathBuf {
    dir.join(format!("{}-{}.{}", PREFIX, step, WEIGHTS_EXTENSION))
}

/// Path of the metadata file for `step`.
pub fn metadata_path(dir: &Path, step: u64) -> PathBuf {
    dir.join(format!("{}-{}.{}", PREFIX, step, METADATA_EXTENSION))
}

/// Extracts the step from a file name of the form `checkpoint-<step>.<ext>`.
///
/// Returns `None` for anything else, including names with extra `-` tokens.
pub fn parse_step(file_name: &str) -> Option<u64> {
    let stem = file_name.split('.').next()?;
    let mut tokens = stem.split('-');
    let (prefix, step) = (tokens.next()?, tokens.next()?);
    if prefix != PREFIX || tokens.next().is_some() {
        return None;
    }
    step.parse().ok()
}

/// Highest checkpoint step with a parameter file in `dir`.
///
/// A missing directory is reported as `Ok(None)`.
pub fn latest_step(dir: &Path) -> io::Result<Option<u64>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut latest = None;
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(WEIGHTS_EXTENSION) {
            continue;
        }
        let step = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_step);
        if let Some(step) = step {
            latest = latest.max(Some(step));
        }
    }
    Ok(latest)
}

/// Resolves `selector` to an existing parameter file in `dir`.
pub fn resolve(dir: &Path, selector: CheckpointSelector) -> io::Result<Option<(u64, PathBuf)>> {
    let step = match selector {
        CheckpointSelector::Latest => latest_step(dir)?,
        CheckpointSelector::Step(step) => Some(step),
    };
    Ok(step
        .map(|s| (s, weights_path(dir, s)))
        .filter(|(_, path)| path.is_file()))
}

/// Writes `meta` as pretty JSON next to the parameter file.
pub fn write_metadata(dir: &Path, meta: &CheckpointMeta) -> Result<PathBuf, LearnerError> {
    let path = metadata_path(dir, meta.global_step);
    let file = fs::File::create(&path)?;
    serde_json::to_writer_pretty(file, meta)?;
    Ok(path)
}

/// Reads the metadata of `step`, if present.
pub fn read_metadata(dir: &Path, step: u64) -> Result<Option<CheckpointMeta>, LearnerError> {
    let path = metadata_path(dir, step);
    if !path.is_file() {
        return Ok(None);
    }
    let file = fs::File::open(&path)?;
    Ok(Some(serde_json::from_reader(file)?))
}

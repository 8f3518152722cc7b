//! Parameter snapshots, stored as `<dir>/<run_id>-<epoch>`.

use crate::error::{LaneError, LaneResult};
use crate::model::Architecture;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub architecture: Architecture,
    pub epoch: usize,
    pub params: Vec<f32>,
}

impl Checkpoint {
    pub fn write(&self, path: &Path) -> LaneResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(&mut writer, self)?;
        writer.flush()?;
        debug!("Wrote checkpoint {} ({} params)", path.display(), self.params.len());
        Ok(())
    }

    pub fn read(path: &Path) -> LaneResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(bincode::deserialize_from(reader)?)
    }
}

/// Naming convention for the checkpoints of one training run.
#[derive(Debug, Clone)]
pub struct CheckpointPaths {
    dir: PathBuf,
    run_id: String,
}

impl CheckpointPaths {
    pub fn new(dir: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            run_id: run_id.into(),
        }
    }

    pub fn for_epoch(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("{}-{}", self.run_id, epoch))
    }

    /// Epoch encoded in a checkpoint file name of this run.
    pub fn parse_epoch(&self, file_name: &str) -> Option<usize> {
        file_name
            .strip_prefix(self.run_id.as_str())?
            .strip_prefix('-')?
            .parse()
            .ok()
    }

    /// Newest checkpoint of this run, if any has been written.
    pub fn latest(&self) -> LaneResult<Option<(usize, PathBuf)>> {
        if !self.dir.is_dir() {
            return Ok(None);
        }

        let mut latest: Option<(usize, PathBuf)> = None;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(epoch) = name.to_str().and_then(|n| self.parse_epoch(n)) else {
                continue;
            };
            if latest.as_ref().map_or(true, |(best, _)| epoch > *best) {
                latest = Some((epoch, entry.path()));
            }
        }
        Ok(latest)
    }

    /// `explicit` when given, otherwise the newest checkpoint of this run.
    pub fn resolve(&self, explicit: Option<&Path>) -> LaneResult<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        match self.latest()? {
            Some((epoch, path)) => {
                debug!("Using checkpoint of epoch {epoch}");
                Ok(path)
            }
            None => Err(LaneError::Checkpoint(format!(
                "no checkpoint of {} in {}",
                self.run_id,
                self.dir.display()
            ))),
        }
    }
}

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use super::{CheckpointErr, Result};

const PREFIX: &str = "model-";
const EXTENSION: &str = "json";

/// A persisted checkpoint, located by path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointHandle {
    pub path: PathBuf,
    pub step: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// A full parameter set at a given global step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub step: u64,
    pub tensors: BTreeMap<String, Tensor>,
}

/// The persistence backend of the checkpoint manager.
pub trait CheckpointStore: Send + Sync {
    /// Finds the most recent checkpoint in `dir`, if any.
    fn latest(&self, dir: &Path) -> Result<Option<CheckpointHandle>>;

    /// Resolves a path naming either a checkpoint or a directory of them.
    fn resolve(&self, path: &Path) -> Result<Option<CheckpointHandle>>;

    fn load(&self, handle: &CheckpointHandle) -> Result<Checkpoint>;

    /// Persists `checkpoint` into `dir`.
    fn save(&self, dir: &Path, checkpoint: &Checkpoint) -> Result<CheckpointHandle>;
}

/// Stores checkpoints as `model-<step>.json` files.
#[derive(Debug, Clone)]
pub struct JsonStore {
    max_to_keep: usize,
}

impl JsonStore {
    /// Creates a new `JsonStore`.
    ///
    /// # Arguments
    /// * `max_to_keep` - How many checkpoints to keep per directory, `0` keeps all of them.
    pub fn new(max_to_keep: usize) -> Self {
        Self { max_to_keep }
    }

    fn file_name(step: u64) -> String {
        format!("{PREFIX}{step}.{EXTENSION}")
    }

    fn parse_step(path: &Path) -> Option<u64> {
        if path.extension()? != EXTENSION {
            return None;
        }

        path.file_stem()?
            .to_str()?
            .strip_prefix(PREFIX)?
            .parse()
            .ok()
    }

    /// Lists the checkpoints of `dir` sorted by ascending step.
    fn list(dir: &Path) -> Result<Vec<CheckpointHandle>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut handles = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if let Some(step) = Self::parse_step(&path) {
                handles.push(CheckpointHandle { path, step });
            }
        }

        handles.sort_by_key(|h| h.step);
        Ok(handles)
    }

    fn prune(&self, dir: &Path) -> Result<()> {
        if self.max_to_keep == 0 {
            return Ok(());
        }

        let handles = Self::list(dir)?;
        let excess = handles.len().saturating_sub(self.max_to_keep);
        for handle in &handles[..excess] {
            fs::remove_file(&handle.path)?;
        }

        Ok(())
    }
}

impl CheckpointStore for JsonStore {
    fn latest(&self, dir: &Path) -> Result<Option<CheckpointHandle>> {
        Ok(Self::list(dir)?.pop())
    }

    fn resolve(&self, path: &Path) -> Result<Option<CheckpointHandle>> {
        if path.is_dir() {
            return self.latest(path);
        }

        if !path.is_file() {
            return Err(CheckpointErr::NotFound(path.to_path_buf()));
        }

        let step = Self::parse_step(path).unwrap_or_default();
        Ok(Some(CheckpointHandle {
            path: path.to_path_buf(),
            step,
        }))
    }

    fn load(&self, handle: &CheckpointHandle) -> Result<Checkpoint> {
        let bytes = fs::read(&handle.path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn save(&self, dir: &Path, checkpoint: &Checkpoint) -> Result<CheckpointHandle> {
        fs::create_dir_all(dir)?;

        let path = dir.join(Self::file_name(checkpoint.step));
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(checkpoint)?)?;
        fs::rename(&tmp, &path)?;

        self.prune(dir)?;

        Ok(CheckpointHandle {
            path,
            step: checkpoint.step,
        })
    }
}

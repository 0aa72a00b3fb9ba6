//! Checkpoint directory layout
//!
//! A checkpoint is a directory `cpNNNNN-<yyyyMMddHHmmss>` under the job's
//! checkpoints directory. It is written as `<name>.inprogress` and renamed
//! once every part is in place, so a directory without the suffix is always
//! complete.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const IN_PROGRESS_SUFFIX: &str = ".inprogress";
pub const CONTROLLER_SNAPSHOT_NAME: &str = "controller.toml";
pub const ROTATION_MARKER_NAME: &str = "logs-rotated.txt";

/// The controller's own part of a checkpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ControllerSnapshot {
    pub crawl_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_hash: Option<String>,
    pub exit_reason: String,
    pub written: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<String>,
    pub elapsed_ms: u64,
    pub discovered: u64,
    pub queued: u64,
    pub finished: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub disregarded: u64,
    pub total_bytes: u64,
    pub toe_count: u64,
    pub target_toe_count: u64,
}

impl ControllerSnapshot {
    pub fn write(&self, dir: &Path) -> crate::Result<()> {
        let text = toml::to_string(self)?;
        fs::write(dir.join(CONTROLLER_SNAPSHOT_NAME), text)?;
        Ok(())
    }

    pub fn read(dir: &Path) -> crate::Result<Self> {
        let text = fs::read_to_string(dir.join(CONTROLLER_SNAPSHOT_NAME))?;
        toml::from_str(&text).map_err(|e| {
            crate::CrawlError::Io(io::Error::new(io::ErrorKind::InvalidData, e))
        })
    }
}

/// Name of checkpoint number `serial` taken at `timestamp`
/// (`yyyyMMddHHmmss`)
pub fn checkpoint_name(serial: u32, timestamp: &str) -> String {
    format!("cp{:05}-{}", serial, timestamp)
}

fn serial_of(name: &str) -> Option<u32> {
    let rest = name.strip_prefix("cp")?;
    let digits = rest.split('-').next()?;
    if digits.len() != 5 {
        return None;
    }
    digits.parse().ok()
}

/// Serial for the next checkpoint in `dir`: one past the highest in use
pub fn next_checkpoint_serial(dir: &Path) -> io::Result<u32> {
    if !dir.exists() {
        return Ok(1);
    }
    let mut highest = 0;
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        if let Some(serial) = name.to_str().and_then(serial_of) {
            highest = highest.max(serial);
        }
    }
    Ok(highest + 1)
}

/// Completed checkpoints in `dir`, oldest first
pub fn list_checkpoints(dir: &Path) -> io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if entry.file_type()?.is_dir()
            && serial_of(name).is_some()
            && !name.ends_with(IN_PROGRESS_SUFFIX)
        {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

/// Names and stages checkpoint directories under one checkpoints directory
#[derive(Debug, Clone)]
pub struct Checkpointer {
    dir: PathBuf,
}

impl Checkpointer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the in-progress directory for the next checkpoint
    pub fn begin(&self, timestamp: &str) -> io::Result<InProgressCheckpoint> {
        fs::create_dir_all(&self.dir)?;
        let name = checkpoint_name(next_checkpoint_serial(&self.dir)?, timestamp);
        let path = self.dir.join(format!("{}{}", name, IN_PROGRESS_SUFFIX));
        fs::create_dir(&path)?;
        Ok(InProgressCheckpoint {
            final_path: self.dir.join(&name),
            name,
            path,
        })
    }

    /// Completed checkpoints, oldest first
    pub fn completed(&self) -> io::Result<Vec<PathBuf>> {
        list_checkpoints(&self.dir)
    }
}

/// A checkpoint being written
#[derive(Debug)]
pub struct InProgressCheckpoint {
    name: String,
    path: PathBuf,
    final_path: PathBuf,
}

impl InProgressCheckpoint {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory every part is written into
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Renames the directory to its final name
    pub fn commit(self) -> io::Result<PathBuf> {
        fs::rename(&self.path, &self.final_path)?;
        Ok(self.final_path)
    }

    /// Removes the partial directory
    pub fn abort(self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            tracing::warn!(
                "Failed to remove partial checkpoint {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

/// Records which log files were rotated into the checkpoint
pub fn write_rotation_marker(dir: &Path, rotated: &[PathBuf]) -> io::Result<()> {
    let text: String = rotated
        .iter()
        .map(|p| format!("{}\n", p.display()))
        .collect();
    fs::write(dir.join(ROTATION_MARKER_NAME), text)
}

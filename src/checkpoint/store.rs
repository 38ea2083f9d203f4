//! Append-only JSONL stores.
//!
//! Epistemic foundation:
//! - K_i: One line per record, each carrying `Problem_ID`
//! - K_i: A record exists once its line is written and synced
//! - I^B: A killed process may leave a torn last line → ignored on read,
//!   and the next append starts on a fresh line

use crate::checkpoint::CheckpointSet;
use crate::models::{Keyed, PipelineError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One stage's output store.
#[derive(Debug, Clone)]
pub struct JsonlStore {
    path: PathBuf,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Parseable lines, each as raw JSON. Malformed lines are logged and skipped.
    fn lines(&self) -> Result<Vec<Value>> {
        if !self.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .map_err(|e| PipelineError::io(format!("reading {}", self.path.display()), e))?;

        let mut values = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(value) => values.push(value),
                Err(e) => warn!(
                    store = %self.path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping malformed line"
                ),
            }
        }
        Ok(values)
    }

    /// Rebuild the checkpoint set from the store.
    pub fn load_ids(&self) -> Result<CheckpointSet> {
        let ids: CheckpointSet = self
            .lines()?
            .iter()
            .filter_map(record_id)
            .collect();
        debug!(store = %self.path.display(), done = ids.len(), "Loaded checkpoint");
        Ok(ids)
    }

    /// Every record that deserializes as `T`, in file order.
    pub fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for value in self.lines()? {
            match serde_json::from_value::<T>(value) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    store = %self.path.display(),
                    error = %e,
                    "Skipping record with unexpected shape"
                ),
            }
        }
        Ok(records)
    }

    /// Records keyed by identifier. The first record for an identifier wins.
    pub fn read_map<T: DeserializeOwned + Keyed>(&self) -> Result<HashMap<String, T>> {
        let mut map = HashMap::new();
        for record in self.read_all::<T>()? {
            map.entry(record.key().to_string()).or_insert(record);
        }
        Ok(map)
    }

    /// Append one record and sync it to disk.
    ///
    /// Any I/O failure here is fatal for the run.
    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| PipelineError::Internal(format!("Serializing record: {e}")))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| PipelineError::io("creating store directory", e))?;
            }
        }

        let torn = !ends_with_newline(&self.path)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| PipelineError::io(format!("opening {}", self.path.display()), e))?;

        let mut buffer = String::with_capacity(line.len() + 2);
        if torn {
            buffer.push('\n');
        }
        buffer.push_str(&line);
        buffer.push('\n');

        file.write_all(buffer.as_bytes())
            .map_err(|e| PipelineError::io("appending to store", e))?;
        file.sync_all()
            .map_err(|e| PipelineError::io("syncing store", e))?;

        Ok(())
    }
}

/// `Problem_ID` of a raw record, as a string.
fn record_id(value: &Value) -> Option<String> {
    match value.get("Problem_ID")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// True for a missing or empty file, or one whose last byte is a newline.
fn ends_with_newline(path: &Path) -> Result<bool> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(PipelineError::io(format!("opening {}", path.display()), e)),
    };
    let len = file
        .metadata()
        .map_err(|e| PipelineError::io("reading store metadata", e))?
        .len();
    if len == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))
        .and_then(|_| file.read_exact(&mut last))
        .map_err(|e| PipelineError::io("reading store tail", e))?;
    Ok(last[0] == b'\n')
}

/// Load an input collection: a JSON array file or a JSONL file.
///
/// Unlike stage stores, input files are strict: a malformed entry is an error.
pub fn load_collection<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = fs::read_to_string(path)
        .map_err(|e| PipelineError::io(format!("reading {}", path.display()), e))?;

    if content.trim_start().starts_with('[') {
        return serde_json::from_str(&content).map_err(|e| {
            PipelineError::InvalidInput(format!("{}: {e}", path.display()))
        });
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| {
                PipelineError::InvalidInput(format!("{} line {}: {e}", path.display(), index + 1))
            })
        })
        .collect()
}

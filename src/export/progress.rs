//! On-disk resume state for one export target.
//!
//! The manifest is the full conversation list, written once per target and
//! reused verbatim afterwards. The progress log is an append-only list of
//! conversation ids whose export finished. The conversations still to do
//! are the manifest minus the log.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::error::ExportError;
use super::paths::PROGRESS_LOG_FILENAME;
use crate::front::Conversation;

/// Cached snapshot of every conversation in a target collection.
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
}

impl Manifest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached manifest. `Ok(None)` when none has been written yet.
    pub async fn load(&self) -> Result<Option<Vec<Conversation>>, ExportError> {
        let bytes = match fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ExportError::io(&self.path, e)),
        };
        let conversations = serde_json::from_slice(&bytes).map_err(|source| {
            ExportError::ManifestFormat {
                path: self.path.clone(),
                source,
            }
        })?;
        Ok(Some(conversations))
    }

    /// Write the manifest via a temp file and rename, so an interrupted write
    /// never leaves a truncated manifest behind.
    pub async fn save(&self, conversations: &[Conversation]) -> Result<(), ExportError> {
        let json = serde_json::to_vec(conversations).map_err(|source| {
            ExportError::ManifestFormat {
                path: self.path.clone(),
                source,
            }
        })?;
        let tmp = self.path.with_extension("json.part");
        fs::write(&tmp, &json)
            .await
            .map_err(|e| ExportError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| ExportError::io(&self.path, e))?;
        Ok(())
    }

    /// Delete the cached manifest so the next run re-lists the collection.
    /// Returns whether a manifest existed.
    pub async fn remove(&self) -> Result<bool, ExportError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ExportError::io(&self.path, e)),
        }
    }
}

/// Append-only record of fully exported conversation ids.
#[derive(Debug, Clone)]
pub struct ProgressLog {
    path: PathBuf,
}

impl ProgressLog {
    /// The progress log of the target exported into `target_dir`.
    pub fn in_dir(target_dir: &Path) -> Self {
        Self {
            path: target_dir.join(PROGRESS_LOG_FILENAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ids recorded as complete. A missing log means nothing is complete.
    pub async fn completed(&self) -> Result<HashSet<String>, ExportError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => return Err(ExportError::io(&self.path, e)),
        };
        Ok(parse_ids(&contents))
    }

    /// Record `id` as complete. Opens in append mode; existing lines are
    /// never rewritten.
    pub async fn append(&self, id: &str) -> Result<(), ExportError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| ExportError::io(&self.path, e))?;
        file.write_all(format!("{}\n", id).as_bytes())
            .await
            .map_err(|e| ExportError::io(&self.path, e))?;
        file.flush()
            .await
            .map_err(|e| ExportError::io(&self.path, e))?;
        Ok(())
    }
}

/// Read a user-supplied list of conversation ids, one per line.
pub async fn read_id_list(path: &Path) -> Result<HashSet<String>, ExportError> {
    let contents = fs::read_to_string(path)
        .await
        .map_err(|e| ExportError::io(path, e))?;
    Ok(parse_ids(&contents))
}

fn parse_ids(contents: &str) -> HashSet<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Where an export target stands before a run.
#[derive(Debug, Clone)]
pub struct CurrentProgress {
    /// Manifest conversations in server order.
    pub conversations: Vec<Conversation>,
    /// Ids from the progress log, including any no longer in the manifest.
    pub completed: HashSet<String>,
    /// Ids this run must export.
    pub required: HashSet<String>,
}

impl CurrentProgress {
    /// When resuming, everything in the manifest not yet logged as complete
    /// is required; otherwise the whole manifest is.
    pub fn compute(
        conversations: Vec<Conversation>,
        completed: HashSet<String>,
        resume: bool,
    ) -> Self {
        let required = conversations
            .iter()
            .filter(|c| !resume || !completed.contains(&c.id))
            .map(|c| c.id.clone())
            .collect();
        Self {
            conversations,
            completed,
            required,
        }
    }

    /// Narrow the required set to the ids in `only`. Ids in `only` that are
    /// not in the manifest are ignored.
    pub fn restrict_to(&mut self, only: &HashSet<String>) {
        self.required.retain(|id| only.contains(id));
    }

    pub fn total(&self) -> usize {
        self.conversations.len()
    }

    /// Manifest conversations already logged as complete.
    pub fn done(&self) -> usize {
        self.conversations
            .iter()
            .filter(|c| self.completed.contains(&c.id))
            .count()
    }
}

//! Durable side records for briefing sessions
//!
//! Two concerns live here: partial-completion markers (how far a briefing
//! got before early termination) and transcript export on finish. Both
//! are non-critical side channels: a write failure here never blocks the
//! user-facing flow. Callers use the fire-and-forget methods, which log
//! failures at warn and swallow them.

use crate::transcript::TranscriptLog;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};

/// Durable marker of how far a briefing progressed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialCompletion {
    pub briefing_id: String,
    pub completed_sections: usize,
    pub total_sections: usize,
    pub timestamp: DateTime<Utc>,
}

/// Storage errors with contextual information
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Could not find user data directory")]
    NoDataDir,

    #[error("Failed to create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Side-record store rooted at a data directory
///
/// Production sessions use [`CompletionStore::open_default`], which roots
/// the store under the user data dir; tests point it at a temp dir.
pub struct CompletionStore {
    root: PathBuf,
}

impl CompletionStore {
    /// Open the store under `<data_dir>/Briefcast`
    pub fn open_default() -> Result<Self, StorageError> {
        let root = dirs::data_dir()
            .map(|d| d.join("Briefcast"))
            .ok_or(StorageError::NoDataDir)?;
        Ok(Self { root })
    }

    /// Open the store under an explicit root
    pub fn open_at(root: PathBuf) -> Self {
        Self { root }
    }

    fn partial_dir(&self) -> PathBuf {
        self.root.join("partial")
    }

    fn partial_path(&self, briefing_id: &str) -> PathBuf {
        // Briefing ids are engine-generated and filename-safe
        self.partial_dir().join(format!("{}.json", briefing_id))
    }

    /// Write a partial-completion record, overwriting any prior one
    pub fn write_partial(&self, record: &PartialCompletion) -> Result<(), StorageError> {
        let dir = self.partial_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| StorageError::CreateDirectory {
                path: dir.clone(),
                source: e,
            })?;
        }

        let path = self.partial_path(&record.briefing_id);
        let json = serde_json::to_string_pretty(record)?;
        fs::write(&path, json).map_err(|e| StorageError::WriteFile {
            path: path.clone(),
            source: e,
        })?;
        Ok(())
    }

    /// Fire-and-forget partial-completion write
    ///
    /// Contract: failure here never blocks the user-facing flow.
    pub fn record_partial(&self, record: &PartialCompletion) {
        if let Err(e) = self.write_partial(record) {
            warn!(briefing_id = %record.briefing_id, "Partial-completion write failed: {}", e);
        }
    }

    /// Remove the partial-completion record on full completion
    pub fn clear_partial(&self, briefing_id: &str) {
        let path = self.partial_path(briefing_id);
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                warn!(briefing_id = %briefing_id, "Failed to clear partial completion: {}", e);
            } else {
                info!(briefing_id = %briefing_id, "Partial completion cleared");
            }
        }
    }

    /// Load the partial-completion record for a briefing, if one exists
    pub fn load_partial(&self, briefing_id: &str) -> Option<PartialCompletion> {
        let path = self.partial_path(briefing_id);
        if !path.exists() {
            return None;
        }
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Failed to parse partial completion: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("Failed to read partial completion: {}", e);
                None
            }
        }
    }

    /// Save a finished briefing transcript as a timestamped Markdown file
    pub fn export_transcript(&self, log: &TranscriptLog) -> Result<PathBuf, StorageError> {
        let dir = self.root.join("transcripts");
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| StorageError::CreateDirectory {
                path: dir.clone(),
                source: e,
            })?;
        }

        let timestamp = Local::now().format("%Y-%m-%d-%H-%M-%S");
        let path = dir.join(format!("briefing-{}.md", timestamp));

        let mut file = fs::File::create(&path).map_err(|e| StorageError::WriteFile {
            path: path.clone(),
            source: e,
        })?;
        file.write_all(log.to_markdown().as_bytes())
            .map_err(|e| StorageError::WriteFile {
                path: path.clone(),
                source: e,
            })?;

        info!("Saved briefing transcript to: {:?}", path);
        Ok(path)
    }

    /// Fire-and-forget transcript export; empty transcripts are skipped
    pub fn export_transcript_best_effort(&self, log: &TranscriptLog) {
        if log.is_empty() {
            return;
        }
        if let Err(e) = self.export_transcript(log) {
            warn!("Transcript export failed: {}", e);
        }
    }
}

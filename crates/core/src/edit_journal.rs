use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{default_config_dir, ConfigError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EditOutcome {
    Applied,
    Rejected,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EditRecord {
    pub timestamp_unix_ms: u128,
    pub table: String,
    pub column: String,
    pub row_index: usize,
    pub previous: Option<String>,
    pub value: String,
    pub outcome: EditOutcome,
    pub rows_matched: Option<u64>,
    pub error: Option<String>,
}

#[must_use]
pub fn unix_timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[derive(Debug, Error)]
pub enum EditJournalError {
    #[error("failed to resolve default config path: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid edit journal path `{0}`")]
    InvalidPath(PathBuf),
    #[error("failed to create edit journal directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize edit record: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to append edit record at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Append-only NDJSON log of edit commits.
#[derive(Debug, Clone)]
pub struct FileEditJournal {
    path: PathBuf,
}

impl FileEditJournal {
    pub fn load_default() -> Result<Self, EditJournalError> {
        Ok(Self {
            path: default_config_dir()?.join("edits.ndjson"),
        })
    }

    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &EditRecord) -> Result<(), EditJournalError> {
        let parent_dir = self
            .path
            .parent()
            .ok_or_else(|| EditJournalError::InvalidPath(self.path.clone()))?;
        fs::create_dir_all(parent_dir).map_err(|source| EditJournalError::CreateDir {
            path: parent_dir.to_path_buf(),
            source,
        })?;

        let rendered = serde_json::to_string(record)
            .map_err(|source| EditJournalError::Serialize { source })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| EditJournalError::Write {
                path: self.path.clone(),
                source,
            })?;
        writeln!(file, "{rendered}").map_err(|source| EditJournalError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

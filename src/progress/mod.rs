//! Session progress: counters, status transitions, ETA, checkpoints.
//!
//! The tracker is advisory (the on-disk existence check decides what is
//! already done) but it powers resume reporting, the spinner, the final
//! summary, and the failed-items record. Every persist is atomic
//! (write-temp-plus-rename), and files written by older versions stay
//! readable: unknown fields are preserved, missing fields take defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::fsio;

/// Highest progress-file schema this build can read.
pub const SCHEMA_VERSION: u32 = 2;

/// A topic checkpoint is recorded every this many completed topics.
const CHECKPOINT_INTERVAL: u32 = 10;

/// Speed below this is treated as "no data" for ETA purposes.
const MIN_SPEED: f64 = 1e-9;

/// Errors from progress persistence.
#[derive(Debug, Error)]
pub enum ProgressError {
    /// The progress file could not be read or written. Write failures are
    /// fatal to the job.
    #[error("progress file error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The progress file exists but is not valid JSON for any known schema.
    #[error("progress file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The progress file was written by a newer version of this tool.
    #[error(
        "progress file {path} uses schema {found}, newer than supported {supported}; upgrade the tool or remove the file"
    )]
    ResumeConflict {
        path: PathBuf,
        found: u32,
        supported: u32,
    },
}

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Initialized,
    InProgress,
    Paused,
    Completed,
    Failed,
}

/// One failed item: error kind plus the first error message seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub kind: String,
    pub message: String,
}

/// Rolling checkpoint entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub at: DateTime<Utc>,
    pub completed_skills: u64,
    pub completed_books: u64,
}

/// Serialized progress state.
///
/// The `extra` map carries any fields this version does not know about so
/// a round-trip through an older or newer file never drops data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressState {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default = "Uuid::new_v4")]
    pub session_id: Uuid,
    #[serde(default = "Utc::now")]
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub total_skills: u64,
    #[serde(default)]
    pub completed_skills: u64,
    #[serde(default)]
    pub total_books: u64,
    #[serde(default)]
    pub completed_books: u64,
    #[serde(default)]
    pub failed_items: BTreeMap<String, FailedItem>,
    #[serde(default)]
    pub current_activity: Option<String>,
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
    #[serde(default = "Utc::now")]
    pub last_update: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_schema_version() -> u32 {
    1
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            status: SessionStatus::Initialized,
            total_skills: 0,
            completed_skills: 0,
            total_books: 0,
            completed_books: 0,
            failed_items: BTreeMap::new(),
            current_activity: None,
            checkpoints: Vec::new(),
            last_update: Utc::now(),
            extra: BTreeMap::new(),
        }
    }
}

/// In-memory tracker bound to a progress file.
#[derive(Debug)]
pub struct ProgressTracker {
    state: ProgressState,
    path: PathBuf,
    topics_since_checkpoint: u32,
}

impl ProgressTracker {
    /// Starts a fresh session writing to `path`.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            state: ProgressState::default(),
            path,
            topics_since_checkpoint: 0,
        }
    }

    /// Loads an existing progress file, or starts fresh when absent.
    ///
    /// Older-schema files are upgraded in place (missing fields take
    /// defaults, unknown fields are preserved). A `paused` or `in_progress`
    /// file resumes as the same session.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::ResumeConflict`] for files written by a
    /// newer schema and [`ProgressError::Corrupt`] for unreadable JSON.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub fn load_or_new(path: PathBuf) -> Result<Self, ProgressError> {
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no progress file; starting fresh");
                return Ok(Self::new(path));
            }
            Err(source) => return Err(ProgressError::Io { path, source }),
        };

        let mut state: ProgressState =
            serde_json::from_slice(&bytes).map_err(|source| ProgressError::Corrupt {
                path: path.clone(),
                source,
            })?;

        if state.schema_version > SCHEMA_VERSION {
            return Err(ProgressError::ResumeConflict {
                path,
                found: state.schema_version,
                supported: SCHEMA_VERSION,
            });
        }
        if state.schema_version < SCHEMA_VERSION {
            info!(
                from = state.schema_version,
                to = SCHEMA_VERSION,
                "upgrading progress file schema"
            );
            state.schema_version = SCHEMA_VERSION;
        }

        info!(
            session = %state.session_id,
            completed_books = state.completed_books,
            "resuming progress session"
        );
        Ok(Self {
            state,
            path,
            topics_since_checkpoint: 0,
        })
    }

    /// Read access to the current state.
    #[must_use]
    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    /// Sets the run totals and restarts the completion counters. A
    /// resumed run re-walks every item; work already on disk comes back
    /// through the existence-based skip, so counters start from zero.
    pub fn set_totals(&mut self, total_skills: u64, total_books: u64) {
        self.state.total_skills = total_skills;
        self.state.total_books = total_books;
        self.state.completed_skills = 0;
        self.state.completed_books = 0;
    }

    /// Marks the first unit of work: `initialized → in_progress`
    /// (also `paused → in_progress` on resume).
    pub fn begin(&mut self, activity: impl Into<String>) {
        if matches!(
            self.state.status,
            SessionStatus::Initialized | SessionStatus::Paused
        ) {
            self.state.status = SessionStatus::InProgress;
        }
        self.state.current_activity = Some(activity.into());
    }

    /// Records one completed book and persists.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Io`] on persist failure (fatal to the job).
    pub fn book_completed(&mut self) -> Result<(), ProgressError> {
        self.state.completed_books += 1;
        self.maybe_complete();
        self.save()
    }

    /// Records one completed topic, checkpointing every tenth, and persists.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Io`] on persist failure.
    pub fn skill_completed(&mut self) -> Result<(), ProgressError> {
        self.state.completed_skills += 1;
        self.topics_since_checkpoint += 1;
        if self.topics_since_checkpoint >= CHECKPOINT_INTERVAL {
            self.topics_since_checkpoint = 0;
            self.state.checkpoints.push(Checkpoint {
                at: Utc::now(),
                completed_skills: self.state.completed_skills,
                completed_books: self.state.completed_books,
            });
        }
        self.maybe_complete();
        self.save()
    }

    /// Records a failed item, keeping the first error per id.
    pub fn record_failure(&mut self, id: &str, kind: &str, message: &str) {
        self.state
            .failed_items
            .entry(id.to_string())
            .or_insert_with(|| FailedItem {
                kind: kind.to_string(),
                message: message.to_string(),
            });
    }

    /// Number of failed items recorded so far.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.state.failed_items.len()
    }

    /// Transitions to `paused` (interrupt) and persists.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Io`] on persist failure.
    pub fn pause(&mut self) -> Result<(), ProgressError> {
        self.state.status = SessionStatus::Paused;
        self.state.current_activity = None;
        self.save()
    }

    /// Transitions to `completed` and persists.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Io`] on persist failure.
    pub fn complete(&mut self) -> Result<(), ProgressError> {
        self.state.status = SessionStatus::Completed;
        self.state.current_activity = None;
        self.save()
    }

    /// Transitions to `failed` (fatal error) and persists.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Io`] on persist failure.
    pub fn fail(&mut self) -> Result<(), ProgressError> {
        self.state.status = SessionStatus::Failed;
        self.save()
    }

    /// Elapsed wall time since the session started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        (Utc::now() - self.state.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Estimated time remaining, or `None` while there is no usable speed
    /// signal (elapsed under a second, or nothing completed yet).
    #[must_use]
    pub fn eta(&self) -> Option<Duration> {
        let elapsed = self.elapsed();
        if elapsed < Duration::from_secs(1) {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let completed = self.state.completed_books as f64;
        #[allow(clippy::cast_precision_loss)]
        let total = self.state.total_books as f64;
        let speed = completed / elapsed.as_secs_f64();
        if speed < MIN_SPEED {
            return None;
        }
        let remaining = (total - completed).max(0.0) / speed;
        Some(Duration::from_secs_f64(remaining))
    }

    /// Persists the state atomically.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Io`] on write failure.
    pub fn save(&mut self) -> Result<(), ProgressError> {
        self.state.last_update = Utc::now();
        fsio::write_json_atomic(&self.path, &self.state).map_err(|source| ProgressError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), "save: progress checkpoint");
        Ok(())
    }

    fn maybe_complete(&mut self) {
        if self.state.total_books > 0
            && self.state.completed_books >= self.state.total_books
            && self.state.completed_skills >= self.state.total_skills
        {
            self.state.status = SessionStatus::Completed;
            self.state.current_activity = None;
        }
    }
}

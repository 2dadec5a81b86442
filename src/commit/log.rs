//! The per-resource commit log.
//!
//! ```text
//! {index}/{type}/
//! ├── _log/
//! │   ├── 00000000000000000001.json
//! │   └── 00000000000000000002.json
//! └── segments/
//!     └── {job}-{task:05}-{seq:06}.ndjson
//! ```
//!
//! Entries are applied in version order. A segment is readable only once an
//! entry names it, so writing an entry is the single visibility point of a job.
//! Entries are created with a conditional put: two jobs racing for the same
//! version cannot both win, and the loser retries with the next one.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use object_store::path::Path;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tracing::debug;

use crate::error::{
    CommitError, CorruptLogSnafu, LogConflictSnafu, LogSerializeSnafu, ReadError, StagingSnafu,
    StorageError, TransientIoSnafu,
};
use crate::storage::StorageProvider;

const LOG_DIR: &str = "_log";

/// Versions a single append may lose to concurrent jobs before giving up.
const MAX_APPEND_ATTEMPTS: u32 = 64;

/// How a job's segments combine with what is already visible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    #[default]
    Append,
    /// Replace every previously visible segment.
    Overwrite,
}

/// A committed NDJSON segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMeta {
    /// Path relative to the resource prefix.
    pub path: String,
    pub records: usize,
    pub bytes: usize,
}

/// One committed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub job_id: String,
    pub mode: WriteMode,
    pub segments: Vec<SegmentMeta>,
    pub committed_at: DateTime<Utc>,
}

/// Segments visible at a given log version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub version: u64,
    pub segments: Vec<SegmentMeta>,
}

/// Reader and appender for a resource's `_log/`.
#[derive(Debug, Clone)]
pub struct CommitLog {
    storage: StorageProvider,
}

impl CommitLog {
    /// `storage` must be scoped to the resource prefix.
    pub fn new(storage: StorageProvider) -> Self {
        Self { storage }
    }

    fn entry_path(version: u64) -> Path {
        Path::from(format!("{LOG_DIR}/{version:020}.json"))
    }

    async fn versions(&self) -> Result<Vec<(u64, Path)>, StorageError> {
        let listed = self.storage.list(&Path::from(LOG_DIR)).await?;
        Ok(listed
            .into_iter()
            .filter_map(|object| {
                let version = object
                    .path
                    .filename()?
                    .strip_suffix(".json")?
                    .parse::<u64>()
                    .ok()?;
                Some((version, object.path))
            })
            .collect())
    }

    /// Record `entry` as the next free version. Returns that version.
    pub async fn append(&self, entry: &LogEntry) -> Result<u64, CommitError> {
        let body = Bytes::from(serde_json::to_vec(entry).context(LogSerializeSnafu)?);

        for _ in 0..MAX_APPEND_ATTEMPTS {
            let latest = self
                .versions()
                .await
                .context(StagingSnafu)?
                .last()
                .map(|(v, _)| *v)
                .unwrap_or(0);
            let version = latest + 1;

            let created = self
                .storage
                .put_if_absent(&Self::entry_path(version), body.clone())
                .await
                .context(StagingSnafu)?;
            if created {
                debug!(job = %entry.job_id, version, segments = entry.segments.len(), "Appended log entry");
                return Ok(version);
            }
            debug!(job = %entry.job_id, version, "Log version taken by another job, retrying");
        }

        LogConflictSnafu {
            attempts: MAX_APPEND_ATTEMPTS,
        }
        .fail()
    }

    /// Fold every entry into the currently visible segment list.
    pub async fn snapshot(&self) -> Result<Snapshot, ReadError> {
        self.snapshot_at(u64::MAX).await
    }

    /// Fold the entries up to and including `version`.
    pub async fn snapshot_at(&self, version: u64) -> Result<Snapshot, ReadError> {
        let mut snapshot = Snapshot::default();
        for (v, path) in self.versions().await.context(TransientIoSnafu)? {
            if v > version {
                break;
            }
            let bytes = self.storage.get(&path).await.context(TransientIoSnafu)?;
            let entry: LogEntry = serde_json::from_slice(&bytes).context(CorruptLogSnafu {
                path: path.to_string(),
            })?;
            match entry.mode {
                WriteMode::Append => snapshot.segments.extend(entry.segments),
                WriteMode::Overwrite => snapshot.segments = entry.segments,
            }
            snapshot.version = v;
        }
        Ok(snapshot)
    }

    /// Delete the segment files hidden by the overwrite committed at `version`.
    ///
    /// Readers still draining a snapshot older than `version` lose those
    /// segments. Returns the number of files deleted.
    pub async fn prune_superseded(&self, version: u64) -> Result<usize, ReadError> {
        let hidden = self.snapshot_at(version.saturating_sub(1)).await?;
        for segment in &hidden.segments {
            self.storage
                .delete(&Path::from(segment.path.as_str()))
                .await
                .context(TransientIoSnafu)?;
        }
        debug!(version, removed = hidden.segments.len(), "Pruned superseded segments");
        Ok(hidden.segments.len())
    }
}

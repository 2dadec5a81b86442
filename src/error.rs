//! Error types for glacier using snafu.
//!
//! Each concern gets its own enum with context selectors; `JobError` is the
//! top-level aggregate returned by the job runners and the binary.

use snafu::prelude::*;

use crate::commit::TaskCommitState;

// ============ Config Errors ============

/// Errors raised while building job configuration. None of these are
/// retryable: a job that fails here is never scheduled.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// The table properties carry no usable resource location.
    #[snafu(display("No location specified"))]
    NoLocation,

    /// Neither the table properties nor the ambient settings name a host.
    #[snafu(display("No store address could be determined (set 'store.host')"))]
    NoAddress,

    /// A port value is not a positive 16-bit integer.
    #[snafu(display("Invalid port '{value}'"))]
    InvalidPort { value: String },

    /// An ambient setting has a value of the wrong shape.
    #[snafu(display("Invalid value '{value}' for setting '{key}'"))]
    InvalidSetting { key: String, value: String },

    /// The configured output committer is not one this connector implements.
    #[snafu(display("Unsupported output committer '{name}'"))]
    UnsupportedCommitter { name: String },

    /// A configuration option is out of range.
    #[snafu(display("{message}"))]
    InvalidOption { message: String },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file: {source}"))]
    ReadFile { source: std::io::Error },
}

// ============ Storage Errors ============

/// Errors that can occur talking to the document store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// The resolved endpoint could not be turned into a store client.
    #[snafu(display("Invalid store endpoint {url}: {source}"))]
    InvalidEndpoint {
        url: String,
        source: object_store::Error,
    },

    /// A local store root could not be opened.
    #[snafu(display("Cannot open local store at {path}: {source}"))]
    LocalRoot {
        path: String,
        source: object_store::Error,
    },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed: {source}"))]
    ObjectStore { source: object_store::Error },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }
}

// ============ Resource Errors ============

/// A resource path that is non-blank but structurally unusable.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ResourceError {
    /// The index segment is empty (e.g. `/type`).
    #[snafu(display("Resource '{resource}' has an empty index name"))]
    EmptyIndex { resource: String },

    /// A segment contains characters that cannot form a store path.
    #[snafu(display("Resource '{resource}' has an invalid segment '{segment}'"))]
    InvalidName { resource: String, segment: String },

    /// More than `index/type` was given.
    #[snafu(display("Resource '{resource}' must be 'index' or 'index/type'"))]
    TooManySegments { resource: String },

    /// The query fragment uses a syntax the connector does not understand.
    #[snafu(display("Unsupported query '{query}': expected 'q=*' or 'q=field:value'"))]
    UnsupportedQuery { query: String },
}

// ============ Read Errors ============

/// Errors surfaced while iterating records.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReadError {
    /// Network or store blip; the host may retry the task.
    #[snafu(display("Transient I/O error while reading: {source}"))]
    TransientIo { source: StorageError },

    /// The resource path or query is malformed; retrying cannot help.
    #[snafu(display("Invalid query: {source}"))]
    FatalQuery { source: ResourceError },

    /// A stored line is not a JSON document.
    #[snafu(display("Corrupt record in {path} at line {line}: {source}"))]
    CorruptRecord {
        path: String,
        line: usize,
        source: serde_json::Error,
    },

    /// Reader settings are malformed.
    #[snafu(display("Invalid reader settings: {source}"))]
    ReadSettings { source: ConfigError },

    /// A commit log entry could not be decoded.
    #[snafu(display("Corrupt commit log entry {path}: {source}"))]
    CorruptLog {
        path: String,
        source: serde_json::Error,
    },
}

impl ReadError {
    /// Whether the host framework should schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReadError::TransientIo { .. })
    }
}

// ============ Write Errors ============

/// Errors surfaced by the output connector.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WriteError {
    /// The write target is malformed.
    #[snafu(display("Invalid write target: {source}"))]
    Target { source: ResourceError },

    /// Failed to open the task's store connection.
    #[snafu(display("Failed to set up writer: {source}"))]
    WriterSetup { source: StorageError },

    /// A record could not be encoded.
    #[snafu(display("Failed to serialize record: {source}"))]
    Serialize { source: serde_json::Error },

    /// A batch could not be persisted; the whole batch is failed.
    #[snafu(display("Failed to flush batch {batch} ({records} records): {source}"))]
    Flush {
        batch: usize,
        records: usize,
        source: StorageError,
    },

    /// A previous flush failed; the attempt can only be aborted.
    #[snafu(display("Writer is poisoned by an earlier flush failure"))]
    Poisoned,

    /// Batch sizing settings are malformed.
    #[snafu(display("Invalid writer settings: {source}"))]
    Settings { source: ConfigError },

    /// The coordinator refused to register the attempt.
    #[snafu(display("Failed to register task attempt: {source}"))]
    Register { source: CommitError },
}

impl WriteError {
    /// Whether a fresh attempt of the task could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WriteError::WriterSetup { .. } | WriteError::Flush { .. })
    }
}

// ============ Commit Errors ============

/// Errors raised by the commit coordinator.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CommitError {
    /// Attempt states only move out of `Pending`.
    #[snafu(display("Attempt {attempt} cannot move from {from} to {to}"))]
    InvalidTransition {
        attempt: String,
        from: TaskCommitState,
        to: TaskCommitState,
    },

    /// The attempt was never registered with `setup_task`.
    #[snafu(display("Unknown task attempt {attempt}"))]
    UnknownAttempt { attempt: String },

    /// Another attempt of the same task already committed.
    #[snafu(display("Task {task} was already committed by another attempt"))]
    AlreadyCommitted { task: u32 },

    /// A staging operation failed.
    #[snafu(display("Staging operation failed: {source}"))]
    Staging { source: StorageError },

    /// Commit log entry could not be encoded.
    #[snafu(display("Failed to serialize commit log entry: {source}"))]
    LogSerialize { source: serde_json::Error },

    /// The job was already committed or aborted.
    #[snafu(display("Job {job_id} is already finalized"))]
    JobFinalized { job_id: String },

    /// Concurrent jobs kept taking the next log version.
    #[snafu(display("Gave up appending to the commit log after {attempts} conflicting writes"))]
    LogConflict { attempts: u32 },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Job Error (top-level) ============

/// Top-level errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum JobError {
    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Storage error.
    #[snafu(display("Storage error"))]
    Storage { source: StorageError },

    /// Read error.
    #[snafu(display("Read error"))]
    Read { source: ReadError },

    /// Write error.
    #[snafu(display("Write error"))]
    Write { source: WriteError },

    /// Commit error.
    #[snafu(display("Commit error"))]
    Commit { source: CommitError },

    /// Task join error.
    #[snafu(display("Task join error"))]
    TaskJoin { source: tokio::task::JoinError },

    /// A task exhausted its attempts.
    #[snafu(display("Task {task} failed after {attempts} attempts"))]
    TaskFailed { task: u32, attempts: u32 },

    /// The coordinator decided the job's output is not visible.
    #[snafu(display("Job {job_id} was not committed (failed tasks: {failed_tasks:?})"))]
    NotCommitted {
        job_id: String,
        failed_tasks: Vec<u32>,
    },

    /// The job was cancelled before it finished.
    #[snafu(display("Job cancelled"))]
    Cancelled,

    /// Address parsing error.
    #[snafu(display("Failed to parse address"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },

    /// Failed to read an import file.
    #[snafu(display("Failed to read input file {path}"))]
    InputFile {
        path: String,
        source: std::io::Error,
    },

    /// An import line is not a JSON document.
    #[snafu(display("Invalid record at input line {line}"))]
    InputRecord {
        line: usize,
        source: serde_json::Error,
    },

    /// A record could not be encoded for output.
    #[snafu(display("Failed to encode record"))]
    Encode { source: serde_json::Error },

    /// Failed to write command output.
    #[snafu(display("Failed to write output"))]
    Output { source: std::io::Error },
}

impl From<ConfigError> for JobError {
    fn from(source: ConfigError) -> Self {
        JobError::Config { source }
    }
}

impl From<ReadError> for JobError {
    fn from(source: ReadError) -> Self {
        JobError::Read { source }
    }
}

impl From<CommitError> for JobError {
    fn from(source: CommitError) -> Self {
        JobError::Commit { source }
    }
}

impl From<WriteError> for JobError {
    fn from(source: WriteError) -> Self {
        JobError::Write { source }
    }
}

impl From<StorageError> for JobError {
    fn from(source: StorageError) -> Self {
        JobError::Storage { source }
    }
}

//! glacier: bulk transfer between partitioned compute jobs and a document store.
//!
//! The crate binds a host engine's storage-handler contract to a lazy input
//! connector and a batching output connector. Writes go through a two-phase
//! task/job commit, so a job's documents become visible all at once or not at
//! all.
//!
//! # Example
//!
//! ```ignore
//! use glacier::{Config, WriteJob, signal::shutdown_token};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), glacier::error::JobError> {
//!     let config = Config::from_file("job.yaml")?;
//!     let job = WriteJob::new(config.job_config()?, config.connector());
//!     let report = job.run(partitions, shutdown_token()).await?;
//!     println!("job {} -> {:?}", report.job_id, report.outcome);
//!     Ok(())
//! }
//! ```

pub mod commit;
pub mod config;
pub mod error;
pub mod handler;
pub mod job;
pub mod metrics;
pub mod record;
pub mod resource;
pub mod signal;
pub mod sink;
pub mod source;
pub mod storage;

// Re-export main types
pub use commit::{CommitCoordinator, JobOutcome, TaskAttemptId, TaskCommitState, WriteMode};
pub use config::{Config, Endpoint, JobConfig, Settings, TableProperties};
pub use handler::{DocumentStoreHandler, StorageHandler};
pub use job::{JobReport, ReadJob, WriteJob};
pub use record::{Record, RecordSerde};
pub use sink::{OutputConnector, RecordWriter};
pub use source::{InputConnector, InputSplit, RecordReader};
pub use storage::{StorageProvider, StoreConnector};

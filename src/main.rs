//! glacier: move documents between NDJSON files and a document store.
//!
//! `plan` validates a job file, `export` streams every visible record to
//! stdout, and `import` writes a file as one committed job.

use bytes::BytesMut;
use clap::{Parser, Subcommand};
use snafu::prelude::*;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use glacier::config::Config;
use glacier::error::{
    AddressParseSnafu, ConfigSnafu, EncodeSnafu, InputFileSnafu, InputRecordSnafu, JobError,
    MetricsSnafu, NotCommittedSnafu, OutputSnafu,
};
use glacier::job::{ReadJob, WriteJob, partition};
use glacier::signal::shutdown_token;
use glacier::{JobOutcome, Record, RecordSerde, WriteMode, metrics};

/// Bulk transfer connector for a document store.
#[derive(Parser, Debug)]
#[command(name = "glacier")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the job file.
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the job file and print the resolved job configuration.
    Plan,
    /// Write every visible record to stdout as NDJSON.
    Export,
    /// Write an NDJSON file to the store as a single job.
    Import {
        /// NDJSON input file.
        #[arg(short, long)]
        input: PathBuf,

        /// Number of write tasks (defaults to `job.partitions`).
        #[arg(long)]
        partitions: Option<usize>,

        /// Replace everything currently visible instead of appending.
        #[arg(long)]
        overwrite: bool,
    },
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), JobError> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_file(&args.config).context(ConfigSnafu)?;
    let job_config = config.job_config().context(ConfigSnafu)?;

    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        metrics::init(addr).context(MetricsSnafu)?;
        debug!(
            "Metrics endpoint listening on http://{}/metrics",
            config.metrics.address
        );
    }

    match args.command {
        Command::Plan => {
            let mut out = std::io::stdout().lock();
            writeln!(out, "endpoint: {}", job_config.endpoint()).context(OutputSnafu)?;
            writeln!(out, "resource: {}", job_config.resource()).context(OutputSnafu)?;
            writeln!(out, "committer: {}", job_config.committer()).context(OutputSnafu)?;
            for (key, value) in job_config.settings().iter() {
                writeln!(out, "  {key} = {value}").context(OutputSnafu)?;
            }
            info!("Configuration is valid");
        }
        Command::Export => {
            let records = ReadJob::new(job_config, config.connector())
                .with_max_concurrent_tasks(config.job.max_concurrent_tasks)
                .run(shutdown_token())
                .await?;

            let mut buf = BytesMut::new();
            for record in &records {
                RecordSerde.encode(record, &mut buf).context(EncodeSnafu)?;
            }
            std::io::stdout().lock().write_all(&buf).context(OutputSnafu)?;
            info!(records = records.len(), "Export complete");
        }
        Command::Import {
            input,
            partitions,
            overwrite,
        } => {
            let records = read_input(&input)?;
            let partitions = partition(records, partitions.unwrap_or(config.job.partitions));
            let mode = if overwrite {
                WriteMode::Overwrite
            } else {
                WriteMode::Append
            };

            let report = WriteJob::new(job_config, config.connector())
                .with_mode(mode)
                .with_max_concurrent_tasks(config.job.max_concurrent_tasks)
                .run(partitions, shutdown_token())
                .await?;

            match report.outcome {
                JobOutcome::Visible { version } => {
                    info!(
                        job = %report.job_id,
                        version,
                        records = report.records,
                        attempts = report.attempts,
                        "Import committed"
                    );
                }
                JobOutcome::NotVisible { failed_tasks } => {
                    return NotCommittedSnafu {
                        job_id: report.job_id,
                        failed_tasks,
                    }
                    .fail();
                }
            }
        }
    }

    Ok(())
}

/// Read an NDJSON file into records, skipping blank lines.
fn read_input(path: &Path) -> Result<Vec<Record>, JobError> {
    let input = path.display().to_string();
    let file = std::fs::File::open(path).context(InputFileSnafu { path: &input })?;

    let mut records = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.context(InputFileSnafu { path: &input })?;
        if line.trim().is_empty() {
            continue;
        }
        let record = RecordSerde
            .decode(line.as_bytes())
            .context(InputRecordSnafu { line: i + 1 })?;
        records.push(record);
    }
    debug!(path = %input, records = records.len(), "Read input file");
    Ok(records)
}

//! Integration tests for glacier

use glacier::commit::{CommitCoordinator, JobOutcome, TaskAttemptId, TaskCommitState, WriteMode};
use glacier::config::{Config, JobConfig, Settings, TableProperties, keys};
use glacier::error::{ConfigError, JobError};
use glacier::job::{ReadJob, WriteJob, partition};
use glacier::record::Record;
use glacier::sink::OutputConnector;
use glacier::storage::{LocalConnector, MemoryConnector, StoreConnector};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn ambient() -> Settings {
    Settings::new()
        .with(keys::HOST, "es0")
        .with(keys::PORT, "9200")
}

fn job_config(location: &str) -> JobConfig {
    let table = TableProperties::new().with(keys::LOCATION, location);
    JobConfig::build_with_defaults(&table, &ambient()).unwrap()
}

fn records(range: std::ops::Range<i64>) -> Vec<Record> {
    range
        .map(|i| {
            Record::new()
                .with("id", i)
                .with("user", if i % 2 == 0 { "kimchy" } else { "other" })
        })
        .collect()
}

fn ids(records: &[Record]) -> Vec<i64> {
    records
        .iter()
        .map(|r| r.get("id").and_then(|v| v.as_i64()).unwrap())
        .collect()
}

mod config_tests {
    use super::*;

    #[test]
    fn test_resolves_ambient_address() {
        let config = job_config("my_index/my_type");
        assert_eq!(config.get(keys::ADDRESS), Some("es0:9200"));
        assert_eq!(config.resource(), "my_index/my_type");
        assert_eq!(config.query(), config.resource());
    }

    #[test]
    fn test_blank_location_is_rejected() {
        let table = TableProperties::new().with(keys::LOCATION, "");
        let err = JobConfig::build_with_defaults(&table, &ambient()).unwrap_err();
        assert_eq!(err.to_string(), "No location specified");
    }

    #[test]
    fn test_no_address_source() {
        let table = TableProperties::new().with(keys::LOCATION, "logs");
        let err = JobConfig::build_with_defaults(&table, &Settings::new()).unwrap_err();
        assert!(matches!(err, ConfigError::NoAddress));
    }

    #[test]
    fn test_job_file_with_env_interpolation() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("job.yaml");
        // SAFETY: test-only variable with a name no other test uses.
        unsafe { std::env::set_var("GLACIER_IT_HOST", "es7") };
        std::fs::write(
            &path,
            r#"
table:
  store.location: "logs/event"
settings:
  store.host: "${GLACIER_IT_HOST}"
  store.port: "${GLACIER_IT_PORT:-9201}"
job:
  partitions: 2
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.job.partitions, 2);
        assert_eq!(
            config.job_config().unwrap().endpoint().to_string(),
            "es7:9201"
        );
    }
}

mod transfer_tests {
    use super::*;

    #[tokio::test]
    async fn test_write_then_read_in_split_order() {
        let connector: Arc<dyn StoreConnector> = Arc::new(MemoryConnector::new());
        let config = job_config("logs/event");

        let report = WriteJob::new(config.clone(), Arc::clone(&connector))
            .run(partition(records(0..250), 3), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.outcome, JobOutcome::Visible { version: 1 });
        assert_eq!(report.records, 250);
        assert_eq!(report.attempts, 3);

        let read = ReadJob::new(config, connector)
            .run(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ids(&read), (0..250).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_small_batches_produce_many_segments() {
        let connector: Arc<dyn StoreConnector> = Arc::new(MemoryConnector::new());
        let table = TableProperties::new().with(keys::LOCATION, "logs");
        let config = JobConfig::build_with_defaults(
            &table,
            &ambient().with(keys::BATCH_SIZE_ENTRIES, "100"),
        )
        .unwrap();

        WriteJob::new(config.clone(), Arc::clone(&connector))
            .run(vec![records(0..250)], CancellationToken::new())
            .await
            .unwrap();

        let input = glacier::InputConnector::new(connector);
        let splits = input.splits(&config).await.unwrap();
        let sizes: Vec<usize> = splits.iter().map(|s| s.segment.records).collect();
        assert_eq!(sizes, [100, 100, 50]);
    }

    #[tokio::test]
    async fn test_query_filters_records() {
        let connector: Arc<dyn StoreConnector> = Arc::new(MemoryConnector::new());
        WriteJob::new(job_config("logs/event"), Arc::clone(&connector))
            .run(partition(records(0..10), 2), CancellationToken::new())
            .await
            .unwrap();

        let read = ReadJob::new(job_config("logs/event?q=user:kimchy"), connector)
            .run(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ids(&read), [0, 2, 4, 6, 8]);
    }

    #[tokio::test]
    async fn test_overwrite_hides_earlier_jobs() {
        let connector: Arc<dyn StoreConnector> = Arc::new(MemoryConnector::new());
        let config = job_config("logs/event");

        WriteJob::new(config.clone(), Arc::clone(&connector))
            .run(vec![records(0..5)], CancellationToken::new())
            .await
            .unwrap();
        WriteJob::new(config.clone(), Arc::clone(&connector))
            .run(vec![records(5..8)], CancellationToken::new())
            .await
            .unwrap();
        let report = WriteJob::new(config.clone(), Arc::clone(&connector))
            .with_mode(WriteMode::Overwrite)
            .run(vec![records(100..102)], CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.outcome, JobOutcome::Visible { version: 3 });

        let read = ReadJob::new(config, connector)
            .run(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ids(&read), [100, 101]);
    }

    #[tokio::test]
    async fn test_local_backend_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let connector: Arc<dyn StoreConnector> = Arc::new(LocalConnector::new(dir.path()));
        let config = job_config("logs/event");

        WriteJob::new(config.clone(), Arc::clone(&connector))
            .run(partition(records(0..20), 4), CancellationToken::new())
            .await
            .unwrap();
        assert!(dir.path().join("logs/event/_log").is_dir());

        let read = ReadJob::new(config, connector)
            .run(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(read.len(), 20);
    }

    #[tokio::test]
    async fn test_missing_index_reads_nothing() {
        let read = ReadJob::new(job_config("nothing/here"), Arc::new(MemoryConnector::new()))
            .run(CancellationToken::new())
            .await
            .unwrap();
        assert!(read.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_resource_fails_read() {
        let err = ReadJob::new(job_config("a/b/c"), Arc::new(MemoryConnector::new()))
            .run(CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Read { .. }));
    }
}

mod commit_tests {
    use super::*;

    #[tokio::test]
    async fn test_aborted_attempt_never_visible() {
        let connector = Arc::new(MemoryConnector::new());
        let config = job_config("logs/event");
        let coordinator = Arc::new(
            CommitCoordinator::new(&config, connector.as_ref(), WriteMode::Append).unwrap(),
        );
        let output = OutputConnector::new(connector.clone());

        let mut ok = output
            .open(&config, TaskAttemptId::new(0, 0), Arc::clone(&coordinator))
            .await
            .unwrap();
        for record in records(0..10) {
            ok.write(&record).await.unwrap();
        }
        assert_eq!(ok.close().await, TaskCommitState::Committed);

        // Cancelled mid-batch with 40 buffered records.
        let mut cancelled = output
            .open(&config, TaskAttemptId::new(1, 0), Arc::clone(&coordinator))
            .await
            .unwrap();
        for record in records(100..140) {
            cancelled.write(&record).await.unwrap();
        }
        assert_eq!(cancelled.stats().batches, 0);
        assert_eq!(cancelled.abort().await, TaskCommitState::Aborted);

        let outcome = coordinator.commit_job(2).await.unwrap();
        assert_eq!(
            outcome,
            JobOutcome::NotVisible {
                failed_tasks: vec![1]
            }
        );

        let read = ReadJob::new(config, connector)
            .run(CancellationToken::new())
            .await
            .unwrap();
        assert!(read.is_empty());
    }

    #[tokio::test]
    async fn test_retried_task_commits_only_winning_attempt() {
        let connector = Arc::new(MemoryConnector::new());
        let config = job_config("logs/event");
        let coordinator = Arc::new(
            CommitCoordinator::new(&config, connector.as_ref(), WriteMode::Append).unwrap(),
        );
        let output = OutputConnector::new(connector.clone());

        let first = TaskAttemptId::new(0, 0);
        let mut writer = output
            .open(&config, first, Arc::clone(&coordinator))
            .await
            .unwrap();
        writer.write(&records(0..1)[0]).await.unwrap();
        writer.flush().await.unwrap();
        assert_eq!(writer.abort().await, TaskCommitState::Aborted);

        let mut writer = output
            .open(&config, first.retry(), Arc::clone(&coordinator))
            .await
            .unwrap();
        writer.write(&records(7..8)[0]).await.unwrap();
        assert_eq!(writer.close().await, TaskCommitState::Committed);

        assert!(coordinator.commit_job(1).await.unwrap().is_visible());
        let read = ReadJob::new(config, connector)
            .run(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ids(&read), [7]);
    }

    #[tokio::test]
    async fn test_cancelled_job_is_aborted() {
        let connector: Arc<dyn StoreConnector> = Arc::new(MemoryConnector::new());
        let config = job_config("logs/event");
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let err = WriteJob::new(config.clone(), Arc::clone(&connector))
            .run(partition(records(0..50), 2), shutdown)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Cancelled));

        let read = ReadJob::new(config, connector)
            .run(CancellationToken::new())
            .await
            .unwrap();
        assert!(read.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_committer_fails_before_writing() {
        let table = TableProperties::new().with(keys::LOCATION, "logs");
        let ambient = ambient().with(keys::OUTPUT_COMMITTER, "host.default");
        let config = JobConfig::build(
            &table,
            &ambient,
            glacier::config::CommitterPolicy::RespectHost,
        )
        .unwrap();

        let err = WriteJob::new(config, Arc::new(MemoryConnector::new()))
            .run(vec![records(0..3)], CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            JobError::Config {
                source: ConfigError::UnsupportedCommitter { .. }
            }
        ));
    }
}

mod handler_tests {
    use super::*;
    use glacier::handler::{Capability, DocumentStoreHandler, StorageHandler};

    #[tokio::test]
    async fn test_handler_formats_share_connector() {
        let connector = Arc::new(MemoryConnector::new());
        let handler = DocumentStoreHandler::new(connector.clone());
        let table = TableProperties::new().with(keys::LOCATION, "logs/event");
        let config = handler
            .configure_output_job_properties(&table, &ambient())
            .unwrap();

        let coordinator = Arc::new(
            CommitCoordinator::new(&config, connector.as_ref(), WriteMode::Append).unwrap(),
        );
        let mut writer = handler
            .output_format()
            .open(&config, TaskAttemptId::new(0, 0), coordinator)
            .await
            .unwrap();
        writer.write(&Record::new().with("a", json!(1))).await.unwrap();
        assert_eq!(writer.close().await, TaskCommitState::Committed);

        assert!(!handler.supports(Capability::MetaHook));
        assert!(handler.meta_hook().is_none());
    }
}

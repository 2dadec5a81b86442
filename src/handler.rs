//! Storage handler: the surface a host query engine binds to.
//!
//! A host asks the handler for the connector's input and output formats and
//! its serializer, and has it turn table properties into job configuration.
//! Optional capabilities are exposed as `Option`s so a host checks for them
//! up front instead of calling something that can only fail.

use std::fmt;
use std::sync::Arc;

use crate::config::{CommitterPolicy, JobConfig, Settings, TableProperties};
use crate::error::ConfigError;
use crate::record::RecordSerde;
use crate::sink::OutputConnector;
use crate::source::InputConnector;
use crate::storage::StoreConnector;

/// Things a storage handler may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    InputFormat,
    OutputFormat,
    Serde,
    ConfigureInput,
    ConfigureOutput,
    /// Table lifecycle callbacks from the metastore.
    MetaHook,
    /// Per-table job properties applied outside input/output configuration.
    TableJobProperties,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::InputFormat => "input_format",
            Capability::OutputFormat => "output_format",
            Capability::Serde => "serde",
            Capability::ConfigureInput => "configure_input",
            Capability::ConfigureOutput => "configure_output",
            Capability::MetaHook => "meta_hook",
            Capability::TableJobProperties => "table_job_properties",
        };
        f.write_str(name)
    }
}

/// Metastore callbacks around table creation and removal.
pub trait MetaHook: Send + Sync {
    fn pre_create_table(&self, table: &TableProperties) -> Result<(), ConfigError>;
    fn rollback_create_table(&self, table: &TableProperties) -> Result<(), ConfigError>;
    fn drop_table(&self, table: &TableProperties, delete_data: bool) -> Result<(), ConfigError>;
}

/// Applies table properties to a job outside the input/output paths.
pub trait TableJobConfigurer: Send + Sync {
    fn configure_table_job_properties(
        &self,
        table: &TableProperties,
        job: &mut Settings,
    ) -> Result<(), ConfigError>;
}

/// Capability interface between a host engine and a storage connector.
pub trait StorageHandler: Send + Sync {
    fn input_format(&self) -> InputConnector;

    fn output_format(&self) -> OutputConnector;

    fn serde(&self) -> RecordSerde;

    /// Job configuration for reading `table`.
    fn configure_input_job_properties(
        &self,
        table: &TableProperties,
        ambient: &Settings,
    ) -> Result<JobConfig, ConfigError>;

    /// Job configuration for writing `table`.
    fn configure_output_job_properties(
        &self,
        table: &TableProperties,
        ambient: &Settings,
    ) -> Result<JobConfig, ConfigError>;

    fn meta_hook(&self) -> Option<&dyn MetaHook> {
        None
    }

    fn table_job_properties(&self) -> Option<&dyn TableJobConfigurer> {
        None
    }

    fn capabilities(&self) -> Vec<Capability>;

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

/// Handler for the document store connector.
#[derive(Debug, Clone)]
pub struct DocumentStoreHandler {
    connector: Arc<dyn StoreConnector>,
    policy: CommitterPolicy,
}

impl DocumentStoreHandler {
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        Self::with_policy(connector, CommitterPolicy::default())
    }

    pub fn with_policy(connector: Arc<dyn StoreConnector>, policy: CommitterPolicy) -> Self {
        Self { connector, policy }
    }

    fn configure(
        &self,
        table: &TableProperties,
        ambient: &Settings,
    ) -> Result<JobConfig, ConfigError> {
        JobConfig::build(table, ambient, self.policy)
    }
}

impl StorageHandler for DocumentStoreHandler {
    fn input_format(&self) -> InputConnector {
        InputConnector::new(Arc::clone(&self.connector))
    }

    fn output_format(&self) -> OutputConnector {
        OutputConnector::new(Arc::clone(&self.connector))
    }

    fn serde(&self) -> RecordSerde {
        RecordSerde
    }

    fn configure_input_job_properties(
        &self,
        table: &TableProperties,
        ambient: &Settings,
    ) -> Result<JobConfig, ConfigError> {
        self.configure(table, ambient)
    }

    fn configure_output_job_properties(
        &self,
        table: &TableProperties,
        ambient: &Settings,
    ) -> Result<JobConfig, ConfigError> {
        self.configure(table, ambient)
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::InputFormat,
            Capability::OutputFormat,
            Capability::Serde,
            Capability::ConfigureInput,
            Capability::ConfigureOutput,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::keys;
    use crate::storage::MemoryConnector;

    fn handler() -> DocumentStoreHandler {
        DocumentStoreHandler::new(Arc::new(MemoryConnector::new()))
    }

    #[test]
    fn test_optional_capabilities_absent() {
        let handler = handler();
        assert!(handler.meta_hook().is_none());
        assert!(handler.table_job_properties().is_none());
        assert!(!handler.supports(Capability::MetaHook));
        assert!(!handler.supports(Capability::TableJobProperties));
        assert!(handler.supports(Capability::Serde));
    }

    #[test]
    fn test_input_and_output_configuration_agree() {
        let handler = handler();
        let table = TableProperties::new()
            .with(keys::LOCATION, "my_index/my_type")
            .with(keys::HOST, "es0");
        let ambient = Settings::new();

        let input = handler
            .configure_input_job_properties(&table, &ambient)
            .unwrap();
        let output = handler
            .configure_output_job_properties(&table, &ambient)
            .unwrap();
        assert_eq!(input, output);
        assert_eq!(input.get(keys::ADDRESS), Some("es0:9200"));
    }

    #[test]
    fn test_blank_location_fails_both_paths() {
        let handler = handler();
        let table = TableProperties::new()
            .with(keys::LOCATION, " ")
            .with(keys::HOST, "es0");
        for result in [
            handler.configure_input_job_properties(&table, &Settings::new()),
            handler.configure_output_job_properties(&table, &Settings::new()),
        ] {
            assert_eq!(result.unwrap_err().to_string(), "No location specified");
        }
    }
}

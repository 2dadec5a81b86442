//! Job configuration builder.
//!
//! Turns table properties plus the host's ambient settings into the
//! immutable [`JobConfig`] every task of a job reads. Validation happens here,
//! before any task is scheduled or any network I/O is attempted.

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tracing::debug;

use super::endpoint::{self, Endpoint, parse_port};
use super::settings::{Settings, TableProperties, keys};
use crate::config::MB;
use crate::error::{ConfigError, NoLocationSnafu};

/// Name of the staging committer implemented by [`crate::commit`].
pub const STAGING_COMMITTER: &str = "glacier.staging";

/// Default number of records per flushed batch.
pub const DEFAULT_BATCH_SIZE_ENTRIES: usize = 1000;
/// Default encoded bytes per flushed batch.
pub const DEFAULT_BATCH_SIZE_BYTES: usize = MB;
/// Default records decoded per fetch.
pub const DEFAULT_SCROLL_SIZE: usize = 1000;
/// Default attempts per task.
pub const DEFAULT_TASK_MAX_ATTEMPTS: u32 = 4;

/// What to do when the ambient settings already name an output committer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitterPolicy {
    /// Always install the staging committer.
    #[default]
    Pin,
    /// Keep a committer the host already configured.
    RespectHost,
}

/// Immutable, per-job settings shared by every task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConfig {
    endpoint: Endpoint,
    resource: String,
    settings: Settings,
}

impl JobConfig {
    /// Build the job configuration, pinning the staging committer.
    pub fn build_with_defaults(
        table: &TableProperties,
        ambient: &Settings,
    ) -> Result<Self, ConfigError> {
        Self::build(table, ambient, CommitterPolicy::Pin)
    }

    /// Build the job configuration.
    ///
    /// Fails with [`ConfigError::NoLocation`] when `store.location` is blank or
    /// absent, and with address errors from [`endpoint::resolve`].
    pub fn build(
        table: &TableProperties,
        ambient: &Settings,
        policy: CommitterPolicy,
    ) -> Result<Self, ConfigError> {
        let location = table.get_trimmed(keys::LOCATION).context(NoLocationSnafu)?;

        let port = match table.get_trimmed(keys::PORT) {
            None | Some("0") => None,
            Some(raw) => Some(parse_port(raw)?),
        };
        let endpoint = endpoint::resolve(table.get(keys::HOST), port, ambient)?;

        let mut settings = ambient.clone();
        settings.set(keys::ADDRESS, endpoint.to_string());
        settings.set(keys::QUERY, location);
        settings.set(keys::RESOURCE, location);

        let keep_host_committer =
            policy == CommitterPolicy::RespectHost && ambient.contains(keys::OUTPUT_COMMITTER);
        if !keep_host_committer {
            settings.set(keys::OUTPUT_COMMITTER, STAGING_COMMITTER);
        }

        debug!(
            address = %endpoint,
            resource = location,
            ?policy,
            "Built job configuration"
        );

        Ok(Self {
            endpoint,
            resource: location.to_string(),
            settings,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Write target (`index[/type][?query]`).
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Read query; the same string as the resource.
    pub fn query(&self) -> &str {
        self.settings.get(keys::QUERY).unwrap_or(&self.resource)
    }

    pub fn committer(&self) -> &str {
        self.settings
            .get(keys::OUTPUT_COMMITTER)
            .unwrap_or(STAGING_COMMITTER)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.settings.get(key)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn batch_size_entries(&self) -> Result<usize, ConfigError> {
        self.settings
            .get_positive(keys::BATCH_SIZE_ENTRIES, DEFAULT_BATCH_SIZE_ENTRIES)
    }

    pub fn batch_size_bytes(&self) -> Result<usize, ConfigError> {
        self.settings
            .get_positive(keys::BATCH_SIZE_BYTES, DEFAULT_BATCH_SIZE_BYTES)
    }

    pub fn scroll_size(&self) -> Result<usize, ConfigError> {
        self.settings
            .get_positive(keys::SCROLL_SIZE, DEFAULT_SCROLL_SIZE)
    }

    pub fn max_task_attempts(&self) -> Result<u32, ConfigError> {
        let attempts = self
            .settings
            .get_positive(keys::TASK_MAX_ATTEMPTS, DEFAULT_TASK_MAX_ATTEMPTS as usize)?;
        Ok(u32::try_from(attempts).unwrap_or(u32::MAX))
    }
}

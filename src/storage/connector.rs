//! Connection factories.
//!
//! A connector turns a resolved [`Endpoint`] into a fresh [`StorageProvider`].
//! Connectors are shared; the providers they return are owned by one task.

use object_store::ObjectStore;
use object_store::http::HttpBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{ClientConfigKey, RetryConfig};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use super::StorageProvider;
use crate::config::Endpoint;
use crate::error::{InvalidEndpointSnafu, LocalRootSnafu, StorageError};

/// Opens store connections for tasks.
pub trait StoreConnector: Send + Sync + std::fmt::Debug {
    /// Open a new connection to the store at `endpoint`.
    fn connect(&self, endpoint: &Endpoint) -> Result<StorageProvider, StorageError>;
}

/// Connects over HTTP to `http://host:port`.
#[derive(Debug, Clone, Default)]
pub struct HttpConnector {
    client_options: HashMap<String, String>,
}

impl HttpConnector {
    pub fn new(client_options: HashMap<String, String>) -> Self {
        Self { client_options }
    }
}

impl StoreConnector for HttpConnector {
    fn connect(&self, endpoint: &Endpoint) -> Result<StorageProvider, StorageError> {
        let url = endpoint.url();
        let mut builder = HttpBuilder::new()
            .with_url(&url)
            .with_retry(RetryConfig::default())
            .with_config(ClientConfigKey::AllowHttp, "true");

        for (key, value) in &self.client_options {
            match key.parse::<ClientConfigKey>() {
                Ok(config_key) => builder = builder.with_config(config_key, value),
                Err(_) => warn!(option = %key, "Ignoring unknown client option"),
            }
        }

        let store = builder.build().context(InvalidEndpointSnafu { url: url.clone() })?;
        debug!(endpoint = %endpoint, "Opened store connection");
        Ok(StorageProvider::new(Arc::new(store), url))
    }
}

/// Stores documents in a local directory.
#[derive(Debug, Clone)]
pub struct LocalConnector {
    root: PathBuf,
}

impl LocalConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl StoreConnector for LocalConnector {
    fn connect(&self, endpoint: &Endpoint) -> Result<StorageProvider, StorageError> {
        let root = self.root.display().to_string();
        if let Err(e) = std::fs::create_dir_all(&self.root) {
            warn!(path = %root, error = %e, "Could not create local store root");
        }
        let store = LocalFileSystem::new_with_prefix(&self.root).context(LocalRootSnafu {
            path: root.clone(),
        })?;
        debug!(endpoint = %endpoint, path = %root, "Opened local store");
        Ok(StorageProvider::new(Arc::new(store), format!("file://{root}")))
    }
}

/// An in-process store. Every connection sees the same documents, the way
/// separate connections to one cluster would.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    store: Arc<InMemory>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The backing store, for inspection.
    pub fn store(&self) -> Arc<InMemory> {
        Arc::clone(&self.store)
    }
}

impl StoreConnector for MemoryConnector {
    fn connect(&self, _endpoint: &Endpoint) -> Result<StorageProvider, StorageError> {
        let store: Arc<dyn ObjectStore> = self.store.clone();
        Ok(StorageProvider::new(store, "memory"))
    }
}

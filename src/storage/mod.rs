//! Document store access.
//!
//! Every task opens its own [`StorageProvider`] through a [`StoreConnector`];
//! providers are never shared between tasks. The provider wraps an
//! `object_store` backend and qualifies every path with an optional prefix,
//! so a provider can be scoped to one index.

mod connector;

pub use connector::{HttpConnector, LocalConnector, MemoryConnector, StoreConnector};

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload};
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Instant;

use crate::emit;
use crate::error::{ObjectStoreSnafu, StorageError};
use crate::metrics::events::{
    RequestStatus, StorageOperation, StorageRequest, StorageRequestDuration,
};

/// An object listed under a prefix, with its path relative to the provider root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    pub path: Path,
    pub size: u64,
}

/// A connection to the document store.
#[derive(Clone)]
pub struct StorageProvider {
    object_store: Arc<dyn ObjectStore>,
    prefix: Option<Path>,
    description: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.prefix {
            Some(prefix) => write!(f, "StorageProvider<{}/{}>", self.description, prefix),
            None => write!(f, "StorageProvider<{}>", self.description),
        }
    }
}

impl StorageProvider {
    /// Wrap an object store backend.
    pub fn new(object_store: Arc<dyn ObjectStore>, description: impl Into<String>) -> Self {
        Self {
            object_store,
            prefix: None,
            description: description.into(),
        }
    }

    /// A provider over the same backend whose paths live under `prefix`.
    pub fn scoped(&self, prefix: &Path) -> Self {
        let prefix = match &self.prefix {
            Some(existing) => existing.parts().chain(prefix.parts()).collect(),
            None => prefix.clone(),
        };
        Self {
            object_store: Arc::clone(&self.object_store),
            prefix: Some(prefix),
            description: self.description.clone(),
        }
    }

    fn qualify(&self, path: &Path) -> Path {
        match &self.prefix {
            Some(prefix) => prefix.parts().chain(path.parts()).collect(),
            None => path.clone(),
        }
    }

    fn relativize(&self, path: &Path) -> Path {
        let skip = self.prefix.as_ref().map(|p| p.parts().count()).unwrap_or(0);
        path.parts().skip(skip).collect()
    }

    /// Read a whole object.
    pub async fn get(&self, path: &Path) -> Result<Bytes, StorageError> {
        let start = Instant::now();
        let result = match self.object_store.get(&self.qualify(path)).await {
            Ok(response) => response.bytes().await,
            Err(e) => Err(e),
        };
        record(StorageOperation::Get, start, result.is_ok());
        result.context(ObjectStoreSnafu)
    }

    /// Open an object as a stream of chunks; bytes are fetched as the stream is polled.
    pub async fn get_stream(
        &self,
        path: &Path,
    ) -> Result<BoxStream<'static, Result<Bytes, StorageError>>, StorageError> {
        let start = Instant::now();
        let result = self.object_store.get(&self.qualify(path)).await;
        record(StorageOperation::Get, start, result.is_ok());
        let response = result.context(ObjectStoreSnafu)?;
        Ok(response
            .into_stream()
            .map_err(|source| StorageError::ObjectStore { source })
            .boxed())
    }

    /// Write an object, replacing any previous content.
    pub async fn put(&self, path: &Path, bytes: Bytes) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self
            .object_store
            .put(&self.qualify(path), PutPayload::from(bytes))
            .await;
        record(StorageOperation::Put, start, result.is_ok());
        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Write an object only if nothing exists at `path`. Returns `false` when
    /// the path is already taken.
    ///
    /// Backends without conditional writes fall back to a head check, which
    /// does not exclude a concurrent writer.
    pub async fn put_if_absent(&self, path: &Path, bytes: Bytes) -> Result<bool, StorageError> {
        let start = Instant::now();
        let location = self.qualify(path);
        let opts = PutOptions {
            mode: PutMode::Create,
            ..Default::default()
        };
        let result = match self
            .object_store
            .put_opts(&location, PutPayload::from(bytes.clone()), opts)
            .await
        {
            Ok(_) => Ok(true),
            Err(object_store::Error::AlreadyExists { .. }) => Ok(false),
            Err(object_store::Error::NotImplemented { .. }) => {
                match self.object_store.head(&location).await {
                    Ok(_) => Ok(false),
                    Err(object_store::Error::NotFound { .. }) => self
                        .object_store
                        .put(&location, PutPayload::from(bytes))
                        .await
                        .map(|_| true),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        };
        record(StorageOperation::Put, start, result.is_ok());
        result.context(ObjectStoreSnafu)
    }

    /// Move an object. Server-side where the backend supports it.
    pub async fn rename(&self, from: &Path, to: &Path) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self
            .object_store
            .rename(&self.qualify(from), &self.qualify(to))
            .await;
        record(StorageOperation::Rename, start, result.is_ok());
        result.context(ObjectStoreSnafu)
    }

    /// Delete an object. Deleting a missing object is not an error.
    pub async fn delete(&self, path: &Path) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = match self.object_store.delete(&self.qualify(path)).await {
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            other => other,
        };
        record(StorageOperation::Delete, start, result.is_ok());
        result.context(ObjectStoreSnafu)
    }

    /// List every object under `prefix` (recursively), sorted by path.
    pub async fn list(&self, prefix: &Path) -> Result<Vec<ListedObject>, StorageError> {
        let start = Instant::now();
        let qualified = self.qualify(prefix);
        let result: Result<Vec<_>, _> = self
            .object_store
            .list(Some(&qualified))
            .try_collect()
            .await;
        record(StorageOperation::List, start, result.is_ok());

        let mut objects: Vec<ListedObject> = result
            .context(ObjectStoreSnafu)?
            .into_iter()
            .map(|meta| ListedObject {
                path: self.relativize(&meta.location),
                size: meta.size,
            })
            .collect();
        objects.sort_by(|a, b| a.path.as_ref().cmp(b.path.as_ref()));
        Ok(objects)
    }

    /// Delete every object under `prefix`. Returns the number deleted.
    pub async fn delete_prefix(&self, prefix: &Path) -> Result<usize, StorageError> {
        let objects = self.list(prefix).await?;
        for object in &objects {
            self.delete(&object.path).await?;
        }
        Ok(objects.len())
    }
}

fn record(operation: StorageOperation, start: Instant, ok: bool) {
    let status = if ok {
        RequestStatus::Success
    } else {
        RequestStatus::Error
    };
    emit!(StorageRequest { operation, status });
    emit!(StorageRequestDuration {
        operation,
        duration: start.elapsed(),
    });
}

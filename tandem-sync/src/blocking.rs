//! Bridges the blocking storage layer into async code.

use std::sync::Arc;
use tandem_storage::{StorageResult, Store};

use crate::error::{Result, SyncError};

/// Runs `f` against the store on the blocking thread pool.
pub(crate) async fn with_store<T, F>(store: &Arc<dyn Store>, f: F) -> Result<T>
where
    F: FnOnce(&dyn Store) -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| SyncError::Task(e.to_string()))?
        .map_err(SyncError::from)
}

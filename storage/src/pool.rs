//! Fixed-size database handle pool
//!
//! Bounds concurrent use of a shared database handle with a semaphore.
//! Permits release on drop, so every exit path gives the handle back.

use crate::Database;
use common::{EngineError, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default number of concurrently usable handles
pub const DEFAULT_POOL_SIZE: usize = 5;

/// Permit-bounded database handle pool
#[derive(Clone)]
pub struct HandlePool {
    database: Arc<dyn Database>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl HandlePool {
    #[must_use]
    pub fn new(database: Arc<dyn Database>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            database,
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    #[must_use]
    pub fn with_default_size(database: Arc<dyn Database>) -> Self {
        Self::new(database, DEFAULT_POOL_SIZE)
    }

    /// Pool capacity
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits currently available
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Acquire a handle, waiting for a free permit
    pub async fn acquire(&self) -> Result<PooledHandle> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::database("handle_pool", "pool closed"))?;
        Ok(PooledHandle {
            database: Arc::clone(&self.database),
            _permit: permit,
        })
    }
}

/// A checked-out handle; the permit returns on drop
pub struct PooledHandle {
    database: Arc<dyn Database>,
    _permit: OwnedSemaphorePermit,
}

impl std::ops::Deref for PooledHandle {
    type Target = dyn Database;

    fn deref(&self) -> &Self::Target {
        self.database.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryDatabase;

    #[tokio::test]
    async fn permits_release_on_drop() {
        let database = Arc::new(MemoryDatabase::connected());
        let pool = HandlePool::new(database, 2);
        assert_eq!(pool.available(), 2);

        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);

        drop(first);
        assert_eq!(pool.available(), 1);
        drop(second);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn handle_derefs_to_database() {
        let database = Arc::new(MemoryDatabase::connected());
        let pool = HandlePool::with_default_size(database);
        let handle = pool.acquire().await.unwrap();
        let symbols = handle
            .get_symbols(common::AssetClass::Futures, common::DataFrequency::Daily)
            .await
            .unwrap();
        assert!(symbols.is_empty());
    }
}

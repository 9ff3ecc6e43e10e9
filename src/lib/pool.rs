use crate::config::{Backend, DatabaseConfig};
use crate::database_drivers::utils;
use crate::error::{DatabaseError, Result};
use crate::handle::Handle;
use log::{debug, warn};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Shares up to `pool_size` handles between callers.
///
/// `acquire` hands out an exclusive lease on one connection. Dropping the
/// lease checks the connection back in, unless an operation on it was
/// abandoned or lost its connection, in which case the connection is discarded
/// and a later lease opens a fresh one. Cloning a `Pool` is cheap and clones share state.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: Arc<DatabaseConfig>,
    backend: Backend,
    idle: Mutex<Vec<Handle>>,
    slots: Arc<Semaphore>,
    size: usize,
}

impl PoolInner {
    fn idle(&self) -> MutexGuard<'_, Vec<Handle>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Pool {
    /// Validates `config` without connecting; connections are opened lazily
    /// by `acquire`.
    pub fn new(config: DatabaseConfig) -> Result<Pool> {
        if config.pool_size == 0 {
            return Err(DatabaseError::Configuration(
                "pool_size must be greater than zero".to_string(),
            ));
        }

        let backend = config.backend()?;
        let size = config.pool_size;

        Ok(Pool {
            inner: Arc::new(PoolInner {
                config: Arc::new(config),
                backend,
                idle: Mutex::new(Vec::with_capacity(size)),
                slots: Arc::new(Semaphore::new(size)),
                size,
            }),
        })
    }

    pub async fn acquire(&self) -> Result<PooledHandle> {
        let slots = self.inner.slots.clone();
        let permit = utils::with_deadline(self.inner.config.acquire_timeout, async move {
            slots
                .acquire_owned()
                .await
                .map_err(|_| DatabaseError::Connection("pool is closed".to_string()))
        })
        .await?;

        let reused = self.inner.idle().pop();
        let handle = match reused {
            Some(handle) => handle,
            None => {
                debug!("Opening new {} connection for the pool", self.inner.backend);
                Handle::connect(self.inner.config.clone()).await?
            }
        };

        Ok(PooledHandle {
            handle: Some(handle),
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    pub fn backend(&self) -> Backend {
        self.inner.backend
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Connections checked in and waiting for a lease.
    pub fn idle_count(&self) -> usize {
        self.inner.idle().len()
    }

    /// Leases that can be handed out right now without waiting.
    pub fn available(&self) -> usize {
        self.inner.slots.available_permits()
    }
}

/// An exclusive lease on one pooled connection. Dereferences to `Handle`.
pub struct PooledHandle {
    handle: Option<Handle>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledHandle {
    type Target = Handle;

    fn deref(&self) -> &Handle {
        self.handle
            .as_ref()
            .expect("a lease holds its handle until dropped")
    }
}

impl DerefMut for PooledHandle {
    fn deref_mut(&mut self) -> &mut Handle {
        self.handle
            .as_mut()
            .expect("a lease holds its handle until dropped")
    }
}

impl Drop for PooledHandle {
    fn drop(&mut self) {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => return,
        };

        if handle.is_abandoned() {
            warn!(
                "Discarding {} connection left unusable by its last operation",
                handle.backend()
            );
            return;
        }

        self.pool.idle().push(handle);
    }
}

//! Scoped access to pooled storage connections.
//!
//! ```ignore
//! let conn = PooledConnection::checkout(pool.as_ref())?;
//! let reply = conn.execute(request);
//! // returned to the pool (or discarded after an I/O fault) on drop
//! ```

use std::cell::Cell;

use thiserror::Error;

use crate::{SignedRequest, StorageClient, StorageFault, StorageReply};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("connection pool exhausted ({capacity} connections in use)")]
    Exhausted { capacity: usize },

    #[error("storage node unreachable: {0}")]
    Unreachable(String),
}

pub trait ConnectionPool: Send + Sync {
    fn acquire(&self) -> Result<Box<dyn StorageClient>, PoolError>;

    /// Return a healthy connection for reuse.
    fn release(&self, connection: Box<dyn StorageClient>);

    /// Drop a connection that reported a transport failure.
    fn discard(&self, connection: Box<dyn StorageClient>);
}

/// A borrowed connection, handed back to its pool when dropped.
pub struct PooledConnection<'a> {
    pool: &'a dyn ConnectionPool,
    connection: Option<Box<dyn StorageClient>>,
    broken: Cell<bool>,
}

impl<'a> PooledConnection<'a> {
    pub fn checkout(pool: &'a dyn ConnectionPool) -> Result<Self, PoolError> {
        let connection = pool.acquire()?;
        Ok(Self {
            pool,
            connection: Some(connection),
            broken: Cell::new(false),
        })
    }

    /// Execute a request. An I/O fault marks the connection broken.
    pub fn execute(&self, request: SignedRequest) -> Result<StorageReply, StorageFault> {
        let connection = self
            .connection
            .as_ref()
            .ok_or_else(|| StorageFault::Io("connection already returned".to_string()))?;
        let result = connection.execute(request);
        if matches!(result, Err(StorageFault::Io(_))) {
            self.broken.set(true);
        }
        result
    }

    pub fn is_broken(&self) -> bool {
        self.broken.get()
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            if self.broken.get() {
                self.pool.discard(connection);
            } else {
                self.pool.release(connection);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        fail_io: bool,
    }

    impl StorageClient for Echo {
        fn execute(&self, _request: SignedRequest) -> Result<StorageReply, StorageFault> {
            if self.fail_io {
                Err(StorageFault::Io("reset".into()))
            } else {
                Ok(StorageReply::Purged)
            }
        }
    }

    #[derive(Default)]
    struct CountingPool {
        fail_io: bool,
        exhausted: bool,
        released: AtomicUsize,
        discarded: AtomicUsize,
    }

    impl ConnectionPool for CountingPool {
        fn acquire(&self) -> Result<Box<dyn StorageClient>, PoolError> {
            if self.exhausted {
                return Err(PoolError::Exhausted { capacity: 0 });
            }
            Ok(Box::new(Echo { fail_io: self.fail_io }))
        }

        fn release(&self, _connection: Box<dyn StorageClient>) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }

        fn discard(&self, _connection: Box<dyn StorageClient>) {
            self.discarded.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn request() -> SignedRequest {
        SignedRequest {
            invoker: celfs_object::ObjectId::ZERO,
            request: crate::StorageRequest::InspectLock {
                file: celfs_object::FileIdentifier::named("ns", "f"),
            },
            signature: crate::Signature(Vec::new()),
        }
    }

    #[test]
    fn test_released_on_drop() {
        let pool = CountingPool::default();
        {
            let conn = PooledConnection::checkout(&pool).unwrap();
            assert!(conn.execute(request()).is_ok());
        }
        assert_eq!(pool.released.load(Ordering::SeqCst), 1);
        assert_eq!(pool.discarded.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_discarded_after_io_fault() {
        let pool = CountingPool {
            fail_io: true,
            ..Default::default()
        };
        {
            let conn = PooledConnection::checkout(&pool).unwrap();
            assert!(conn.execute(request()).is_err());
            assert!(conn.is_broken());
        }
        assert_eq!(pool.released.load(Ordering::SeqCst), 0);
        assert_eq!(pool.discarded.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_checkout_failure() {
        let pool = CountingPool {
            exhausted: true,
            ..Default::default()
        };
        assert!(matches!(
            PooledConnection::checkout(&pool),
            Err(PoolError::Exhausted { .. })
        ));
    }
}

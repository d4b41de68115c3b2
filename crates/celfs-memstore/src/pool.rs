//! Bounded pool of connections to a [`MemoryStore`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use celfs_config::log_pool_warn;
use celfs_proto::wire::{self, ReplyFrame};
use celfs_proto::{ConnectionPool, PoolError, SignedRequest, StorageClient, StorageFault, StorageReply};

use crate::store::MemoryStore;

#[derive(Debug, Default)]
struct PoolState {
    in_use: AtomicUsize,
    discarded: AtomicUsize,
    unreachable: AtomicBool,
    /// Number of upcoming requests that fail with an I/O fault.
    io_failures: AtomicUsize,
}

#[derive(Debug)]
pub struct MemoryPool {
    store: Arc<MemoryStore>,
    capacity: usize,
    wire_encoding: bool,
    state: Arc<PoolState>,
}

impl MemoryPool {
    pub fn new(store: Arc<MemoryStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity,
            wire_encoding: false,
            state: Arc::new(PoolState::default()),
        }
    }

    /// Pass every request and reply through the wire codec.
    pub fn with_wire_encoding(mut self, enabled: bool) -> Self {
        self.wire_encoding = enabled;
        self
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.state.in_use.load(Ordering::SeqCst)
    }

    pub fn discarded(&self) -> usize {
        self.state.discarded.load(Ordering::SeqCst)
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn fail_next_requests(&self, count: usize) {
        self.state.io_failures.store(count, Ordering::SeqCst);
    }

    fn checked_in(&self) {
        // Saturate rather than wrap if a foreign connection is handed back.
        let _ = self
            .state
            .in_use
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

impl ConnectionPool for MemoryPool {
    fn acquire(&self) -> Result<Box<dyn StorageClient>, PoolError> {
        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(PoolError::Unreachable("memory store offline".to_string()));
        }
        self.state
            .in_use
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .map_err(|_| PoolError::Exhausted {
                capacity: self.capacity,
            })?;
        Ok(Box::new(MemoryConnection {
            store: Arc::clone(&self.store),
            state: Arc::clone(&self.state),
            wire_encoding: self.wire_encoding,
        }))
    }

    fn release(&self, _connection: Box<dyn StorageClient>) {
        self.checked_in();
    }

    fn discard(&self, _connection: Box<dyn StorageClient>) {
        self.checked_in();
        self.state.discarded.fetch_add(1, Ordering::SeqCst);
        log_pool_warn!("Connection discarded", in_use = self.in_use());
    }
}

struct MemoryConnection {
    store: Arc<MemoryStore>,
    state: Arc<PoolState>,
    wire_encoding: bool,
}

impl MemoryConnection {
    fn round_trip(&self, request: SignedRequest) -> Result<ReplyFrame, bincode::Error> {
        let frame = wire::encode_request(&request)?;
        let received = wire::decode_request(&frame)?;
        let reply = wire::encode_reply(&self.store.execute(received))?;
        wire::decode_reply(&reply)
    }
}

impl StorageClient for MemoryConnection {
    fn execute(&self, request: SignedRequest) -> Result<StorageReply, StorageFault> {
        let failing = self
            .state
            .io_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageFault::Io("connection reset".to_string()));
        }
        if !self.wire_encoding {
            return self.store.execute(request);
        }
        self.round_trip(request)
            .unwrap_or_else(|e| Err(StorageFault::Io(e.to_string())))
    }
}

//! # celfs-memstore
//!
//! An in-memory storage node speaking the celfs protocol.
//!
//! - [`MemoryStore`]: files, versions, ACLs, locks and purge tombstones
//! - [`Keyring`] / [`KeyringSigner`]: password-protected principals and the
//!   matching [`celfs_proto::Signer`]
//! - [`MemoryPool`]: a bounded [`celfs_proto::ConnectionPool`] over a store,
//!   optionally routing traffic through the wire codec
//!
//! ```ignore
//! let keyring = Arc::new(Keyring::new());
//! let alice = keyring.register("alice", "secret");
//! let store = Arc::new(MemoryStore::new(keyring.clone()));
//! let pool = MemoryPool::new(store, 8);
//! let signer = KeyringSigner::new(keyring);
//! ```

pub mod keyring;
pub mod pool;
pub mod store;

pub use keyring::{Keyring, KeyringSigner};
pub use pool::MemoryPool;
pub use store::{Extension, Interceptor, MemoryStore, MAX_FILE_LENGTH};

//! Shared fixtures: a memory store with two principals behind a bounded pool.
#![allow(dead_code)]

use std::sync::Arc;

use celfs_client::{ClientContext, CreationAttributes, DirectoryHandle, Invoker, VersionedFileHandle};
use celfs_config::Config;
use celfs_memstore::{Keyring, KeyringSigner, MemoryPool, MemoryStore};
use celfs_object::{FileIdentifier, ObjectId};
use celfs_proto::{
    PooledConnection, SignedRequest, Signer, StorageFault, StorageReply, StorageRequest,
};

pub struct Cluster {
    pub store: Arc<MemoryStore>,
    pub pool: Arc<MemoryPool>,
    pub signer: Arc<KeyringSigner>,
    pub context: ClientContext,
    pub alice: Invoker,
    pub bob: Invoker,
    pub namespace: ObjectId,
}

impl Cluster {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self::build(config, false)
    }

    /// Route all traffic through the wire codec.
    pub fn over_wire() -> Self {
        Self::build(Config::default(), true)
    }

    fn build(config: Config, wire: bool) -> Self {
        let keyring = Arc::new(Keyring::new());
        let alice = Invoker::new(keyring.register("alice", "alice-pw"), "alice-pw");
        let bob = Invoker::new(keyring.register("bob", "bob-pw"), "bob-pw");
        let store = Arc::new(MemoryStore::new(keyring.clone()));
        let pool = Arc::new(MemoryPool::new(store.clone(), config.pool.capacity).with_wire_encoding(wire));
        let signer = Arc::new(KeyringSigner::new(keyring));
        let context = ClientContext::new(pool.clone(), signer.clone(), config);
        Self {
            store,
            pool,
            signer,
            context,
            alice,
            bob,
            namespace: ObjectId::random(),
        }
    }

    pub fn file_id(&self, name: &str) -> FileIdentifier {
        FileIdentifier::new(self.namespace, ObjectId::digest(name.as_bytes()))
    }

    /// A new handle on `name`; handles on the same name are aliases.
    pub fn handle(&self, name: &str) -> VersionedFileHandle {
        VersionedFileHandle::new(self.context.clone(), self.file_id(name))
    }

    pub fn directory(&self, name: &str) -> DirectoryHandle {
        DirectoryHandle::new(self.context.clone(), self.file_id(name))
    }

    pub fn attrs(&self) -> CreationAttributes {
        CreationAttributes::from_config(&self.context.config().file)
    }

    /// Send a hand-built request as `invoker`, bypassing any handle.
    pub fn raw(&self, invoker: &Invoker, request: StorageRequest) -> Result<StorageReply, StorageFault> {
        let digests = request.signing_digests().expect("encodable request");
        let signature = self
            .signer
            .sign(&invoker.principal, invoker.password(), &digests)
            .expect("registered principal");
        let connection = PooledConnection::checkout(self.pool.as_ref()).expect("pool capacity");
        connection.execute(SignedRequest {
            invoker: invoker.principal.id,
            request,
            signature,
        })
    }
}

//! Protocol-level behaviour of the memory store through a pooled connection.

use std::sync::Arc;

use anyhow::Result;
use celfs_memstore::{Keyring, KeyringSigner, MemoryPool, MemoryStore};
use celfs_object::{AccessControlEntry, AccessControlList, FileIdentifier, FileOp, Matcher, ObjectId, Principal};
use celfs_proto::{
    PooledConnection, SignedRequest, Signer, StorageFault, StorageReply, StorageRequest,
    StoredMetadata,
};

struct Node {
    pool: MemoryPool,
    signer: KeyringSigner,
    alice: Principal,
    bob: Principal,
}

impl Node {
    fn new(wire: bool) -> Self {
        let keyring = Arc::new(Keyring::new());
        let alice = keyring.register("alice", "pw-a");
        let bob = keyring.register("bob", "pw-b");
        let store = Arc::new(MemoryStore::new(keyring.clone()));
        Self {
            pool: MemoryPool::new(store, 4).with_wire_encoding(wire),
            signer: KeyringSigner::new(keyring),
            alice,
            bob,
        }
    }

    fn send(&self, who: &Principal, request: StorageRequest) -> Result<Result<StorageReply, StorageFault>> {
        let password = if who == &self.alice { "pw-a" } else { "pw-b" };
        let signature = self.signer.sign(who, password, &request.signing_digests()?)?;
        let connection = PooledConnection::checkout(&self.pool)?;
        Ok(connection.execute(SignedRequest {
            invoker: who.id,
            request,
            signature,
        }))
    }
}

fn metadata(reply: StorageReply) -> StoredMetadata {
    match reply {
        StorageReply::Metadata(m) | StorageReply::Data { metadata: m, .. } => m,
        other => panic!("unexpected reply {:?}", other),
    }
}

fn create(node: &Node, file: FileIdentifier, acl: AccessControlList) -> Result<StoredMetadata> {
    let reply = node.send(
        &node.alice,
        StorageRequest::CreateFile {
            file,
            owner: node.alice.id,
            group: ObjectId::ZERO,
            acl,
            delete_token_id: ObjectId::ZERO,
            replication: "r=1".into(),
            block_size: 16,
            time_to_live: 60,
            sign_modifications: true,
            attributes: Vec::new(),
        },
    )??;
    Ok(metadata(reply))
}

#[test]
fn test_write_then_read_over_wire() -> Result<()> {
    for wire in [false, true] {
        let node = Node::new(wire);
        let file = FileIdentifier::named("ns", "wire");
        let v0 = create(&node, file, AccessControlList::default_file_acl())?.version;

        let written = metadata(node.send(
            &node.alice,
            StorageRequest::WriteFile {
                file,
                predicated: v0,
                offset: 0,
                data: b"hello".to_vec(),
                attributes: b"k=v\n".to_vec(),
            },
        )??);
        assert_eq!(written.file_size, 5);
        assert_eq!(written.attributes, b"k=v\n");

        let reply = node.send(
            &node.bob,
            StorageRequest::ReadFile {
                file,
                version: None,
                offset: 1,
                length: 10,
            },
        )??;
        match reply {
            StorageReply::Data { metadata, data } => {
                assert_eq!(data, b"ello");
                assert_eq!(metadata.version, written.version);
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(node.pool.in_use(), 0);
    }
    Ok(())
}

#[test]
fn test_individual_grant() -> Result<()> {
    let node = Node::new(false);
    let file = FileIdentifier::named("ns", "shared");
    let acl = AccessControlList::default_file_acl()
        .with_first(AccessControlEntry::grant(Matcher::Individual(node.bob.id), [FileOp::WriteFile]));
    let v0 = create(&node, file, acl)?.version;

    let reply = node.send(
        &node.bob,
        StorageRequest::WriteFile {
            file,
            predicated: v0,
            offset: 0,
            data: b"bob".to_vec(),
            attributes: Vec::new(),
        },
    )?;
    assert!(reply.is_ok());

    let denied = node.send(
        &node.bob,
        StorageRequest::SetAcl {
            file,
            predicated: metadata(reply?).version,
            acl: AccessControlList::default(),
            attributes: Vec::new(),
        },
    )?;
    assert!(matches!(denied, Err(StorageFault::AccessDenied(_))));
    Ok(())
}

#[test]
fn test_lock_blocks_other_writers() -> Result<()> {
    let node = Node::new(false);
    let file = FileIdentifier::named("ns", "locked");
    let acl = AccessControlList::default_file_acl()
        .with(AccessControlEntry::grant(Matcher::All, [FileOp::WriteFile]));
    let v0 = create(&node, file, acl)?.version;

    let locked = metadata(node.send(
        &node.alice,
        StorageRequest::LockFile {
            file,
            predicated: v0,
            token: "session".into(),
            annotation: Some("editing".into()),
            attributes: Vec::new(),
        },
    )??);
    let lock = locked.lock.clone().expect("lock recorded");
    assert_eq!(lock.annotation.as_deref(), Some("editing"));

    let blocked = node.send(
        &node.bob,
        StorageRequest::WriteFile {
            file,
            predicated: locked.version,
            offset: 0,
            data: b"x".to_vec(),
            attributes: Vec::new(),
        },
    )?;
    assert_eq!(blocked, Err(StorageFault::Locked));

    let stolen = node.send(
        &node.bob,
        StorageRequest::UnlockFile {
            file,
            predicated: locked.version,
            token: "session".into(),
            attributes: Vec::new(),
        },
    )?;
    assert_eq!(stolen, Err(StorageFault::AccessDenied("LockFile".into())));
    Ok(())
}

#[test]
fn test_io_failure_discards_connection() -> Result<()> {
    let node = Node::new(false);
    node.pool.fail_next_requests(1);
    let result = node.send(
        &node.alice,
        StorageRequest::InspectFile {
            file: FileIdentifier::named("ns", "missing"),
            version: None,
        },
    )?;
    assert!(matches!(result, Err(StorageFault::Io(_))));
    assert_eq!(node.pool.discarded(), 1);
    assert_eq!(node.pool.in_use(), 0);

    let result = node.send(
        &node.alice,
        StorageRequest::InspectFile {
            file: FileIdentifier::named("ns", "missing"),
            version: None,
        },
    )?;
    assert_eq!(result, Err(StorageFault::NotFound));
    assert!(node.pool.capacity() >= 1);
    Ok(())
}

//! In-memory storage node.
//!
//! Requests are checked in this order: signature, existence, access control,
//! lock, predicate. Inspection (of files or locks) is not access controlled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use celfs_config::log_store_debug;
use celfs_object::{FileIdentifier, FileOp, ObjectId, VersionId};
use celfs_proto::{
    LockInfo, LockType, SignedRequest, StorageClient, StorageFault, StorageReply, StorageRequest,
    StoredMetadata,
};
use tracing::field::display;

use crate::keyring::Keyring;

/// Node-side extension: `(content, args) → output`.
pub type Extension = Box<dyn Fn(&[u8], &[String]) -> Vec<u8> + Send + Sync>;

/// Called with every request before it is executed. May act on the store
/// (for example to simulate a concurrent writer).
pub type Interceptor = Box<dyn Fn(&MemoryStore, &StorageRequest) + Send + Sync>;

/// Largest file a node will hold.
pub const MAX_FILE_LENGTH: u64 = 1 << 28;

/// `length` as an in-memory size, or `NoSpace` if absent or above
/// [`MAX_FILE_LENGTH`].
fn content_length(length: Option<u64>) -> Result<usize, StorageFault> {
    length
        .filter(|l| *l <= MAX_FILE_LENGTH)
        .and_then(|l| usize::try_from(l).ok())
        .ok_or_else(|| {
            StorageFault::NoSpace(format!(
                "file length exceeds {} bytes",
                MAX_FILE_LENGTH
            ))
        })
}

#[derive(Debug)]
struct FileRecord {
    current: StoredMetadata,
    content: Vec<u8>,
    history: HashMap<VersionId, StoredMetadata>,
}

#[derive(Debug)]
enum Slot {
    Live(Box<FileRecord>),
    /// Purged; the identifier may not be reused.
    Purged,
}

pub struct MemoryStore {
    keyring: Arc<Keyring>,
    files: Mutex<HashMap<FileIdentifier, Slot>>,
    extensions: RwLock<HashMap<String, Extension>>,
    interceptor: RwLock<Option<Interceptor>>,
    sequence: AtomicU64,
    requests: AtomicU64,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("requests", &self.requests.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    pub fn new(keyring: Arc<Keyring>) -> Self {
        Self {
            keyring,
            files: Mutex::new(HashMap::new()),
            extensions: RwLock::new(HashMap::new()),
            interceptor: RwLock::new(None),
            sequence: AtomicU64::new(0),
            requests: AtomicU64::new(0),
        }
    }

    pub fn keyring(&self) -> &Arc<Keyring> {
        &self.keyring
    }

    fn files(&self) -> MutexGuard<'_, HashMap<FileIdentifier, Slot>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register_extension(&self, name: impl Into<String>, extension: Extension) {
        self.extensions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), extension);
    }

    pub fn set_interceptor(&self, interceptor: Option<Interceptor>) {
        *self.interceptor.write().unwrap_or_else(PoisonError::into_inner) = interceptor;
    }

    /// Requests executed so far.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn current_version(&self, file: &FileIdentifier) -> Option<VersionId> {
        match self.files().get(file) {
            Some(Slot::Live(record)) => Some(record.current.version),
            _ => None,
        }
    }

    /// Raw content of the current version.
    pub fn content(&self, file: &FileIdentifier) -> Option<Vec<u8>> {
        match self.files().get(file) {
            Some(Slot::Live(record)) => Some(record.content.clone()),
            _ => None,
        }
    }

    /// Commit a new version with unchanged content and attributes, as a
    /// concurrent writer would.
    pub fn touch(&self, file: &FileIdentifier) -> Option<VersionId> {
        let mut files = self.files();
        let Some(Slot::Live(record)) = files.get_mut(file) else {
            return None;
        };
        let attributes = record.current.attributes.clone();
        Some(self.commit(record, "touch", attributes).version)
    }

    /// Execute a request directly, bypassing any connection.
    pub fn execute(&self, signed: SignedRequest) -> Result<StorageReply, StorageFault> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if let Some(interceptor) = self
            .interceptor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            interceptor(self, &signed.request);
        }

        let digests = signed
            .request
            .signing_digests()
            .map_err(|e| StorageFault::Failed(e.to_string()))?;
        if !self.keyring.verify(&signed.invoker, &digests, &signed.signature) {
            return Err(StorageFault::BadSignature);
        }

        log_store_debug!(
            "Executing request",
            op = signed.request.name(),
            file = display(signed.request.file())
        );
        self.dispatch(&signed.invoker, signed.request)
    }

    fn dispatch(&self, invoker: &ObjectId, request: StorageRequest) -> Result<StorageReply, StorageFault> {
        let mut files = self.files();
        let file = *request.file();

        if let StorageRequest::CreateFile {
            owner,
            group,
            acl,
            delete_token_id,
            replication,
            block_size,
            time_to_live,
            sign_modifications,
            attributes,
            ..
        } = request
        {
            return match files.get(&file) {
                Some(Slot::Purged) => Err(StorageFault::Deleted),
                Some(Slot::Live(_)) => Err(StorageFault::AlreadyExists),
                None => {
                    let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
                    let version = VersionId::derive(
                        None,
                        &[
                            file.namespace.as_bytes(),
                            file.file.as_bytes(),
                            &sequence.to_le_bytes(),
                        ],
                    );
                    let metadata = StoredMetadata {
                        file,
                        version,
                        file_size: 0,
                        block_size,
                        owner,
                        group,
                        acl,
                        delete_token_id,
                        replication,
                        time_to_live,
                        sign_modifications,
                        lock: None,
                        attributes,
                    };
                    let mut history = HashMap::new();
                    history.insert(version, metadata.clone());
                    files.insert(
                        file,
                        Slot::Live(Box::new(FileRecord {
                            current: metadata.clone(),
                            content: Vec::new(),
                            history,
                        })),
                    );
                    Ok(StorageReply::Metadata(metadata))
                }
            };
        }

        let record = match files.get_mut(&file) {
            Some(Slot::Live(record)) => record,
            Some(Slot::Purged) => return Err(StorageFault::Deleted),
            None => return Err(StorageFault::NotFound),
        };

        match request {
            StorageRequest::CreateFile { .. } => Err(StorageFault::Failed("unreachable create".to_string())),

            StorageRequest::InspectFile { version: None, .. } => Ok(StorageReply::Metadata(record.current.clone())),
            StorageRequest::InspectFile {
                version: Some(version), ..
            } => record
                .history
                .get(&version)
                .cloned()
                .map(StorageReply::Metadata)
                .ok_or(StorageFault::NotFound),

            StorageRequest::InspectLock { .. } => Ok(StorageReply::Lock(record.current.lock.clone())),

            StorageRequest::ReadFile {
                version,
                offset,
                length,
                ..
            } => {
                authorize(record, invoker, FileOp::ReadFile)?;
                if version.is_some_and(|v| v != record.current.version) {
                    return Err(StorageFault::OutOfDate(Box::new(record.current.clone())));
                }
                let len = record.content.len() as u64;
                let start = offset.min(len) as usize;
                let end = offset.saturating_add(length).min(len) as usize;
                Ok(StorageReply::Data {
                    metadata: record.current.clone(),
                    data: record.content[start..end].to_vec(),
                })
            }

            StorageRequest::WriteFile {
                predicated,
                offset,
                data,
                attributes,
                ..
            } => {
                check_mutation(record, invoker, FileOp::WriteFile, &predicated)?;
                let end = content_length(offset.checked_add(data.len() as u64))?;
                let start = end - data.len();
                if record.content.len() < end {
                    record.content.resize(end, 0);
                }
                record.content[start..end].copy_from_slice(&data);
                Ok(StorageReply::Metadata(self.commit(record, "writeFile", attributes)))
            }

            StorageRequest::SetFileLength {
                predicated,
                length,
                attributes,
                ..
            } => {
                check_mutation(record, invoker, FileOp::SetFileLength, &predicated)?;
                let length = content_length(Some(length))?;
                record.content.resize(length, 0);
                Ok(StorageReply::Metadata(self.commit(record, "setFileLength", attributes)))
            }

            StorageRequest::SetOwnerAndGroup {
                predicated,
                owner,
                group,
                attributes,
                ..
            } => {
                check_mutation(record, invoker, FileOp::SetUserAndGroup, &predicated)?;
                record.current.owner = owner;
                record.current.group = group;
                Ok(StorageReply::Metadata(self.commit(record, "setOwnerAndGroup", attributes)))
            }

            StorageRequest::SetAcl {
                predicated,
                acl,
                attributes,
                ..
            } => {
                check_mutation(record, invoker, FileOp::SetAcl, &predicated)?;
                record.current.acl = acl;
                Ok(StorageReply::Metadata(self.commit(record, "setACL", attributes)))
            }

            StorageRequest::LockFile {
                predicated,
                token,
                annotation,
                attributes,
                ..
            } => {
                check_mutation(record, invoker, FileOp::LockFile, &predicated)?;
                let lock = match record.current.lock.take() {
                    None => LockInfo {
                        holder: *invoker,
                        token,
                        kind: LockType::Exclusive,
                        count: 1,
                        annotation,
                    },
                    Some(mut held) if held.holder == *invoker && held.token == token => {
                        held.count += 1;
                        held
                    }
                    Some(held) => {
                        record.current.lock = Some(held);
                        return Err(StorageFault::Locked);
                    }
                };
                record.current.lock = Some(lock);
                Ok(StorageReply::Metadata(self.commit(record, "lockFile", attributes)))
            }

            StorageRequest::UnlockFile {
                predicated,
                token,
                attributes,
                ..
            } => {
                authorize(record, invoker, FileOp::LockFile)?;
                check_predicate(record, &predicated)?;
                let held = record.current.lock.take();
                match held {
                    Some(mut held) if held.holder == *invoker && held.token == token => {
                        held.count -= 1;
                        record.current.lock = (held.count > 0).then_some(held);
                    }
                    other => {
                        record.current.lock = other;
                        return Err(StorageFault::NotLocked);
                    }
                }
                Ok(StorageReply::Metadata(self.commit(record, "unlockFile", attributes)))
            }

            StorageRequest::DeleteFile { delete_token, .. } => {
                authorize(record, invoker, FileOp::DeleteFile)?;
                check_lock(record, invoker)?;
                if ObjectId::digest(delete_token.as_bytes()) != record.current.delete_token_id {
                    return Err(StorageFault::AccessDenied("delete token does not match".to_string()));
                }
                files.insert(file, Slot::Purged);
                Ok(StorageReply::Purged)
            }

            StorageRequest::RunExtension { jar_refs, args, .. } => {
                authorize(record, invoker, FileOp::ReadFile)?;
                let extensions = self.extensions.read().unwrap_or_else(PoisonError::into_inner);
                let extension = jar_refs
                    .iter()
                    .find_map(|name| extensions.get(name))
                    .ok_or_else(|| StorageFault::Failed(format!("no extension among {:?}", jar_refs)))?;
                Ok(StorageReply::Extension(extension(&record.content, &args)))
            }
        }
    }

    fn commit(&self, record: &mut FileRecord, op: &str, attributes: Vec<u8>) -> StoredMetadata {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let version = VersionId::derive(
            Some(&record.current.version),
            &[op.as_bytes(), &sequence.to_le_bytes()],
        );
        record.current.version = version;
        record.current.file_size = record.content.len() as u64;
        record.current.attributes = attributes;
        record.history.insert(version, record.current.clone());
        record.current.clone()
    }
}

impl StorageClient for MemoryStore {
    fn execute(&self, request: SignedRequest) -> Result<StorageReply, StorageFault> {
        MemoryStore::execute(self, request)
    }
}

fn authorize(record: &FileRecord, invoker: &ObjectId, op: FileOp) -> Result<(), StorageFault> {
    let current = &record.current;
    if current.acl.permits(op, invoker, &current.owner, &current.group) {
        Ok(())
    } else {
        Err(StorageFault::AccessDenied(format!("{:?}", op)))
    }
}

fn check_lock(record: &FileRecord, invoker: &ObjectId) -> Result<(), StorageFault> {
    match &record.current.lock {
        Some(lock) if lock.holder != *invoker => Err(StorageFault::Locked),
        _ => Ok(()),
    }
}

fn check_predicate(record: &FileRecord, predicated: &VersionId) -> Result<(), StorageFault> {
    if *predicated == record.current.version {
        Ok(())
    } else {
        Err(StorageFault::OutOfDate(Box::new(record.current.clone())))
    }
}

fn check_mutation(
    record: &FileRecord,
    invoker: &ObjectId,
    op: FileOp,
    predicated: &VersionId,
) -> Result<(), StorageFault> {
    authorize(record, invoker, op)?;
    check_lock(record, invoker)?;
    check_predicate(record, predicated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::KeyringSigner;
    use celfs_object::{AccessControlList, Principal};
    use celfs_proto::Signer;

    struct Fixture {
        store: MemoryStore,
        signer: KeyringSigner,
        alice: Principal,
        bob: Principal,
        file: FileIdentifier,
    }

    impl Fixture {
        fn new() -> Self {
            let keyring = Arc::new(Keyring::new());
            let alice = keyring.register("alice", "a");
            let bob = keyring.register("bob", "b");
            Self {
                store: MemoryStore::new(keyring.clone()),
                signer: KeyringSigner::new(keyring),
                alice,
                bob,
                file: FileIdentifier::named("ns", "f"),
            }
        }

        fn send(&self, who: &Principal, request: StorageRequest) -> Result<StorageReply, StorageFault> {
            let password = if who.name == "alice" { "a" } else { "b" };
            let digests = request.signing_digests().unwrap();
            let signature = self.signer.sign(who, password, &digests).unwrap();
            self.store.execute(SignedRequest {
                invoker: who.id,
                request,
                signature,
            })
        }

        const TOKEN_ID: ObjectId = ObjectId::from_hash([7u8; 32]);

        fn token() -> ObjectId {
            ObjectId::digest(b"token")
        }

        fn try_create(&self) -> Result<StorageReply, StorageFault> {
            self.send(
                &self.alice,
                StorageRequest::CreateFile {
                    file: self.file,
                    owner: self.alice.id,
                    group: ObjectId::ZERO,
                    acl: AccessControlList::default_file_acl(),
                    delete_token_id: ObjectId::digest(Self::token().as_bytes()),
                    replication: "r".into(),
                    block_size: 4,
                    time_to_live: 0,
                    sign_modifications: true,
                    attributes: b"a=1\n".to_vec(),
                },
            )
        }

        fn create(&self) -> StoredMetadata {
            metadata(self.try_create().unwrap())
        }

        fn write(&self, who: &Principal, predicated: VersionId, offset: u64, data: &[u8]) -> Result<StorageReply, StorageFault> {
            self.send(
                who,
                StorageRequest::WriteFile {
                    file: self.file,
                    predicated,
                    offset,
                    data: data.to_vec(),
                    attributes: Vec::new(),
                },
            )
        }
    }

    fn metadata(reply: StorageReply) -> StoredMetadata {
        match reply {
            StorageReply::Metadata(m) => m,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_create_twice_and_after_purge() {
        let fx = Fixture::new();
        fx.create();
        assert!(matches!(fx.try_create(), Err(StorageFault::AlreadyExists)));

        let delete = |token: ObjectId| {
            fx.send(
                &fx.alice,
                StorageRequest::DeleteFile {
                    file: fx.file,
                    delete_token: token,
                    time_to_live: 0,
                },
            )
        };
        assert!(matches!(
            delete(Fixture::TOKEN_ID),
            Err(StorageFault::AccessDenied(_))
        ));
        assert_eq!(delete(Fixture::token()), Ok(StorageReply::Purged));

        assert_eq!(fx.store.current_version(&fx.file), None);
        assert!(matches!(fx.try_create(), Err(StorageFault::Deleted)));
        assert_eq!(
            fx.send(&fx.alice, StorageRequest::InspectLock { file: fx.file }),
            Err(StorageFault::Deleted)
        );
    }

    #[test]
    fn test_write_predicate_and_history() {
        let fx = Fixture::new();
        let v0 = fx.create().version;
        let v1 = metadata(fx.write(&fx.alice, v0, 2, b"xy").unwrap()).version;
        assert_ne!(v0, v1);
        assert_eq!(fx.store.content(&fx.file).unwrap(), vec![0, 0, b'x', b'y']);

        match fx.write(&fx.alice, v0, 0, b"z") {
            Err(StorageFault::OutOfDate(current)) => assert_eq!(current.version, v1),
            other => panic!("expected OutOfDate, got {:?}", other),
        }

        let old = metadata(
            fx.send(
                &fx.bob,
                StorageRequest::InspectFile {
                    file: fx.file,
                    version: Some(v0),
                },
            )
            .unwrap(),
        );
        assert_eq!(old.file_size, 0);
    }

    #[test]
    fn test_oversized_lengths_are_refused() {
        let fx = Fixture::new();
        let v0 = fx.create().version;

        for offset in [u64::MAX, MAX_FILE_LENGTH] {
            match fx.write(&fx.alice, v0, offset, b"xy") {
                Err(StorageFault::NoSpace(_)) => {}
                other => panic!("expected NoSpace, got {:?}", other),
            }
        }
        let truncate = StorageRequest::SetFileLength {
            file: fx.file,
            predicated: v0,
            length: MAX_FILE_LENGTH + 1,
            attributes: Vec::new(),
        };
        assert!(matches!(fx.send(&fx.alice, truncate), Err(StorageFault::NoSpace(_))));

        // Nothing was committed
        assert_eq!(fx.store.current_version(&fx.file), Some(v0));
        let v1 = metadata(fx.write(&fx.alice, v0, 0, b"xy").unwrap()).version;
        assert_ne!(v0, v1);
    }

    #[test]
    fn test_acl_enforced_but_inspect_open() {
        let fx = Fixture::new();
        let v0 = fx.create().version;
        assert!(matches!(
            fx.write(&fx.bob, v0, 0, b"q"),
            Err(StorageFault::AccessDenied(_))
        ));
        assert!(fx
            .send(&fx.bob, StorageRequest::InspectFile { file: fx.file, version: None })
            .is_ok());
    }

    #[test]
    fn test_bad_signature() {
        let fx = Fixture::new();
        fx.create();
        let request = StorageRequest::InspectLock { file: fx.file };
        let digests = request.signing_digests().unwrap();
        let signature = fx.signer.sign(&fx.bob, "b", &digests).unwrap();
        let result = fx.store.execute(SignedRequest {
            invoker: fx.alice.id,
            request,
            signature,
        });
        assert_eq!(result, Err(StorageFault::BadSignature));
    }

    #[test]
    fn test_recursive_lock() {
        let fx = Fixture::new();
        let mut version = fx.create().version;
        for _ in 0..2 {
            version = metadata(
                fx.send(
                    &fx.alice,
                    StorageRequest::LockFile {
                        file: fx.file,
                        predicated: version,
                        token: "t".into(),
                        annotation: None,
                        attributes: Vec::new(),
                    },
                )
                .unwrap(),
            )
            .version;
        }
        match fx.send(&fx.bob, StorageRequest::InspectLock { file: fx.file }).unwrap() {
            StorageReply::Lock(Some(lock)) => {
                assert_eq!(lock.count, 2);
                assert_eq!(lock.holder, fx.alice.id);
            }
            other => panic!("unexpected {:?}", other),
        }

        let unlock = |version| {
            fx.send(
                &fx.alice,
                StorageRequest::UnlockFile {
                    file: fx.file,
                    predicated: version,
                    token: "t".into(),
                    attributes: Vec::new(),
                },
            )
        };
        version = metadata(unlock(version).unwrap()).version;
        version = metadata(unlock(version).unwrap()).version;
        assert_eq!(unlock(version), Err(StorageFault::NotLocked));
    }

    #[test]
    fn test_touch_and_interceptor() {
        let fx = Fixture::new();
        let v0 = fx.create().version;
        let v1 = fx.store.touch(&fx.file).unwrap();
        assert_ne!(v0, v1);

        fx.store.set_interceptor(Some(Box::new(|store, request| {
            if let StorageRequest::WriteFile { file, .. } = request {
                store.touch(file);
            }
        })));
        assert!(matches!(
            fx.write(&fx.alice, v1, 0, b"a"),
            Err(StorageFault::OutOfDate(_))
        ));
        fx.store.set_interceptor(None);
        let current = fx.store.current_version(&fx.file).unwrap();
        assert!(fx.write(&fx.alice, current, 0, b"a").is_ok());
    }

    #[test]
    fn test_run_extension() {
        let fx = Fixture::new();
        let v0 = fx.create().version;
        fx.write(&fx.alice, v0, 0, b"abc").unwrap();
        fx.store
            .register_extension("len", Box::new(|content, _| content.len().to_string().into_bytes()));
        let reply = fx
            .send(
                &fx.alice,
                StorageRequest::RunExtension {
                    file: fx.file,
                    jar_refs: vec!["len".into()],
                    args: Vec::new(),
                },
            )
            .unwrap();
        assert_eq!(reply, StorageReply::Extension(b"3".to_vec()));
    }
}

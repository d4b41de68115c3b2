//! # celfs-proto
//!
//! The protocol a celfs client speaks to a storage node.
//!
//! Every mutating request names the version it is predicated on. The node
//! serializes predicated updates per file: a request whose predicate is no
//! longer the current version fails with [`StorageFault::OutOfDate`], which
//! carries the metadata of the version that won.
//!
//! The node itself, the signing subsystem and the connection pool are
//! capabilities ([`StorageClient`], [`Signer`], [`ConnectionPool`]) so the
//! client core can be driven by any transport.

pub mod metadata;
pub mod pool;
pub mod signer;
pub mod wire;

pub use metadata::{LockInfo, LockType, StoredMetadata};
pub use pool::{ConnectionPool, PoolError, PooledConnection};
pub use signer::{Signature, Signer, SignerError};

use celfs_object::{AccessControlList, Blake3Hash, FileIdentifier, ObjectId, VersionId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageRequest {
    CreateFile {
        file: FileIdentifier,
        owner: ObjectId,
        group: ObjectId,
        acl: AccessControlList,
        delete_token_id: ObjectId,
        replication: String,
        block_size: u64,
        time_to_live: u64,
        sign_modifications: bool,
        attributes: Vec<u8>,
    },
    ReadFile {
        file: FileIdentifier,
        /// `None` reads the current version.
        version: Option<VersionId>,
        offset: u64,
        length: u64,
    },
    WriteFile {
        file: FileIdentifier,
        predicated: VersionId,
        offset: u64,
        data: Vec<u8>,
        attributes: Vec<u8>,
    },
    SetFileLength {
        file: FileIdentifier,
        predicated: VersionId,
        length: u64,
        attributes: Vec<u8>,
    },
    SetOwnerAndGroup {
        file: FileIdentifier,
        predicated: VersionId,
        owner: ObjectId,
        group: ObjectId,
        attributes: Vec<u8>,
    },
    SetAcl {
        file: FileIdentifier,
        predicated: VersionId,
        acl: AccessControlList,
        attributes: Vec<u8>,
    },
    LockFile {
        file: FileIdentifier,
        predicated: VersionId,
        token: String,
        annotation: Option<String>,
        attributes: Vec<u8>,
    },
    UnlockFile {
        file: FileIdentifier,
        predicated: VersionId,
        token: String,
        attributes: Vec<u8>,
    },
    InspectLock {
        file: FileIdentifier,
    },
    InspectFile {
        file: FileIdentifier,
        version: Option<VersionId>,
    },
    DeleteFile {
        file: FileIdentifier,
        delete_token: ObjectId,
        time_to_live: u64,
    },
    RunExtension {
        file: FileIdentifier,
        jar_refs: Vec<String>,
        args: Vec<String>,
    },
}

impl StorageRequest {
    pub fn file(&self) -> &FileIdentifier {
        match self {
            StorageRequest::CreateFile { file, .. }
            | StorageRequest::ReadFile { file, .. }
            | StorageRequest::WriteFile { file, .. }
            | StorageRequest::SetFileLength { file, .. }
            | StorageRequest::SetOwnerAndGroup { file, .. }
            | StorageRequest::SetAcl { file, .. }
            | StorageRequest::LockFile { file, .. }
            | StorageRequest::UnlockFile { file, .. }
            | StorageRequest::InspectLock { file }
            | StorageRequest::InspectFile { file, .. }
            | StorageRequest::DeleteFile { file, .. }
            | StorageRequest::RunExtension { file, .. } => file,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StorageRequest::CreateFile { .. } => "createFile",
            StorageRequest::ReadFile { .. } => "readFile",
            StorageRequest::WriteFile { .. } => "writeFile",
            StorageRequest::SetFileLength { .. } => "setFileLength",
            StorageRequest::SetOwnerAndGroup { .. } => "setOwnerAndGroup",
            StorageRequest::SetAcl { .. } => "setACL",
            StorageRequest::LockFile { .. } => "lockFile",
            StorageRequest::UnlockFile { .. } => "unlockFile",
            StorageRequest::InspectLock { .. } => "inspectLock",
            StorageRequest::InspectFile { .. } => "inspectFile",
            StorageRequest::DeleteFile { .. } => "deleteFile",
            StorageRequest::RunExtension { .. } => "runExtension",
        }
    }

    /// The predicated version of a mutating request.
    pub fn predicated(&self) -> Option<&VersionId> {
        match self {
            StorageRequest::WriteFile { predicated, .. }
            | StorageRequest::SetFileLength { predicated, .. }
            | StorageRequest::SetOwnerAndGroup { predicated, .. }
            | StorageRequest::SetAcl { predicated, .. }
            | StorageRequest::LockFile { predicated, .. }
            | StorageRequest::UnlockFile { predicated, .. } => Some(predicated),
            _ => None,
        }
    }

    /// Digests covered by the invoker's signature: the operation digest and,
    /// for writes, the digest of the data payload.
    pub fn signing_digests(&self) -> Result<Vec<Blake3Hash>, bincode::Error> {
        let encoded = bincode::serialize(self)?;
        let mut digests = vec![*blake3::hash(&encoded).as_bytes()];
        if let StorageRequest::WriteFile { data, .. } = self {
            digests.push(*blake3::hash(data).as_bytes());
        }
        Ok(digests)
    }
}

/// A request together with the invoker and the invoker's signature over
/// [`StorageRequest::signing_digests`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRequest {
    pub invoker: ObjectId,
    pub request: StorageRequest,
    pub signature: Signature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageReply {
    Metadata(StoredMetadata),
    Data { metadata: StoredMetadata, data: Vec<u8> },
    Lock(Option<LockInfo>),
    Purged,
    Extension(Vec<u8>),
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageFault {
    #[error("predicate is out of date, current version is {}", .0.version)]
    OutOfDate(Box<StoredMetadata>),

    #[error("file already exists")]
    AlreadyExists,

    #[error("file not found")]
    NotFound,

    #[error("file has been deleted")]
    Deleted,

    #[error("no space left: {0}")]
    NoSpace(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("file is locked")]
    Locked,

    #[error("file is not locked by the invoker")]
    NotLocked,

    #[error("illegal parameter: {0}")]
    IllegalParameter(String),

    #[error("signature verification failed")]
    BadSignature,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("storage failure: {0}")]
    Failed(String),
}

/// A connection to a storage node.
pub trait StorageClient: Send {
    fn execute(&self, request: SignedRequest) -> Result<StorageReply, StorageFault>;
}

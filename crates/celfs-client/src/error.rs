use celfs_object::{FileIdentifier, ObjectError};
use celfs_proto::{PoolError, SignerError, StorageFault};
use thiserror::Error;

/// Every way a file or directory operation can fail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("unsupported data encoding version {found} (expected {expected})")]
    BadVersion { found: u32, expected: u32 },

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("storage operation failed: {0}")]
    CelesteFailed(String),

    #[error("storage inaccessible: {0}")]
    CelesteInaccessible(#[from] PoolError),

    #[error("credential problem: {0}")]
    CredentialProblem(String),

    #[error("{0} has been deleted")]
    Deleted(FileIdentifier),

    #[error("directory {file} is corrupted: {reason}")]
    DirectoryCorrupted { file: FileIdentifier, reason: String },

    #[error("delete token does not match the one recorded for {0}")]
    DTokenMismatch(FileIdentifier),

    #[error("{0} already exists")]
    Exists(String),

    #[error("invalid name: {0:?}")]
    InvalidName(String),

    #[error("{0} is locked")]
    Locked(FileIdentifier),

    #[error("{0} is not locked by the invoker")]
    NotLocked(FileIdentifier),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("gave up on {file} after {attempts} attempts")]
    RetriesExceeded { file: FileIdentifier, attempts: u32 },

    #[error("internal error: {0}")]
    Runtime(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

impl FsError {
    /// Map a fault reported by the storage node for an operation on `file`.
    pub fn from_fault(fault: StorageFault, file: &FileIdentifier) -> Self {
        match fault {
            StorageFault::OutOfDate(current) => FsError::Runtime(format!(
                "unexpected stale predicate on {}, current version {}",
                file, current.version
            )),
            StorageFault::AlreadyExists => FsError::Exists(file.to_string()),
            StorageFault::NotFound => FsError::NotFound(file.to_string()),
            StorageFault::Deleted => FsError::Deleted(*file),
            StorageFault::NoSpace(reason) => FsError::CapacityExceeded(reason),
            StorageFault::AccessDenied(reason) => {
                FsError::PermissionDenied(format!("{}: {}", file, reason))
            }
            StorageFault::Locked => FsError::Locked(*file),
            StorageFault::NotLocked => FsError::NotLocked(*file),
            StorageFault::IllegalParameter(reason) => FsError::InvalidName(reason),
            StorageFault::BadSignature => {
                FsError::CredentialProblem(format!("signature rejected for {}", file))
            }
            StorageFault::Io(reason) => FsError::Io(reason),
            StorageFault::Failed(reason) => FsError::CelesteFailed(reason),
        }
    }

    /// Whether the error is the optimistic loop running out of attempts.
    pub fn is_retries_exceeded(&self) -> bool {
        matches!(self, FsError::RetriesExceeded { .. })
    }
}

impl From<SignerError> for FsError {
    fn from(e: SignerError) -> Self {
        FsError::CredentialProblem(e.to_string())
    }
}

impl From<ObjectError> for FsError {
    fn from(e: ObjectError) -> Self {
        FsError::ValidationFailed(e.to_string())
    }
}

//! # celfs-object
//!
//! Value types shared by every celfs layer.
//!
//! Object identifiers are BLAKE3 digests rendered as lowercase hex. A file is
//! named by a [`FileIdentifier`] (namespace + file id) and every immutable
//! snapshot of it by a [`VersionId`].
//!
//! ## Modules
//!
//! - [`acl`]: access control lists evaluated by the storage node
//! - [`properties`]: the ordered `key=value` text codec used for file
//!   attributes and directory contents
//! - [`extent`]: half-open byte ranges

pub mod acl;
pub mod extent;
pub mod properties;

pub use acl::{AccessControlEntry, AccessControlList, Disposition, FileOp, Matcher};
pub use extent::Extent;
pub use properties::PropertyList;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// BLAKE3 hash type (32 bytes)
pub type Blake3Hash = [u8; 32];

/// Errors produced while parsing or encoding object-level values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObjectError {
    #[error("invalid object id: {text:?}")]
    InvalidId { text: String },

    #[error("malformed directory entry: {0:?}")]
    MalformedEntry(String),

    #[error("malformed property list at line {line}: {reason}")]
    MalformedProperties { line: usize, reason: String },

    #[error("access control list encoding error: {0}")]
    Acl(String),
}

pub type Result<T> = std::result::Result<T, ObjectError>;

/// A 256-bit object identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ObjectId(Blake3Hash);

impl ObjectId {
    pub const ZERO: ObjectId = ObjectId([0u8; 32]);

    pub const fn from_hash(hash: Blake3Hash) -> Self {
        Self(hash)
    }

    /// Identifier derived from the BLAKE3 digest of `data`.
    #[inline]
    pub fn digest(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// A fresh random identifier (delete tokens, file ids).
    pub fn random() -> Self {
        Self(rand::random())
    }

    #[inline]
    pub fn as_bytes(&self) -> &Blake3Hash {
        &self.0
    }

    #[inline]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(text: &str) -> Result<Self> {
        let invalid = || ObjectError::InvalidId {
            text: text.to_string(),
        };
        let bytes = hex::decode(text).map_err(|_| invalid())?;
        let hash: Blake3Hash = bytes.try_into().map_err(|_| invalid())?;
        Ok(Self(hash))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", &self.to_hex()[..12])
    }
}

impl FromStr for ObjectId {
    type Err = ObjectError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

/// Identifier of one immutable version of a file (content + metadata).
///
/// Version ids are derived by the storage node from the predecessor and the
/// operation that produced the version, so they are never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionId(ObjectId);

impl VersionId {
    pub const fn from_object_id(id: ObjectId) -> Self {
        Self(id)
    }

    /// Chain a new version id onto `previous` over the given digest parts.
    pub fn derive(previous: Option<&VersionId>, parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        if let Some(prev) = previous {
            hasher.update(prev.0.as_bytes());
        }
        for part in parts {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Self(ObjectId::from_hash(*hasher.finalize().as_bytes()))
    }

    #[inline]
    pub fn object_id(&self) -> &ObjectId {
        &self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionId({})", &self.0.to_hex()[..12])
    }
}

impl FromStr for VersionId {
    type Err = ObjectError;

    fn from_str(s: &str) -> Result<Self> {
        ObjectId::from_hex(s).map(Self)
    }
}

/// Globally unique name of a file: `(namespace id, file id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileIdentifier {
    pub namespace: ObjectId,
    pub file: ObjectId,
}

impl FileIdentifier {
    pub fn new(namespace: ObjectId, file: ObjectId) -> Self {
        Self { namespace, file }
    }

    /// Identifier derived from human-readable namespace and file names.
    pub fn named(namespace: &str, file: &str) -> Self {
        Self::new(
            ObjectId::digest(namespace.as_bytes()),
            ObjectId::digest(file.as_bytes()),
        )
    }

    /// Identifier with a fresh random file id inside `namespace`.
    pub fn random_in(namespace: ObjectId) -> Self {
        Self::new(namespace, ObjectId::random())
    }

    /// Directory entry value: `namespace:file:serial`.
    pub fn to_dirent(&self, serial: u64) -> String {
        format!("{}:{}:{}", self.namespace, self.file, serial)
    }

    /// Parse a directory entry value. The serial number is optional and
    /// defaults to 0.
    pub fn parse_dirent(value: &str) -> Result<(Self, u64)> {
        let malformed = || ObjectError::MalformedEntry(value.to_string());
        let mut parts = value.split(':');
        let namespace = parts.next().ok_or_else(malformed)?;
        let file = parts.next().ok_or_else(malformed)?;
        let serial = match parts.next() {
            Some(s) => s.parse::<u64>().map_err(|_| malformed())?,
            None => 0,
        };
        if parts.next().is_some() {
            return Err(malformed());
        }
        let id = Self::new(
            ObjectId::from_hex(namespace).map_err(|_| malformed())?,
            ObjectId::from_hex(file).map_err(|_| malformed())?,
        );
        Ok((id, serial))
    }

    /// `namespace:file` prefix shared by every dirent naming this file.
    pub fn dirent_prefix(&self) -> String {
        format!("{}:{}", self.namespace, self.file)
    }
}

impl fmt::Display for FileIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.file)
    }
}

/// A principal's identity. Holds no secrets; signing and decryption go
/// through a separate signer capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub id: ObjectId,
    pub name: String,
}

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: ObjectId::digest(name.as_bytes()),
            name,
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, &self.id.to_hex()[..8])
    }
}

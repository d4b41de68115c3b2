use celfs_object::{AccessControlList, FileIdentifier, ObjectId, VersionId};
use serde::{Deserialize, Serialize};

/// Storage-level metadata of one file version, as reported by the node.
///
/// `attributes` is the client's encoded attribute property list, stored
/// verbatim with the version and returned unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMetadata {
    pub file: FileIdentifier,
    pub version: VersionId,
    pub file_size: u64,
    pub block_size: u64,
    pub owner: ObjectId,
    pub group: ObjectId,
    pub acl: AccessControlList,
    pub delete_token_id: ObjectId,
    pub replication: String,
    pub time_to_live: u64,
    pub sign_modifications: bool,
    pub lock: Option<LockInfo>,
    pub attributes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockType {
    Exclusive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub holder: ObjectId,
    pub token: String,
    pub kind: LockType,
    /// Recursive acquisition count.
    pub count: u32,
    pub annotation: Option<String>,
}

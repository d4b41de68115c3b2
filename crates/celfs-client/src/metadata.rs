//! Per-version metadata and its reconciliation with what the storage node
//! reports.
//!
//! A file's attributes travel as an encoded [`PropertyList`] stored verbatim
//! with each version. Some of them never change after creation (encoding
//! version, creation time, serial number, replication, signing, time to
//! live); [`MetadataReconciler`] records those on first contact and rejects
//! any later version that disagrees. The rest are captured per version in an
//! append-only table.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use celfs_object::{AccessControlList, FileIdentifier, ObjectId, PropertyList, VersionId};
use celfs_proto::{LockInfo, StoredMetadata};
use dashmap::DashMap;

use crate::error::{FsError, Result};

/// Attribute names inside a version's encoded attribute list.
pub mod names {
    pub const CONTENT_TYPE: &str = "ContentType";
    pub const CREATED_TIME: &str = "CreatedTime";
    pub const MODIFIED_TIME: &str = "ModifiedTime";
    pub const METADATA_CHANGED_TIME: &str = "MetadataChangedTime";
    pub const IS_DELETED: &str = "IsDeleted";
    pub const FILE_SERIAL_NUMBER: &str = "FileSerialNumber";
    pub const DELETION_TIME_TO_LIVE: &str = "DeletionTimeToLive";
    pub const ENCRYPTED_DELETE_TOKEN: &str = "EncDeleteToken";
    pub const DATA_ENCODING_VERSION: &str = "Version";
    pub const SIGN_MODIFICATIONS: &str = "SignModifications";
    pub const TIME_TO_LIVE: &str = "TimeToLive";
    pub const REPLICATION_PARAMETERS: &str = "ReplicationParameters";
    pub const BLOCK_SIZE: &str = "BlockSize";
    pub const CLIENT_METADATA: &str = "ClientMetadata";
    pub const CACHE_ENABLED: &str = "CacheEnabled";
}

/// Attribute encoding understood by this client.
pub const DATA_ENCODING_VERSION: u32 = 1;

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Attributes fixed when the file is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonMetadata {
    pub data_encoding_version: u32,
    pub created_time: u64,
    pub serial_number: u64,
    pub replication: String,
    pub sign_modifications: bool,
    pub time_to_live: u64,
}

/// Everything known about one immutable version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMetadata {
    pub version: VersionId,
    pub modified_time: u64,
    pub metadata_changed_time: u64,
    pub file_length: u64,
    pub deleted: bool,
    pub client_properties: PropertyList,
    pub content_type: String,
    pub block_size: u64,
    pub deletion_time_to_live: u64,
    pub encrypted_delete_token: Vec<u8>,
    pub owner: ObjectId,
    pub group: ObjectId,
    pub acl: AccessControlList,
    pub cache_enabled: bool,
    pub lock: Option<LockInfo>,
}

impl VersionMetadata {
    /// Editable copy of the attributes carried forward to the next version.
    pub fn draft(&self) -> AttributeDraft {
        AttributeDraft {
            content_type: self.content_type.clone(),
            modified_time: self.modified_time,
            metadata_changed_time: self.metadata_changed_time,
            deleted: self.deleted,
            deletion_time_to_live: self.deletion_time_to_live,
            encrypted_delete_token: self.encrypted_delete_token.clone(),
            client_properties: self.client_properties.clone(),
            cache_enabled: self.cache_enabled,
            block_size: self.block_size,
        }
    }
}

/// The per-version attributes a mutation may change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDraft {
    pub content_type: String,
    pub modified_time: u64,
    pub metadata_changed_time: u64,
    pub deleted: bool,
    pub deletion_time_to_live: u64,
    pub encrypted_delete_token: Vec<u8>,
    pub client_properties: PropertyList,
    pub cache_enabled: bool,
    pub block_size: u64,
}

impl AttributeDraft {
    /// Stamp a content change: modified time moves, metadata-changed time
    /// stays.
    pub fn touch_content(&mut self, now: u64) {
        self.modified_time = now;
    }

    /// Stamp an attribute change: metadata-changed time moves, modified time
    /// stays.
    pub fn touch_metadata(&mut self, now: u64) {
        self.metadata_changed_time = now;
    }

    pub fn encode(&self, common: &CommonMetadata) -> Vec<u8> {
        let mut props = PropertyList::new();
        props.set(names::DATA_ENCODING_VERSION, common.data_encoding_version.to_string());
        props.set(names::CREATED_TIME, common.created_time.to_string());
        props.set(names::FILE_SERIAL_NUMBER, common.serial_number.to_string());
        props.set(names::REPLICATION_PARAMETERS, common.replication.clone());
        props.set(names::SIGN_MODIFICATIONS, common.sign_modifications.to_string());
        props.set(names::TIME_TO_LIVE, common.time_to_live.to_string());

        props.set(names::CONTENT_TYPE, self.content_type.clone());
        props.set(names::MODIFIED_TIME, self.modified_time.to_string());
        props.set(names::METADATA_CHANGED_TIME, self.metadata_changed_time.to_string());
        props.set(names::IS_DELETED, self.deleted.to_string());
        props.set(names::DELETION_TIME_TO_LIVE, self.deletion_time_to_live.to_string());
        props.set(names::ENCRYPTED_DELETE_TOKEN, hex::encode(&self.encrypted_delete_token));
        props.set(names::CLIENT_METADATA, hex::encode(self.client_properties.encode()));
        props.set(names::CACHE_ENABLED, self.cache_enabled.to_string());
        props.set(names::BLOCK_SIZE, self.block_size.to_string());
        props.encode()
    }
}

/// Snapshot of a file's attributes as of one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttributes {
    pub file: FileIdentifier,
    pub version: VersionId,
    pub serial_number: u64,
    pub created_time: u64,
    pub modified_time: u64,
    pub metadata_changed_time: u64,
    pub file_length: u64,
    pub content_type: String,
    pub block_size: u64,
    pub deleted: bool,
    pub owner: ObjectId,
    pub group: ObjectId,
    pub deletion_time_to_live: u64,
    pub time_to_live: u64,
    pub replication: String,
    pub sign_modifications: bool,
    pub cache_enabled: bool,
    pub client_properties: PropertyList,
    pub lock: Option<LockInfo>,
}

impl FileAttributes {
    pub fn new(file: FileIdentifier, common: &CommonMetadata, meta: &VersionMetadata) -> Self {
        Self {
            file,
            version: meta.version,
            serial_number: common.serial_number,
            created_time: common.created_time,
            modified_time: meta.modified_time,
            metadata_changed_time: meta.metadata_changed_time,
            file_length: meta.file_length,
            content_type: meta.content_type.clone(),
            block_size: meta.block_size,
            deleted: meta.deleted,
            owner: meta.owner,
            group: meta.group,
            deletion_time_to_live: meta.deletion_time_to_live,
            time_to_live: common.time_to_live,
            replication: common.replication.clone(),
            sign_modifications: common.sign_modifications,
            cache_enabled: meta.cache_enabled,
            client_properties: meta.client_properties.clone(),
            lock: meta.lock.clone(),
        }
    }
}

/// Validates reported metadata against the file's fixed attributes and
/// records per-version metadata.
#[derive(Debug)]
pub struct MetadataReconciler {
    file: FileIdentifier,
    default_block_size: u64,
    common: RwLock<Option<CommonMetadata>>,
    versions: DashMap<VersionId, Arc<VersionMetadata>>,
}

impl MetadataReconciler {
    pub fn new(file: FileIdentifier, default_block_size: u64) -> Self {
        Self {
            file,
            default_block_size,
            common: RwLock::new(None),
            versions: DashMap::new(),
        }
    }

    /// Fixed attributes, `None` before first contact (or after a purge).
    pub fn common(&self) -> Option<CommonMetadata> {
        self.common
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn data_encoding_version(&self) -> u32 {
        self.common()
            .map(|c| c.data_encoding_version)
            .unwrap_or(0)
    }

    pub fn get(&self, version: &VersionId) -> Option<Arc<VersionMetadata>> {
        self.versions.get(version).map(|m| Arc::clone(m.value()))
    }

    pub fn known_versions(&self) -> usize {
        self.versions.len()
    }

    /// Forget the fixed attributes so the next ingestion starts afresh.
    pub fn reset(&self) {
        *self.common.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Validate `stored` and return the metadata recorded for its version.
    pub fn ingest(&self, stored: &StoredMetadata) -> Result<Arc<VersionMetadata>> {
        if stored.file != self.file {
            return Err(FsError::ValidationFailed(format!(
                "metadata for {} delivered to {}",
                stored.file, self.file
            )));
        }
        let props = PropertyList::decode(&stored.attributes)?;
        self.set_or_check_common(stored, &props)?;
        self.extract_version(stored, &props)
    }

    fn set_or_check_common(&self, stored: &StoredMetadata, props: &PropertyList) -> Result<()> {
        let found = props.parse::<u32>(names::DATA_ENCODING_VERSION)?.unwrap_or(0);
        if found != DATA_ENCODING_VERSION {
            return Err(FsError::BadVersion {
                found,
                expected: DATA_ENCODING_VERSION,
            });
        }
        let reported = CommonMetadata {
            data_encoding_version: found,
            created_time: required(props, names::CREATED_TIME)?,
            serial_number: required(props, names::FILE_SERIAL_NUMBER)?,
            replication: stored.replication.clone(),
            sign_modifications: stored.sign_modifications,
            time_to_live: stored.time_to_live,
        };

        let mut common = self.common.write().unwrap_or_else(PoisonError::into_inner);
        let Some(known) = common.as_ref() else {
            *common = Some(reported);
            return Ok(());
        };

        let mismatch = |what: &str, known: &dyn std::fmt::Debug, reported: &dyn std::fmt::Debug| {
            FsError::ValidationFailed(format!(
                "{} of {} changed from {:?} to {:?} at version {}",
                what, self.file, known, reported, stored.version
            ))
        };
        if known.created_time != reported.created_time {
            return Err(mismatch("created time", &known.created_time, &reported.created_time));
        }
        if known.serial_number != reported.serial_number {
            return Err(mismatch("serial number", &known.serial_number, &reported.serial_number));
        }
        if known.replication != reported.replication {
            return Err(mismatch("replication", &known.replication, &reported.replication));
        }
        if known.sign_modifications != reported.sign_modifications {
            return Err(mismatch(
                "sign modifications",
                &known.sign_modifications,
                &reported.sign_modifications,
            ));
        }
        if known.time_to_live != reported.time_to_live {
            return Err(mismatch("time to live", &known.time_to_live, &reported.time_to_live));
        }
        Ok(())
    }

    fn extract_version(&self, stored: &StoredMetadata, props: &PropertyList) -> Result<Arc<VersionMetadata>> {
        if let Some(existing) = self.get(&stored.version) {
            return Ok(existing);
        }

        let client_properties = match props.get(names::CLIENT_METADATA) {
            Some(encoded) => PropertyList::decode(&decode_hex(names::CLIENT_METADATA, encoded)?)?,
            None => PropertyList::new(),
        };
        let encrypted_delete_token = match props.get(names::ENCRYPTED_DELETE_TOKEN) {
            Some(encoded) => decode_hex(names::ENCRYPTED_DELETE_TOKEN, encoded)?,
            None => Vec::new(),
        };
        let block_size = match stored.block_size {
            0 => props
                .parse::<u64>(names::BLOCK_SIZE)?
                .unwrap_or(self.default_block_size),
            n => n,
        };

        let meta = VersionMetadata {
            version: stored.version,
            modified_time: props.parse(names::MODIFIED_TIME)?.unwrap_or(0),
            metadata_changed_time: props.parse(names::METADATA_CHANGED_TIME)?.unwrap_or(0),
            file_length: stored.file_size,
            deleted: props.parse(names::IS_DELETED)?.unwrap_or(false),
            client_properties,
            content_type: props
                .get(names::CONTENT_TYPE)
                .unwrap_or("application/octet-stream")
                .to_string(),
            block_size: block_size.max(1),
            deletion_time_to_live: props.parse(names::DELETION_TIME_TO_LIVE)?.unwrap_or(0),
            encrypted_delete_token,
            owner: stored.owner,
            group: stored.group,
            acl: stored.acl.clone(),
            cache_enabled: props.parse(names::CACHE_ENABLED)?.unwrap_or(false),
            lock: stored.lock.clone(),
        };

        // Racing ingesters of the same version agree; first insert wins.
        let entry = self
            .versions
            .entry(stored.version)
            .or_insert_with(|| Arc::new(meta));
        Ok(Arc::clone(entry.value()))
    }
}

fn required(props: &PropertyList, key: &str) -> Result<u64> {
    props
        .parse::<u64>(key)?
        .ok_or_else(|| FsError::ValidationFailed(format!("missing attribute {}", key)))
}

fn decode_hex(key: &str, encoded: &str) -> Result<Vec<u8>> {
    hex::decode(encoded)
        .map_err(|e| FsError::ValidationFailed(format!("attribute {} is not hex: {}", key, e)))
}

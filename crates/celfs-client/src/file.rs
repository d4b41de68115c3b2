//! Versioned file handle.
//!
//! Every mutation is an optimistic, predicated update: the request names the
//! version it assumes is current and the storage node rejects it if another
//! writer got there first. The rejection carries the winning version's
//! metadata, so the handle ingests it, re-predicates and tries again. Races
//! are never merged locally.
//!
//! # Attempt bounds
//!
//! | Predicate                   | Attempts                                 |
//! |-----------------------------|------------------------------------------|
//! | explicit version (`Some`)   | `client.explicit_predicate_attempts` (1) |
//! | whatever is current (`None`)| `client.current_predicate_attempts` (5)  |

use std::sync::{Arc, PoisonError, RwLock};

use celfs_config::{log_file_debug, log_file_info, log_file_warn};
use celfs_object::{AccessControlList, Extent, FileIdentifier, ObjectId, Principal, PropertyList, VersionId};
use celfs_proto::{LockInfo, StorageFault, StorageReply, StorageRequest, StoredMetadata};
use rand::Rng;
use tracing::field::display;
use tracing::instrument;

use crate::cache::{ByteRangeCache, CacheStatsSnapshot, ExtentRead, Loaded};
use crate::context::{ClientContext, CreationAttributes, Invoker};
use crate::error::{FsError, Result};
use crate::metadata::{
    now_millis, AttributeDraft, CommonMetadata, FileAttributes, MetadataReconciler,
    VersionMetadata, DATA_ENCODING_VERSION,
};

/// Local view of one remote versioned file.
///
/// Several handles may name the same file; they coordinate only through the
/// storage node's predicate check.
#[derive(Debug)]
pub struct VersionedFileHandle {
    file: FileIdentifier,
    context: ClientContext,
    reconciler: MetadataReconciler,
    cache: ByteRangeCache,
    latest: RwLock<Option<VersionId>>,
}

impl VersionedFileHandle {
    pub fn new(context: ClientContext, file: FileIdentifier) -> Self {
        let reconciler = MetadataReconciler::new(file, context.config().file.block_size);
        let cache = ByteRangeCache::new(context.config().file.cache_enabled);
        Self {
            file,
            context,
            reconciler,
            cache,
            latest: RwLock::new(None),
        }
    }

    pub fn file_identifier(&self) -> &FileIdentifier {
        &self.file
    }

    pub fn context(&self) -> &ClientContext {
        &self.context
    }

    /// The most recent version this handle has observed.
    pub fn latest_version(&self) -> Option<VersionId> {
        *self.latest.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_latest(&self, version: Option<VersionId>) {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = version;
    }

    fn process_reply(&self, stored: &StoredMetadata) -> Result<Arc<VersionMetadata>> {
        let meta = self.reconciler.ingest(stored)?;
        self.set_latest(Some(stored.version));
        Ok(meta)
    }

    fn submit(&self, invoker: &Invoker, request: StorageRequest) -> Result<StorageReply> {
        self.context
            .submit(invoker, request)?
            .map_err(|fault| FsError::from_fault(fault, &self.file))
    }

    fn inspect(&self, invoker: &Invoker, version: Option<VersionId>) -> Result<StoredMetadata> {
        let reply = self.submit(
            invoker,
            StorageRequest::InspectFile {
                file: self.file,
                version,
            },
        )?;
        into_metadata(reply)
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    /// Fetch the current version's metadata from the storage node.
    #[instrument(skip(self, invoker), fields(file = %self.file), level = "debug")]
    pub fn refresh_metadata(&self, invoker: &Invoker) -> Result<Arc<VersionMetadata>> {
        let stored = self.inspect(invoker, None)?;
        if self.latest_version() == Some(stored.version) {
            if let Some(known) = self.reconciler.get(&stored.version) {
                return Ok(known);
            }
        }
        self.process_reply(&stored)
    }

    /// Metadata of the latest known version, contacting storage only when no
    /// version is known yet.
    pub fn ensure_metadata(&self, invoker: &Invoker) -> Result<Arc<VersionMetadata>> {
        if let Some(known) = self.latest_version().and_then(|v| self.reconciler.get(&v)) {
            return Ok(known);
        }
        self.refresh_metadata(invoker)
    }

    /// Metadata of a specific version, fetched if not known locally.
    pub fn version_metadata(&self, invoker: &Invoker, version: &VersionId) -> Result<Arc<VersionMetadata>> {
        if let Some(known) = self.reconciler.get(version) {
            return Ok(known);
        }
        let stored = self.inspect(invoker, Some(*version))?;
        self.reconciler.ingest(&stored)
    }

    fn common(&self) -> Result<CommonMetadata> {
        self.reconciler
            .common()
            .ok_or_else(|| FsError::Runtime(format!("no metadata ingested for {}", self.file)))
    }

    pub fn file_exists(&self, invoker: &Invoker) -> Result<bool> {
        match self.refresh_metadata(invoker) {
            Ok(_) => Ok(true),
            Err(FsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn attributes(&self, invoker: &Invoker) -> Result<FileAttributes> {
        let meta = self.ensure_metadata(invoker)?;
        Ok(FileAttributes::new(self.file, &self.common()?, &meta))
    }

    pub fn file_length(&self, invoker: &Invoker) -> Result<u64> {
        Ok(self.ensure_metadata(invoker)?.file_length)
    }

    pub fn serial_number(&self, invoker: &Invoker) -> Result<u64> {
        self.ensure_metadata(invoker)?;
        Ok(self.common()?.serial_number)
    }

    pub fn created_time(&self, invoker: &Invoker) -> Result<u64> {
        self.ensure_metadata(invoker)?;
        Ok(self.common()?.created_time)
    }

    /// Encoding version of the file's attributes; 0 until first contact.
    pub fn data_encoding_version(&self) -> u32 {
        self.reconciler.data_encoding_version()
    }

    // ------------------------------------------------------------------
    // Creation and removal
    // ------------------------------------------------------------------

    /// Create the file on the storage node, owned by `invoker`.
    ///
    /// A fresh delete token is generated; the node keeps only its digest and
    /// the file's attributes carry the token encrypted for the owner.
    #[instrument(skip(self, invoker), fields(file = %self.file), level = "debug")]
    pub fn create(&self, invoker: &Invoker, attrs: &CreationAttributes) -> Result<Arc<VersionMetadata>> {
        let token = ObjectId::random();
        let encrypted_delete_token = self
            .context
            .signer()
            .encrypt(&invoker.principal, token.as_bytes())?;

        let now = now_millis();
        let common = CommonMetadata {
            data_encoding_version: DATA_ENCODING_VERSION,
            created_time: now,
            serial_number: attrs.serial_number.unwrap_or_else(|| rand::rng().random()),
            replication: attrs.replication.clone(),
            sign_modifications: attrs.sign_modifications,
            time_to_live: attrs.time_to_live,
        };
        let draft = AttributeDraft {
            content_type: attrs.content_type.clone(),
            modified_time: now,
            metadata_changed_time: now,
            deleted: false,
            deletion_time_to_live: attrs.deletion_time_to_live,
            encrypted_delete_token,
            client_properties: attrs.client_properties.clone(),
            cache_enabled: attrs.cache_enabled,
            block_size: attrs.block_size,
        };

        let reply = self.submit(
            invoker,
            StorageRequest::CreateFile {
                file: self.file,
                owner: invoker.principal.id,
                group: attrs.group,
                acl: attrs.acl.clone(),
                delete_token_id: ObjectId::digest(token.as_bytes()),
                replication: attrs.replication.clone(),
                block_size: attrs.block_size,
                time_to_live: attrs.time_to_live,
                sign_modifications: attrs.sign_modifications,
                attributes: draft.encode(&common),
            },
        )?;
        let stored = into_metadata(reply)?;
        self.cache.set_enabled(attrs.cache_enabled);
        let meta = self.process_reply(&stored)?;
        log_file_info!(
            "File created",
            file = display(&self.file),
            version = display(&meta.version),
            serial = common.serial_number
        );
        Ok(meta)
    }

    /// Mark the file deleted. Its versions remain inspectable but no further
    /// reads or mutations are accepted.
    #[instrument(skip(self, invoker), fields(file = %self.file), level = "debug")]
    pub fn mark_deleted(&self, invoker: &Invoker, predicated: Option<VersionId>) -> Result<Arc<VersionMetadata>> {
        let now = now_millis();
        self.predicated_update(
            invoker,
            "markDeleted",
            predicated,
            |meta| {
                let mut draft = meta.draft();
                draft.deleted = true;
                draft.touch_content(now);
                Ok(draft)
            },
            |meta, attributes| StorageRequest::SetFileLength {
                file: self.file,
                predicated: meta.version,
                length: meta.file_length,
                attributes,
            },
            |cache, _, _| cache.flush(false),
        )
    }

    /// Permanently remove the file.
    ///
    /// The invoker must be able to decrypt the delete token recorded at
    /// creation; its digest is checked against the node's record before the
    /// delete is issued.
    #[instrument(skip(self, invoker), fields(file = %self.file), level = "debug")]
    pub fn purge_forever(&self, invoker: &Invoker) -> Result<()> {
        // 1. Current record, including the digest the node expects
        let stored = self.inspect(invoker, None)?;
        let meta = self.process_reply(&stored)?;

        // 2. Recover the token and verify it locally
        let plaintext = self.context.signer().decrypt(
            &invoker.principal,
            invoker.password(),
            &meta.encrypted_delete_token,
        )?;
        let token = <[u8; 32]>::try_from(plaintext.as_slice())
            .map(ObjectId::from_hash)
            .map_err(|_| FsError::DTokenMismatch(self.file))?;
        if ObjectId::digest(token.as_bytes()) != stored.delete_token_id {
            return Err(FsError::DTokenMismatch(self.file));
        }

        // 3. Commit
        match self.submit(
            invoker,
            StorageRequest::DeleteFile {
                file: self.file,
                delete_token: token,
                time_to_live: meta.deletion_time_to_live,
            },
        )? {
            StorageReply::Purged => {}
            other => return Err(unexpected_reply(&other)),
        }

        self.reconciler.reset();
        self.set_latest(None);
        self.cache.flush(false);
        log_file_info!("File purged", file = display(&self.file));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Content
    // ------------------------------------------------------------------

    /// Read up to `length` bytes at `offset` from the current version.
    ///
    /// Reads stop at the next block boundary, so a read may return fewer
    /// bytes than requested before end of file; see [`Self::read_fully`].
    #[instrument(skip(self, invoker), fields(file = %self.file), level = "debug")]
    pub fn read(&self, invoker: &Invoker, offset: u64, length: u64) -> Result<ExtentRead> {
        let meta = self.ensure_metadata(invoker)?;
        if meta.deleted {
            return Err(FsError::Deleted(self.file));
        }

        let requested_end = offset.saturating_add(length).min(meta.file_length);
        if offset >= requested_end {
            return Ok(ExtentRead {
                version: meta.version,
                start: offset,
                data: Vec::new(),
            });
        }

        let max_buffer = self.context.config().client.max_buffer_length.max(1);
        let block = meta.block_size.max(1);
        let end = (offset / block + 1)
            .saturating_mul(block)
            .min(offset.saturating_add(max_buffer))
            .min(requested_end);

        let loader = |extent: Extent| self.load_extent(invoker, extent);
        if self.cache.is_enabled() && end < requested_end {
            let ahead = Extent::new(end, requested_end.min(end.saturating_add(max_buffer)));
            self.cache.read(meta.version, ahead, true, loader)?;
        }
        // A remote load advances `latest` through `process_reply`; a cache
        // hit must not, or a concurrent write's version could be overwritten.
        self.cache
            .read(meta.version, Extent::new(offset, end), false, loader)
    }

    fn load_extent(&self, invoker: &Invoker, extent: Extent) -> Result<Loaded> {
        let reply = self.submit(
            invoker,
            StorageRequest::ReadFile {
                file: self.file,
                version: None,
                offset: extent.start,
                length: extent.len(),
            },
        )?;
        match reply {
            StorageReply::Data { metadata, data } => {
                self.process_reply(&metadata)?;
                Ok(Loaded {
                    version: metadata.version,
                    data,
                })
            }
            other => Err(unexpected_reply(&other)),
        }
    }

    /// Read `[offset, offset + length)` (clamped to end of file) from a
    /// single version, restarting if the file changes between chunks.
    #[instrument(skip(self, invoker), fields(file = %self.file), level = "debug")]
    pub fn read_fully(&self, invoker: &Invoker, offset: u64, length: u64) -> Result<ExtentRead> {
        let attempts = self.context.config().client.current_predicate_attempts.max(1);
        let end = offset.saturating_add(length);

        for attempt in 1..=attempts {
            let mut data = Vec::new();
            let mut version: Option<VersionId> = None;
            let mut position = offset;
            let mut switched = false;

            while position < end {
                let chunk = self.read(invoker, position, end - position)?;
                match version {
                    None => version = Some(chunk.version),
                    Some(v) if v != chunk.version => {
                        switched = true;
                        break;
                    }
                    Some(_) => {}
                }
                if chunk.data.is_empty() {
                    break;
                }
                position += chunk.data.len() as u64;
                data.extend_from_slice(&chunk.data);
            }

            if !switched {
                let version = match version {
                    Some(v) => v,
                    None => self.ensure_metadata(invoker)?.version,
                };
                return Ok(ExtentRead {
                    version,
                    start: offset,
                    data,
                });
            }
            log_file_debug!(
                "Version changed during read, restarting",
                file = display(&self.file),
                attempt = attempt
            );
        }

        log_file_warn!("Read retries exhausted", file = display(&self.file), attempts = attempts);
        Err(FsError::RetriesExceeded {
            file: self.file,
            attempts,
        })
    }

    /// Write `data` at `offset`, predicated on `predicated` or on the latest
    /// known version.
    #[instrument(skip(self, invoker, data), fields(file = %self.file, len = data.len()), level = "debug")]
    pub fn write(
        &self,
        invoker: &Invoker,
        predicated: Option<VersionId>,
        offset: u64,
        data: &[u8],
    ) -> Result<Arc<VersionMetadata>> {
        let max_buffer = self.context.config().client.max_buffer_length;
        if data.len() as u64 > max_buffer {
            return Err(FsError::CapacityExceeded(format!(
                "write of {} bytes exceeds the {} byte buffer limit",
                data.len(),
                max_buffer
            )));
        }
        let now = now_millis();
        self.predicated_update(
            invoker,
            "write",
            predicated,
            |meta| {
                let mut draft = meta.draft();
                draft.touch_content(now);
                Ok(draft)
            },
            |meta, attributes| StorageRequest::WriteFile {
                file: self.file,
                predicated: meta.version,
                offset,
                data: data.to_vec(),
                attributes,
            },
            |cache, old, new| cache.predicated_write(Some(old), new, offset, data),
        )
    }

    /// Set the file length. Extending fills with zeros.
    #[instrument(skip(self, invoker), fields(file = %self.file), level = "debug")]
    pub fn truncate(&self, invoker: &Invoker, predicated: Option<VersionId>, length: u64) -> Result<Arc<VersionMetadata>> {
        let now = now_millis();
        self.predicated_update(
            invoker,
            "truncate",
            predicated,
            |meta| {
                let mut draft = meta.draft();
                draft.touch_content(now);
                Ok(draft)
            },
            |meta, attributes| StorageRequest::SetFileLength {
                file: self.file,
                predicated: meta.version,
                length,
                attributes,
            },
            |cache, old, new| cache.predicated_truncate(Some(old), new, length),
        )
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    /// Attribute-only update, expressed as a length change to the current
    /// length.
    fn update_attributes<F>(
        &self,
        invoker: &Invoker,
        op: &'static str,
        predicated: Option<VersionId>,
        change: F,
    ) -> Result<Arc<VersionMetadata>>
    where
        F: Fn(&mut AttributeDraft),
    {
        let now = now_millis();
        self.predicated_update(
            invoker,
            op,
            predicated,
            |meta| {
                let mut draft = meta.draft();
                change(&mut draft);
                draft.touch_metadata(now);
                Ok(draft)
            },
            |meta, attributes| StorageRequest::SetFileLength {
                file: self.file,
                predicated: meta.version,
                length: meta.file_length,
                attributes,
            },
            |cache, old, new| cache.predicated_attribute_change(Some(old), new),
        )
    }

    #[instrument(skip(self, invoker), fields(file = %self.file), level = "debug")]
    pub fn set_client_properties(
        &self,
        invoker: &Invoker,
        predicated: Option<VersionId>,
        properties: &PropertyList,
    ) -> Result<Arc<VersionMetadata>> {
        self.update_attributes(invoker, "setClientProperties", predicated, |draft| {
            draft.client_properties = properties.clone();
        })
    }

    #[instrument(skip(self, invoker), fields(file = %self.file), level = "debug")]
    pub fn set_content_type(
        &self,
        invoker: &Invoker,
        predicated: Option<VersionId>,
        content_type: &str,
    ) -> Result<Arc<VersionMetadata>> {
        self.update_attributes(invoker, "setContentType", predicated, |draft| {
            draft.content_type = content_type.to_string();
        })
    }

    #[instrument(skip(self, invoker), fields(file = %self.file), level = "debug")]
    pub fn set_deletion_time_to_live(
        &self,
        invoker: &Invoker,
        predicated: Option<VersionId>,
        seconds: u64,
    ) -> Result<Arc<VersionMetadata>> {
        self.update_attributes(invoker, "setDeletionTimeToLive", predicated, |draft| {
            draft.deletion_time_to_live = seconds;
        })
    }

    /// Transfer ownership. The delete token is re-encrypted for the new
    /// owner in the same update, so `invoker` must be able to decrypt it.
    #[instrument(skip(self, invoker), fields(file = %self.file), level = "debug")]
    pub fn set_owner_and_group(
        &self,
        invoker: &Invoker,
        predicated: Option<VersionId>,
        owner: &Principal,
        group: ObjectId,
    ) -> Result<Arc<VersionMetadata>> {
        let signer = self.context.signer();
        let now = now_millis();
        self.predicated_update(
            invoker,
            "setOwnerAndGroup",
            predicated,
            |meta| {
                let token = signer.decrypt(
                    &invoker.principal,
                    invoker.password(),
                    &meta.encrypted_delete_token,
                )?;
                let mut draft = meta.draft();
                draft.encrypted_delete_token = signer.encrypt(owner, &token)?;
                draft.touch_metadata(now);
                Ok(draft)
            },
            |meta, attributes| StorageRequest::SetOwnerAndGroup {
                file: self.file,
                predicated: meta.version,
                owner: owner.id,
                group,
                attributes,
            },
            |cache, old, new| cache.predicated_attribute_change(Some(old), new),
        )
    }

    #[instrument(skip(self, invoker), fields(file = %self.file), level = "debug")]
    pub fn set_acl(
        &self,
        invoker: &Invoker,
        predicated: Option<VersionId>,
        acl: &AccessControlList,
    ) -> Result<Arc<VersionMetadata>> {
        let now = now_millis();
        self.predicated_update(
            invoker,
            "setACL",
            predicated,
            |meta| {
                let mut draft = meta.draft();
                draft.touch_metadata(now);
                Ok(draft)
            },
            |meta, attributes| StorageRequest::SetAcl {
                file: self.file,
                predicated: meta.version,
                acl: acl.clone(),
                attributes,
            },
            |cache, old, new| cache.predicated_attribute_change(Some(old), new),
        )
    }

    // ------------------------------------------------------------------
    // Locks
    // ------------------------------------------------------------------

    /// Take (or re-take) the exclusive lock under `token`.
    #[instrument(skip(self, invoker), fields(file = %self.file), level = "debug")]
    pub fn lock(
        &self,
        invoker: &Invoker,
        predicated: Option<VersionId>,
        token: &str,
        annotation: Option<&str>,
    ) -> Result<Arc<VersionMetadata>> {
        self.predicated_update(
            invoker,
            "lock",
            predicated,
            |meta| Ok(meta.draft()),
            |meta, attributes| StorageRequest::LockFile {
                file: self.file,
                predicated: meta.version,
                token: token.to_string(),
                annotation: annotation.map(str::to_string),
                attributes,
            },
            |cache, old, new| cache.predicated_attribute_change(Some(old), new),
        )
    }

    #[instrument(skip(self, invoker), fields(file = %self.file), level = "debug")]
    pub fn unlock(&self, invoker: &Invoker, predicated: Option<VersionId>, token: &str) -> Result<Arc<VersionMetadata>> {
        self.predicated_update(
            invoker,
            "unlock",
            predicated,
            |meta| Ok(meta.draft()),
            |meta, attributes| StorageRequest::UnlockFile {
                file: self.file,
                predicated: meta.version,
                token: token.to_string(),
                attributes,
            },
            |cache, old, new| cache.predicated_attribute_change(Some(old), new),
        )
    }

    pub fn inspect_lock(&self, invoker: &Invoker) -> Result<Option<LockInfo>> {
        match self.submit(invoker, StorageRequest::InspectLock { file: self.file })? {
            StorageReply::Lock(info) => Ok(info),
            other => Err(unexpected_reply(&other)),
        }
    }

    // ------------------------------------------------------------------
    // Misc
    // ------------------------------------------------------------------

    /// Run a node-side extension against this file and return its output.
    pub fn run_extension(&self, invoker: &Invoker, jar_refs: &[String], args: &[String]) -> Result<Vec<u8>> {
        let reply = self.submit(
            invoker,
            StorageRequest::RunExtension {
                file: self.file,
                jar_refs: jar_refs.to_vec(),
                args: args.to_vec(),
            },
        )?;
        match reply {
            StorageReply::Extension(output) => Ok(output),
            other => Err(unexpected_reply(&other)),
        }
    }

    pub fn flush(&self, retain_current: bool) {
        self.cache.flush(retain_current);
    }

    pub fn is_cache_enabled(&self) -> bool {
        self.cache.is_enabled()
    }

    pub fn set_cache_enabled(&self, enabled: bool) {
        self.cache.set_enabled(enabled);
    }

    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.cache.stats()
    }

    // ------------------------------------------------------------------
    // Predicated update loop
    // ------------------------------------------------------------------

    /// Run one optimistic update.
    ///
    /// `transform` derives the next version's attributes from the predicated
    /// version's metadata, `build` turns them into the request, and `effect`
    /// applies the change to the cache once the node has accepted it.
    fn predicated_update<T, B, E>(
        &self,
        invoker: &Invoker,
        op: &'static str,
        predicated: Option<VersionId>,
        transform: T,
        build: B,
        effect: E,
    ) -> Result<Arc<VersionMetadata>>
    where
        T: Fn(&VersionMetadata) -> Result<AttributeDraft>,
        B: Fn(&VersionMetadata, Vec<u8>) -> StorageRequest,
        E: FnOnce(&ByteRangeCache, &VersionId, &VersionId),
    {
        let client = &self.context.config().client;
        let attempts = match predicated {
            Some(_) => client.explicit_predicate_attempts,
            None => client.current_predicate_attempts,
        }
        .max(1);
        let mut predicated = match predicated {
            Some(version) => version,
            None => self.ensure_metadata(invoker)?.version,
        };

        for attempt in 1..=attempts {
            // 1. Predicated version must be live
            let meta = self.version_metadata(invoker, &predicated)?;
            if meta.deleted {
                return Err(FsError::Deleted(self.file));
            }

            // 2. Next version's attributes
            let attributes = transform(&meta)?.encode(&self.common()?);

            // 3. Sign and submit
            match self.context.submit(invoker, build(&meta, attributes))? {
                Ok(reply) => {
                    let stored = into_metadata(reply)?;
                    let committed = self.reconciler.ingest(&stored)?;
                    effect(&self.cache, &predicated, &stored.version);
                    self.set_latest(Some(stored.version));
                    log_file_debug!(
                        "Predicated update committed",
                        op = op,
                        file = display(&self.file),
                        version = display(&stored.version),
                        attempt = attempt
                    );
                    return Ok(committed);
                }
                // 4. Lost the race: adopt the winner and go again
                Err(StorageFault::OutOfDate(current)) => {
                    log_file_debug!(
                        "Predicate out of date, retrying",
                        op = op,
                        file = display(&self.file),
                        attempt = attempt,
                        current = display(&current.version)
                    );
                    let winner = self.process_reply(&current)?;
                    predicated = winner.version;
                }
                Err(fault) => return Err(FsError::from_fault(fault, &self.file)),
            }
        }

        log_file_warn!(
            "Predicated update retries exhausted",
            op = op,
            file = display(&self.file),
            attempts = attempts
        );
        Err(FsError::RetriesExceeded {
            file: self.file,
            attempts,
        })
    }
}

fn into_metadata(reply: StorageReply) -> Result<StoredMetadata> {
    match reply {
        StorageReply::Metadata(metadata) | StorageReply::Data { metadata, .. } => Ok(metadata),
        other => Err(unexpected_reply(&other)),
    }
}

fn unexpected_reply(reply: &StorageReply) -> FsError {
    let kind = match reply {
        StorageReply::Metadata(_) => "metadata",
        StorageReply::Data { .. } => "data",
        StorageReply::Lock(_) => "lock",
        StorageReply::Purged => "purged",
        StorageReply::Extension(_) => "extension",
    };
    FsError::Runtime(format!("unexpected {} reply", kind))
}

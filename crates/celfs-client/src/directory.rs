//! Directories stored as property lists in a versioned file.
//!
//! Layout of the backing file's content:
//!
//! ```text
//! /version=1
//! .=<namespace>:<file>:<serial>      (the directory itself)
//! ..=<namespace>:<file>:<serial>     (its parent; the root names itself)
//! <leaf>=<namespace>:<file>:<serial>
//! ```
//!
//! Keys starting with `/` are reserved. Every mutation is a read-modify-write
//! of the whole list, predicated on the version that was read; a lost race
//! backs off and starts over from a fresh read.

use std::sync::Arc;

use celfs_config::{log_dir_debug, log_dir_warn};
use celfs_object::{FileIdentifier, PropertyList, VersionId};
use celfs_proto::LockInfo;
use tracing::field::display;
use tracing::instrument;

use crate::backoff::ExponentialBackoff;
use crate::context::{ClientContext, CreationAttributes, Invoker};
use crate::error::{FsError, Result};
use crate::file::VersionedFileHandle;
use crate::metadata::{FileAttributes, VersionMetadata};

pub const DIRECTORY_CONTENT_TYPE: &str = "x-celeste/directory";

const VERSION_KEY: &str = "/version";
const DIRECTORY_ENCODING_VERSION: u32 = 1;
const SELF_NAME: &str = ".";
const PARENT_NAME: &str = "..";

/// A directory entry: leaf name and the serial number of the file it names.
/// Ordered by name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Dirent {
    pub name: String,
    pub serial_number: u64,
}

/// Whether `name` may be linked into a directory.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && name != SELF_NAME && name != PARENT_NAME
}

fn check_name(name: &str) -> Result<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(FsError::InvalidName(name.to_string()))
    }
}

#[derive(Debug)]
pub struct DirectoryHandle {
    handle: VersionedFileHandle,
}

impl DirectoryHandle {
    pub fn new(context: ClientContext, file: FileIdentifier) -> Self {
        Self::from_handle(VersionedFileHandle::new(context, file))
    }

    pub fn from_handle(handle: VersionedFileHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &VersionedFileHandle {
        &self.handle
    }

    pub fn file_identifier(&self) -> &FileIdentifier {
        self.handle.file_identifier()
    }

    fn corrupted(&self, reason: impl Into<String>) -> FsError {
        FsError::DirectoryCorrupted {
            file: *self.file_identifier(),
            reason: reason.into(),
        }
    }

    fn self_dirent(&self, invoker: &Invoker) -> Result<String> {
        Ok(self
            .file_identifier()
            .to_dirent(self.handle.serial_number(invoker)?))
    }

    /// Create the backing file and write the initial entries. With no
    /// parent the directory is a root and is its own parent.
    #[instrument(skip(self, invoker, parent), fields(file = %self.file_identifier()), level = "debug")]
    pub fn create(
        &self,
        invoker: &Invoker,
        parent: Option<&DirectoryHandle>,
        attrs: CreationAttributes,
    ) -> Result<Arc<VersionMetadata>> {
        // 1. The file must exist before "." can name its serial number
        let created = self
            .handle
            .create(invoker, &attrs.with_content_type(DIRECTORY_CONTENT_TYPE))?;
        let self_entry = self.self_dirent(invoker)?;
        let parent_entry = match parent {
            Some(parent) => parent.self_dirent(invoker)?,
            None => self_entry.clone(),
        };

        // 2. Initial contents, predicated on the creation version
        let mut props = PropertyList::new();
        props.set(VERSION_KEY, DIRECTORY_ENCODING_VERSION.to_string());
        props.set(SELF_NAME, self_entry);
        props.set(PARENT_NAME, parent_entry);
        self.write_dir(invoker, &props, created.version)
    }

    /// Current contents and the version they were read from.
    #[instrument(skip(self, invoker), fields(file = %self.file_identifier()), level = "debug")]
    pub fn read_dir(&self, invoker: &Invoker) -> Result<(VersionId, PropertyList)> {
        let meta = self.handle.refresh_metadata(invoker)?;
        let max = self.handle.context().config().directory.max_encoded_bytes;
        if meta.file_length > max {
            return Err(self.corrupted(format!(
                "encoded size {} exceeds {} bytes",
                meta.file_length, max
            )));
        }

        let content = self.handle.read_fully(invoker, 0, max)?;
        if content.data.is_empty() {
            return Err(self.corrupted("empty directory file"));
        }
        let props = PropertyList::decode(&content.data).map_err(|e| self.corrupted(e.to_string()))?;
        match props.parse::<u32>(VERSION_KEY) {
            Ok(Some(DIRECTORY_ENCODING_VERSION)) => Ok((content.version, props)),
            Ok(Some(found)) => Err(FsError::BadVersion {
                found,
                expected: DIRECTORY_ENCODING_VERSION,
            }),
            Ok(None) => Err(self.corrupted("missing encoding version")),
            Err(e) => Err(self.corrupted(e.to_string())),
        }
    }

    /// Replace the contents, predicated on `predicated`. Shrinking contents
    /// truncate first; the write is then predicated on the truncated version.
    fn write_dir(&self, invoker: &Invoker, props: &PropertyList, predicated: VersionId) -> Result<Arc<VersionMetadata>> {
        let data = props.encode();
        let max = self.handle.context().config().directory.max_encoded_bytes;
        if data.len() as u64 > max {
            return Err(FsError::CapacityExceeded(format!(
                "directory {} would encode to {} bytes, limit is {}",
                self.file_identifier(),
                data.len(),
                max
            )));
        }

        let mut predicated = predicated;
        let current_length = self.handle.version_metadata(invoker, &predicated)?.file_length;
        if current_length > data.len() as u64 {
            predicated = self
                .handle
                .truncate(invoker, Some(predicated), data.len() as u64)?
                .version;
        }
        self.handle.write(invoker, Some(predicated), 0, &data)
    }

    /// Read-modify-write with up to `attempts` full cycles. `mutate` sees a
    /// fresh copy of the contents on every cycle.
    fn update_dir<R, F>(&self, invoker: &Invoker, op: &'static str, attempts: u32, mut mutate: F) -> Result<R>
    where
        F: FnMut(&mut PropertyList) -> Result<R>,
    {
        let attempts = attempts.max(1);
        let mut backoff = ExponentialBackoff::from_config(&self.handle.context().config().backoff);

        for attempt in 1..=attempts {
            let (version, mut props) = self.read_dir(invoker)?;
            let outcome = mutate(&mut props)?;
            match self.write_dir(invoker, &props, version) {
                Ok(_) => return Ok(outcome),
                Err(e) if e.is_retries_exceeded() => {
                    log_dir_debug!(
                        "Directory changed underneath update",
                        op = op,
                        file = display(self.file_identifier()),
                        attempt = attempt
                    );
                    if attempt < attempts {
                        backoff.back_off();
                    }
                }
                Err(e) => return Err(e),
            }
        }

        log_dir_warn!(
            "Directory update retries exhausted",
            op = op,
            file = display(self.file_identifier()),
            attempts = attempts
        );
        Err(FsError::RetriesExceeded {
            file: *self.file_identifier(),
            attempts,
        })
    }

    fn update_attempts(&self) -> u32 {
        self.handle.context().config().directory.update_attempts
    }

    /// Add `name → file`.
    ///
    /// Without `overwrite`, an existing `name` fails with `Exists` and the
    /// update gets a single attempt; losing a race to a concurrent writer
    /// then surfaces as `RetriesExceeded`.
    #[instrument(skip(self, invoker, file), fields(dir = %self.file_identifier()), level = "debug")]
    pub fn link(&self, invoker: &Invoker, name: &str, file: &VersionedFileHandle, overwrite: bool) -> Result<()> {
        check_name(name)?;
        let entry = file.file_identifier().to_dirent(file.serial_number(invoker)?);
        let attempts = if overwrite {
            self.update_attempts()
        } else {
            self.handle.context().config().directory.exclusive_link_attempts
        };
        self.update_dir(invoker, "link", attempts, |props| {
            if !overwrite && props.contains_key(name) {
                return Err(FsError::Exists(name.to_string()));
            }
            props.set(name, entry.clone());
            Ok(())
        })
    }

    #[instrument(skip(self, invoker), fields(dir = %self.file_identifier()), level = "debug")]
    pub fn unlink(&self, invoker: &Invoker, name: &str) -> Result<()> {
        check_name(name)?;
        self.update_dir(invoker, "unlink", self.update_attempts(), |props| {
            props
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| FsError::NotFound(name.to_string()))
        })
    }

    /// Remove every entry naming `file`; returns how many were removed.
    #[instrument(skip(self, invoker), fields(dir = %self.file_identifier()), level = "debug")]
    pub fn unlink_file(&self, invoker: &Invoker, file: &FileIdentifier) -> Result<usize> {
        let prefix = file.dirent_prefix();
        let with_serial = format!("{}:", prefix);
        self.update_dir(invoker, "unlinkFile", self.update_attempts(), |props| {
            let names: Vec<String> = props
                .iter()
                .filter(|(name, value)| {
                    is_valid_name(name) && (*value == prefix || value.starts_with(&with_serial))
                })
                .map(|(name, _)| name.to_string())
                .collect();
            if names.is_empty() {
                return Err(FsError::NotFound(file.to_string()));
            }
            for name in &names {
                props.remove(name);
            }
            Ok(names.len())
        })
    }

    #[instrument(skip(self, invoker), fields(dir = %self.file_identifier()), level = "debug")]
    pub fn rename(&self, invoker: &Invoker, old_name: &str, new_name: &str, overwrite: bool) -> Result<()> {
        check_name(old_name)?;
        check_name(new_name)?;
        self.update_dir(invoker, "rename", self.update_attempts(), |props| {
            let entry = props
                .get(old_name)
                .map(str::to_string)
                .ok_or_else(|| FsError::NotFound(old_name.to_string()))?;
            if old_name == new_name {
                return Ok(());
            }
            if !overwrite && props.contains_key(new_name) {
                return Err(FsError::Exists(new_name.to_string()));
            }
            props.remove(old_name);
            props.set(new_name, entry);
            Ok(())
        })
    }

    /// Point ".." at `parent`.
    pub fn set_parent(&self, invoker: &Invoker, parent: &DirectoryHandle) -> Result<()> {
        let entry = parent.self_dirent(invoker)?;
        self.update_dir(invoker, "setParent", self.update_attempts(), |props| {
            props.set(PARENT_NAME, entry.clone());
            Ok(())
        })
    }

    fn lookup(&self, invoker: &Invoker, name: &str) -> Result<(FileIdentifier, u64)> {
        if name.is_empty() || name.contains('/') {
            return Err(FsError::InvalidName(name.to_string()));
        }
        let (_, props) = self.read_dir(invoker)?;
        let value = props
            .get(name)
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;
        FileIdentifier::parse_dirent(value).map_err(|e| self.corrupted(e.to_string()))
    }

    pub fn get_file_identifier(&self, invoker: &Invoker, name: &str) -> Result<FileIdentifier> {
        Ok(self.lookup(invoker, name)?.0)
    }

    pub fn get_dirent(&self, invoker: &Invoker, name: &str) -> Result<Dirent> {
        let (_, serial_number) = self.lookup(invoker, name)?;
        Ok(Dirent {
            name: name.to_string(),
            serial_number,
        })
    }

    /// Every entry name, including "." and "..".
    pub fn get_all_names(&self, invoker: &Invoker) -> Result<Vec<String>> {
        let (_, props) = self.read_dir(invoker)?;
        Ok(props
            .keys()
            .filter(|name| !name.contains('/'))
            .map(str::to_string)
            .collect())
    }

    /// Entries sorted by name, "." and ".." included.
    pub fn get_dirents(&self, invoker: &Invoker) -> Result<Vec<Dirent>> {
        let (_, props) = self.read_dir(invoker)?;
        let mut dirents = props
            .iter()
            .filter(|(name, _)| !name.contains('/'))
            .map(|(name, value)| {
                let (_, serial_number) =
                    FileIdentifier::parse_dirent(value).map_err(|e| self.corrupted(e.to_string()))?;
                Ok(Dirent {
                    name: name.to_string(),
                    serial_number,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        dirents.sort();
        Ok(dirents)
    }

    /// Whether `file` is a directory, judged by its content type.
    pub fn is_directory(invoker: &Invoker, file: &VersionedFileHandle) -> Result<bool> {
        Ok(file.attributes(invoker)?.content_type == DIRECTORY_CONTENT_TYPE)
    }

    pub fn directory_exists(&self, invoker: &Invoker) -> Result<bool> {
        if !self.handle.file_exists(invoker)? {
            return Ok(false);
        }
        Self::is_directory(invoker, &self.handle)
    }

    pub fn attributes(&self, invoker: &Invoker) -> Result<FileAttributes> {
        self.handle.attributes(invoker)
    }

    pub fn lock(&self, invoker: &Invoker, token: &str, annotation: Option<&str>) -> Result<Arc<VersionMetadata>> {
        self.handle.lock(invoker, None, token, annotation)
    }

    pub fn unlock(&self, invoker: &Invoker, token: &str) -> Result<Arc<VersionMetadata>> {
        self.handle.unlock(invoker, None, token)
    }

    pub fn inspect_lock(&self, invoker: &Invoker) -> Result<Option<LockInfo>> {
        self.handle.inspect_lock(invoker)
    }

    pub fn mark_deleted(&self, invoker: &Invoker) -> Result<Arc<VersionMetadata>> {
        self.handle.mark_deleted(invoker, None)
    }

    pub fn purge_forever(&self, invoker: &Invoker) -> Result<()> {
        self.handle.purge_forever(invoker)
    }
}

//! # celfs-client
//!
//! Client-side engine for versioned files kept on a remote storage node.
//!
//! Every file version is immutable and named by a [`VersionId`]. Mutations
//! are optimistic: each request is predicated on the version the client
//! believes is current, and a node that has moved on answers with the
//! winning version's metadata so the client can retry against it.
//!
//! ## Components
//!
//! - [`VersionedFileHandle`]: create, read, write, truncate, ownership, ACL,
//!   lock and delete operations on one file
//! - [`DirectoryHandle`]: name → file mappings stored as a property list in a
//!   versioned file
//! - [`ByteRangeCache`]: per-version byte extents with read-ahead
//! - [`MetadataReconciler`]: checks reported metadata against what is
//!   fixed at creation
//!
//! ## Example
//!
//! ```ignore
//! let context = ClientContext::new(pool, signer, celfs_config::config().clone());
//! let file = VersionedFileHandle::new(context, FileIdentifier::named("ns", "notes"));
//! file.create(&invoker, &CreationAttributes::from_config(&context.config().file))?;
//! file.write(&invoker, None, 0, b"hello")?;
//! let read = file.read_fully(&invoker, 0, 5)?;
//! ```
//!
//! [`VersionId`]: celfs_object::VersionId

pub mod backoff;
pub mod cache;
pub mod context;
pub mod directory;
pub mod error;
pub mod file;
pub mod metadata;

pub use backoff::ExponentialBackoff;
pub use cache::{ByteRangeCache, CacheStatsSnapshot, ExtentRead, Loaded};
pub use context::{ClientContext, CreationAttributes, Invoker};
pub use directory::{is_valid_name, Dirent, DirectoryHandle, DIRECTORY_CONTENT_TYPE};
pub use error::{FsError, Result};
pub use file::VersionedFileHandle;
pub use metadata::{
    AttributeDraft, CommonMetadata, FileAttributes, MetadataReconciler, VersionMetadata,
    DATA_ENCODING_VERSION,
};

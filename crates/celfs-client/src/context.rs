//! Shared collaborators for file and directory handles.

use std::fmt;
use std::sync::Arc;

use celfs_config::{log_pool_warn, log_store_debug, Config, FileConfig};
use celfs_object::{AccessControlList, ObjectId, Principal, PropertyList};
use celfs_proto::{
    ConnectionPool, PooledConnection, SignedRequest, Signer, StorageFault, StorageReply,
    StorageRequest,
};
use tracing::field::display;

use crate::error::{FsError, Result};

/// The principal an operation is performed for, plus the password that
/// unlocks its signing credential.
#[derive(Clone)]
pub struct Invoker {
    pub principal: Principal,
    password: String,
}

impl Invoker {
    pub fn new(principal: Principal, password: impl Into<String>) -> Self {
        Self {
            principal,
            password: password.into(),
        }
    }

    pub fn id(&self) -> &ObjectId {
        &self.principal.id
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Invoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invoker")
            .field("principal", &self.principal)
            .finish_non_exhaustive()
    }
}

/// Connection pool, signer and configuration shared by every handle of one
/// client. Cheap to clone.
#[derive(Clone)]
pub struct ClientContext {
    pool: Arc<dyn ConnectionPool>,
    signer: Arc<dyn Signer>,
    config: Arc<Config>,
}

impl ClientContext {
    pub fn new(pool: Arc<dyn ConnectionPool>, signer: Arc<dyn Signer>, config: Config) -> Self {
        Self {
            pool,
            signer,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn signer(&self) -> &dyn Signer {
        self.signer.as_ref()
    }

    /// Sign `request` for `invoker` and execute it on a pooled connection.
    ///
    /// Local failures (signing, pool checkout) are the outer error; whatever
    /// the node answered is the inner result so that callers can act on
    /// [`StorageFault::OutOfDate`].
    pub(crate) fn submit(
        &self,
        invoker: &Invoker,
        request: StorageRequest,
    ) -> Result<std::result::Result<StorageReply, StorageFault>> {
        let digests = request
            .signing_digests()
            .map_err(|e| FsError::Runtime(format!("cannot encode {}: {}", request.name(), e)))?;
        let signature = self
            .signer
            .sign(&invoker.principal, invoker.password(), &digests)?;

        let op = request.name();
        let file = *request.file();
        let connection = PooledConnection::checkout(self.pool.as_ref())?;
        let result = connection.execute(SignedRequest {
            invoker: invoker.principal.id,
            request,
            signature,
        });
        if connection.is_broken() {
            log_pool_warn!("Discarding broken connection", op = op, file = display(&file));
        }
        if let Err(fault) = &result {
            log_store_debug!("Request faulted", op = op, file = display(&file), fault = display(fault));
        }
        Ok(result)
    }
}

impl fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Attributes of a file being created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationAttributes {
    pub content_type: String,
    pub block_size: u64,
    pub replication: String,
    pub deletion_time_to_live: u64,
    pub time_to_live: u64,
    pub sign_modifications: bool,
    pub cache_enabled: bool,
    /// Random when `None`.
    pub serial_number: Option<u64>,
    pub client_properties: PropertyList,
    pub group: ObjectId,
    pub acl: AccessControlList,
}

impl CreationAttributes {
    pub fn from_config(config: &FileConfig) -> Self {
        Self {
            content_type: config.content_type.clone(),
            block_size: config.block_size,
            replication: config.replication.clone(),
            deletion_time_to_live: config.deletion_time_to_live,
            time_to_live: config.time_to_live,
            sign_modifications: config.sign_modifications,
            cache_enabled: config.cache_enabled,
            serial_number: None,
            client_properties: PropertyList::new(),
            group: ObjectId::ZERO,
            acl: AccessControlList::default_file_acl(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_serial_number(mut self, serial_number: u64) -> Self {
        self.serial_number = Some(serial_number);
        self
    }

    pub fn with_client_properties(mut self, properties: PropertyList) -> Self {
        self.client_properties = properties;
        self
    }

    pub fn with_group(mut self, group: ObjectId) -> Self {
        self.group = group;
        self
    }

    pub fn with_acl(mut self, acl: AccessControlList) -> Self {
        self.acl = acl;
        self
    }

    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }
}

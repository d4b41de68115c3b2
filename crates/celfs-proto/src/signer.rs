use celfs_object::{Blake3Hash, Principal};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("unknown principal: {0}")]
    UnknownPrincipal(String),

    #[error("wrong password for {0}")]
    BadPassword(String),

    #[error("cannot decrypt: {0}")]
    Decrypt(String),
}

/// Signing and asymmetric encryption on behalf of principals.
pub trait Signer: Send + Sync {
    fn sign(
        &self,
        principal: &Principal,
        password: &str,
        digests: &[Blake3Hash],
    ) -> Result<Signature, SignerError>;

    /// Encrypt `plaintext` so that only `recipient` can decrypt it.
    fn encrypt(&self, recipient: &Principal, plaintext: &[u8]) -> Result<Vec<u8>, SignerError>;

    fn decrypt(
        &self,
        holder: &Principal,
        password: &str,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, SignerError>;
}

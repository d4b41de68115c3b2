//! Password-protected principals with symmetric stand-ins for signing and
//! encryption.
//!
//! Each principal's key is derived from its id and password. Signatures are
//! keyed BLAKE3 hashes over the request digests; ciphertexts are addressed
//! to a recipient and XORed with a keyed BLAKE3 stream.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use celfs_object::{Blake3Hash, ObjectId, Principal};
use celfs_proto::{Signature, Signer, SignerError};
use rand::RngCore;

const KEY_CONTEXT: &str = "celfs-memstore 2024 principal key";
const NONCE_LEN: usize = 16;

#[derive(Debug)]
struct Credential {
    principal: Principal,
    password: String,
    key: [u8; 32],
}

/// Registered principals.
#[derive(Debug, Default)]
pub struct Keyring {
    credentials: RwLock<HashMap<ObjectId, Credential>>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) a principal.
    pub fn register(&self, name: &str, password: &str) -> Principal {
        let principal = Principal::new(name);
        let key = derive_key(&principal.id, password);
        self.credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                principal.id,
                Credential {
                    principal: principal.clone(),
                    password: password.to_string(),
                    key,
                },
            );
        principal
    }

    pub fn principal(&self, id: &ObjectId) -> Option<Principal> {
        self.credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|c| c.principal.clone())
    }

    fn key(&self, id: &ObjectId) -> Result<[u8; 32], SignerError> {
        self.credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|c| c.key)
            .ok_or_else(|| SignerError::UnknownPrincipal(id.to_hex()))
    }

    fn unlock(&self, principal: &Principal, password: &str) -> Result<[u8; 32], SignerError> {
        let credentials = self.credentials.read().unwrap_or_else(PoisonError::into_inner);
        let credential = credentials
            .get(&principal.id)
            .ok_or_else(|| SignerError::UnknownPrincipal(principal.name.clone()))?;
        if credential.password != password {
            return Err(SignerError::BadPassword(principal.name.clone()));
        }
        Ok(credential.key)
    }

    /// Check a request signature made by `invoker`.
    pub fn verify(&self, invoker: &ObjectId, digests: &[Blake3Hash], signature: &Signature) -> bool {
        match self.key(invoker) {
            Ok(key) => signature.0 == mac(&key, digests),
            Err(_) => false,
        }
    }
}

/// [`Signer`] backed by a shared [`Keyring`].
#[derive(Debug, Clone)]
pub struct KeyringSigner {
    keyring: Arc<Keyring>,
}

impl KeyringSigner {
    pub fn new(keyring: Arc<Keyring>) -> Self {
        Self { keyring }
    }
}

impl Signer for KeyringSigner {
    fn sign(&self, principal: &Principal, password: &str, digests: &[Blake3Hash]) -> Result<Signature, SignerError> {
        let key = self.keyring.unlock(principal, password)?;
        Ok(Signature(mac(&key, digests)))
    }

    fn encrypt(&self, recipient: &Principal, plaintext: &[u8]) -> Result<Vec<u8>, SignerError> {
        let key = self.keyring.key(&recipient.id)?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);

        let mut out = Vec::with_capacity(32 + NONCE_LEN + plaintext.len());
        out.extend_from_slice(recipient.id.as_bytes());
        out.extend_from_slice(&nonce);
        out.extend(apply_stream(&key, &nonce, plaintext));
        Ok(out)
    }

    fn decrypt(&self, holder: &Principal, password: &str, ciphertext: &[u8]) -> Result<Vec<u8>, SignerError> {
        let key = self.keyring.unlock(holder, password)?;
        if ciphertext.len() < 32 + NONCE_LEN {
            return Err(SignerError::Decrypt("ciphertext too short".to_string()));
        }
        let (recipient, rest) = ciphertext.split_at(32);
        if recipient != holder.id.as_bytes() {
            return Err(SignerError::Decrypt(format!("not addressed to {}", holder.name)));
        }
        let (nonce, body) = rest.split_at(NONCE_LEN);
        Ok(apply_stream(&key, nonce, body))
    }
}

fn derive_key(id: &ObjectId, password: &str) -> [u8; 32] {
    let mut material = id.as_bytes().to_vec();
    material.extend_from_slice(password.as_bytes());
    blake3::derive_key(KEY_CONTEXT, &material)
}

fn mac(key: &[u8; 32], digests: &[Blake3Hash]) -> Vec<u8> {
    let mut hasher = blake3::Hasher::new_keyed(key);
    for digest in digests {
        hasher.update(digest);
    }
    hasher.finalize().as_bytes().to_vec()
}

fn apply_stream(key: &[u8; 32], nonce: &[u8], data: &[u8]) -> Vec<u8> {
    let mut stream = vec![0u8; data.len()];
    blake3::Hasher::new_keyed(key)
        .update(nonce)
        .finalize_xof()
        .fill(&mut stream);
    data.iter().zip(stream).map(|(b, k)| b ^ k).collect()
}

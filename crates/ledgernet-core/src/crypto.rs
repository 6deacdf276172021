//! Cryptographic capability for Ledgernet.
//!
//! Provides two seams the network layer calls and never looks behind:
//!   1. `Crypto`  — hashing, signature verification, address derivation
//!   2. `Signer`  — the node's own key: public key and signing
//!
//! The shipped implementation is BLAKE3 + Ed25519 (ed25519-dalek). Seeds
//! are held in `Zeroizing` buffers and wiped when dropped.

use std::path::{Path, PathBuf};

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::wire::Hash;

/// Ed25519 public key size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Number of hash bytes that make up an address.
const ADDRESS_BYTES: usize = 20;

// ── BLAKE3 ────────────────────────────────────────────────────────────────────

/// Hash a byte slice, returning a 32-byte BLAKE3 digest.
///
/// Used for transaction hashes, relayed-data hashes and address derivation.
pub fn hash(data: &[u8]) -> Hash {
    *blake3::hash(data).as_bytes()
}

/// Derive the account address for a public key: hex of the first 20 bytes
/// of its BLAKE3 hash.
pub fn address_of(public_key: &[u8]) -> String {
    hex::encode(&hash(public_key)[..ADDRESS_BYTES])
}

// ── Capabilities ──────────────────────────────────────────────────────────────

/// Hashing and verification. Stateless, shared by every handler.
pub trait Crypto: Send + Sync {
    fn hash(&self, data: &[u8]) -> Hash;

    /// `Ok(false)` for a well-formed signature that does not verify.
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8])
        -> Result<bool, CryptoError>;

    fn address_of(&self, public_key: &[u8]) -> String;
}

/// The node's own key material.
pub trait Signer: Send + Sync {
    fn public_key(&self) -> Result<[u8; PUBLIC_KEY_SIZE], CryptoError>;

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// BLAKE3 + Ed25519.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Crypto;

impl Crypto for Ed25519Crypto {
    fn hash(&self, data: &[u8]) -> Hash {
        hash(data)
    }

    fn verify(
        &self,
        public_key: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool, CryptoError> {
        let key_bytes: [u8; PUBLIC_KEY_SIZE] = public_key
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        let key =
            VerifyingKey::from_bytes(&key_bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        let sig = Signature::from_slice(signature).map_err(|_| CryptoError::InvalidSignature)?;
        Ok(key.verify(message, &sig).is_ok())
    }

    fn address_of(&self, public_key: &[u8]) -> String {
        address_of(public_key)
    }
}

// ── Node keys ─────────────────────────────────────────────────────────────────

/// The node's long-term Ed25519 signing key.
///
/// `NodeKeys::missing()` models a node whose key file could not be read;
/// every signing attempt then fails with `CryptoError::MissingKey`.
pub struct NodeKeys {
    signing: Option<SigningKey>,
}

impl NodeKeys {
    pub fn generate() -> Self {
        Self {
            signing: Some(SigningKey::generate(&mut rand::rngs::OsRng)),
        }
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        let seed = Zeroizing::new(seed);
        Self {
            signing: Some(SigningKey::from_bytes(&seed)),
        }
    }

    pub fn missing() -> Self {
        Self { signing: None }
    }

    /// Load the hex-encoded seed at `path`, or generate and persist a new
    /// one when the file does not exist.
    pub fn load_or_generate(path: &Path) -> Result<Self, CryptoError> {
        if path.exists() {
            let text = Zeroizing::new(
                std::fs::read_to_string(path)
                    .map_err(|e| CryptoError::KeyFile(path.to_path_buf(), e))?,
            );
            let bytes = Zeroizing::new(
                hex::decode(text.trim()).map_err(|_| CryptoError::BadKeyFile(path.to_path_buf()))?,
            );
            let seed: [u8; 32] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::BadKeyFile(path.to_path_buf()))?;
            return Ok(Self::from_seed(seed));
        }

        let keys = Self::generate();
        keys.persist(path)?;
        Ok(keys)
    }

    fn persist(&self, path: &Path) -> Result<(), CryptoError> {
        let signing = self.signing.as_ref().ok_or(CryptoError::MissingKey)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CryptoError::KeyFile(path.to_path_buf(), e))?;
        }
        let text = Zeroizing::new(hex::encode(signing.to_bytes()));
        std::fs::write(path, text.as_bytes())
            .map_err(|e| CryptoError::KeyFile(path.to_path_buf(), e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| CryptoError::KeyFile(path.to_path_buf(), e))?;
        }
        Ok(())
    }
}

impl Signer for NodeKeys {
    fn public_key(&self) -> Result<[u8; PUBLIC_KEY_SIZE], CryptoError> {
        self.signing
            .as_ref()
            .map(|k| k.verifying_key().to_bytes())
            .ok_or(CryptoError::MissingKey)
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key = self.signing.as_ref().ok_or(CryptoError::MissingKey)?;
        Ok(key.sign(message).to_bytes().to_vec())
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("local key material is not available")]
    MissingKey,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("malformed signature")]
    InvalidSignature,
    #[error("key file {0}: {1}")]
    KeyFile(PathBuf, std::io::Error),
    #[error("key file {0} does not hold a hex-encoded 32-byte seed")]
    BadKeyFile(PathBuf),
}

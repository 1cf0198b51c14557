//! RSA payload encryption for agent-to-collector bodies.
//!
//! Bodies larger than one RSA block are split into chunks, each encrypted
//! independently with OAEP/SHA-256; the ciphertext is the concatenation of
//! fixed-size blocks.

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::path::Path;

/// OAEP overhead for SHA-256: two hash lengths plus two bytes.
const OAEP_SHA256_OVERHEAD: usize = 2 * 32 + 2;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The key file could not be read.
    #[error("failed to read key file {path}: {source}")]
    KeyFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The PEM text is neither PKCS#8 nor PKCS#1.
    #[error("invalid {kind} key: {message}")]
    InvalidKey { kind: &'static str, message: String },

    #[error("rsa: {0}")]
    Rsa(#[from] rsa::Error),

    /// Ciphertext length is not a whole number of RSA blocks.
    #[error("ciphertext length {len} is not a multiple of block size {block}")]
    Malformed { len: usize, block: usize },
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// Agent side: encrypts with the collector's public key.
#[derive(Debug, Clone)]
pub struct PayloadEncryptor {
    key: RsaPublicKey,
}

impl PayloadEncryptor {
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| CryptoError::InvalidKey {
                kind: "public",
                message: e.to_string(),
            })?;
        Ok(Self { key })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_pem(&read_key(path.as_ref())?)
    }

    pub fn new(key: RsaPublicKey) -> Self {
        Self { key }
    }

    pub fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>> {
        let block = self.key.size();
        let chunk = block.saturating_sub(OAEP_SHA256_OVERHEAD).max(1);
        let mut rng = rand::thread_rng();
        let mut out = Vec::with_capacity(plain.len().div_ceil(chunk) * block);
        for piece in plain.chunks(chunk) {
            let sealed = self.key.encrypt(&mut rng, Oaep::new::<Sha256>(), piece)?;
            out.extend_from_slice(&sealed);
        }
        Ok(out)
    }
}

/// Collector side: decrypts with its private key.
#[derive(Debug, Clone)]
pub struct PayloadDecryptor {
    key: RsaPrivateKey,
}

impl PayloadDecryptor {
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| CryptoError::InvalidKey {
                kind: "private",
                message: e.to_string(),
            })?;
        Ok(Self { key })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_pem(&read_key(path.as_ref())?)
    }

    pub fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        let block = self.key.size();
        if sealed.len() % block != 0 {
            return Err(CryptoError::Malformed {
                len: sealed.len(),
                block,
            });
        }
        let mut out = Vec::with_capacity(sealed.len());
        for piece in sealed.chunks(block) {
            out.extend_from_slice(&self.key.decrypt(Oaep::new::<Sha256>(), piece)?);
        }
        Ok(out)
    }
}

fn read_key(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| CryptoError::KeyFile {
        path: path.display().to_string(),
        source,
    })
}

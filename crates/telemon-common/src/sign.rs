use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 signer shared by the agent (request bodies) and the collector
/// (request verification and response signing).
///
/// Signatures travel base64-encoded in the [`crate::SIGNATURE_HEADER`] header.
///
/// # Examples
///
/// ```
/// use telemon_common::sign::Signer;
///
/// let signer = Signer::new("secret").unwrap();
/// let sig = signer.sign(b"payload");
/// assert!(signer.verify(b"payload", &sig));
/// assert!(!signer.verify(b"tampered", &sig));
/// assert!(Signer::new("").is_none());
/// ```
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
}

impl Signer {
    /// Builds a signer, or `None` when `key` is empty (signing disabled).
    pub fn new(key: &str) -> Option<Self> {
        if key.is_empty() {
            return None;
        }
        let mac = HmacSha256::new_from_slice(key.as_bytes()).ok()?;
        Some(Self { mac })
    }

    pub fn from_config(key: Option<&str>) -> Option<Self> {
        key.and_then(Self::new)
    }

    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(body);
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of a base64 signature against `body`.
    pub fn verify(&self, body: &[u8], signature: &str) -> bool {
        let Ok(raw) = base64::engine::general_purpose::STANDARD.decode(signature.trim()) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(body);
        mac.verify_slice(&raw).is_ok()
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Signer(..)")
    }
}

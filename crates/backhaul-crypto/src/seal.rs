//! Credential sealing and unsealing.
//!
//! Secrets are serialized to JSON, encrypted with ChaCha20-Poly1305 under a
//! key derived from the installation master key, and stored as hex
//! `nonce || ciphertext`. Unsealing reverses the process and zeroizes the
//! intermediate plaintext buffer.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::keyfile::MasterKey;

/// HKDF info string for sealing key derivation.
const HKDF_INFO: &[u8] = b"backhaul-credential-seal-v1";

/// HKDF salt for domain separation (recommended by RFC 5869).
const HKDF_SALT: &[u8] = b"backhaul-hkdf-salt-v1";

/// Nonce size for ChaCha20-Poly1305.
const NONCE_SIZE: usize = 12;

/// An opaque sealed credential payload, hex-encoded for storage.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SealedBlob(String);

impl SealedBlob {
    /// Wrap an already-encoded blob (e.g. read back from the database).
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// The stored representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn decode(&self) -> Result<(Vec<u8>, [u8; NONCE_SIZE]), CryptoError> {
        let raw = hex::decode(&self.0)
            .map_err(|e| CryptoError::MalformedBlob(format!("invalid hex: {e}")))?;
        if raw.len() <= NONCE_SIZE {
            return Err(CryptoError::MalformedBlob(format!(
                "blob too short: {} bytes",
                raw.len()
            )));
        }
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&raw[..NONCE_SIZE]);
        Ok((raw[NONCE_SIZE..].to_vec(), nonce))
    }
}

/// Seals and unseals credential payloads under the installation key.
///
/// Construction derives the sealing key via HKDF-SHA256; the master key
/// itself never touches the cipher.
#[derive(Clone)]
pub struct CredentialSealer {
    cipher: ChaCha20Poly1305,
}

impl CredentialSealer {
    /// Build a sealer from the installation master key.
    pub fn new(master: &MasterKey) -> Result<Self, CryptoError> {
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), master.as_bytes());
        let mut key_bytes = [0u8; 32];
        hk.expand(HKDF_INFO, &mut key_bytes)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;

        let key = Key::from_slice(&key_bytes);
        let cipher = ChaCha20Poly1305::new(key);
        key_bytes.zeroize();

        Ok(Self { cipher })
    }

    /// Seal a serializable secret value into an opaque blob.
    pub fn seal<T: Serialize>(&self, value: &T) -> Result<SealedBlob, CryptoError> {
        let mut plaintext = serde_json::to_vec(value)
            .map_err(|e| CryptoError::SerializationError(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|e| CryptoError::SealFailed(e.to_string()))?;
        plaintext.zeroize();

        let mut raw = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        raw.extend_from_slice(&nonce_bytes);
        raw.extend_from_slice(&ciphertext);

        Ok(SealedBlob(hex::encode(raw)))
    }

    /// Unseal a blob back into its secret value.
    ///
    /// The intermediate plaintext buffer is zeroized; the caller owns the
    /// deserialized value and must discard it within the dispatch scope.
    pub fn unseal<T: DeserializeOwned>(&self, blob: &SealedBlob) -> Result<T, CryptoError> {
        let (ciphertext, nonce_bytes) = blob.decode()?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut plaintext = self
            .cipher
            .decrypt(nonce, ciphertext.as_slice())
            .map_err(|e| CryptoError::UnsealFailed(e.to_string()))?;

        let result = serde_json::from_slice(&plaintext)
            .map_err(|e| CryptoError::SerializationError(e.to_string()));
        plaintext.zeroize();

        result
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sealer() -> CredentialSealer {
        CredentialSealer::new(&MasterKey::generate()).unwrap()
    }

    fn secrets() -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        m.insert("access_key".to_string(), "AKIA123".to_string());
        m.insert("secret_key".to_string(), "s3cr3t".to_string());
        m
    }

    #[test]
    fn seal_unseal_roundtrip() {
        let s = sealer();
        let blob = s.seal(&secrets()).unwrap();
        let out: BTreeMap<String, String> = s.unseal(&blob).unwrap();
        assert_eq!(out, secrets());
    }

    #[test]
    fn blob_is_opaque() {
        let s = sealer();
        let blob = s.seal(&secrets()).unwrap();
        assert!(!blob.as_str().contains("AKIA123"));
        assert!(!blob.as_str().contains("s3cr3t"));
    }

    #[test]
    fn nonces_differ_between_seals() {
        let s = sealer();
        let a = s.seal(&secrets()).unwrap();
        let b = s.seal(&secrets()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_to_unseal() {
        let blob = sealer().seal(&secrets()).unwrap();
        let other = sealer();
        let result: Result<BTreeMap<String, String>, _> = other.unseal(&blob);
        assert!(matches!(result, Err(CryptoError::UnsealFailed(_))));
    }

    #[test]
    fn tampered_blob_fails() {
        let s = sealer();
        let blob = s.seal(&secrets()).unwrap();
        let mut tampered = blob.as_str().to_string();
        let last = tampered.pop().unwrap();
        tampered.push(if last == '0' { '1' } else { '0' });

        let result: Result<BTreeMap<String, String>, _> =
            s.unseal(&SealedBlob::from_encoded(tampered));
        assert!(result.is_err());
    }

    #[test]
    fn malformed_blob_is_rejected() {
        let s = sealer();
        let result: Result<BTreeMap<String, String>, _> =
            s.unseal(&SealedBlob::from_encoded("not-hex"));
        assert!(matches!(result, Err(CryptoError::MalformedBlob(_))));

        let result: Result<BTreeMap<String, String>, _> =
            s.unseal(&SealedBlob::from_encoded("abcd"));
        assert!(matches!(result, Err(CryptoError::MalformedBlob(_))));
    }
}

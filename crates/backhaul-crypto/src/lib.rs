//! Backhaul Credential Sealing Library
//!
//! Remote-storage credentials are held at rest as sealed blobs: the
//! orchestration core never persists plaintext secrets, and decryption
//! happens only at job-dispatch time.
//!
//! ## Crypto primitives
//!
//! - **Master key**: 32 random bytes, installation-scoped, stored with
//!   owner-only permissions. Rotating it invalidates every sealed payload.
//! - **Sealing key**: HKDF-SHA256 over the master key with a domain
//!   separation label.
//! - **Sealing**: ChaCha20-Poly1305 AEAD, random 12-byte nonce per blob,
//!   stored as hex `nonce || ciphertext`.

pub mod error;
pub mod keyfile;
pub mod seal;

pub use error::CryptoError;
pub use keyfile::MasterKey;
pub use seal::{CredentialSealer, SealedBlob};

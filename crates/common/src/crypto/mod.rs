//! Signature contexts.
//!
//! A signature context owns the process keystore: a map from owner
//! fingerprint to that owner's public keys (and, when available, the
//! private key used for signing). Manifest verification asks the context
//! whether a detached signature over the body bytes was made by a key
//! registered to the claimed owner.
//!
//! Two implementations exist:
//!
//! - [`Ed25519SigContext`]: real Ed25519 signatures
//! - [`DummySigContext`]: signatures are the literal string `dummy.<owner>`,
//!   for tests and offline tooling
//!
//! Owners hold multiple public keys so they can rotate or delegate signing
//! without changing identity; the first registered key is the primary one
//! and the only key accepted on user manifests.

mod dummy;
mod ed25519;

use std::collections::HashMap;

pub use dummy::DummySigContext;
pub use ed25519::Ed25519SigContext;

/// Errors from signing and verification.
#[derive(Debug, thiserror::Error)]
pub enum SigError {
    #[error("no private key for owner {0}")]
    NoPrivateKey(String),
    #[error("signature by a key not registered to owner {expected}")]
    UntrustedSigner { expected: String },
    #[error("malformed signature: {0}")]
    MalformedSignature(String),
    #[error("missing signature")]
    MissingSignature,
    #[error("unknown owner: {0}")]
    UnknownOwner(String),
    #[error("crypto error: {0}")]
    Crypto(String),
}

/// Raw public key bytes.
///
/// The interpretation is up to the signature context: the Ed25519 context
/// treats them as a compressed Edwards point, the dummy context as an
/// owner-id marker. Hex round-trips are stable either way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        PublicKey(bytes.to_vec())
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, SigError> {
        let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        let bytes = hex::decode(hex_str)
            .map_err(|_| SigError::MalformedSignature("public key hex decode error".into()))?;
        Ok(PublicKey(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Keys registered for a single owner.
///
/// `pubkeys[0]` is the primary key; it alone may sign user manifests.
#[derive(Debug, Clone, Default)]
pub(crate) struct OwnerKeys {
    pub pubkeys: Vec<PublicKey>,
    pub private: Option<Vec<u8>>,
}

/// The shared keystore, keyed by owner fingerprint.
#[derive(Debug, Clone, Default)]
pub(crate) struct Keystore {
    pub owners: HashMap<String, OwnerKeys>,
}

impl Keystore {
    pub fn add_pubkey(&mut self, owner: &str, pubkey: PublicKey) {
        let entry = self.owners.entry(owner.to_string()).or_default();
        if !entry.pubkeys.contains(&pubkey) {
            entry.pubkeys.push(pubkey);
        }
    }

    pub fn is_owner_key(&self, owner: &str, pubkey: &PublicKey) -> bool {
        self.owners
            .get(owner)
            .map(|keys| keys.pubkeys.contains(pubkey))
            .unwrap_or(false)
    }

    pub fn primary(&self, owner: &str) -> Option<&PublicKey> {
        self.owners.get(owner).and_then(|keys| keys.pubkeys.first())
    }
}

/// A process-wide signing and verification facility.
///
/// All methods take `&self`; keystore writes go through an internal lock.
pub trait SigContext: Send + Sync {
    /// Derive the owner fingerprint of a public key. Deterministic.
    fn fingerprint(&self, pubkey: &PublicKey) -> String;

    /// Generate a fresh keypair, register it, and return `(owner, pubkey)`.
    fn generate(&self) -> Result<(String, PublicKey), SigError>;

    /// Sign `data` with the owner's private key.
    fn sign(&self, owner: &str, data: &[u8]) -> Result<String, SigError>;

    /// Verify a detached signature, returning the public key that made it.
    ///
    /// When `expected_owner` is given, the key must be registered to that
    /// owner; a signature by anyone else is [`SigError::UntrustedSigner`].
    fn verify(
        &self,
        signature: &str,
        data: &[u8],
        expected_owner: Option<&str>,
    ) -> Result<PublicKey, SigError>;

    /// Register an additional public key for an owner.
    fn load_pubkey(&self, owner: &str, pubkey: PublicKey);

    /// Is any key registered for this owner?
    fn is_known_owner(&self, owner: &str) -> bool;

    /// The owner's primary public key, if registered.
    fn primary_pubkey(&self, owner: &str) -> Option<PublicKey>;

    /// Deep-copy the context, keystore included.
    ///
    /// Sub-clients obtained while crossing a bridge extend the copy with
    /// the bridge target's key without affecting the parent context.
    fn clone_ctx(&self) -> Box<dyn SigContext>;
}

/// Fingerprint scheme shared by the real contexts:
/// `0x` + lowercase hex of SHA-256 over the raw public key bytes.
pub(crate) fn sha256_fingerprint(pubkey: &PublicKey) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(pubkey.as_bytes());
    format!("0x{}", hex::encode(digest))
}

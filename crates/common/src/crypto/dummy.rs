use parking_lot::RwLock;

use super::{Keystore, PublicKey, SigContext, SigError};

/// Test signature context: signatures are the literal string `dummy.<owner>`.
///
/// A signature verifies iff the claimed owner is present in the keystore,
/// so trust decisions (bridge crossings, sub-clients with extra keys) are
/// exercised exactly as with real keys. The "public key" of an owner is the
/// owner fingerprint's UTF-8 bytes.
#[derive(Default)]
pub struct DummySigContext {
    keys: RwLock<Keystore>,
}

impl DummySigContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an owner chosen by the caller, with signing capability.
    /// Tests use fixed fingerprints like `0xaaa`.
    pub fn create_owner(&self, owner: &str) -> PublicKey {
        let pubkey = Self::owner_pubkey(owner);
        let mut keys = self.keys.write();
        keys.add_pubkey(owner, pubkey.clone());
        keys.owners
            .get_mut(owner)
            .expect("owner just inserted")
            .private = Some(pubkey.as_bytes().to_vec());
        pubkey
    }

    fn owner_pubkey(owner: &str) -> PublicKey {
        PublicKey::from_bytes(owner.as_bytes())
    }
}

impl SigContext for DummySigContext {
    fn fingerprint(&self, pubkey: &PublicKey) -> String {
        String::from_utf8_lossy(pubkey.as_bytes()).into_owned()
    }

    fn generate(&self) -> Result<(String, PublicKey), SigError> {
        let suffix: [u8; 6] = rand::random();
        let owner = format!("0x{}", hex::encode(suffix));
        Ok((owner.clone(), self.create_owner(&owner)))
    }

    fn sign(&self, owner: &str, _data: &[u8]) -> Result<String, SigError> {
        // Any recognized owner can sign in dummy mode.
        if !self.keys.read().owners.contains_key(owner) {
            return Err(SigError::UnknownOwner(owner.to_string()));
        }
        Ok(format!("dummy.{owner}"))
    }

    fn verify(
        &self,
        signature: &str,
        _data: &[u8],
        expected_owner: Option<&str>,
    ) -> Result<PublicKey, SigError> {
        let owner = signature
            .trim()
            .strip_prefix("dummy.")
            .ok_or_else(|| SigError::MalformedSignature("expected dummy.<owner>".into()))?;
        let keys = self.keys.read();
        if !keys.owners.contains_key(owner) {
            return Err(SigError::UntrustedSigner {
                expected: expected_owner.unwrap_or(owner).to_string(),
            });
        }
        if let Some(expected) = expected_owner {
            if expected != owner {
                return Err(SigError::UntrustedSigner {
                    expected: expected.to_string(),
                });
            }
        }
        // A dummy signature stands for the owner as such; report it as
        // made by their primary key.
        Ok(keys
            .primary(owner)
            .cloned()
            .unwrap_or_else(|| Self::owner_pubkey(owner)))
    }

    fn load_pubkey(&self, owner: &str, pubkey: PublicKey) {
        self.keys.write().add_pubkey(owner, pubkey);
    }

    fn is_known_owner(&self, owner: &str) -> bool {
        self.keys.read().owners.contains_key(owner)
    }

    fn primary_pubkey(&self, owner: &str) -> Option<PublicKey> {
        self.keys.read().primary(owner).cloned()
    }

    fn clone_ctx(&self) -> Box<dyn SigContext> {
        Box::new(DummySigContext {
            keys: RwLock::new(self.keys.read().clone()),
        })
    }
}

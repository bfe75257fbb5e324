use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use parking_lot::RwLock;
use rand::rngs::OsRng;

use super::{sha256_fingerprint, Keystore, PublicKey, SigContext, SigError};

/// Real signature context backed by Ed25519.
///
/// The signature string is two lines: `<owner>.<pubkey-hex>` followed by
/// the hex-encoded detached signature over the body bytes.
#[derive(Default)]
pub struct Ed25519SigContext {
    keys: RwLock<Keystore>,
}

impl Ed25519SigContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn verifying_key(pubkey: &PublicKey) -> Result<VerifyingKey, SigError> {
        let bytes: [u8; 32] = pubkey
            .as_bytes()
            .try_into()
            .map_err(|_| SigError::Crypto("public key must be 32 bytes".into()))?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|e| SigError::Crypto(format!("invalid public key: {e}")))
    }
}

impl SigContext for Ed25519SigContext {
    fn fingerprint(&self, pubkey: &PublicKey) -> String {
        sha256_fingerprint(pubkey)
    }

    fn generate(&self) -> Result<(String, PublicKey), SigError> {
        let signing = SigningKey::generate(&mut OsRng);
        let pubkey = PublicKey::from_bytes(signing.verifying_key().as_bytes());
        let owner = self.fingerprint(&pubkey);

        let mut keys = self.keys.write();
        keys.add_pubkey(&owner, pubkey.clone());
        keys.owners
            .get_mut(&owner)
            .expect("owner just inserted")
            .private = Some(signing.to_bytes().to_vec());

        Ok((owner, pubkey))
    }

    fn sign(&self, owner: &str, data: &[u8]) -> Result<String, SigError> {
        let keys = self.keys.read();
        let entry = keys
            .owners
            .get(owner)
            .ok_or_else(|| SigError::UnknownOwner(owner.to_string()))?;
        let private = entry
            .private
            .as_ref()
            .ok_or_else(|| SigError::NoPrivateKey(owner.to_string()))?;
        let bytes: [u8; 32] = private
            .as_slice()
            .try_into()
            .map_err(|_| SigError::Crypto("private key must be 32 bytes".into()))?;
        let signing = SigningKey::from_bytes(&bytes);
        let pubkey = PublicKey::from_bytes(signing.verifying_key().as_bytes());
        let signature = signing.sign(data);
        Ok(format!(
            "{}.{}\n{}",
            owner,
            pubkey.to_hex(),
            hex::encode(signature.to_bytes())
        ))
    }

    fn verify(
        &self,
        signature: &str,
        data: &[u8],
        expected_owner: Option<&str>,
    ) -> Result<PublicKey, SigError> {
        let (head, sig_hex) = signature
            .split_once('\n')
            .ok_or_else(|| SigError::MalformedSignature("expected two lines".into()))?;
        let (owner, pubkey_hex) = head
            .rsplit_once('.')
            .ok_or_else(|| SigError::MalformedSignature("missing owner.pubkey prefix".into()))?;
        let pubkey = PublicKey::from_hex(pubkey_hex)?;

        let sig_bytes = hex::decode(sig_hex.trim())
            .map_err(|_| SigError::MalformedSignature("signature hex decode error".into()))?;
        let sig_arr: [u8; 64] = sig_bytes
            .as_slice()
            .try_into()
            .map_err(|_| SigError::MalformedSignature("signature must be 64 bytes".into()))?;
        let verifying = Self::verifying_key(&pubkey)?;
        verifying
            .verify(data, &Signature::from_bytes(&sig_arr))
            .map_err(|_| SigError::Crypto("signature verification failed".into()))?;

        let keys = self.keys.read();
        if !keys.is_owner_key(owner, &pubkey) {
            return Err(SigError::UntrustedSigner {
                expected: owner.to_string(),
            });
        }
        if let Some(expected) = expected_owner {
            if !keys.is_owner_key(expected, &pubkey) {
                return Err(SigError::UntrustedSigner {
                    expected: expected.to_string(),
                });
            }
        }
        Ok(pubkey)
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
        Box::new(Ed25519SigContext {
            keys: RwLock::new(self.keys.read().clone()),
        })
    }
}

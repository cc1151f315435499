//! Key derivation from a master seed and a key index.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use sarco_types::KeyIndex;
use serde::{Deserialize, Serialize};

use crate::seed::MasterSeed;

/// Domain separator mixed into every derivation.
const DERIVATION_CONTEXT: &[u8] = b"sarco-archaeologist/obligation-key/v1";

/// Maps a key index to a signing key.
///
/// Implementations must be total and deterministic: the same index always
/// yields the same key for a given seed.
pub trait KeyDeriver: Send + Sync {
    fn derive(&self, index: KeyIndex) -> DerivedKey;
}

/// Public identifier of a derived key (Ed25519 verifying key bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKeyBytes([u8; 32]);

impl PublicKeyBytes {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for PublicKeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PublicKeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKeyBytes({})", self)
    }
}

/// A signing key bound to one key index.
#[derive(Clone)]
pub struct DerivedKey {
    index: KeyIndex,
    signing_key: SigningKey,
}

impl DerivedKey {
    pub fn index(&self) -> KeyIndex {
        self.index
    }

    pub fn public_key(&self) -> PublicKeyBytes {
        PublicKeyBytes(self.signing_key.verifying_key().to_bytes())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Raw secret revealed in the unwrap transaction.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey")
            .field("index", &self.index)
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Derives Ed25519 keys with BLAKE3 keyed hashing of the index.
pub struct Blake3KeyDeriver {
    seed: MasterSeed,
}

impl Blake3KeyDeriver {
    pub fn new(seed: MasterSeed) -> Self {
        Self { seed }
    }
}

impl KeyDeriver for Blake3KeyDeriver {
    fn derive(&self, index: KeyIndex) -> DerivedKey {
        let mut hasher = blake3::Hasher::new_keyed(self.seed.as_bytes());
        hasher.update(DERIVATION_CONTEXT);
        hasher.update(&index.value().to_be_bytes());
        let secret: [u8; 32] = *hasher.finalize().as_bytes();

        DerivedKey {
            index,
            signing_key: SigningKey::from_bytes(&secret),
        }
    }
}

impl fmt::Debug for Blake3KeyDeriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blake3KeyDeriver").finish_non_exhaustive()
    }
}

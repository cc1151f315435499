//! Strongly-typed identifiers
//!
//! Ledger values are fixed-size byte strings wrapped in newtypes so that an
//! obligation identifier can never be confused with an agent address.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TypesError};

fn decode_fixed<const N: usize>(kind: &'static str, s: &str) -> Result<[u8; N]> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(trimmed).map_err(|e| TypesError::InvalidHex(e.to_string()))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| TypesError::InvalidLength {
            kind,
            expected: N,
            actual: bytes.len(),
        })
}

/// Identifier of a sarcophagus record, assigned once by the ledger.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObligationId([u8; 32]);

impl ObligationId {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for ObligationId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        decode_fixed("obligation id", s).map(Self)
    }
}

impl fmt::Display for ObligationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ObligationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First four bytes are enough to tell obligations apart in logs
        write!(f, "ObligationId(0x{}..)", hex::encode(&self.0[..4]))
    }
}

/// Ledger address of an archaeologist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentIdentity([u8; 20]);

impl AgentIdentity {
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl FromStr for AgentIdentity {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        decode_fixed("agent identity", s).map(Self)
    }
}

impl fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Position in the deterministic key sequence.
///
/// Bound to an obligation exactly once, the first time its payload is known.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct KeyIndex(u64);

impl KeyIndex {
    pub const ZERO: KeyIndex = KeyIndex(0);

    pub const fn new(index: u64) -> Self {
        Self(index)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for KeyIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obligation_id_hex_roundtrip() {
        let id = ObligationId::from_bytes([0xab; 32]);
        let parsed: ObligationId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_identity_accepts_unprefixed_hex() {
        let identity: AgentIdentity = "11".repeat(20).parse().unwrap();
        assert_eq!(identity.as_bytes(), &[0x11; 20]);
    }

    #[test]
    fn test_identity_rejects_wrong_length() {
        let err = "0x1234".parse::<AgentIdentity>().unwrap_err();
        assert_eq!(
            err,
            TypesError::InvalidLength {
                kind: "agent identity",
                expected: 20,
                actual: 2,
            }
        );
    }

    #[test]
    fn test_identity_rejects_bad_hex() {
        assert!(matches!(
            "0xzz".parse::<AgentIdentity>(),
            Err(TypesError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_key_index_next() {
        assert_eq!(KeyIndex::ZERO.next(), KeyIndex::new(1));
        assert!(KeyIndex::new(3) > KeyIndex::new(2));
    }
}

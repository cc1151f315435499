//! Master seed handling.

use std::fmt;
use std::str::FromStr;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{KeyError, Result};

/// Secret root of the key sequence. Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterSeed([u8; 32]);

impl MasterSeed {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for MasterSeed {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let mut bytes =
            hex::decode(trimmed).map_err(|e| KeyError::InvalidSeedEncoding(e.to_string()))?;

        let seed = match <[u8; 32]>::try_from(bytes.as_slice()) {
            Ok(array) => Ok(Self(array)),
            Err(_) => Err(KeyError::InvalidSeedLength(bytes.len())),
        };
        bytes.zeroize();
        seed
    }
}

impl fmt::Debug for MasterSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterSeed(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_seed() {
        let seed: MasterSeed = format!("0x{}", "ab".repeat(32)).parse().unwrap();
        assert_eq!(seed.as_bytes(), &[0xab; 32]);
    }

    #[test]
    fn test_reject_short_seed() {
        assert_eq!(
            "abcd".parse::<MasterSeed>().unwrap_err(),
            KeyError::InvalidSeedLength(2)
        );
    }

    #[test]
    fn test_debug_is_redacted() {
        let seed = MasterSeed::from_bytes([1; 32]);
        assert_eq!(format!("{:?}", seed), "MasterSeed(<redacted>)");
    }
}

//! Sarco Keys - Deterministic per-obligation key derivation
//!
//! Every sarcophagus an archaeologist accepts is bound to its own signing
//! key. Keys are never stored: they are re-derived from a single master seed
//! and the obligation's [`KeyIndex`](sarco_types::KeyIndex).
//!
//! ```rust
//! use sarco_keys::{Blake3KeyDeriver, KeyDeriver, MasterSeed};
//! use sarco_types::KeyIndex;
//!
//! let seed = MasterSeed::from_bytes([7u8; 32]);
//! let deriver = Blake3KeyDeriver::new(seed);
//!
//! let first = deriver.derive(KeyIndex::new(0));
//! let again = deriver.derive(KeyIndex::new(0));
//! assert_eq!(first.public_key(), again.public_key());
//! ```

#![deny(unsafe_code)]

pub mod deriver;
pub mod error;
pub mod seed;

pub use deriver::{Blake3KeyDeriver, DerivedKey, KeyDeriver, PublicKeyBytes};
pub use error::{KeyError, Result};
pub use seed::MasterSeed;

//! Cryptographic primitives for the KeyFile.
//!
//! Key derivation, the slot stream cipher, checksum hashing, and the
//! finite field used by the share layer.

pub mod cipher;
pub mod gf256;
pub mod hash;
pub mod kdf;

pub use cipher::apply_keystream;
pub use hash::{sha512, Expander};
pub use kdf::{derive_master, KdfParams};

/// Length of a per-slot encryption key (32 bytes / 256 bits).
pub const KEY_LEN: usize = 32;
/// Length of a per-slot nonce (24 bytes for XChaCha20).
pub const NONCE_LEN: usize = 24;
/// Length of the master key derived from a password (64 bytes).
pub const MASTER_LEN: usize = 64;
/// Length of the slot codec tag (2 bytes, deliberately short).
pub const SLOT_TAG_LEN: usize = 2;
/// Length of the entry checksum (8 bytes, the final recovery arbiter).
pub const ENTRY_CHECK_LEN: usize = 8;

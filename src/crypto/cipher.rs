use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::{Key, XChaCha20, XNonce};

use super::{KEY_LEN, NONCE_LEN};

/// Apply the XChaCha20 keystream to `buf` in place.
///
/// Encryption and decryption are the same operation; the output is exactly
/// as long as the input. Slots depend on this: an expanding mode would make
/// written slots distinguishable from unwritten ones.
pub fn apply_keystream(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], buf: &mut [u8]) {
    let mut cipher = XChaCha20::new(Key::from_slice(key), XNonce::from_slice(nonce));
    cipher.apply_keystream(buf);
}

//! Slot codec and password-to-slot derivation.
//!
//! A slot is a fixed-size opaque byte string. Sealed plaintext layout:
//!
//! ```text
//! TAG (2) | LEN (1) | PAYLOAD (len) | RANDOM PAD
//! ```
//!
//! The whole buffer is encrypted with a per-slot key and nonce, so at rest
//! every slot is keystream output, indistinguishable from the random fill
//! of unwritten slots. The tag is deliberately short: a random slot passes
//! it once in 2¹⁶ decodes, and the layers above must treat a decoded
//! payload as *plausible*, not proven.

use anyhow::Result;
use zeroize::Zeroizing;

use crate::crypto::{
    self, apply_keystream, derive_master, sha512, Expander, KdfParams, KEY_LEN, MASTER_LEN,
    NONCE_LEN, SLOT_TAG_LEN,
};
use crate::entropy::Entropy;
use crate::error::LockerError;

/// Default slot size in bytes. Fits a 256-bit key entry.
pub const SLOT_SIZE: usize = 64;
/// Extended slot size, for 512-bit XTS keys and long device names.
pub const EXTENDED_SLOT_SIZE: usize = 128;

const LEN_BYTE: usize = 1;

/// Usable payload bytes in one slot.
pub fn capacity(slot_size: usize) -> usize {
    slot_size - SLOT_TAG_LEN - LEN_BYTE
}

/// All key material derived from one (password, KeyFile, device) binding.
///
/// Wraps the Argon2 master key; slot indices, per-slot keys, and per-slot
/// nonces are all deterministically expanded from it, so the same password
/// always addresses the same slots.
pub struct SlotKeys {
    dkey: Zeroizing<[u8; MASTER_LEN]>,
}

impl SlotKeys {
    /// Run the memory-hard derivation. This is the expensive step (seconds
    /// at real parameters) and the only place the password is consumed.
    pub fn derive(
        password: &[u8],
        head_salt: &[u8],
        tail_salt: &[u8],
        device_id: &str,
        kdf: KdfParams,
    ) -> Result<Self> {
        let device_hash = sha512(&[device_id.as_bytes()]);

        let mut salt = Zeroizing::new(Vec::with_capacity(
            head_salt.len() + tail_salt.len() + device_hash.len(),
        ));
        salt.extend_from_slice(head_salt);
        salt.extend_from_slice(tail_salt);
        salt.extend_from_slice(&device_hash);

        let dkey = derive_master(password, &salt, kdf)?;
        Ok(Self { dkey })
    }

    /// The first `count` distinct slot indices for this binding, drawn from
    /// the derived selection stream modulo `slot_count`. Duplicates are
    /// rejected and redrawn, so a longer prefix never reorders a shorter one.
    pub fn indices(&self, count: usize, slot_count: u64) -> Result<Vec<u64>> {
        if (slot_count as usize) < count {
            return Err(LockerError::Usage(format!(
                "KeyFile has only {slot_count} slots, need {count}"
            ))
            .into());
        }

        let mut expander = Expander::new(sha512(&[&self.dkey[..], b"slots"]));
        let mut picked = Vec::with_capacity(count);
        // bounded draw; duplicates are rare for realistic slot counts
        for _ in 0..100_000 {
            if picked.len() == count {
                break;
            }
            let index = expander.next_u32() as u64 % slot_count;
            if !picked.contains(&index) {
                picked.push(index);
            }
        }
        if picked.len() != count {
            return Err(LockerError::Usage(
                "slot selection failed to find distinct indices".into(),
            )
            .into());
        }
        Ok(picked)
    }

    /// Per-slot encryption key for slot `index`.
    pub fn slot_key(&self, index: u64) -> Zeroizing<[u8; KEY_LEN]> {
        let digest = sha512(&[&self.dkey[..], b"slot", &(index as u32).to_le_bytes()]);
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(&digest[..KEY_LEN]);
        key
    }

    /// Per-slot nonce for slot `index`.
    pub fn slot_nonce(&self, index: u64) -> [u8; NONCE_LEN] {
        let digest = sha512(&[&self.dkey[..], b"nonce", &(index as u32).to_le_bytes()]);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&digest[..NONCE_LEN]);
        nonce
    }
}

/// Encrypt `payload` into a full slot image of `slot_size` bytes.
pub fn seal(
    payload: &[u8],
    slot_size: usize,
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    entropy: &mut Entropy,
) -> Result<Vec<u8>> {
    if payload.is_empty() || payload.len() > capacity(slot_size) {
        return Err(LockerError::Usage(format!(
            "payload of {} bytes does not fit a {slot_size}-byte slot",
            payload.len()
        ))
        .into());
    }

    let mut slot = vec![0u8; slot_size];
    slot[..SLOT_TAG_LEN].copy_from_slice(&tag(payload));
    slot[SLOT_TAG_LEN] = payload.len() as u8;

    let data_start = SLOT_TAG_LEN + LEN_BYTE;
    slot[data_start..data_start + payload.len()].copy_from_slice(payload);
    entropy.fill(&mut slot[data_start + payload.len()..])?;

    apply_keystream(key, nonce, &mut slot);
    Ok(slot)
}

/// Decrypt a slot image and return the payload if it decodes plausibly.
///
/// `None` means the slot never held this binding's data, was overwritten,
/// or is random fill; the three cases are deliberately indistinguishable.
pub fn open(
    slot: &[u8],
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
) -> Option<Zeroizing<Vec<u8>>> {
    let mut plain = Zeroizing::new(slot.to_vec());
    apply_keystream(key, nonce, &mut plain);

    let len = plain[SLOT_TAG_LEN] as usize;
    if len == 0 || len > capacity(plain.len()) {
        return None;
    }

    let data_start = SLOT_TAG_LEN + LEN_BYTE;
    let payload = &plain[data_start..data_start + len];
    if tag(payload) != plain[..SLOT_TAG_LEN] {
        return None;
    }
    Some(Zeroizing::new(payload.to_vec()))
}

fn tag(payload: &[u8]) -> [u8; SLOT_TAG_LEN] {
    let digest = sha512(&[b"slot tag", &[payload.len() as u8], payload]);
    [digest[0], digest[1]]
}

/// Sanity constant: crypto constants must fit the smallest slot.
const _: () = assert!(SLOT_SIZE > crypto::SLOT_TAG_LEN + 1);

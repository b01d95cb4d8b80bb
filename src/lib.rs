//! KeyLocker - deniable key vault hidden inside a file or disk region
//!
//! A KeyFile is a byte region filled with uniform random data. Entries
//! (typically the cipher key and byte range of a hidden encrypted
//! partition) are stored by overwriting password-derived slots with
//! encrypted shares. Without the password the region stays
//! indistinguishable from random fill: there is no header, no version
//! marker, no index, and no way to count the entries it holds.
//!
//! # Security
//!
//! Slot positions and keys are derived with Argon2id from the password,
//! the KeyFile's salt regions, and the target device identifier. Entries
//! are split with Shamir's scheme (default 7 shares, threshold 4) so later
//! entries may safely collide with a few slots of earlier ones.
//!
//! # Quick Start
//!
//! ```ignore
//! use keylocker::{Entropy, Entry, KdfParams, KeyLocker, Region, StoreMode};
//!
//! let region = Region::open("vault.bin".as_ref(), None, None, true)?;
//! let mut locker = KeyLocker::create(region, KdfParams::default(), false, Entropy::new()?)?;
//!
//! locker.put(b"hunter2", "DISK-A", &Entry::text("my secret"), StoreMode::default())?;
//! let entry = locker.get(b"hunter2", "DISK-A")?;
//! ```

mod crypto;
mod entropy;
mod entry;
mod error;
mod region;
mod shamir;
mod slots;

pub use crate::crypto::KdfParams;
pub use crate::entropy::Entropy;
pub use crate::entry::Entry;
pub use crate::error::LockerError;
pub use crate::region::{ByteSpec, Region};
pub use crate::slots::{EXTENDED_SLOT_SIZE, SLOT_SIZE};

use anyhow::Result;
use crate::shamir::MAX_SHARES;
use crate::slots::SlotKeys;

/// Fewest slots a region must hold to be usable.
const MIN_SLOT_COUNT: u64 = 10;

/// How a single entry is encoded across its slots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StoreMode {
    /// Split into `shares` fragments, any `threshold` of which recover the
    /// entry. Tolerates `shares - threshold` slot collisions.
    Shamir { shares: u8, threshold: u8 },
    /// Store `copies` full copies; any surviving one recovers the entry.
    Plain { copies: u8 },
}

impl Default for StoreMode {
    fn default() -> Self {
        StoreMode::Shamir {
            shares: 7,
            threshold: 4,
        }
    }
}

/// A KeyFile bound to an open region.
///
/// Layout: `salt | slot 0 .. slot K-1 | salt`, with the salt length equal
/// to one slot. None of the parameters are recorded in the file; length is
/// discovered from the region and everything else is fixed at build time.
pub struct KeyLocker {
    region: Region,
    entropy: Entropy,
    kdf: KdfParams,
    slot_size: usize,
    slot_count: u64,
}

impl KeyLocker {
    /// Bind an existing KeyFile. Fails if the region is too small to hold
    /// the minimum slot count.
    pub fn open(region: Region, kdf: KdfParams, extended: bool, entropy: Entropy) -> Result<Self> {
        let slot_size = if extended { EXTENDED_SLOT_SIZE } else { SLOT_SIZE };
        let salted = 2 * slot_size as u64;

        let slot_count = region
            .size()
            .checked_sub(salted)
            .map(|area| area / slot_size as u64)
            .unwrap_or(0);
        if slot_count < MIN_SLOT_COUNT {
            return Err(LockerError::Usage(format!(
                "region of {} bytes is too small for a KeyFile (need {} slots)",
                region.size(),
                MIN_SLOT_COUNT
            ))
            .into());
        }

        Ok(Self {
            region,
            entropy,
            kdf,
            slot_size,
            slot_count,
        })
    }

    /// Initialize a fresh KeyFile: fill the whole region, salts and slots
    /// and the tail remainder alike, with random bytes.
    pub fn create(
        region: Region,
        kdf: KdfParams,
        extended: bool,
        entropy: Entropy,
    ) -> Result<Self> {
        let mut locker = Self::open(region, kdf, extended, entropy)?;
        locker.randomize_region()?;
        Ok(locker)
    }

    /// Store `entry` for `(password, device_id)`. Only the derived slots
    /// are written; everything else in the region is untouched, so other
    /// entries are disturbed only by genuine slot collisions.
    pub fn put(
        &mut self,
        password: &[u8],
        device_id: &str,
        entry: &Entry,
        mode: StoreMode,
    ) -> Result<()> {
        let payload = entry.pack()?;
        self.check_fits(&payload, mode)?;

        let keys = self.derive_keys(password, device_id)?;
        match mode {
            StoreMode::Shamir { shares, threshold } => {
                let fragments = shamir::split(&payload, shares, threshold, &mut self.entropy)?;
                let indices = keys.indices(shares as usize, self.slot_count)?;
                for (fragment, &index) in fragments.iter().zip(&indices) {
                    self.write_slot(&keys, index, fragment)?;
                }
            }
            StoreMode::Plain { copies } => {
                if copies == 0 || copies as usize > MAX_SHARES {
                    return Err(LockerError::Usage(format!(
                        "copy count must be 1..={MAX_SHARES}"
                    ))
                    .into());
                }
                let indices = keys.indices(copies as usize, self.slot_count)?;
                for &index in &indices {
                    self.write_slot(&keys, index, &payload)?;
                }
            }
        }
        self.region.flush()
    }

    /// Recover the entry for `(password, device_id)`.
    ///
    /// Every failure below the I/O layer collapses to [`LockerError::NoEntry`]:
    /// whether the password was wrong, shares were overwritten, or a
    /// reconstruction was internally inconsistent is deliberately not
    /// reported.
    pub fn get(&mut self, password: &[u8], device_id: &str) -> Result<Entry> {
        self.try_get(password, device_id).map_err(|err| {
            match err.downcast_ref::<LockerError>() {
                Some(LockerError::InsufficientShares)
                | Some(LockerError::UnrecoverableEntry)
                | Some(LockerError::CorruptEntry)
                | Some(LockerError::NoEntry) => LockerError::NoEntry.into(),
                _ => err,
            }
        })
    }

    fn try_get(&mut self, password: &[u8], device_id: &str) -> Result<Entry> {
        let keys = self.derive_keys(password, device_id)?;
        let indices = keys.indices(MAX_SHARES, self.slot_count)?;

        // decrypt the full scan window and keep whatever decodes plausibly
        let mut plausible = Vec::new();
        let mut slot = vec![0u8; self.slot_size];
        for &index in &indices {
            self.region.read(self.slot_offset(index), &mut slot)?;
            if let Some(payload) = slots::open(&slot, &keys.slot_key(index), &keys.slot_nonce(index))
            {
                plausible.push(payload);
            }
        }
        if plausible.is_empty() {
            return Err(LockerError::InsufficientShares.into());
        }

        // plain copies first: the payload is the entry itself
        for payload in &plausible {
            if let Ok(entry) = Entry::unpack(payload) {
                return Ok(entry);
            }
        }

        // Shamir: fragments of one entry share a length; walk each group
        let mut lengths: Vec<usize> = plausible.iter().map(|p| p.len()).collect();
        lengths.sort_unstable();
        lengths.dedup();
        for len in lengths {
            let group: Vec<&[u8]> = plausible
                .iter()
                .filter(|p| p.len() == len)
                .map(|p| &p[..])
                .collect();
            if group.len() < 2 || len < 2 {
                continue;
            }
            if let Some(entry) =
                shamir::reconstruct(&group, 2, |candidate| Entry::unpack(candidate).ok())
            {
                return Ok(entry);
            }
        }
        Err(LockerError::UnrecoverableEntry.into())
    }

    /// Destroy the KeyFile by overwriting the region with random bytes.
    ///
    /// Flash translation layers may keep remapped copies of old sectors;
    /// corrupting the salts still invalidates every derivation, but
    /// physical destruction is the only certain erasure.
    pub fn wipe(&mut self, passes: usize) -> Result<()> {
        for _ in 0..passes.max(1) {
            self.randomize_region()?;
        }
        Ok(())
    }

    /// Number of slots in the slot array.
    pub fn slot_count(&self) -> u64 {
        self.slot_count
    }

    /// Slot size in effect for this KeyFile.
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Fold an external entropy sample (pointer deltas, timing jitter)
    /// into the random stream used for salts, padding, and keys.
    pub fn mix_entropy(&mut self, sample: &[u8]) {
        self.entropy.mix(sample);
    }

    fn salt_len(&self) -> u64 {
        self.slot_size as u64
    }

    fn slot_offset(&self, index: u64) -> u64 {
        self.salt_len() + index * self.slot_size as u64
    }

    fn derive_keys(&mut self, password: &[u8], device_id: &str) -> Result<SlotKeys> {
        let mut head = vec![0u8; self.salt_len() as usize];
        let mut tail = vec![0u8; self.salt_len() as usize];
        self.region.read(0, &mut head)?;
        self.region
            .read(self.region.size() - self.salt_len(), &mut tail)?;
        SlotKeys::derive(password, &head, &tail, device_id, self.kdf)
    }

    fn write_slot(&mut self, keys: &SlotKeys, index: u64, payload: &[u8]) -> Result<()> {
        let sealed = slots::seal(
            payload,
            self.slot_size,
            &keys.slot_key(index),
            &keys.slot_nonce(index),
            &mut self.entropy,
        )?;
        self.region.write(self.slot_offset(index), &sealed)
    }

    fn check_fits(&self, payload: &[u8], mode: StoreMode) -> Result<()> {
        let capacity = slots::capacity(self.slot_size);
        let needed = match mode {
            // a fragment carries its x-coordinate in front
            StoreMode::Shamir { .. } => payload.len() + 1,
            StoreMode::Plain { .. } => payload.len(),
        };
        if needed > capacity {
            return Err(LockerError::Usage(format!(
                "entry needs {needed} bytes but a slot holds {capacity}; \
                 shorten the fields or use extended slots"
            ))
            .into());
        }
        Ok(())
    }

    fn randomize_region(&mut self) -> Result<()> {
        let mut buf = vec![0u8; 64 * 1024];
        let mut pos = 0u64;
        let total = self.region.size();
        while pos < total {
            let chunk = ((total - pos) as usize).min(buf.len());
            self.entropy.fill(&mut buf[..chunk])?;
            self.region.write(pos, &buf[..chunk])?;
            pos += chunk as u64;
        }
        self.region.flush()
    }
}

//! SHA-512 digests, truncated tags, and the counter-mode expander used to
//! stretch a derived seed into an unbounded deterministic byte stream.

use sha2::{Digest, Sha512};
use zeroize::Zeroize;

/// SHA-512 over the concatenation of `parts`.
pub fn sha512(parts: &[&[u8]]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Deterministic byte stream: block `j` is `SHA-512(seed || le64(j))`.
///
/// Used to expand the slot-selection seed into as many index words as the
/// rejection sampling needs. Not an entropy source; output is a pure
/// function of the seed.
pub struct Expander {
    seed: [u8; 64],
    block: [u8; 64],
    used: usize,
    counter: u64,
}

impl Expander {
    pub fn new(seed: [u8; 64]) -> Self {
        Self {
            seed,
            block: [0u8; 64],
            used: 64,
            counter: 0,
        }
    }

    pub fn fill(&mut self, out: &mut [u8]) {
        for byte in out.iter_mut() {
            if self.used == 64 {
                self.block = sha512(&[&self.seed, &self.counter.to_le_bytes()]);
                self.counter += 1;
                self.used = 0;
            }
            *byte = self.block[self.used];
            self.used += 1;
        }
    }

    /// Next big-endian 32-bit word of the stream.
    pub fn next_u32(&mut self) -> u32 {
        let mut word = [0u8; 4];
        self.fill(&mut word);
        u32::from_be_bytes(word)
    }
}

impl Drop for Expander {
    fn drop(&mut self) {
        self.seed.zeroize();
        self.block.zeroize();
    }
}

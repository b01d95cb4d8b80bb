//! Shamir secret sharing over GF(2⁸), byte-wise.
//!
//! Every byte of the secret is shared independently with its own random
//! polynomial of degree T−1, so a share is exactly one byte longer than
//! the secret (its x-coordinate). Any T genuine shares reconstruct the
//! secret; T−1 reveal nothing. Reconstruction walks candidate subsets in
//! a canonical order because a decoded slot may be spurious; the caller
//! supplies the verifier that arbitrates a candidate secret.

use anyhow::Result;
use zeroize::Zeroizing;

use crate::crypto::gf256;
use crate::entropy::Entropy;
use crate::error::LockerError;

/// Most shares any entry may use; also the number of slots scanned on read.
pub const MAX_SHARES: usize = 9;

/// Split `secret` into `shares` fragments with reconstruction `threshold`.
///
/// Each returned fragment is `[x, y_0, .., y_n]` with x in 1..=shares.
pub fn split(
    secret: &[u8],
    shares: u8,
    threshold: u8,
    entropy: &mut Entropy,
) -> Result<Vec<Zeroizing<Vec<u8>>>> {
    validate_params(shares, threshold)?;
    if secret.is_empty() {
        return Err(LockerError::Usage("cannot share an empty secret".into()).into());
    }

    // coefficients 1..T-1 for every secret byte; the constant term is the byte
    let degree = threshold as usize - 1;
    let coeffs = entropy.random(degree * secret.len())?;

    let mut fragments = Vec::with_capacity(shares as usize);
    for x in 1..=shares {
        let mut fragment = Zeroizing::new(Vec::with_capacity(secret.len() + 1));
        fragment.push(x);
        for (i, &byte) in secret.iter().enumerate() {
            let poly = &coeffs[i * degree..(i + 1) * degree];
            fragment.push(eval_poly(byte, poly, x));
        }
        fragments.push(fragment);
    }
    Ok(fragments)
}

/// Horner evaluation of `constant + c_1 x + .. + c_{t-1} x^{t-1}` at `x`.
fn eval_poly(constant: u8, coeffs: &[u8], x: u8) -> u8 {
    let mut acc = 0u8;
    for &c in coeffs.iter().rev() {
        acc = gf256::mul(acc, x) ^ c;
    }
    gf256::mul(acc, x) ^ constant
}

/// Recombine `fragments` (each `[x, y..]`, all the same length) by trying
/// k-subsets in canonical order for k = min_subset..=fragments.len().
///
/// Interpolating with more points than the true threshold still recovers
/// the secret when all points are genuine, so the walk finds the entry
/// without knowing T. `verify` (the entry checksum) rejects every subset
/// that mixes in a spurious or stale fragment.
pub fn reconstruct<T>(
    fragments: &[&[u8]],
    min_subset: usize,
    verify: impl Fn(&[u8]) -> Option<T>,
) -> Option<T> {
    let count = fragments.len();
    if count == 0 || fragments[0].len() < 2 {
        return None;
    }
    let secret_len = fragments[0].len() - 1;
    debug_assert!(fragments.iter().all(|f| f.len() == secret_len + 1));

    for k in min_subset..=count {
        for combo in Combinations::new(count, k) {
            if !distinct_x(fragments, &combo) {
                continue;
            }

            let mut candidate = Zeroizing::new(vec![0u8; secret_len]);
            for (byte_index, out) in candidate.iter_mut().enumerate() {
                let points: Vec<(u8, u8)> = combo
                    .iter()
                    .map(|&f| (fragments[f][0], fragments[f][1 + byte_index]))
                    .collect();
                *out = gf256::interpolate_at_zero(&points);
            }

            if let Some(found) = verify(&candidate) {
                return Some(found);
            }
        }
    }
    None
}

fn distinct_x(fragments: &[&[u8]], combo: &[usize]) -> bool {
    for (i, &a) in combo.iter().enumerate() {
        if fragments[a][0] == 0 {
            return false;
        }
        for &b in &combo[i + 1..] {
            if fragments[a][0] == fragments[b][0] {
                return false;
            }
        }
    }
    true
}

fn validate_params(shares: u8, threshold: u8) -> Result<(), LockerError> {
    if shares == 0 || shares as usize > MAX_SHARES {
        return Err(LockerError::Usage(format!(
            "share count must be 1..={MAX_SHARES}"
        )));
    }
    if threshold < 2 || threshold > shares {
        return Err(LockerError::Usage(
            "threshold must be at least 2 and at most the share count".into(),
        ));
    }
    Ok(())
}

/// Lexicographic k-subsets of 0..n.
struct Combinations {
    n: usize,
    indices: Vec<usize>,
    done: bool,
}

impl Combinations {
    fn new(n: usize, k: usize) -> Self {
        Self {
            n,
            indices: (0..k).collect(),
            done: k > n || k == 0,
        }
    }

    fn advance(&mut self) {
        let k = self.indices.len();
        let mut i = k;
        while i > 0 {
            i -= 1;
            if self.indices[i] != i + self.n - k {
                self.indices[i] += 1;
                for j in i + 1..k {
                    self.indices[j] = self.indices[j - 1] + 1;
                }
                return;
            }
        }
        self.done = true;
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let combo = self.indices.clone();
        self.advance();
        Some(combo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::Entropy;

    fn verify_eq(expected: &[u8]) -> impl Fn(&[u8]) -> Option<Vec<u8>> + '_ {
        move |candidate| (candidate == expected).then(|| candidate.to_vec())
    }

    #[test]
    fn split_reconstruct_roundtrip() {
        let mut entropy = Entropy::seeded(b"shamir test");
        let secret = b"threshold secret";

        let fragments = split(secret, 7, 4, &mut entropy).unwrap();
        assert_eq!(fragments.len(), 7);
        assert!(fragments.iter().all(|f| f.len() == secret.len() + 1));

        let refs: Vec<&[u8]> = fragments.iter().map(|f| &f[..]).collect();
        let out = reconstruct(&refs, 2, verify_eq(secret)).unwrap();
        assert_eq!(out, secret);
    }

    #[test]
    fn any_threshold_subset_suffices() {
        let mut entropy = Entropy::seeded(b"subsets");
        let secret = b"split me";
        let fragments = split(secret, 5, 3, &mut entropy).unwrap();

        for combo in Combinations::new(5, 3) {
            let refs: Vec<&[u8]> = combo.iter().map(|&i| &fragments[i][..]).collect();
            assert!(reconstruct(&refs, 2, verify_eq(secret)).is_some());
        }
    }

    #[test]
    fn below_threshold_reveals_nothing() {
        let mut entropy = Entropy::seeded(b"below");
        let secret = b"unreachable";
        let fragments = split(secret, 5, 3, &mut entropy).unwrap();

        let refs: Vec<&[u8]> = fragments[..2].iter().map(|f| &f[..]).collect();
        assert!(reconstruct(&refs, 2, verify_eq(secret)).is_none());
    }

    #[test]
    fn spurious_fragments_are_skipped() {
        let mut entropy = Entropy::seeded(b"spurious");
        let secret = b"needle";
        let mut fragments = split(secret, 6, 3, &mut entropy).unwrap();

        // corrupt two fragments; enough genuine ones remain among the noise
        fragments[1][3] ^= 0xff;
        fragments[4][1] ^= 0x55;

        let refs: Vec<&[u8]> = fragments.iter().map(|f| &f[..]).collect();
        assert!(reconstruct(&refs, 2, verify_eq(secret)).is_some());
    }

    #[test]
    fn duplicate_x_subsets_are_rejected() {
        let mut entropy = Entropy::seeded(b"dup");
        let secret = b"dup";
        let fragments = split(secret, 3, 2, &mut entropy).unwrap();

        let dup = fragments[0].clone();
        let refs: Vec<&[u8]> = vec![&fragments[0][..], &dup[..]];
        // both fragments share x = 1; no valid pair exists
        assert!(reconstruct(&refs, 2, verify_eq(secret)).is_none());
    }

    #[test]
    fn invalid_params_rejected() {
        let mut entropy = Entropy::seeded(b"params");
        assert!(split(b"s", 0, 2, &mut entropy).is_err());
        assert!(split(b"s", 12, 4, &mut entropy).is_err());
        assert!(split(b"s", 5, 1, &mut entropy).is_err());
        assert!(split(b"s", 5, 6, &mut entropy).is_err());
        assert!(split(b"", 5, 3, &mut entropy).is_err());
    }

    #[test]
    fn combinations_are_canonical_and_complete() {
        let all: Vec<Vec<usize>> = Combinations::new(4, 2).collect();
        assert_eq!(
            all,
            vec![
                vec![0, 1],
                vec![0, 2],
                vec![0, 3],
                vec![1, 2],
                vec![1, 3],
                vec![2, 3],
            ]
        );
        assert_eq!(Combinations::new(9, 4).count(), 126);
        assert_eq!(Combinations::new(3, 5).count(), 0);
    }
}

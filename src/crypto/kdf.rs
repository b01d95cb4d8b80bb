use anyhow::{Context, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::Zeroizing;

use super::MASTER_LEN;

/// Argon2id cost parameters.
///
/// These are not stored anywhere in the KeyFile, so the same values must be
/// supplied on every open of the same KeyFile.
#[derive(Debug, Clone, Copy)]
pub struct KdfParams {
    mem_cost_kib: u32,
    time_cost: u32,
    parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            // sized so one derivation costs ~a second and 256 MiB
            mem_cost_kib: 256 * 1024,
            time_cost: 4,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    pub fn new(mem_cost_kib: u32, time_cost: u32, parallelism: u32) -> Result<Self> {
        let params = Self {
            mem_cost_kib,
            time_cost,
            parallelism,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn mem_cost_kib(&self) -> u32 {
        self.mem_cost_kib
    }

    pub fn time_cost(&self) -> u32 {
        self.time_cost
    }

    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }

    pub fn validate(&self) -> Result<()> {
        if self.time_cost < 1 {
            anyhow::bail!("argon2 time cost must be >= 1");
        }
        if self.parallelism < 1 {
            anyhow::bail!("argon2 parallelism must be >= 1");
        }
        if self.mem_cost_kib < 8 * self.parallelism {
            anyhow::bail!("argon2 memory cost must be at least 8 * parallelism");
        }
        Ok(())
    }
}

/// Derive the 64-byte master key for one (password, KeyFile, device) binding.
///
/// Deterministic: the same password, salt, and cost always produce the same
/// key. The salt is the concatenation of both KeyFile salt regions and the
/// device-identifier hash, so clipping either end of the file or moving the
/// KeyFile to another device invalidates every derivation.
pub fn derive_master(
    password: &[u8],
    salt: &[u8],
    kdf: KdfParams,
) -> Result<Zeroizing<[u8; MASTER_LEN]>> {
    kdf.validate().context("invalid Argon2 parameters")?;

    let params = Params::new(
        kdf.mem_cost_kib,
        kdf.time_cost,
        kdf.parallelism,
        Some(MASTER_LEN),
    )
    .map_err(|e| anyhow::anyhow!("failed to construct Argon2 params: {e}"))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; MASTER_LEN]);
    argon2
        .hash_password_into(password, salt, &mut key[..])
        .map_err(|e| anyhow::anyhow!("argon2 key derivation failed {e}"))?;

    Ok(key)
}

/// Cheap parameters for tests only. Never use for real KeyFiles.
#[cfg(test)]
pub fn fast_params() -> KdfParams {
    KdfParams::new(64, 1, 1).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kdf_is_deterministic() {
        let salt = [42u8; 64];
        let kdf = fast_params();

        let k1 = derive_master(b"password", &salt, kdf).unwrap();
        let k2 = derive_master(b"password", &salt, kdf).unwrap();

        assert_eq!(*k1, *k2);
    }

    #[test]
    fn kdf_params_affect_output() {
        let salt = [7u8; 64];

        let kdf1 = KdfParams::new(64, 1, 1).unwrap();
        let kdf2 = KdfParams::new(128, 1, 1).unwrap();

        let k1 = derive_master(b"pw", &salt, kdf1).unwrap();
        let k2 = derive_master(b"pw", &salt, kdf2).unwrap();

        assert_ne!(*k1, *k2);
    }

    #[test]
    fn kdf_salt_affects_output() {
        let kdf = fast_params();

        let k1 = derive_master(b"pw", &[1u8; 64], kdf).unwrap();
        let k2 = derive_master(b"pw", &[2u8; 64], kdf).unwrap();

        assert_ne!(*k1, *k2);
    }

    #[test]
    fn kdf_invalid_params_fail_gracefully() {
        assert!(KdfParams::new(0, 0, 0).is_err());
    }
}

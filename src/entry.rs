//! Entry serialization: the compact byte string stored inside slots.
//!
//! Fields are packed with length prefixes (the trailing text field runs to
//! the end), the packed form is DEFLATE-compressed when that helps, and the
//! result is finished with an 8-byte truncated SHA-512 checksum. The
//! checksum is the final arbiter of recovery: a share combination only
//! counts as successful if the resulting byte string unpacks cleanly.

use anyhow::Result;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::{sha512, ENTRY_CHECK_LEN};
use crate::error::LockerError;

// leading byte of the serialized form
const ENC_STORED: u8 = 0;
const ENC_DEFLATE: u8 = 1;

/// One stored secret: a device identifier, a byte range on that device,
/// the cipher key for the hidden data, and an optional text payload.
#[derive(Debug)]
pub struct Entry {
    pub device: String,
    pub start: u64,
    pub length: u64,
    pub key: Zeroizing<Vec<u8>>,
    pub text: Zeroizing<String>,
}

impl Entry {
    /// Text-only entry with no device range or key.
    pub fn text(text: &str) -> Self {
        Self {
            device: String::new(),
            start: 0,
            length: 0,
            key: Zeroizing::new(Vec::new()),
            text: Zeroizing::new(text.to_string()),
        }
    }

    /// Serialize to the stored form.
    pub fn pack(&self) -> Result<Zeroizing<Vec<u8>>> {
        if self.device.len() > 255 {
            return Err(LockerError::Usage("device identifier longer than 255 bytes".into()).into());
        }
        if self.key.len() > 255 {
            return Err(LockerError::Usage("cipher key longer than 255 bytes".into()).into());
        }

        let mut fields = Zeroizing::new(Vec::with_capacity(64));
        fields.push(self.device.len() as u8);
        fields.extend_from_slice(self.device.as_bytes());
        pack_int(&mut fields, self.start);
        pack_int(&mut fields, self.length);
        fields.push(self.key.len() as u8);
        fields.extend_from_slice(&self.key);
        // text is the final field and runs to the end of the packed form
        fields.extend_from_slice(self.text.as_bytes());

        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&fields)?;
        let deflated = Zeroizing::new(encoder.finish()?);

        // keep whichever encoding is smaller; random keys rarely compress
        let mut packed = Zeroizing::new(Vec::with_capacity(fields.len() + 1 + ENTRY_CHECK_LEN));
        if deflated.len() < fields.len() {
            packed.push(ENC_DEFLATE);
            packed.extend_from_slice(&deflated);
        } else {
            packed.push(ENC_STORED);
            packed.extend_from_slice(&fields);
        }

        let check = sha512(&[&packed[..]]);
        packed.extend_from_slice(&check[..ENTRY_CHECK_LEN]);
        Ok(packed)
    }

    /// Inverse of [`Entry::pack`]. Fails with `CorruptEntry` on any
    /// checksum, decompression, or field-structure mismatch.
    pub fn unpack(raw: &[u8]) -> Result<Self, LockerError> {
        if raw.len() <= ENTRY_CHECK_LEN + 1 {
            return Err(LockerError::CorruptEntry);
        }
        let (body, check) = raw.split_at(raw.len() - ENTRY_CHECK_LEN);
        if sha512(&[body])[..ENTRY_CHECK_LEN] != *check {
            return Err(LockerError::CorruptEntry);
        }

        let mut fields = Zeroizing::new(Vec::new());
        match body[0] {
            ENC_STORED => fields.extend_from_slice(&body[1..]),
            ENC_DEFLATE => {
                DeflateDecoder::new(&body[1..])
                    .read_to_end(&mut fields)
                    .map_err(|_| LockerError::CorruptEntry)?;
            }
            _ => return Err(LockerError::CorruptEntry),
        }

        let mut cursor = Cursor::new(&fields);
        let device = String::from_utf8(cursor.take_u8_prefixed()?.to_vec())
            .map_err(|_| LockerError::CorruptEntry)?;
        let start = cursor.take_int()?;
        let length = cursor.take_int()?;
        let key = Zeroizing::new(cursor.take_u8_prefixed()?.to_vec());
        let text_bytes = cursor.take_rest().to_vec();

        let text = match String::from_utf8(text_bytes) {
            Ok(text) => Zeroizing::new(text),
            Err(err) => {
                let mut bytes = err.into_bytes();
                bytes.zeroize();
                return Err(LockerError::CorruptEntry);
            }
        };

        Ok(Self {
            device,
            start,
            length,
            key,
            text,
        })
    }
}

/// Pack a non-negative integer as `<u8 count><count big-endian bytes>`
/// using the fewest bytes that hold the value.
fn pack_int(out: &mut Vec<u8>, value: u64) {
    let count = ((64 - u64::leading_zeros(value | 1)) as usize).div_ceil(8);
    out.push(count as u8);
    out.extend_from_slice(&value.to_be_bytes()[8 - count..]);
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], LockerError> {
        let end = self.pos.checked_add(count).ok_or(LockerError::CorruptEntry)?;
        if end > self.data.len() {
            return Err(LockerError::CorruptEntry);
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_u8_prefixed(&mut self) -> Result<&'a [u8], LockerError> {
        let len = self.take(1)?[0] as usize;
        self.take(len)
    }

    fn take_int(&mut self) -> Result<u64, LockerError> {
        let bytes = self.take_u8_prefixed()?;
        if bytes.len() > 8 {
            return Err(LockerError::CorruptEntry);
        }
        let mut wide = [0u8; 8];
        wide[8 - bytes.len()..].copy_from_slice(bytes);
        Ok(u64::from_be_bytes(wide))
    }

    fn take_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }
}

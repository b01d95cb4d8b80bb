//! Block I/O adapter: a bounded byte range over a regular file or a raw
//! block device.
//!
//! Targets are addressed with the byte-spec grammar used on the command
//! line: plain byte counts, `K`/`M`/`G` suffixes (binary multiples),
//! negative values measured from the end of the target, and
//! `<partition>+<delta>` meaning "immediately after the named partition".
//! Partition references are resolved against the kernel's view at open
//! time; afterwards every access is an absolute, bounds-checked byte range.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::error::LockerError;

/// Logical sector size assumed for raw device access.
pub const SECTOR: u64 = 512;

/// One operand of the byte-range grammar, before resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum ByteSpec {
    /// Byte count; negative means "measured from the end".
    Bytes(i64),
    /// End of the named partition plus a signed delta.
    Partition { name: String, delta: i64 },
}

impl ByteSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(LockerError::Usage("empty byte spec".into()).into());
        }

        if spec.contains('/') {
            // partition reference: <part> or <part>+<delta>
            let (name, delta) = match spec.split_once('+') {
                Some((name, delta)) => (name, parse_size(delta)?),
                None => (spec, 0),
            };
            if name.is_empty() {
                return Err(LockerError::Usage(format!("bad partition spec '{spec}'")).into());
            }
            return Ok(ByteSpec::Partition {
                name: name.to_string(),
                delta,
            });
        }

        Ok(ByteSpec::Bytes(parse_size(spec)?))
    }

    /// Resolve to an absolute offset inside a target of `total` bytes.
    pub fn resolve_offset(&self, total: u64) -> Result<u64> {
        let absolute = match self {
            ByteSpec::Bytes(v) if *v >= 0 => *v as u64,
            ByteSpec::Bytes(v) => end_relative(total, *v)?,
            ByteSpec::Partition { name, delta } => partition_end(name, *delta)?,
        };
        if absolute > total {
            return Err(
                LockerError::Usage(format!("offset {absolute} beyond target ({total} bytes)"))
                    .into(),
            );
        }
        Ok(absolute)
    }

    /// Resolve to a length starting at `offset`. Negative and partition
    /// forms name an *endpoint* rather than a length, mirroring the
    /// `--create <start> <end>` convention.
    pub fn resolve_length(&self, total: u64, offset: u64) -> Result<u64> {
        let end = match self {
            ByteSpec::Bytes(v) if *v >= 0 => offset.saturating_add(*v as u64),
            ByteSpec::Bytes(v) => end_relative(total, *v)?,
            ByteSpec::Partition { name, delta } => partition_end(name, *delta)?,
        };
        if end <= offset || end > total {
            return Err(LockerError::Usage(format!(
                "range [{offset}, {end}) does not fit the target ({total} bytes)"
            ))
            .into());
        }
        Ok(end - offset)
    }
}

fn end_relative(total: u64, v: i64) -> Result<u64> {
    let back = v.unsigned_abs();
    if back > total {
        return Err(
            LockerError::Usage(format!("{back} bytes from the end exceeds the target")).into(),
        );
    }
    Ok(total - back)
}

/// Parse `[-]<digits>[K|M|G]` into bytes. Suffixes are binary multiples.
fn parse_size(spec: &str) -> Result<i64> {
    let spec = spec.trim();
    let (negative, body) = match spec.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, spec),
    };

    let (digits, multiplier) = match body.chars().last() {
        Some('K') | Some('k') => (&body[..body.len() - 1], 1u64 << 10),
        Some('M') | Some('m') => (&body[..body.len() - 1], 1 << 20),
        Some('G') | Some('g') => (&body[..body.len() - 1], 1 << 30),
        _ => (body, 1),
    };

    let value: u64 = digits
        .parse()
        .map_err(|_| LockerError::Usage(format!("bad byte spec '{spec}'")))?;
    let bytes = value
        .checked_mul(multiplier)
        .and_then(|v| i64::try_from(v).ok())
        .ok_or_else(|| LockerError::Usage(format!("byte spec '{spec}' overflows")))?;

    Ok(if negative { -bytes } else { bytes })
}

/// Absolute byte just past the end of partition `name`, plus `delta`.
///
/// Resolution reads the kernel's partition table view; the caller persists
/// only the resolved absolute value, so later use does not depend on the
/// table being unchanged.
#[cfg(target_os = "linux")]
fn partition_end(name: &str, delta: i64) -> Result<u64> {
    let short = name.trim_start_matches("/dev/");
    let sys = Path::new("/sys/class/block").join(short);

    let read_u64 = |file: &str| -> Result<u64> {
        let text = std::fs::read_to_string(sys.join(file))
            .with_context(|| format!("no partition '{name}' in the kernel table"))?;
        text.trim()
            .parse()
            .with_context(|| format!("unreadable sysfs value for '{name}'"))
    };

    let start = read_u64("start")?;
    let size = read_u64("size")?;
    let end = (start + size) * SECTOR;

    let shifted = end as i64 + delta;
    if shifted < 0 {
        return Err(LockerError::Usage(format!("'{name}+{delta}' is before the disk start")).into());
    }
    Ok(shifted as u64)
}

#[cfg(not(target_os = "linux"))]
fn partition_end(name: &str, _delta: i64) -> Result<u64> {
    Err(LockerError::Usage(format!(
        "partition reference '{name}' requires a Linux partition table view"
    ))
    .into())
}

/// An addressable region of N bytes inside a file or device.
pub struct Region {
    file: std::fs::File,
    offset: u64,
    len: u64,
    raw_device: bool,
}

impl Region {
    /// Open `target` and bind the byte range described by the specs.
    /// Defaults: offset 0, length to the end of the target.
    pub fn open(
        target: &Path,
        offset_spec: Option<&ByteSpec>,
        length_spec: Option<&ByteSpec>,
        writable: bool,
    ) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(target)
            .with_context(|| format!("cannot open {}", target.display()))?;

        let total = file.seek(SeekFrom::End(0))?;
        let raw_device = is_block_device(&file);

        let offset = match offset_spec {
            Some(spec) => spec.resolve_offset(total)?,
            None => 0,
        };
        let len = match length_spec {
            Some(spec) => spec.resolve_length(total, offset)?,
            None => total
                .checked_sub(offset)
                .filter(|l| *l > 0)
                .ok_or_else(|| LockerError::Usage("empty region".into()))?,
        };

        Ok(Self {
            file,
            offset,
            len,
            raw_device,
        })
    }

    pub fn size(&self) -> u64 {
        self.len
    }

    /// Read exactly `buf.len()` bytes starting at `pos`.
    pub fn read(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
        self.check_range(pos, buf.len())?;
        self.file
            .read_exact_at(buf, self.offset + pos)
            .context("short read from region")?;
        Ok(())
    }

    /// Write `data` at `pos`. On a raw device, unaligned edges are handled
    /// with sector read-modify-write.
    pub fn write(&mut self, pos: u64, data: &[u8]) -> Result<()> {
        self.check_range(pos, data.len())?;
        let start = self.offset + pos;

        if !self.raw_device || aligned(start, data.len() as u64) {
            self.file
                .write_all_at(data, start)
                .context("short write to region")?;
            return Ok(());
        }

        // widen to whole sectors, splice, write back
        let end = start + data.len() as u64;
        let lo = start - start % SECTOR;
        let hi = end.div_ceil(SECTOR) * SECTOR;

        let mut sectors = vec![0u8; (hi - lo) as usize];
        self.file
            .read_exact_at(&mut sectors, lo)
            .context("short read during sector merge")?;
        sectors[(start - lo) as usize..(end - lo) as usize].copy_from_slice(data);
        self.file
            .write_all_at(&sectors, lo)
            .context("short write during sector merge")?;
        Ok(())
    }

    /// Flush all written data to the underlying storage.
    pub fn flush(&mut self) -> Result<()> {
        self.file.sync_all().context("sync failed")?;
        Ok(())
    }

    fn check_range(&self, pos: u64, count: usize) -> Result<()> {
        let end = pos.checked_add(count as u64);
        match end {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "access [{pos}, +{count}) outside region of {} bytes",
                    self.len
                ),
            )
            .into()),
        }
    }
}

fn aligned(start: u64, len: u64) -> bool {
    start % SECTOR == 0 && len % SECTOR == 0
}

#[cfg(unix)]
fn is_block_device(file: &std::fs::File) -> bool {
    use std::os::unix::fs::FileTypeExt;
    file.metadata()
        .map(|m| m.file_type().is_block_device())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_target(len: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&vec![0u8; len]).unwrap();
        file.flush().unwrap();
        file
    }

    // --------------------------------------------------
    // SPEC PARSING
    // --------------------------------------------------

    #[test]
    fn parse_plain_bytes() {
        assert_eq!(ByteSpec::parse("4096").unwrap(), ByteSpec::Bytes(4096));
    }

    #[test]
    fn parse_suffixes() {
        assert_eq!(ByteSpec::parse("4K").unwrap(), ByteSpec::Bytes(4096));
        assert_eq!(ByteSpec::parse("2M").unwrap(), ByteSpec::Bytes(2 << 20));
        assert_eq!(ByteSpec::parse("1G").unwrap(), ByteSpec::Bytes(1 << 30));
        assert_eq!(ByteSpec::parse("1g").unwrap(), ByteSpec::Bytes(1 << 30));
    }

    #[test]
    fn parse_end_relative() {
        assert_eq!(ByteSpec::parse("-1M").unwrap(), ByteSpec::Bytes(-(1 << 20)));
    }

    #[test]
    fn parse_partition_reference() {
        assert_eq!(
            ByteSpec::parse("/dev/sda2+4K").unwrap(),
            ByteSpec::Partition {
                name: "/dev/sda2".into(),
                delta: 4096
            }
        );
        assert_eq!(
            ByteSpec::parse("/dev/sda2").unwrap(),
            ByteSpec::Partition {
                name: "/dev/sda2".into(),
                delta: 0
            }
        );
    }

    #[test]
    fn parse_garbage_fails() {
        assert!(ByteSpec::parse("").is_err());
        assert!(ByteSpec::parse("12Q").is_err());
        assert!(ByteSpec::parse("K").is_err());
        assert!(ByteSpec::parse("--3").is_err());
    }

    #[test]
    fn resolve_end_relative_offset() {
        let spec = ByteSpec::parse("-4K").unwrap();
        assert_eq!(spec.resolve_offset(16384).unwrap(), 12288);
    }

    #[test]
    fn resolve_negative_length_is_endpoint() {
        // [1024, total-512)
        let spec = ByteSpec::parse("-512").unwrap();
        assert_eq!(spec.resolve_length(8192, 1024).unwrap(), 8192 - 512 - 1024);
    }

    #[test]
    fn resolve_rejects_out_of_range() {
        let spec = ByteSpec::parse("10000").unwrap();
        assert!(spec.resolve_offset(8192).is_err());
        assert!(ByteSpec::parse("-10000").unwrap().resolve_offset(8192).is_err());
        assert!(spec.resolve_length(8192, 0).is_err());
    }

    // --------------------------------------------------
    // REGION ACCESS
    // --------------------------------------------------

    #[test]
    fn read_returns_written_data() {
        let target = temp_target(4096);
        let mut region = Region::open(target.path(), None, None, true).unwrap();

        region.write(100, b"hello region").unwrap();

        let mut buf = [0u8; 12];
        region.read(100, &mut buf).unwrap();
        assert_eq!(&buf, b"hello region");
    }

    #[test]
    fn region_size_honours_specs() {
        let target = temp_target(8192);
        let offset = ByteSpec::parse("1K").unwrap();
        let length = ByteSpec::parse("4K").unwrap();

        let region = Region::open(target.path(), Some(&offset), Some(&length), false).unwrap();
        assert_eq!(region.size(), 4096);
    }

    #[test]
    fn offset_region_maps_into_target() {
        let target = temp_target(8192);
        let offset = ByteSpec::parse("1K").unwrap();

        let mut region = Region::open(target.path(), Some(&offset), None, true).unwrap();
        region.write(0, b"marker").unwrap();

        let raw = std::fs::read(target.path()).unwrap();
        assert_eq!(&raw[1024..1030], b"marker");
    }

    #[test]
    fn out_of_range_access_fails() {
        let target = temp_target(1024);
        let mut region = Region::open(target.path(), None, None, true).unwrap();

        let mut buf = [0u8; 16];
        assert!(region.read(1020, &mut buf).is_err());
        assert!(region.write(1020, &buf).is_err());
        assert!(region.read(u64::MAX, &mut buf).is_err());
    }

    #[test]
    fn open_missing_target_fails() {
        let err = Region::open(Path::new("/no/such/target"), None, None, false);
        assert!(err.is_err());
    }

    #[test]
    fn empty_region_fails() {
        let target = temp_target(1024);
        let offset = ByteSpec::parse("1K").unwrap();
        assert!(Region::open(target.path(), Some(&offset), None, false).is_err());
    }
}

//! Block-aligned raw disk image copies.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Default block unit: 1 MiB.
pub const DEFAULT_BLOCK_SIZE: u64 = 1024 * 1024;

/// How the raw image size is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSizing {
    pub block_size: u64,
    /// Fixed image size in blocks. `None` rounds the input up to whole blocks.
    pub block_count: Option<u64>,
}

impl Default for RawSizing {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            block_count: None,
        }
    }
}

impl RawSizing {
    /// Size of the raw image for an input of `input_len` bytes.
    ///
    /// Always a whole multiple of `block_size`; an empty input still takes one block.
    /// `None` when `block_size` is zero or the size does not fit in a `u64`.
    pub fn target_len(&self, input_len: u64) -> Option<u64> {
        if self.block_size == 0 {
            return None;
        }
        let blocks = match self.block_count {
            Some(count) => count,
            None => input_len.div_ceil(self.block_size),
        };
        blocks.max(1).checked_mul(self.block_size)
    }
}

/// Result of a raw copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCopy {
    pub input_len: u64,
    pub output_len: u64,
}

impl RawCopy {
    pub fn truncated(&self) -> bool {
        self.output_len < self.input_len
    }
}

/// Copy `source` to `dest`, zero-padding or truncating to the sized length.
///
/// `dest` is replaced. The data is synced to disk before returning.
pub fn copy_block_aligned(source: &Path, dest: &Path, sizing: RawSizing) -> io::Result<RawCopy> {
    let input = File::open(source)?;
    let input_len = input.metadata()?.len();
    let output_len = sizing.target_len(input_len).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "raw image size out of range: block size {}, block count {:?}",
                sizing.block_size, sizing.block_count
            ),
        )
    })?;

    let output = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(dest)?;
    let mut writer = BufWriter::new(output);

    let copied = io::copy(&mut BufReader::new(input).take(output_len), &mut writer)?;
    if copied != input_len.min(output_len) {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "short read from '{}': expected {} bytes, got {}",
                source.display(),
                input_len.min(output_len),
                copied
            ),
        ));
    }

    let output = writer.into_inner().map_err(|err| err.into_error())?;
    // Padding is written out, not left sparse.
    write_zeros(&output, output_len - copied)?;
    output.sync_all()?;

    Ok(RawCopy {
        input_len,
        output_len,
    })
}

fn write_zeros(mut file: &File, mut remaining: u64) -> io::Result<()> {
    let zeros = [0u8; 64 * 1024];
    while remaining > 0 {
        let chunk = remaining.min(zeros.len() as u64) as usize;
        file.write_all(&zeros[..chunk])?;
        remaining -= chunk as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const UNIT: u64 = 4096;

    fn sizing(block_count: Option<u64>) -> RawSizing {
        RawSizing {
            block_size: UNIT,
            block_count,
        }
    }

    #[test]
    fn test_target_len_rounds_up() {
        let s = sizing(None);
        assert_eq!(s.target_len(0), Some(UNIT));
        assert_eq!(s.target_len(1), Some(UNIT));
        assert_eq!(s.target_len(UNIT), Some(UNIT));
        assert_eq!(s.target_len(UNIT + 1), Some(2 * UNIT));
    }

    #[test]
    fn test_target_len_fixed_count() {
        let s = sizing(Some(3));
        assert_eq!(s.target_len(1), Some(3 * UNIT));
        assert_eq!(s.target_len(10 * UNIT), Some(3 * UNIT));
    }

    #[test]
    fn test_target_len_overflow_is_none() {
        assert_eq!(sizing(Some(u64::MAX / 2)).target_len(1), None);
        let zero = RawSizing {
            block_size: 0,
            block_count: None,
        };
        assert_eq!(zero.target_len(1), None);
    }

    #[test]
    fn test_copy_rejects_oversized_block_count() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("bootimage.bin");
        let dst = temp.path().join("disk.img");
        fs::write(&src, b"kernel").unwrap();

        let err = copy_block_aligned(&src, &dst, sizing(Some(u64::MAX))).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_copy_pads_with_zeros() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("bootimage.bin");
        let dst = temp.path().join("disk.img");
        fs::write(&src, vec![0xAB; 5000]).unwrap();

        let copy = copy_block_aligned(&src, &dst, sizing(None)).unwrap();
        assert_eq!(copy.output_len, 2 * UNIT);
        assert!(!copy.truncated());

        let bytes = fs::read(&dst).unwrap();
        assert_eq!(bytes.len() as u64, 2 * UNIT);
        assert!(bytes[..5000].iter().all(|b| *b == 0xAB));
        assert!(bytes[5000..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_copy_truncates_to_fixed_count() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("bootimage.bin");
        let dst = temp.path().join("disk.img");
        fs::write(&src, vec![7u8; (3 * UNIT) as usize]).unwrap();

        let copy = copy_block_aligned(&src, &dst, sizing(Some(1))).unwrap();
        assert!(copy.truncated());
        assert_eq!(fs::metadata(&dst).unwrap().len(), UNIT);
    }

    #[test]
    fn test_copy_overwrites_existing_destination() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("bootimage.bin");
        let dst = temp.path().join("disk.img");
        fs::write(&src, b"kernel").unwrap();
        fs::write(&dst, vec![0xFF; (4 * UNIT) as usize]).unwrap();

        copy_block_aligned(&src, &dst, sizing(None)).unwrap();
        let bytes = fs::read(&dst).unwrap();
        assert_eq!(bytes.len() as u64, UNIT);
        assert_eq!(&bytes[..6], b"kernel");
        assert_eq!(bytes[6], 0);
    }

    #[test]
    fn test_size_is_block_multiple_for_any_input() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("bootimage.bin");
        let dst = temp.path().join("disk.img");
        for len in [0usize, 1, 511, 4095, 4096, 4097, 12_345] {
            fs::write(&src, vec![1u8; len]).unwrap();
            copy_block_aligned(&src, &dst, sizing(None)).unwrap();
            assert_eq!(fs::metadata(&dst).unwrap().len() % UNIT, 0, "input len {len}");
        }
    }

    #[test]
    fn test_missing_source_fails() {
        let temp = TempDir::new().unwrap();
        let err = copy_block_aligned(
            &temp.path().join("missing.bin"),
            &temp.path().join("disk.img"),
            sizing(None),
        )
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_zero_block_size_rejected() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("bootimage.bin");
        fs::write(&src, b"x").unwrap();
        let err = copy_block_aligned(
            &src,
            &temp.path().join("disk.img"),
            RawSizing {
                block_size: 0,
                block_count: None,
            },
        )
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}

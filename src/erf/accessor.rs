//! Bounds-checked access to an archive buffer
//!
//! Every read of the ERF decoder goes through [`ByteView`]. A read is
//! performed only when `offset <= len - size`; anything else is reported as
//! [`ArchiveError::TruncatedOrCorrupt`]. Arithmetic is checked so that
//! attacker-controlled offsets and counts cannot wrap.
//!
//! Fixed-size records are decoded with binrw in little-endian order, which
//! byte-swaps on big-endian hosts.

use binrw::{BinRead, Endian};
use std::io::Cursor;

use crate::error::{ArchiveError, Result};

/// A fixed-size on-disk record.
pub(crate) trait Record {
    /// Encoded size in bytes.
    const SIZE: usize;
}

/// Read-only, bounds-checked view over an archive image.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ByteView<'a> {
    data: &'a [u8],
}

impl<'a> ByteView<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// `len` bytes starting at `offset`.
    pub fn bytes(&self, offset: u64, len: u64, what: &str) -> Result<&'a [u8]> {
        let available = self.len();
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= available)
            .ok_or_else(|| ArchiveError::out_of_bounds(what, offset, len, available))?;
        // Both bounds are <= data.len(), so the casts are lossless.
        Ok(&self.data[offset as usize..end as usize])
    }

    /// Decode the record `R` located at `offset`.
    pub fn record<R>(&self, offset: u64, what: &str) -> Result<R>
    where
        R: Record + for<'b> BinRead<Args<'b> = ()>,
    {
        let raw = self.bytes(offset, R::SIZE as u64, what)?;
        R::read_options(&mut Cursor::new(raw), Endian::Little, ())
            .map_err(|e| ArchiveError::corrupt(offset, format!("{what}: {e}")))
    }

    /// Bytes left after `offset` (zero when `offset` is past the end).
    pub fn remaining(&self, offset: u64) -> u64 {
        self.len().saturating_sub(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, BinRead, PartialEq)]
    #[br(little)]
    struct Pair {
        a: u16,
        b: u32,
    }

    impl Record for Pair {
        const SIZE: usize = 6;
    }

    #[test]
    fn test_bytes_in_bounds() {
        let data = [1u8, 2, 3, 4, 5];
        let view = ByteView::new(&data);
        assert_eq!(view.bytes(1, 3, "x").unwrap(), &[2, 3, 4]);
        assert_eq!(view.bytes(5, 0, "x").unwrap(), &[] as &[u8]);
        assert_eq!(view.bytes(0, 5, "x").unwrap(), &data);
    }

    #[test]
    fn test_bytes_past_end_rejected() {
        let data = [0u8; 8];
        let view = ByteView::new(&data);
        assert!(matches!(
            view.bytes(4, 5, "x"),
            Err(ArchiveError::TruncatedOrCorrupt { offset: 4, .. })
        ));
        assert!(view.bytes(9, 0, "x").is_err());
    }

    #[test]
    fn test_bytes_overflowing_offset_rejected() {
        let data = [0u8; 8];
        let view = ByteView::new(&data);
        assert!(view.bytes(u64::MAX, 2, "x").is_err());
        assert!(view.bytes(2, u64::MAX, "x").is_err());
    }

    #[test]
    fn test_record_is_little_endian() {
        let data = [0xAA, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12];
        let view = ByteView::new(&data);
        let pair: Pair = view.record(1, "pair").unwrap();
        assert_eq!(pair, Pair { a: 0x1234, b: 0x1234_5678 });
    }

    #[test]
    fn test_record_truncated() {
        let data = [0u8; 5];
        let view = ByteView::new(&data);
        assert!(view.record::<Pair>(0, "pair").is_err());
    }

    #[test]
    fn test_remaining() {
        let data = [0u8; 10];
        let view = ByteView::new(&data);
        assert_eq!(view.remaining(4), 6);
        assert_eq!(view.remaining(40), 0);
    }
}

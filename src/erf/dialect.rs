//! ERF dialect detection
//!
//! The first 16 bytes of an ERF archive are its version tag written as
//! UTF-16LE (`"ERF V2.0"` and friends). Detection is an exact match against
//! the three known tags; there is no fallback.

use serde::Serialize;

use crate::error::{ArchiveError, Result};

/// Length of the wide-character magic at the start of every ERF.
pub const MAGIC_LEN: usize = 16;

/// Width of the inline name field of V2.x table entries, in UTF-16 code units.
pub const NAME_UNITS: usize = 32;

const fn widen(tag: &[u8; 8]) -> [u8; MAGIC_LEN] {
    let mut out = [0u8; MAGIC_LEN];
    let mut i = 0;
    while i < tag.len() {
        out[i * 2] = tag[i];
        i += 1;
    }
    out
}

const MAGIC_V2_0: [u8; MAGIC_LEN] = widen(b"ERF V2.0");
const MAGIC_V2_2: [u8; MAGIC_LEN] = widen(b"ERF V2.2");
const MAGIC_V3_0: [u8; MAGIC_LEN] = widen(b"ERF V3.0");

/// One of the three ERF header/entry-record layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Dialect {
    /// Dragon Age: Origins, inline names, no unpacked length.
    #[serde(rename = "V2.0")]
    V2_0,
    /// As V2.0 plus a header extension and per-entry unpacked length.
    #[serde(rename = "V2.2")]
    V2_2,
    /// Dragon Age 2, names in a separate string table.
    #[serde(rename = "V3.0")]
    V3_0,
}

impl Dialect {
    pub const ALL: [Dialect; 3] = [Dialect::V2_0, Dialect::V2_2, Dialect::V3_0];

    /// The version tag as written in the file.
    pub fn tag(self) -> &'static str {
        match self {
            Dialect::V2_0 => "ERF V2.0",
            Dialect::V2_2 => "ERF V2.2",
            Dialect::V3_0 => "ERF V3.0",
        }
    }

    /// The 16-byte on-disk magic.
    pub fn magic(self) -> &'static [u8; MAGIC_LEN] {
        match self {
            Dialect::V2_0 => &MAGIC_V2_0,
            Dialect::V2_2 => &MAGIC_V2_2,
            Dialect::V3_0 => &MAGIC_V3_0,
        }
    }

    /// Size of the fixed header including the magic. For V3.0 the string
    /// table follows and is not included.
    pub fn header_len(self) -> u64 {
        match self {
            Dialect::V2_0 => 32,
            Dialect::V2_2 => 56,
            Dialect::V3_0 => 48,
        }
    }

    /// Size of one entry-table record, including any per-entry extension.
    pub fn toc_entry_len(self) -> u64 {
        match self {
            Dialect::V2_0 => 72,
            Dialect::V2_2 => 76,
            Dialect::V3_0 => 28,
        }
    }

    /// Whether the header carries the flags/module/digest extension block.
    pub fn has_extension(self) -> bool {
        !matches!(self, Dialect::V2_0)
    }

    /// Whether names live in a separate string table.
    pub fn has_name_table(self) -> bool {
        matches!(self, Dialect::V3_0)
    }

    /// Whether entries record an unpacked length.
    pub fn stores_unpacked_length(self) -> bool {
        !matches!(self, Dialect::V2_0)
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Select the dialect for `data`.
///
/// Returns the dialect and the offset of the header record that follows the
/// magic.
pub fn detect(data: &[u8]) -> Result<(Dialect, u64)> {
    let head = data
        .get(..MAGIC_LEN)
        .ok_or_else(|| ArchiveError::unrecognized(data))?;

    Dialect::ALL
        .into_iter()
        .find(|dialect| dialect.magic().as_slice() == head)
        .map(|dialect| (dialect, MAGIC_LEN as u64))
        .ok_or_else(|| ArchiveError::unrecognized(data))
}

/// True when `data` starts with any ERF magic.
pub fn is_erf(data: &[u8]) -> bool {
    detect(data).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_is_wide_ascii() {
        assert_eq!(
            Dialect::V2_2.magic(),
            b"E\0R\0F\0 \0V\02\0.\02\0"
        );
    }

    #[test]
    fn test_detect_each_dialect() {
        for dialect in Dialect::ALL {
            let mut data = dialect.magic().to_vec();
            data.extend_from_slice(&[0u8; 64]);
            let (found, next) = detect(&data).unwrap();
            assert_eq!(found, dialect);
            assert_eq!(next, 16);
        }
    }

    #[test]
    fn test_detect_exact_length_magic() {
        assert_eq!(detect(Dialect::V3_0.magic()).unwrap().0, Dialect::V3_0);
    }

    #[test]
    fn test_short_buffer_unrecognized() {
        let data = &Dialect::V2_0.magic()[..15];
        assert!(matches!(
            detect(data),
            Err(ArchiveError::UnrecognizedFormat { .. })
        ));
        assert!(detect(&[]).is_err());
    }

    #[test]
    fn test_near_miss_unrecognized() {
        let cases: [&[u8]; 4] = [
            &widen(b"ERF V2.1"),
            &widen(b"erf v2.0"),
            b"ERF V2.0ERF V2.0",
            b"PK\x03\x04\0\0\0\0\0\0\0\0\0\0\0\0",
        ];
        for case in cases {
            assert!(!is_erf(case), "accepted {:?}", case);
        }
    }

    #[test]
    fn test_layout_constants() {
        assert!(!Dialect::V2_0.has_extension());
        assert!(Dialect::V2_2.has_extension());
        assert!(Dialect::V3_0.has_name_table());
        assert!(!Dialect::V2_2.has_name_table());
        assert_eq!(Dialect::V2_2.toc_entry_len() - Dialect::V2_0.toc_entry_len(), 4);
        assert_eq!(Dialect::V2_0.to_string(), "ERF V2.0");
    }
}

//! ERF header and entry-table decoding
//!
//! Decoding is all-or-nothing: every field read and every `(offset,
//! offset + length)` pair is checked against the buffer before an entry is
//! accepted, and the first invalid entry fails the whole table.

use binrw::BinRead;
use chrono::NaiveDate;
use encoding_rs::Encoding;
use serde::Serialize;
use tracing::debug;

use super::accessor::{ByteView, Record};
use super::dialect::{self, Dialect, NAME_UNITS};
use crate::error::{ArchiveError, Result};

/// Header fields shared by V2.0 and V2.2.
#[derive(Debug, BinRead)]
#[br(little)]
struct HeaderV2 {
    entry_count: u32,
    year: u32,
    day: u32,
    _unknown: u32,
}

impl Record for HeaderV2 {
    const SIZE: usize = 16;
}

/// V2.2 header extension and the trailing part of the V3.0 header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, Serialize)]
#[br(little)]
pub struct ModuleInfo {
    pub flags: u32,
    pub module_id: u32,
    pub digest: [u8; 16],
}

impl Record for ModuleInfo {
    const SIZE: usize = 24;
}

#[derive(Debug, BinRead)]
#[br(little)]
struct HeaderV3 {
    string_table_size: u32,
    entry_count: u32,
    module: ModuleInfo,
}

impl Record for HeaderV3 {
    const SIZE: usize = 32;
}

#[derive(Debug, BinRead)]
#[br(little)]
struct TocEntryV2 {
    name: [u16; NAME_UNITS],
    offset: u32,
    length: u32,
}

impl Record for TocEntryV2 {
    const SIZE: usize = NAME_UNITS * 2 + 8;
}

/// Per-entry extension of V2.2.
#[derive(Debug, BinRead)]
#[br(little)]
struct TocExtV22 {
    unpacked_length: u32,
}

impl Record for TocExtV22 {
    const SIZE: usize = 4;
}

#[derive(Debug, BinRead)]
#[br(little)]
struct TocEntryV3 {
    name_offset: i32,
    name_hash: u64,
    type_hash: u32,
    offset: u32,
    packed_length: u32,
    unpacked_length: u32,
}

impl Record for TocEntryV3 {
    const SIZE: usize = 28;
}

/// Build stamp of V2.x archives: years since 1900 and zero-based day of year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BuildStamp {
    pub year: u32,
    pub day: u32,
}

impl BuildStamp {
    /// Calendar date, when the stamp forms one.
    pub fn date(&self) -> Option<NaiveDate> {
        let year = i32::try_from(self.year).ok()?.checked_add(1900)?;
        NaiveDate::from_yo_opt(year, self.day.checked_add(1)?)
    }
}

/// Location of the V3.0 name string table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NameTable {
    pub offset: u64,
    pub len: u64,
}

/// Decoded archive header, one variant per dialect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ErfHeader {
    V2_0 {
        entry_count: u32,
        build: BuildStamp,
    },
    V2_2 {
        entry_count: u32,
        build: BuildStamp,
        module: ModuleInfo,
    },
    V3_0 {
        entry_count: u32,
        names: NameTable,
        module: ModuleInfo,
    },
}

impl ErfHeader {
    pub fn dialect(&self) -> Dialect {
        match self {
            ErfHeader::V2_0 { .. } => Dialect::V2_0,
            ErfHeader::V2_2 { .. } => Dialect::V2_2,
            ErfHeader::V3_0 { .. } => Dialect::V3_0,
        }
    }

    pub fn entry_count(&self) -> u32 {
        match self {
            ErfHeader::V2_0 { entry_count, .. }
            | ErfHeader::V2_2 { entry_count, .. }
            | ErfHeader::V3_0 { entry_count, .. } => *entry_count,
        }
    }

    pub fn build(&self) -> Option<BuildStamp> {
        match self {
            ErfHeader::V2_0 { build, .. } | ErfHeader::V2_2 { build, .. } => Some(*build),
            ErfHeader::V3_0 { .. } => None,
        }
    }

    pub fn module(&self) -> Option<ModuleInfo> {
        match self {
            ErfHeader::V2_0 { .. } => None,
            ErfHeader::V2_2 { module, .. } | ErfHeader::V3_0 { module, .. } => Some(*module),
        }
    }
}

/// One validated entry of the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErfEntry {
    /// Resolved name; `None` when a V3.0 entry has no string-table name.
    pub name: Option<String>,
    pub offset: u64,
    pub length: u64,
    pub unpacked_length: Option<u64>,
    pub name_hash: Option<u64>,
    pub type_hash: Option<u32>,
}

impl ErfEntry {
    pub fn range(&self) -> std::ops::Range<u64> {
        self.offset..self.offset + self.length
    }
}

/// A fully decoded header and entry table.
#[derive(Debug, Clone)]
pub struct ErfTable {
    header: ErfHeader,
    entries: Vec<ErfEntry>,
    payload_floor: u64,
}

impl ErfTable {
    /// Decode the header and every entry of `data`.
    ///
    /// `encoding` is used for V3.0 string-table names.
    pub fn decode(data: &[u8], encoding: &'static Encoding) -> Result<Self> {
        let view = ByteView::new(data);
        let (dialect, mut cursor) = dialect::detect(data)?;

        let (header, names) = match dialect {
            Dialect::V2_0 | Dialect::V2_2 => {
                let head: HeaderV2 = view.record(cursor, "V2 header")?;
                cursor += HeaderV2::SIZE as u64;
                let build = BuildStamp {
                    year: head.year,
                    day: head.day,
                };
                let entry_count = head.entry_count;
                let header = if dialect.has_extension() {
                    let module: ModuleInfo = view.record(cursor, "V2.2 header extension")?;
                    cursor += ModuleInfo::SIZE as u64;
                    ErfHeader::V2_2 {
                        entry_count,
                        build,
                        module,
                    }
                } else {
                    ErfHeader::V2_0 { entry_count, build }
                };
                (header, None)
            }
            Dialect::V3_0 => {
                let head: HeaderV3 = view.record(cursor, "V3.0 header")?;
                cursor += HeaderV3::SIZE as u64;
                let table = NameTable {
                    offset: cursor,
                    len: u64::from(head.string_table_size),
                };
                let names = view.bytes(table.offset, table.len, "name string table")?;
                cursor += table.len;
                let header = ErfHeader::V3_0 {
                    entry_count: head.entry_count,
                    names: table,
                    module: head.module,
                };
                (header, Some(names))
            }
        };

        debug_assert_eq!(
            cursor,
            dialect.header_len() + names.map_or(0, |n| n.len() as u64)
        );
        let payload_floor = cursor;
        let count = header.entry_count();

        // The count is untrusted: make sure the whole table fits before
        // reserving anything for it.
        let table_len = u64::from(count) * dialect.toc_entry_len();
        if table_len > view.remaining(cursor) {
            return Err(ArchiveError::out_of_bounds(
                "entry table",
                cursor,
                table_len,
                view.remaining(cursor),
            ));
        }

        debug!(
            "Decoding {} table: {} entries at offset {}",
            dialect, count, cursor
        );

        let mut entries = Vec::with_capacity(count as usize);
        for index in 0..count {
            let entry = match dialect {
                Dialect::V2_0 | Dialect::V2_2 => {
                    let raw: TocEntryV2 = view.record(cursor, "entry record")?;
                    let name = decode_inline_name(&raw.name, cursor);
                    cursor += TocEntryV2::SIZE as u64;

                    let unpacked_length = if dialect.stores_unpacked_length() {
                        let ext: TocExtV22 = view.record(cursor, "entry extension")?;
                        cursor += TocExtV22::SIZE as u64;
                        Some(u64::from(ext.unpacked_length))
                    } else {
                        None
                    };

                    ErfEntry {
                        name: Some(name),
                        offset: u64::from(raw.offset),
                        length: u64::from(raw.length),
                        unpacked_length,
                        name_hash: None,
                        type_hash: None,
                    }
                }
                Dialect::V3_0 => {
                    let raw: TocEntryV3 = view.record(cursor, "entry record")?;
                    let table = names.unwrap_or_default();
                    let name = lookup_name(table, raw.name_offset, encoding, cursor)?;
                    cursor += TocEntryV3::SIZE as u64;

                    ErfEntry {
                        name,
                        offset: u64::from(raw.offset),
                        length: u64::from(raw.packed_length),
                        unpacked_length: Some(u64::from(raw.unpacked_length)),
                        name_hash: Some(raw.name_hash),
                        type_hash: Some(raw.type_hash),
                    }
                }
            };

            check_payload(&view, &entry, index, payload_floor)?;
            entries.push(entry);
        }

        Ok(Self {
            header,
            entries,
            payload_floor,
        })
    }

    pub fn header(&self) -> &ErfHeader {
        &self.header
    }

    pub fn dialect(&self) -> Dialect {
        self.header.dialect()
    }

    pub fn entries(&self) -> &[ErfEntry] {
        &self.entries
    }

    /// First byte any entry's data may start at.
    pub fn payload_floor(&self) -> u64 {
        self.payload_floor
    }

    /// The raw payload of `entry` within `data`, the buffer it was decoded from.
    pub fn payload<'a>(&self, data: &'a [u8], entry: &ErfEntry) -> Result<&'a [u8]> {
        ByteView::new(data).bytes(entry.offset, entry.length, "entry payload")
    }
}

fn check_payload(view: &ByteView<'_>, entry: &ErfEntry, index: u32, floor: u64) -> Result<()> {
    if entry.offset < floor {
        return Err(ArchiveError::corrupt(
            entry.offset,
            format!("entry {index} data starts inside the header (payload begins at {floor})"),
        ));
    }
    view.bytes(entry.offset, entry.length, "entry payload")
        .map(|_| ())
        .map_err(|_| {
            ArchiveError::out_of_bounds(
                &format!("entry {index} payload"),
                entry.offset,
                entry.length,
                view.remaining(entry.offset),
            )
        })
}

/// Decode a fixed-width V2.x name: stop at the first NUL or at the field
/// width. Code units outside Latin-1 become U+FFFD.
fn decode_inline_name(units: &[u16; NAME_UNITS], at: u64) -> String {
    let mut lossy = 0usize;
    let name = units
        .iter()
        .take_while(|unit| **unit != 0)
        .map(|unit| match u8::try_from(*unit) {
            Ok(byte) => char::from(byte),
            Err(_) => {
                lossy += 1;
                char::REPLACEMENT_CHARACTER
            }
        })
        .collect();
    if lossy > 0 {
        debug!(
            "Entry name at offset {} has {} code unit(s) outside Latin-1",
            at, lossy
        );
    }
    name
}

/// Resolve a V3.0 name from the string table. `-1` means no name.
fn lookup_name(
    table: &[u8],
    name_offset: i32,
    encoding: &'static Encoding,
    at: u64,
) -> Result<Option<String>> {
    if name_offset == -1 {
        return Ok(None);
    }
    let start = usize::try_from(name_offset)
        .ok()
        .filter(|start| *start < table.len())
        .ok_or_else(|| {
            ArchiveError::corrupt(
                at,
                format!(
                    "name offset {name_offset} outside {}-byte string table",
                    table.len()
                ),
            )
        })?;
    let rest = &table[start..];
    let end = rest
        .iter()
        .position(|byte| *byte == 0)
        .ok_or_else(|| ArchiveError::corrupt(at, "unterminated name in string table"))?;
    let (name, _) = encoding.decode_without_bom_handling(&rest[..end]);
    Ok(Some(name.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::erf::fixture::{patch_u32, ErfBuilder};
    use encoding_rs::{UTF_8, WINDOWS_1252};

    fn decode(data: &[u8]) -> Result<ErfTable> {
        ErfTable::decode(data, UTF_8)
    }

    #[test]
    fn test_decode_each_dialect() {
        for dialect in Dialect::ALL {
            let builder = ErfBuilder::new(dialect)
                .file("module.rim", b"rim data")
                .file("core/strings.tlk", b"tlk")
                .file("empty.txt", b"");
            let data = builder.build();
            let table = decode(&data).unwrap();

            assert_eq!(table.dialect(), dialect);
            assert_eq!(table.entries().len(), 3);
            assert_eq!(table.header().entry_count(), 3);

            let names: Vec<_> = table
                .entries()
                .iter()
                .map(|e| e.name.clone().unwrap())
                .collect();
            assert_eq!(names, ["module.rim", "core/strings.tlk", "empty.txt"]);

            let first = &table.entries()[0];
            assert_eq!(table.payload(&data, first).unwrap(), b"rim data");
            for entry in table.entries() {
                assert!(entry.offset + entry.length <= data.len() as u64);
                assert!(entry.offset >= table.payload_floor());
            }
            assert_eq!(
                first.unpacked_length.is_some(),
                dialect.stores_unpacked_length()
            );
        }
    }

    #[test]
    fn test_minimal_v2_fixture_with_data_in_name_slack() {
        // Header (32) + one entry (72) = 104 bytes; "hello" sits at 64,
        // inside the unused tail of the entry's name field.
        let mut data = vec![0u8; 104];
        data[..16].copy_from_slice(Dialect::V2_0.magic());
        patch_u32(&mut data, 16, 1);
        for (i, c) in "test.txt".bytes().enumerate() {
            data[32 + i * 2] = c;
        }
        patch_u32(&mut data, 32 + 64, 64);
        patch_u32(&mut data, 32 + 68, 5);
        data[64..69].copy_from_slice(b"hello");

        let table = decode(&data).unwrap();
        assert_eq!(table.entries().len(), 1);
        let entry = &table.entries()[0];
        assert_eq!(entry.name.as_deref(), Some("test.txt"));
        assert_eq!(entry.range(), 64..69);
        assert_eq!(table.payload(&data, entry).unwrap(), b"hello");
    }

    #[test]
    fn test_entry_past_end_fails_whole_table() {
        let builder = ErfBuilder::new(Dialect::V2_0)
            .file("a.txt", b"aaaa")
            .file("b.txt", b"bbbb");
        let mut data = builder.build();
        let len = data.len() as u32;
        patch_u32(&mut data, builder.toc_entry_offset(1) + 68, len);

        let err = decode(&data).unwrap_err();
        assert!(matches!(err, ArchiveError::TruncatedOrCorrupt { .. }));
    }

    #[test]
    fn test_offset_plus_length_overflow_u32() {
        let builder = ErfBuilder::new(Dialect::V3_0).file("a.txt", b"aaaa");
        let mut data = builder.build();
        let at = builder.toc_entry_offset(0);
        patch_u32(&mut data, at + 16, u32::MAX - 1);
        patch_u32(&mut data, at + 20, 16);
        assert!(matches!(
            decode(&data),
            Err(ArchiveError::TruncatedOrCorrupt { .. })
        ));
    }

    #[test]
    fn test_offset_inside_header_rejected() {
        let builder = ErfBuilder::new(Dialect::V2_2).file("a.txt", b"aaaa");
        let mut data = builder.build();
        patch_u32(&mut data, builder.toc_entry_offset(0) + 64, 8);
        patch_u32(&mut data, builder.toc_entry_offset(0) + 68, 4);
        let err = decode(&data).unwrap_err();
        assert!(err.to_string().contains("inside the header"));
    }

    #[test]
    fn test_huge_entry_count_rejected_up_front() {
        let mut data = ErfBuilder::new(Dialect::V2_0).file("a", b"x").build();
        patch_u32(&mut data, 16, u32::MAX);
        let err = decode(&data).unwrap_err();
        assert!(err.to_string().contains("entry table"));
    }

    #[test]
    fn test_truncated_header() {
        for dialect in Dialect::ALL {
            let data = dialect.magic().to_vec();
            assert!(matches!(
                decode(&data),
                Err(ArchiveError::TruncatedOrCorrupt { offset: 16, .. })
            ));
        }
    }

    #[test]
    fn test_zero_entries() {
        let data = ErfBuilder::new(Dialect::V2_2).build();
        let table = decode(&data).unwrap();
        assert!(table.entries().is_empty());
        assert_eq!(table.payload_floor(), 56);
    }

    #[test]
    fn test_v3_missing_name_is_absent() {
        let data = ErfBuilder::new(Dialect::V3_0)
            .unnamed(b"anonymous")
            .file("named.gda", b"gda")
            .build();
        let table = decode(&data).unwrap();
        assert_eq!(table.entries()[0].name, None);
        assert_eq!(table.entries()[1].name.as_deref(), Some("named.gda"));
        assert_eq!(table.payload(&data, &table.entries()[0]).unwrap(), b"anonymous");
    }

    #[test]
    fn test_v3_bad_name_offsets() {
        let builder = ErfBuilder::new(Dialect::V3_0).file("named.gda", b"gda");
        let at = builder.toc_entry_offset(0);

        let mut past_table = builder.build();
        patch_u32(&mut past_table, at, 4096);
        assert!(decode(&past_table).is_err());

        let mut negative = builder.build();
        patch_u32(&mut negative, at, (-2i32) as u32);
        assert!(decode(&negative).is_err());
    }

    #[test]
    fn test_v3_unterminated_name() {
        let builder = ErfBuilder::new(Dialect::V3_0).file("abc", b"x");
        let mut data = builder.build();
        // The table is "abc\0"; overwrite the terminator.
        let table_start = Dialect::V3_0.header_len() as usize;
        data[table_start + 3] = b'd';
        let err = decode(&data).unwrap_err();
        assert!(err.to_string().contains("unterminated"));
    }

    #[test]
    fn test_v3_names_use_configured_encoding() {
        let data = ErfBuilder::new(Dialect::V3_0)
            .raw_name(b"caf\xe9.txt", b"x")
            .build();
        let table = ErfTable::decode(&data, WINDOWS_1252).unwrap();
        assert_eq!(table.entries()[0].name.as_deref(), Some("café.txt"));

        let table = ErfTable::decode(&data, UTF_8).unwrap();
        assert_eq!(table.entries()[0].name.as_deref(), Some("caf\u{FFFD}.txt"));
    }

    #[test]
    fn test_inline_name_latin1_and_lossy() {
        let mut units = [0u16; NAME_UNITS];
        for (i, c) in "café".chars().enumerate() {
            units[i] = c as u16;
        }
        assert_eq!(decode_inline_name(&units, 0), "café");

        units[1] = 0x4E2D;
        assert_eq!(decode_inline_name(&units, 0), "c\u{FFFD}fé");
    }

    #[test]
    fn test_inline_name_fills_field() {
        let units = [u16::from(b'a'); NAME_UNITS];
        assert_eq!(decode_inline_name(&units, 0).len(), NAME_UNITS);
    }

    #[test]
    fn test_build_stamp_date() {
        let stamp = BuildStamp { year: 109, day: 31 };
        assert_eq!(stamp.date(), NaiveDate::from_ymd_opt(2009, 2, 1));
        assert_eq!(BuildStamp { year: 109, day: 400 }.date(), None);
        assert_eq!(BuildStamp { year: u32::MAX, day: 0 }.date(), None);
    }

    #[test]
    fn test_header_accessors() {
        let data = ErfBuilder::new(Dialect::V2_2).file("a", b"1").build();
        let table = decode(&data).unwrap();
        assert!(table.header().build().is_some());
        assert_eq!(table.header().module().map(|m| m.module_id), Some(0));

        let data = ErfBuilder::new(Dialect::V3_0).file("a", b"1").build();
        let table = decode(&data).unwrap();
        assert!(table.header().build().is_none());
        assert_eq!(table.entries()[0].name_hash, Some(0));
    }
}

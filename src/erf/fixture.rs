//! Synthetic ERF images for tests.

use super::dialect::{Dialect, NAME_UNITS};

enum FixtureName {
    Text(String),
    Raw(Vec<u8>),
    Absent,
}

/// Builds a well-formed ERF image; data blobs follow the entry table in order.
pub(crate) struct ErfBuilder {
    dialect: Dialect,
    files: Vec<(FixtureName, Vec<u8>)>,
}

impl ErfBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            files: Vec::new(),
        }
    }

    pub fn file(mut self, name: &str, data: &[u8]) -> Self {
        self.files
            .push((FixtureName::Text(name.to_string()), data.to_vec()));
        self
    }

    /// A name written byte-for-byte (string table) or byte-per-code-unit (inline).
    pub fn raw_name(mut self, name: &[u8], data: &[u8]) -> Self {
        self.files.push((FixtureName::Raw(name.to_vec()), data.to_vec()));
        self
    }

    /// A V3.0 entry with `name_offset == -1`.
    pub fn unnamed(mut self, data: &[u8]) -> Self {
        self.files.push((FixtureName::Absent, data.to_vec()));
        self
    }

    fn string_table(&self) -> (Vec<u8>, Vec<i32>) {
        let mut table = Vec::new();
        let mut offsets = Vec::new();
        for (name, _) in &self.files {
            let bytes = match name {
                FixtureName::Text(text) => text.as_bytes().to_vec(),
                FixtureName::Raw(raw) => raw.clone(),
                FixtureName::Absent => {
                    offsets.push(-1);
                    continue;
                }
            };
            offsets.push(table.len() as i32);
            table.extend_from_slice(&bytes);
            table.push(0);
        }
        (table, offsets)
    }

    fn toc_start(&self) -> usize {
        let table_len = if self.dialect.has_name_table() {
            self.string_table().0.len()
        } else {
            0
        };
        self.dialect.header_len() as usize + table_len
    }

    /// Byte offset of entry record `index` in the built image.
    pub fn toc_entry_offset(&self, index: usize) -> usize {
        self.toc_start() + index * self.dialect.toc_entry_len() as usize
    }

    pub fn build(&self) -> Vec<u8> {
        let (table, name_offsets) = self.string_table();
        let count = self.files.len() as u32;

        let mut out = self.dialect.magic().to_vec();
        match self.dialect {
            Dialect::V2_0 | Dialect::V2_2 => {
                push_u32(&mut out, count);
                push_u32(&mut out, 109);
                push_u32(&mut out, 6);
                push_u32(&mut out, u32::MAX);
                if self.dialect == Dialect::V2_2 {
                    push_u32(&mut out, 0);
                    push_u32(&mut out, 0);
                    out.extend_from_slice(&[0u8; 16]);
                }
            }
            Dialect::V3_0 => {
                push_u32(&mut out, table.len() as u32);
                push_u32(&mut out, count);
                push_u32(&mut out, 0);
                push_u32(&mut out, 0);
                out.extend_from_slice(&[0u8; 16]);
                out.extend_from_slice(&table);
            }
        }
        assert_eq!(out.len(), self.toc_start());

        let mut data_offset =
            (out.len() + self.files.len() * self.dialect.toc_entry_len() as usize) as u32;
        for (index, (name, data)) in self.files.iter().enumerate() {
            let len = data.len() as u32;
            match self.dialect {
                Dialect::V2_0 | Dialect::V2_2 => {
                    let units: Vec<u16> = match name {
                        FixtureName::Text(text) => text.chars().map(|c| c as u16).collect(),
                        FixtureName::Raw(raw) => raw.iter().map(|b| u16::from(*b)).collect(),
                        FixtureName::Absent => Vec::new(),
                    };
                    for slot in 0..NAME_UNITS {
                        let unit = units.get(slot).copied().unwrap_or(0);
                        out.extend_from_slice(&unit.to_le_bytes());
                    }
                    push_u32(&mut out, data_offset);
                    push_u32(&mut out, len);
                    if self.dialect == Dialect::V2_2 {
                        push_u32(&mut out, len);
                    }
                }
                Dialect::V3_0 => {
                    out.extend_from_slice(&name_offsets[index].to_le_bytes());
                    out.extend_from_slice(&0u64.to_le_bytes());
                    push_u32(&mut out, 0);
                    push_u32(&mut out, data_offset);
                    push_u32(&mut out, len);
                    push_u32(&mut out, len);
                }
            }
            data_offset += len;
        }

        for (_, data) in &self.files {
            out.extend_from_slice(data);
        }
        out
    }
}

fn push_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Overwrite a little-endian u32 at `at`.
pub(crate) fn patch_u32(data: &mut [u8], at: usize, value: u32) {
    data[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

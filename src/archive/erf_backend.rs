//! ERF backend: the table is decoded once at open time, enumeration is an
//! index into it and payloads are slices of the resident buffer.

use encoding_rs::Encoding;
use tracing::debug;

use super::member::RawMember;
use super::source::ByteSource;
use crate::erf::ErfTable;
use crate::error::{ArchiveError, Result};

pub(crate) struct ErfBackend {
    source: ByteSource,
    table: ErfTable,
    next: usize,
}

impl ErfBackend {
    pub fn new(source: ByteSource, encoding: &'static Encoding) -> Result<Self> {
        let table = ErfTable::decode(&source, encoding)?;
        debug!(
            "Decoded {} with {} entries ({} bytes)",
            table.dialect(),
            table.entries().len(),
            source.len()
        );
        Ok(Self {
            source,
            table,
            next: 0,
        })
    }

    pub fn table(&self) -> &ErfTable {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.table.entries().len()
    }

    pub fn next_entry(&mut self) -> Option<RawMember> {
        let entry = self.table.entries().get(self.next)?;
        let raw = RawMember {
            index: self.next,
            name: entry.name.clone(),
            data_offset: entry.offset,
            data_length: entry.length,
            uncompressed_length: entry.unpacked_length,
            is_directory: false,
        };
        self.next += 1;
        Some(raw)
    }

    pub fn restart(&mut self) {
        self.next = 0;
    }

    pub fn payload(&self, index: usize) -> Result<&[u8]> {
        let entry = self.table.entries().get(index).ok_or_else(|| {
            ArchiveError::corrupt(0, format!("no entry #{index} in {} entries", self.len()))
        })?;
        self.table.payload(&self.source, entry)
    }
}

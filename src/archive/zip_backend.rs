//! General-archive backend over the zip crate.
//!
//! Dazip and override packages are plain zip files. Members are visited in
//! central-directory order; payloads are decompressed only when fetched or
//! extracted. The reader seeks to each member's local header on demand, so
//! skipping a payload leaves nothing to drain.

use encoding_rs::{Encoding, UTF_8};
use std::io::{self, Read, Write};
use zip::result::ZipError;
use zip::ZipArchive;

use super::member::RawMember;
use super::source::ReadSeek;
use crate::error::{ArchiveError, Result};

/// Upper bound on speculative allocation for a fetched payload; the
/// declared size is untrusted.
const PREALLOC_LIMIT: u64 = 64 * 1024 * 1024;

pub(crate) struct ZipBackend {
    archive: ZipArchive<Box<dyn ReadSeek>>,
    encoding: &'static Encoding,
    next: usize,
}

impl ZipBackend {
    pub fn new(reader: Box<dyn ReadSeek>, encoding: &'static Encoding) -> Result<Self> {
        let archive = ZipArchive::new(reader)?;
        Ok(Self {
            archive,
            encoding,
            next: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn next_entry(&mut self) -> Result<Option<RawMember>> {
        if self.next >= self.archive.len() {
            return Ok(None);
        }
        let index = self.next;
        let encoding = self.encoding;
        let file = self
            .archive
            .by_index_raw(index)
            .map_err(|e| member_error(index, 0, e))?;

        let raw = RawMember {
            index,
            name: Some(decode_name(encoding, file.name(), file.name_raw())),
            data_offset: file.header_start(),
            data_length: file.compressed_size(),
            uncompressed_length: Some(file.size()),
            is_directory: file.is_dir(),
        };
        self.next += 1;
        Ok(Some(raw))
    }

    pub fn restart(&mut self) {
        self.next = 0;
    }

    /// Decompress member `index`; `offset` is its local header, for errors.
    pub fn read_payload(&mut self, index: usize, offset: u64) -> Result<Vec<u8>> {
        let mut file = self
            .archive
            .by_index(index)
            .map_err(|e| member_error(index, offset, e))?;
        let mut data = Vec::with_capacity(file.size().min(PREALLOC_LIMIT) as usize);
        file.read_to_end(&mut data)
            .map_err(|e| ArchiveError::io(format!("read member #{index}"), e))?;
        Ok(data)
    }

    /// Stream member `index` into `out` without buffering it whole.
    pub fn copy_payload(&mut self, index: usize, offset: u64, out: &mut dyn Write) -> Result<u64> {
        let mut file = self
            .archive
            .by_index(index)
            .map_err(|e| member_error(index, offset, e))?;
        io::copy(&mut file, out).map_err(|e| ArchiveError::io(format!("copy member #{index}"), e))
    }
}

fn member_error(index: usize, offset: u64, err: ZipError) -> ArchiveError {
    match err {
        ZipError::Io(source) => ArchiveError::io(format!("zip member #{index}"), source),
        other => ArchiveError::corrupt(offset, format!("zip member #{index}: {other}")),
    }
}

/// Names flagged UTF-8 (or decoded as CP437 by the zip crate) are used as-is
/// unless the caller asked for another encoding.
fn decode_name(encoding: &'static Encoding, decoded: &str, raw: &[u8]) -> String {
    if encoding == UTF_8 {
        return decoded.to_string();
    }
    let (name, _) = encoding.decode_without_bom_handling(raw);
    name.into_owned()
}

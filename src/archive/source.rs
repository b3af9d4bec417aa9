//! Byte sources backing an open archive

use memmap2::Mmap;
use std::fs::File;
use std::io::{Read, Seek};
use std::ops::Deref;
use std::path::Path;

use crate::erf::MAGIC_LEN;
use crate::error::{ArchiveError, Result};

/// A whole archive as one contiguous, addressable buffer.
#[derive(Debug)]
pub enum ByteSource {
    /// Memory-mapped file (OS manages paging, not loaded to RAM).
    Mapped(Mmap),
    /// Owned buffer, e.g. a nested archive fetched from its parent.
    Owned(Vec<u8>),
}

impl ByteSource {
    /// Map the file at `path`.
    ///
    /// Files too short to carry a magic are read instead; mapping an empty
    /// file fails on some platforms.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ArchiveError::io(format!("open {}", path.display()), e))?;
        let len = file
            .metadata()
            .map_err(|e| ArchiveError::io(format!("stat {}", path.display()), e))?
            .len();

        if len < MAGIC_LEN as u64 {
            let mut data = Vec::new();
            file.read_to_end(&mut data)
                .map_err(|e| ArchiveError::io(format!("read {}", path.display()), e))?;
            return Ok(Self::Owned(data));
        }

        // SAFETY: the map is read-only and every access is bounds-checked
        // against its length at decode time.
        let map = unsafe { Mmap::map(&file) }
            .map_err(|e| ArchiveError::io(format!("mmap {}", path.display()), e))?;
        Ok(Self::Mapped(map))
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::Mapped(map) => map,
            Self::Owned(data) => data,
        }
    }
}

impl Deref for ByteSource {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for ByteSource {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl From<Vec<u8>> for ByteSource {
    fn from(data: Vec<u8>) -> Self {
        Self::Owned(data)
    }
}

/// Seekable stream handed to the general-archive backend.
pub(crate) trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

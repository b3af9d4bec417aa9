//! Enumerated members and the fetch/skip contract.

use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::extract::{write_atomically, ExtractOptions};
use super::{ArchiveHandle, ArchiveKind, Backend};
use crate::classify::{self, ContentInfo, MemberPath, RoleTag};
use crate::error::{ArchiveError, Result};

/// What a backend reports for one member before classification.
pub(crate) struct RawMember {
    pub index: usize,
    pub name: Option<String>,
    pub data_offset: u64,
    pub data_length: u64,
    pub uncompressed_length: Option<u64>,
    pub is_directory: bool,
}

/// Whether a member's payload has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchState {
    Unfetched,
    Fetched,
    Skipped,
}

/// Metadata of one member, as classified at enumeration time.
#[derive(Debug, Clone, Serialize)]
pub struct MemberDescriptor {
    index: usize,
    name: Option<String>,
    data_offset: u64,
    data_length: u64,
    uncompressed_length: Option<u64>,
    is_directory: bool,
    role: RoleTag,
    path: MemberPath,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<ContentInfo>,
    fetch_state: FetchState,
}

impl MemberDescriptor {
    pub(crate) fn classify(kind: ArchiveKind, raw: RawMember) -> Self {
        let name = raw.name.map(|name| classify::normalize_name(&name));
        let path = classify::member_path(name.as_deref());
        let role = name.as_deref().map_or(RoleTag::PlainFile, |name| {
            classify::role_for(kind, name, raw.is_directory)
        });
        let content = match &path {
            MemberPath::Safe { path } => classify::content_info(kind, path, raw.is_directory),
            _ => None,
        };
        if let MemberPath::Rejected { reason } = &path {
            warn!(
                "Member #{} '{}' has an unsafe path: {}",
                raw.index,
                name.as_deref().unwrap_or_default(),
                reason
            );
        }

        Self {
            index: raw.index,
            name,
            data_offset: raw.data_offset,
            data_length: raw.data_length,
            uncompressed_length: raw.uncompressed_length,
            is_directory: raw.is_directory,
            role,
            path,
            content,
            fetch_state: FetchState::Unfetched,
        }
    }

    /// Zero-based position in enumeration order.
    pub fn index(&self) -> usize {
        self.index
    }

    /// NFC-normalized stored name; `None` for unnamed V3.0 entries.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name for logs and reports.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("#{} (unnamed)", self.index),
        }
    }

    /// Byte offset of the payload (ERF) or of the local header (zip).
    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    /// Stored payload length.
    pub fn data_length(&self) -> u64 {
        self.data_length
    }

    pub fn uncompressed_length(&self) -> Option<u64> {
        self.uncompressed_length
    }

    /// Declared uncompressed size, falling back to the stored length.
    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_length.unwrap_or(self.data_length)
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    pub fn role(&self) -> RoleTag {
        self.role
    }

    pub fn path(&self) -> &MemberPath {
        &self.path
    }

    pub fn content(&self) -> Option<&ContentInfo> {
        self.content.as_ref()
    }

    pub fn fetch_state(&self) -> FetchState {
        self.fetch_state
    }

    /// The sanitized relative path, or why there is none.
    pub fn safe_path(&self) -> Result<&Path> {
        match &self.path {
            MemberPath::Safe { path } => Ok(path),
            MemberPath::Rejected { reason } => Err(ArchiveError::PathSecurityViolation {
                name: self.display_name(),
                reason,
            }),
            MemberPath::Unnamed => Err(ArchiveError::PathSecurityViolation {
                name: self.display_name(),
                reason: "member has no name",
            }),
        }
    }
}

fn ordering(index: usize, detail: &'static str) -> ArchiveError {
    ArchiveError::OrderingViolation { index, detail }
}

/// The current member of an enumeration.
///
/// Holds the handle mutably, so at most one member is live at a time. Its
/// payload must be resolved with [`Member::fetch`], [`Member::skip`] or one
/// of the extract methods before the handle yields the next member.
/// A successful extract is terminal on every backend: later fetches and
/// extracts fail with [`ArchiveError::OrderingViolation`].
pub struct Member<'a> {
    handle: &'a mut ArchiveHandle,
    descriptor: MemberDescriptor,
    cache: Option<Vec<u8>>,
    extracted: bool,
}

impl<'a> Member<'a> {
    pub(crate) fn new(handle: &'a mut ArchiveHandle, descriptor: MemberDescriptor) -> Self {
        Self {
            handle,
            descriptor,
            cache: None,
            extracted: false,
        }
    }

    pub fn descriptor(&self) -> &MemberDescriptor {
        &self.descriptor
    }

    pub fn into_descriptor(self) -> MemberDescriptor {
        self.descriptor
    }

    fn resolve(&mut self, state: FetchState) {
        self.descriptor.fetch_state = state;
        self.handle.pending = None;
        self.handle.uncompressed_offset = self
            .handle
            .uncompressed_offset
            .saturating_add(self.descriptor.uncompressed_size());
    }

    /// The complete payload, stored bytes as-is for ERF entries and
    /// decompressed for zip members. Fetching twice returns the same bytes.
    pub fn fetch(&mut self) -> Result<&[u8]> {
        let index = self.descriptor.index;
        if self.extracted {
            return Err(ordering(index, "fetch after extract"));
        }
        match self.descriptor.fetch_state {
            FetchState::Skipped => return Err(ordering(index, "fetch after skip")),
            FetchState::Fetched => {}
            FetchState::Unfetched => {
                if !self.descriptor.is_directory {
                    if let Backend::Zip(zip) = &mut self.handle.backend {
                        self.cache = Some(zip.read_payload(index, self.descriptor.data_offset)?);
                    }
                }
                self.resolve(FetchState::Fetched);
            }
        }

        if self.descriptor.is_directory {
            return Ok(&[][..]);
        }
        match (&self.cache, &self.handle.backend) {
            (Some(bytes), _) => Ok(bytes.as_slice()),
            (None, Backend::Erf(erf)) => erf.payload(index),
            (None, Backend::Zip(_)) => Err(ordering(index, "payload not buffered")),
        }
    }

    /// Discard the payload. Skipping twice is a no-op.
    pub fn skip(&mut self) -> Result<()> {
        match self.descriptor.fetch_state {
            FetchState::Unfetched => {
                self.resolve(FetchState::Skipped);
                Ok(())
            }
            FetchState::Skipped => Ok(()),
            FetchState::Fetched => Err(ordering(self.descriptor.index, "skip after fetch")),
        }
    }

    /// Write the payload to `dest`, creating parent directories when
    /// `create_dirs` is set. Returns the number of bytes written.
    ///
    /// Unfetched zip payloads are streamed without buffering them whole.
    /// Members whose name failed sanitization are refused.
    pub fn extract_to(&mut self, dest: &Path, create_dirs: bool) -> Result<u64> {
        let options = ExtractOptions {
            create_dirs,
            ..ExtractOptions::default()
        };
        self.extract_with(dest, &options)
    }

    /// Write the payload below `base` at its sanitized path.
    pub fn extract_into(&mut self, base: &Path) -> Result<PathBuf> {
        let dest = base.join(self.descriptor.safe_path()?);
        self.extract_with(&dest, &ExtractOptions::default())?;
        Ok(dest)
    }

    pub(crate) fn extract_with(&mut self, dest: &Path, options: &ExtractOptions) -> Result<u64> {
        let index = self.descriptor.index;
        if let MemberPath::Rejected { reason } = &self.descriptor.path {
            return Err(ArchiveError::PathSecurityViolation {
                name: self.descriptor.display_name(),
                reason,
            });
        }
        if self.descriptor.fetch_state == FetchState::Skipped {
            return Err(ordering(index, "extract after skip"));
        }
        if self.extracted {
            return Err(ordering(index, "member already extracted"));
        }

        if self.descriptor.is_directory {
            create_directory(dest, options.create_dirs)?;
            if self.descriptor.fetch_state == FetchState::Unfetched {
                self.resolve(FetchState::Fetched);
            }
            self.extracted = true;
            return Ok(0);
        }

        let written = match (&self.cache, &mut self.handle.backend) {
            (Some(bytes), _) => write_atomically(dest, options, |out| write_bytes(out, bytes))?,
            (None, Backend::Erf(erf)) => {
                let bytes = erf.payload(index)?;
                write_atomically(dest, options, |out| write_bytes(out, bytes))?
            }
            (None, Backend::Zip(zip)) => {
                if self.descriptor.fetch_state == FetchState::Fetched {
                    return Err(ordering(index, "payload not buffered"));
                }
                let offset = self.descriptor.data_offset;
                write_atomically(dest, options, |out| zip.copy_payload(index, offset, out))?
            }
        };
        if self.descriptor.fetch_state == FetchState::Unfetched {
            self.resolve(FetchState::Fetched);
        }
        self.extracted = true;
        debug!(
            "Extracted {} ({} bytes) to {}",
            self.descriptor.display_name(),
            written,
            dest.display()
        );
        Ok(written)
    }
}

fn write_bytes(out: &mut dyn Write, bytes: &[u8]) -> Result<u64> {
    out.write_all(bytes)
        .map_err(|e| ArchiveError::io("write payload", e))?;
    Ok(bytes.len() as u64)
}

fn create_directory(dest: &Path, create_parents: bool) -> Result<()> {
    let created = if create_parents {
        fs::create_dir_all(dest)
    } else {
        match fs::create_dir(dest) {
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && dest.is_dir() => Ok(()),
            other => other,
        }
    };
    created.map_err(|e| ArchiveError::io(format!("create {}", dest.display()), e))
}

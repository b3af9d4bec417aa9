//! Archive enumeration.
//!
//! One interface over two backends: the ERF decoder for `.erf`/`.rim`
//! files and the zip crate for `.dazip`/`.override` packages and plain zip
//! files. The backend is chosen from the leading bytes, never from the file
//! extension; the extension (or an explicit [`ArchiveKind`]) only decides how
//! members are classified.
//!
//! Enumeration is a lending iterator: [`ArchiveHandle::next_member`] yields a
//! [`Member`] that borrows the handle, and each member must be fetched,
//! skipped or extracted before the next one is requested.

mod erf_backend;
mod extract;
mod member;
mod source;
mod zip_backend;

pub use extract::{extract_all, ExtractOptions, ExtractReport, ExtractSummary, MemberFailure};
pub use member::{FetchState, Member, MemberDescriptor};
pub use source::ByteSource;

use encoding_rs::{Encoding, UTF_8};
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use crate::erf::{self, Dialect, ErfHeader, MAGIC_LEN};
use crate::error::{ArchiveError, Result};
use erf_backend::ErfBackend;
use zip_backend::ZipBackend;

/// Local file header and end-of-central-directory signatures.
const ZIP_SIGNATURES: [&[u8; 4]; 2] = [b"PK\x03\x04", b"PK\x05\x06"];

/// Declared type of an archive; drives member classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveKind {
    /// A bare ERF container.
    Erf,
    /// An add-in package: zip with `Manifest.xml` and a `Contents/` tree.
    Dazip,
    /// A zip of loose override files.
    Override,
    /// Any other zip.
    Generic,
}

impl ArchiveKind {
    /// Kind implied by a file extension, if any.
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "erf" | "rim" => Some(Self::Erf),
            "dazip" => Some(Self::Dazip),
            "override" => Some(Self::Override),
            "zip" => Some(Self::Generic),
            _ => None,
        }
    }

    /// Whether a `Manifest.xml` member is meaningful in this kind.
    pub fn has_manifest(self) -> bool {
        matches!(self, Self::Dazip | Self::Generic)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Erf => "erf",
            Self::Dazip => "dazip",
            Self::Override => "override",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArchiveKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "erf" | "rim" => Ok(Self::Erf),
            "dazip" => Ok(Self::Dazip),
            "override" => Ok(Self::Override),
            "generic" | "zip" => Ok(Self::Generic),
            other => Err(format!(
                "unknown archive kind '{other}' (expected erf, dazip, override or generic)"
            )),
        }
    }
}

/// Container format actually found in the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerFormat {
    Erf(Dialect),
    Zip,
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Erf(dialect) => write!(f, "{dialect}"),
            Self::Zip => f.write_str("zip"),
        }
    }
}

/// Options for opening an archive.
#[derive(Debug, Clone, Copy)]
pub struct OpenOptions {
    /// Encoding for 8-bit names: V3.0 string tables and zip names without
    /// the UTF-8 flag.
    pub encoding: &'static Encoding,
    /// Overrides the kind implied by the extension.
    pub kind: Option<ArchiveKind>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            encoding: UTF_8,
            kind: None,
        }
    }
}

impl OpenOptions {
    pub fn encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn kind(mut self, kind: ArchiveKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

pub(crate) enum Backend {
    Erf(ErfBackend),
    Zip(ZipBackend),
}

fn is_zip(head: &[u8]) -> bool {
    head.len() >= MAGIC_LEN && ZIP_SIGNATURES.iter().any(|sig| head.starts_with(*sig))
}

/// An open archive being enumerated.
pub struct ArchiveHandle {
    backend: Backend,
    kind: ArchiveKind,
    label: String,
    /// Index of a yielded member whose payload is still unresolved.
    pending: Option<usize>,
    uncompressed_offset: u64,
    exhausted: bool,
}

impl ArchiveHandle {
    /// Open the archive at `path`.
    ///
    /// ERF files are memory-mapped; zip files are read through a buffered
    /// file handle.
    pub fn open(path: &Path, options: &OpenOptions) -> Result<Self> {
        let label = path.display().to_string();
        let mut file =
            File::open(path).map_err(|e| ArchiveError::io(format!("open {label}"), e))?;
        let mut head = Vec::with_capacity(MAGIC_LEN);
        (&mut file)
            .take(MAGIC_LEN as u64)
            .read_to_end(&mut head)
            .map_err(|e| ArchiveError::io(format!("read {label}"), e))?;

        let kind = options.kind.or_else(|| ArchiveKind::from_extension(path));
        if is_zip(&head) {
            file.rewind()
                .map_err(|e| ArchiveError::io(format!("seek {label}"), e))?;
            let backend = ZipBackend::new(Box::new(BufReader::new(file)), options.encoding)?;
            return Ok(Self::new(Backend::Zip(backend), zip_kind(kind), label));
        }
        drop(file);

        let source = ByteSource::open(path)?;
        Self::from_erf(source, options, label)
    }

    /// Open an archive held in memory, e.g. an ERF fetched from a dazip.
    pub fn from_bytes(data: impl Into<ByteSource>, options: &OpenOptions) -> Result<Self> {
        let source = data.into();
        let label = format!("<memory:{} bytes>", source.len());
        if is_zip(&source) {
            let backend = ZipBackend::new(Box::new(Cursor::new(source)), options.encoding)?;
            return Ok(Self::new(Backend::Zip(backend), zip_kind(options.kind), label));
        }
        Self::from_erf(source, options, label)
    }

    fn from_erf(source: ByteSource, options: &OpenOptions, label: String) -> Result<Self> {
        if !erf::is_erf(&source) {
            return Err(ArchiveError::unrecognized(&source));
        }
        let backend = ErfBackend::new(source, options.encoding)?;
        let kind = options.kind.unwrap_or(ArchiveKind::Erf);
        Ok(Self::new(Backend::Erf(backend), kind, label))
    }

    fn new(backend: Backend, kind: ArchiveKind, label: String) -> Self {
        let handle = Self {
            backend,
            kind,
            label,
            pending: None,
            uncompressed_offset: 0,
            exhausted: false,
        };
        debug!(
            "Opened {} as {} ({}, {} members)",
            handle.label,
            handle.kind,
            handle.format(),
            handle.member_count()
        );
        handle
    }

    /// Replace the label used in logs and reports.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> ArchiveKind {
        self.kind
    }

    pub fn format(&self) -> ContainerFormat {
        match &self.backend {
            Backend::Erf(erf) => ContainerFormat::Erf(erf.table().dialect()),
            Backend::Zip(_) => ContainerFormat::Zip,
        }
    }

    pub fn dialect(&self) -> Option<Dialect> {
        self.erf_header().map(ErfHeader::dialect)
    }

    /// Decoded ERF header; `None` for zip archives.
    pub fn erf_header(&self) -> Option<&ErfHeader> {
        match &self.backend {
            Backend::Erf(erf) => Some(erf.table().header()),
            Backend::Zip(_) => None,
        }
    }

    /// Total number of members, known up front for both backends.
    pub fn member_count(&self) -> usize {
        match &self.backend {
            Backend::Erf(erf) => erf.len(),
            Backend::Zip(zip) => zip.len(),
        }
    }

    /// Sum of the uncompressed sizes of every member resolved so far.
    pub fn uncompressed_offset(&self) -> u64 {
        self.uncompressed_offset
    }

    /// Whether enumeration has reported its end.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Start enumeration over from the first member.
    ///
    /// Also clears an unresolved member and the progress counter.
    pub fn restart(&mut self) {
        match &mut self.backend {
            Backend::Erf(erf) => erf.restart(),
            Backend::Zip(zip) => zip.restart(),
        }
        self.pending = None;
        self.uncompressed_offset = 0;
        self.exhausted = false;
    }

    /// The next member in storage order, or `None` once all are visited.
    ///
    /// Fails with [`ArchiveError::OrderingViolation`] while the previously
    /// yielded member is neither fetched nor skipped.
    pub fn next_member(&mut self) -> Result<Option<Member<'_>>> {
        if let Some(index) = self.pending {
            return Err(ArchiveError::OrderingViolation {
                index,
                detail: "previous member was neither fetched nor skipped",
            });
        }

        let raw = match &mut self.backend {
            Backend::Erf(erf) => erf.next_entry(),
            Backend::Zip(zip) => zip.next_entry()?,
        };
        let Some(raw) = raw else {
            self.exhausted = true;
            return Ok(None);
        };

        let descriptor = MemberDescriptor::classify(self.kind, raw);
        self.pending = Some(descriptor.index());
        Ok(Some(Member::new(self, descriptor)))
    }
}

/// Zip content never classifies as a bare ERF.
fn zip_kind(declared: Option<ArchiveKind>) -> ArchiveKind {
    match declared {
        None | Some(ArchiveKind::Erf) => ArchiveKind::Generic,
        Some(kind) => kind,
    }
}

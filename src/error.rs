//! Archive error taxonomy
//!
//! Every failure the reader can report carries enough context (offset,
//! needed vs available length, member index or path) for a caller to build
//! an actionable message. Presentation is left to the caller.

use std::io;

/// Errors produced while opening, enumerating or extracting an archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The leading bytes match none of the known archive signatures.
    #[error("unrecognized archive format (header: {header})")]
    UnrecognizedFormat { header: String },

    /// A bounds check failed or a structural field is inconsistent.
    #[error("truncated or corrupt archive at offset {offset}: {detail}")]
    TruncatedOrCorrupt { offset: u64, detail: String },

    /// A member name could not be represented. Currently unused: names are
    /// decoded lossily instead.
    #[error("unsupported name encoding at offset {offset}")]
    UnsupportedNameEncoding { offset: u64 },

    /// The fetch/skip contract was broken by the caller.
    #[error("member #{index}: {detail}")]
    OrderingViolation { index: usize, detail: &'static str },

    /// Reading the source or writing the destination failed.
    #[error("I/O error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// A member name would escape the extraction directory.
    #[error("unsafe member path '{name}': {reason}")]
    PathSecurityViolation { name: String, reason: &'static str },
}

impl ArchiveError {
    /// A read of `needed` bytes at `offset` does not fit in `available`.
    pub(crate) fn out_of_bounds(what: &str, offset: u64, needed: u64, available: u64) -> Self {
        Self::TruncatedOrCorrupt {
            offset,
            detail: format!("{what} needs {needed} bytes, {available} available"),
        }
    }

    pub(crate) fn corrupt(offset: u64, detail: impl Into<String>) -> Self {
        Self::TruncatedOrCorrupt {
            offset,
            detail: detail.into(),
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn unrecognized(data: &[u8]) -> Self {
        let header = data
            .iter()
            .take(16)
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(" ");
        Self::UnrecognizedFormat {
            header: if header.is_empty() {
                "empty".to_string()
            } else {
                header
            },
        }
    }
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(source) => Self::io("zip stream", source),
            other => Self::corrupt(0, format!("zip central directory: {other}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_bounds_message() {
        let err = ArchiveError::out_of_bounds("entry table", 32, 72, 40);
        assert_eq!(
            err.to_string(),
            "truncated or corrupt archive at offset 32: entry table needs 72 bytes, 40 available"
        );
    }

    #[test]
    fn test_unrecognized_header_preview() {
        let err = ArchiveError::unrecognized(b"ERF");
        assert_eq!(
            err.to_string(),
            "unrecognized archive format (header: 45 52 46)"
        );
        let err = ArchiveError::unrecognized(&[]);
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_zip_io_maps_to_io() {
        let zip_err = zip::result::ZipError::Io(io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(matches!(
            ArchiveError::from(zip_err),
            ArchiveError::Io { .. }
        ));
    }
}

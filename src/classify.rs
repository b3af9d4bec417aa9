//! Member classification and path sanitization
//!
//! Tags every enumerated member by its role in an add-in package and turns
//! its stored name into a relative path that is safe to join onto an
//! extraction root. Names are NFC-normalized first so that the same name
//! stored with different encodings compares equal.
//!
//! Stored names use either `\` (BioWare tools) or `/` (zip tools); both are
//! treated as separators.

use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use unicode_normalization::UnicodeNormalization;

use crate::archive::ArchiveKind;

/// Suffix identifying an add-in manifest (`Manifest.xml`).
pub const MANIFEST_SUFFIX: &str = "manifest.xml";

/// Suffix identifying an ERF nested inside another archive.
pub const NESTED_ARCHIVE_SUFFIX: &str = ".erf";

/// Top-level directory of a dazip holding the installable payload.
pub const CONTENTS_DIR: &str = "contents";

/// Structural role of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoleTag {
    Manifest,
    NestedArchive,
    PlainFile,
}

/// Outcome of sanitizing a member name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum MemberPath {
    /// Relative path, separators normalized, no traversal.
    Safe { path: PathBuf },
    /// The name would escape the extraction root.
    Rejected { reason: &'static str },
    /// The member has no name (V3.0 entry without a string-table name).
    Unnamed,
}

impl MemberPath {
    pub fn is_safe(&self) -> bool {
        matches!(self, MemberPath::Safe { .. })
    }
}

/// Kind of a dazip content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentKind {
    File,
    Directory,
}

/// Where a dazip member lands relative to the game's user directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentInfo {
    /// Path below `Contents/`.
    pub path: PathBuf,
    pub kind: ContentKind,
}

/// NFC-normalize a stored member name.
pub fn normalize_name(name: &str) -> String {
    name.nfc().collect()
}

/// Role of a member named `name` inside an archive of type `kind`.
pub fn role_for(kind: ArchiveKind, name: &str, is_directory: bool) -> RoleTag {
    if is_directory {
        return RoleTag::PlainFile;
    }
    let lower = name.to_lowercase();
    if kind.has_manifest() && lower.ends_with(MANIFEST_SUFFIX) {
        RoleTag::Manifest
    } else if lower.ends_with(NESTED_ARCHIVE_SUFFIX) {
        RoleTag::NestedArchive
    } else {
        RoleTag::PlainFile
    }
}

/// Convert a stored name into a relative path, or say why it is unsafe.
pub fn sanitize(name: &str) -> Result<PathBuf, &'static str> {
    if name.contains('\0') {
        return Err("contains a NUL character");
    }

    let unified = name.replace('\\', "/");
    if unified.starts_with('/') {
        return Err("absolute path");
    }
    let bytes = unified.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Err("drive prefix");
    }

    let mut path = PathBuf::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err("parent-directory traversal"),
            s if s.contains(':') => return Err("drive or stream prefix"),
            s => path.push(s),
        }
    }

    // Only plain components may remain (catches platform prefixes).
    if !path
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
    {
        return Err("non-relative component");
    }
    if path.as_os_str().is_empty() {
        return Err("empty path");
    }
    Ok(path)
}

/// Sanitize an optional name into a [`MemberPath`].
pub fn member_path(name: Option<&str>) -> MemberPath {
    match name {
        None => MemberPath::Unnamed,
        Some(name) => match sanitize(name) {
            Ok(path) => MemberPath::Safe { path },
            Err(reason) => MemberPath::Rejected { reason },
        },
    }
}

/// Content placement for a dazip member stored below `Contents/`.
pub fn content_info(kind: ArchiveKind, safe: &Path, is_directory: bool) -> Option<ContentInfo> {
    if kind != ArchiveKind::Dazip {
        return None;
    }
    let mut components = safe.components();
    let first = components.next()?.as_os_str().to_str()?;
    if !first.eq_ignore_ascii_case(CONTENTS_DIR) {
        return None;
    }
    let rest: PathBuf = components.collect();
    if rest.as_os_str().is_empty() {
        return None;
    }
    Some(ContentInfo {
        path: rest,
        kind: if is_directory {
            ContentKind::Directory
        } else {
            ContentKind::File
        },
    })
}

//! modazip - Dragon Age add-in archive reader
//!
//! Reads BioWare ERF containers (V2.0, V2.2 and V3.0) and the zip-based
//! `.dazip` / `.override` packages that carry them, behind one enumeration
//! interface with a strict fetch-or-skip contract per member. Member names
//! are classified and sanitized before anything touches the filesystem.

pub mod archive;
pub mod classify;
pub mod config;
pub mod erf;
pub mod error;
pub mod inspect;
pub mod manifest;

pub use archive::{
    extract_all, ArchiveHandle, ArchiveKind, ExtractOptions, ExtractReport, Member,
    MemberDescriptor, OpenOptions,
};
pub use error::{ArchiveError, Result};

//! Archive inspection.
//!
//! Walks every member of an archive once: manifests and nested ERFs are
//! fetched and decoded (nested ERFs recursively, from memory), everything
//! else is skipped. The result is a serializable summary suitable for
//! listing an add-in package before installing it.

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::archive::{ArchiveHandle, ArchiveKind, ContainerFormat, FetchState, Member, OpenOptions};
use crate::classify::{MemberPath, RoleTag};
use crate::erf::ModuleInfo;
use crate::error::{ArchiveError, Result};
use crate::manifest::{parse_manifest, Manifest};

/// ERFs nested deeper than this are listed but not opened.
pub const MAX_NESTING: usize = 4;

/// ERF header details worth showing.
#[derive(Debug, Clone, Serialize)]
pub struct ErfInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub built: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<ModuleInfo>,
}

/// One member of an inspected archive.
#[derive(Debug, Clone, Serialize)]
pub struct MemberSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub role: RoleTag,
    pub size: u64,
    pub is_directory: bool,
    /// Install path below `Contents/` for dazip members.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nested: Option<Box<ArchiveSummary>>,
    /// Why a manifest or nested archive could not be decoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything learned from one pass over an archive.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveSummary {
    pub label: String,
    pub kind: ArchiveKind,
    pub format: ContainerFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub erf: Option<ErfInfo>,
    pub member_count: usize,
    pub uncompressed_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Manifest>,
    pub members: Vec<MemberSummary>,
}

impl ArchiveSummary {
    /// Members whose names failed sanitization, including nested ones.
    pub fn rejected_count(&self) -> usize {
        self.members
            .iter()
            .map(|m| {
                usize::from(m.rejected.is_some())
                    + m.nested.as_ref().map_or(0, |n| n.rejected_count())
            })
            .sum()
    }
}

/// Inspect the archive at `path`.
pub fn inspect(path: &Path, options: &OpenOptions) -> Result<ArchiveSummary> {
    let mut handle = ArchiveHandle::open(path, options)?;
    inspect_handle(&mut handle, options, 0)
}

/// Inspect an archive held in memory.
pub fn inspect_bytes(
    data: Vec<u8>,
    label: impl Into<String>,
    options: &OpenOptions,
) -> Result<ArchiveSummary> {
    let mut handle = ArchiveHandle::from_bytes(data, options)?.with_label(label);
    inspect_handle(&mut handle, options, 0)
}

/// Inspect independent archives in parallel on the current rayon pool.
///
/// Each worker owns its handle; `on_done` is called as each archive
/// finishes, from whichever worker finished it.
pub fn inspect_many<F>(
    paths: &[PathBuf],
    options: &OpenOptions,
    on_done: F,
) -> Vec<(PathBuf, Result<ArchiveSummary>)>
where
    F: Fn(&Path, &Result<ArchiveSummary>) + Sync,
{
    info!(
        "Inspecting {} archives ({} threads)",
        paths.len(),
        rayon::current_num_threads()
    );
    paths
        .par_iter()
        .map(|path| {
            let result = inspect(path, options);
            on_done(path, &result);
            (path.clone(), result)
        })
        .collect()
}

fn inspect_handle(
    handle: &mut ArchiveHandle,
    options: &OpenOptions,
    depth: usize,
) -> Result<ArchiveSummary> {
    let label = handle.label().to_string();
    let erf = handle.erf_header().map(|header| ErfInfo {
        built: header.build().and_then(|stamp| stamp.date()),
        module: header.module(),
    });
    let mut summary = ArchiveSummary {
        label: label.clone(),
        kind: handle.kind(),
        format: handle.format(),
        erf,
        member_count: handle.member_count(),
        uncompressed_size: 0,
        manifest: None,
        members: Vec::with_capacity(handle.member_count()),
    };

    while let Some(mut member) = handle.next_member()? {
        let item = summarize_member(&mut member, &label, options, depth, &mut summary.manifest)?;
        summary.members.push(item);
    }
    summary.uncompressed_size = handle.uncompressed_offset();

    debug!(
        "{}: {} members, {} bytes uncompressed",
        label,
        summary.members.len(),
        summary.uncompressed_size
    );
    Ok(summary)
}

fn summarize_member(
    member: &mut Member<'_>,
    parent: &str,
    options: &OpenOptions,
    depth: usize,
    manifest: &mut Option<Manifest>,
) -> Result<MemberSummary> {
    let descriptor = member.descriptor().clone();
    let mut item = MemberSummary {
        name: descriptor.name().map(str::to_string),
        role: descriptor.role(),
        size: descriptor.uncompressed_size(),
        is_directory: descriptor.is_directory(),
        content_path: descriptor.content().map(|c| c.path.clone()),
        rejected: match descriptor.path() {
            MemberPath::Rejected { reason } => Some(*reason),
            _ => None,
        },
        nested: None,
        error: None,
    };

    match descriptor.role() {
        RoleTag::Manifest if manifest.is_none() => match member.fetch() {
            Ok(bytes) => match parse_manifest(bytes) {
                Ok(parsed) => *manifest = Some(parsed),
                Err(err) => {
                    warn!("{}: unreadable manifest {}: {}", parent, descriptor.display_name(), err);
                    item.error = Some(err.to_string());
                }
            },
            Err(err) => record_fetch_failure(member, parent, &mut item, err)?,
        },
        RoleTag::NestedArchive if depth < MAX_NESTING => {
            let data = match member.fetch() {
                Ok(bytes) => bytes.to_vec(),
                Err(err) => {
                    record_fetch_failure(member, parent, &mut item, err)?;
                    return Ok(item);
                }
            };
            let label = format!("{}!{}", parent, descriptor.display_name());
            let nested_options = OpenOptions {
                kind: None,
                ..*options
            };
            let nested = ArchiveHandle::from_bytes(data, &nested_options)
                .map(|handle| handle.with_label(label.as_str()))
                .and_then(|mut handle| inspect_handle(&mut handle, &nested_options, depth + 1));
            match nested {
                Ok(nested) => item.nested = Some(Box::new(nested)),
                Err(err) => {
                    warn!("{}: cannot open nested archive: {}", label, err);
                    item.error = Some(err.to_string());
                }
            }
        }
        _ => member.skip()?,
    }
    Ok(item)
}

/// Note a payload that could not be read and move past it.
fn record_fetch_failure(
    member: &mut Member<'_>,
    parent: &str,
    item: &mut MemberSummary,
    err: ArchiveError,
) -> Result<()> {
    warn!("{}: cannot read {}: {}", parent, member.descriptor().display_name(), err);
    item.error = Some(err.to_string());
    if member.descriptor().fetch_state() == FetchState::Unfetched {
        member.skip()?;
    }
    Ok(())
}

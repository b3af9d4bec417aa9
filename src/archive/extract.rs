//! Extraction to disk.
//!
//! Every file is staged in a temporary file next to its destination and
//! renamed into place, so an interrupted run never leaves a truncated file
//! under the final name.

use serde::Serialize;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use super::member::{FetchState, MemberDescriptor};
use super::ArchiveHandle;
use crate::error::{ArchiveError, Result};

/// How extracted files are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Create missing parent directories.
    pub create_dirs: bool,
    /// Replace files that already exist.
    pub overwrite: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            create_dirs: true,
            overwrite: true,
        }
    }
}

/// A member that could not be extracted.
#[derive(Debug)]
pub struct MemberFailure {
    pub name: String,
    pub error: ArchiveError,
}

/// Outcome of [`extract_all`].
#[derive(Debug, Default)]
pub struct ExtractReport {
    /// Destination of every file and directory written.
    pub extracted: Vec<PathBuf>,
    pub bytes_written: u64,
    /// Members skipped because their name is unsafe or missing.
    pub rejected: Vec<String>,
    pub failed: Vec<MemberFailure>,
}

impl ExtractReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty() && self.failed.is_empty()
    }

    pub fn summary(&self) -> ExtractSummary {
        ExtractSummary {
            extracted: self.extracted.len(),
            bytes_written: self.bytes_written,
            rejected: self.rejected.clone(),
            failed: self
                .failed
                .iter()
                .map(|f| (f.name.clone(), f.error.to_string()))
                .collect(),
        }
    }
}

/// Serializable digest of an [`ExtractReport`].
#[derive(Debug, Clone, Serialize)]
pub struct ExtractSummary {
    pub extracted: usize,
    pub bytes_written: u64,
    pub rejected: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Stage `fill`'s output next to `dest`, then rename it into place.
pub(crate) fn write_atomically<F>(dest: &Path, options: &ExtractOptions, fill: F) -> Result<u64>
where
    F: FnOnce(&mut dyn Write) -> Result<u64>,
{
    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    if options.create_dirs {
        fs::create_dir_all(parent)
            .map_err(|e| ArchiveError::io(format!("create {}", parent.display()), e))?;
    }

    let mut staged = NamedTempFile::new_in(parent)
        .map_err(|e| ArchiveError::io(format!("stage in {}", parent.display()), e))?;
    let written = {
        let mut writer = BufWriter::new(staged.as_file_mut());
        let written = fill(&mut writer)?;
        writer
            .flush()
            .map_err(|e| ArchiveError::io(format!("flush {}", dest.display()), e))?;
        written
    };

    // Temporary files are created owner-only.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        staged
            .as_file()
            .set_permissions(fs::Permissions::from_mode(0o644))
            .map_err(|e| ArchiveError::io(format!("chmod {}", dest.display()), e))?;
    }

    let persisted = if options.overwrite {
        staged.persist(dest)
    } else {
        staged.persist_noclobber(dest)
    };
    persisted.map_err(|e| ArchiveError::io(format!("write {}", dest.display()), e.error))?;
    Ok(written)
}

/// Extract every remaining member of `handle` below `base`.
///
/// Members with unsafe or missing names are skipped and listed in
/// [`ExtractReport::rejected`]. A member that fails to write is recorded and
/// enumeration continues; only archive-level errors abort. `on_member` sees
/// each descriptor after it is resolved, together with the handle's
/// uncompressed offset.
pub fn extract_all<F>(
    handle: &mut ArchiveHandle,
    base: &Path,
    options: &ExtractOptions,
    mut on_member: F,
) -> Result<ExtractReport>
where
    F: FnMut(&MemberDescriptor, u64),
{
    let mut report = ExtractReport::default();

    while let Some(mut member) = handle.next_member()? {
        let name = member.descriptor().display_name();
        match member.descriptor().safe_path().map(|path| base.join(path)) {
            Err(err) => {
                warn!("Skipping {}: {}", name, err);
                member.skip()?;
                report.rejected.push(name);
            }
            Ok(dest) => match member.extract_with(&dest, options) {
                Ok(written) => {
                    report.bytes_written = report.bytes_written.saturating_add(written);
                    report.extracted.push(dest);
                }
                Err(err) => {
                    warn!("Failed to extract {}: {}", name, err);
                    if member.descriptor().fetch_state() == FetchState::Unfetched {
                        member.skip()?;
                    }
                    report.failed.push(MemberFailure { name, error: err });
                }
            },
        }
        let descriptor = member.into_descriptor();
        on_member(&descriptor, handle.uncompressed_offset());
    }

    info!(
        "Extracted {} entries ({} bytes) from {} to {}",
        report.extracted.len(),
        report.bytes_written,
        handle.label(),
        base.display()
    );
    if !report.rejected.is_empty() {
        warn!("{} members rejected for unsafe paths", report.rejected.len());
    }
    Ok(report)
}

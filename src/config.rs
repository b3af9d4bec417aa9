//! Extraction and scan configuration
//!
//! Workflow-level settings built by the CLI (or any other front end) and
//! validated before an archive is touched.

use encoding_rs::Encoding;
use std::path::PathBuf;

use crate::archive::{ArchiveKind, ExtractOptions, OpenOptions};

/// Configuration for extracting one archive
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    /// Archive to extract
    pub archive_path: PathBuf,

    /// Extraction root; members land at their sanitized paths below it
    pub output_dir: PathBuf,

    /// Create intermediate directories
    pub create_dirs: bool,

    /// Replace existing files
    pub overwrite: bool,

    /// Encoding label for 8-bit member names (WHATWG label, e.g. `windows-1252`)
    pub encoding: Option<String>,

    /// Declared archive kind; inferred from the extension when absent
    pub kind: Option<ArchiveKind>,
}

impl ExtractConfig {
    pub fn new(archive_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_path: archive_path.into(),
            output_dir: output_dir.into(),
            create_dirs: true,
            overwrite: true,
            encoding: None,
            kind: None,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.archive_path.is_file() {
            return Err(ConfigError::ArchiveNotFound(self.archive_path.clone()));
        }
        if self.output_dir.exists() && !self.output_dir.is_dir() {
            return Err(ConfigError::OutputNotDirectory(self.output_dir.clone()));
        }
        resolve_encoding(self.encoding.as_deref())?;
        Ok(())
    }

    pub fn open_options(&self) -> Result<OpenOptions, ConfigError> {
        open_options(self.encoding.as_deref(), self.kind)
    }

    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            create_dirs: self.create_dirs,
            overwrite: self.overwrite,
        }
    }
}

/// Configuration for inspecting every archive below a directory
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Directory searched recursively
    pub root: PathBuf,

    /// Worker threads for parallel inspection
    pub jobs: usize,

    /// Encoding label for 8-bit member names
    pub encoding: Option<String>,
}

impl ScanConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.root.is_dir() {
            return Err(ConfigError::ScanRootNotFound(self.root.clone()));
        }
        if self.jobs == 0 {
            return Err(ConfigError::NoWorkers);
        }
        resolve_encoding(self.encoding.as_deref())?;
        Ok(())
    }

    pub fn open_options(&self) -> Result<OpenOptions, ConfigError> {
        open_options(self.encoding.as_deref(), None)
    }
}

/// Look up a WHATWG encoding label; `None` means UTF-8.
pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding, ConfigError> {
    match label {
        None => Ok(encoding_rs::UTF_8),
        Some(label) => Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| ConfigError::UnknownEncoding(label.to_string())),
    }
}

fn open_options(label: Option<&str>, kind: Option<ArchiveKind>) -> Result<OpenOptions, ConfigError> {
    let mut options = OpenOptions::default().encoding(resolve_encoding(label)?);
    options.kind = kind;
    Ok(options)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Archive not found: {0}")]
    ArchiveNotFound(PathBuf),

    #[error("Output path exists and is not a directory: {0}")]
    OutputNotDirectory(PathBuf),

    #[error("Scan directory not found: {0}")]
    ScanRootNotFound(PathBuf),

    #[error("At least one worker thread is required")]
    NoWorkers,

    #[error("Unknown text encoding: {0}")]
    UnknownEncoding(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_extract_config_validate() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let archive = dir.path().join("mod.dazip");
        std::fs::write(&archive, b"PK")?;

        let config = ExtractConfig::new(&archive, dir.path().join("out"));
        config.validate()?;

        let missing = ExtractConfig::new(dir.path().join("nope.erf"), dir.path());
        assert!(matches!(missing.validate(), Err(ConfigError::ArchiveNotFound(_))));

        let onto_file = ExtractConfig::new(&archive, &archive);
        assert!(matches!(
            onto_file.validate(),
            Err(ConfigError::OutputNotDirectory(_))
        ));

        let bad_encoding = ExtractConfig {
            encoding: Some("klingon".into()),
            ..config
        };
        assert!(matches!(
            bad_encoding.validate(),
            Err(ConfigError::UnknownEncoding(_))
        ));
        Ok(())
    }

    #[test]
    fn test_scan_config_validate() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let config = ScanConfig {
            root: dir.path().to_path_buf(),
            jobs: 0,
            encoding: None,
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoWorkers)));
        ScanConfig { jobs: 2, ..config }.validate()?;
        Ok(())
    }

    #[test]
    fn test_resolve_encoding() {
        assert_eq!(resolve_encoding(None).unwrap(), encoding_rs::UTF_8);
        assert_eq!(
            resolve_encoding(Some("latin1")).unwrap(),
            encoding_rs::WINDOWS_1252
        );
        assert_eq!(
            resolve_encoding(Some(" cp1252 ")).unwrap(),
            encoding_rs::WINDOWS_1252
        );
    }

    #[test]
    fn test_options_from_config() {
        let mut config = ExtractConfig::new("a.erf", "out");
        config.kind = Some(ArchiveKind::Override);
        config.overwrite = false;
        let open = config.open_options().unwrap();
        assert_eq!(open.kind, Some(ArchiveKind::Override));
        assert_eq!(open.encoding, encoding_rs::UTF_8);
        assert!(!config.extract_options().overwrite);
    }
}

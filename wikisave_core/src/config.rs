//! Configuration for a managed document.

use crate::error::{Error, Result};
use chrono::format::{Item, StrftimeItems};
use std::path::{Path, PathBuf};

/// Default archive filename pattern (chrono strftime syntax, UTC).
pub const DEFAULT_ARCHIVE_FORMAT: &str = "%Y-%m-%d-%H-%M-%S%.3f.html";

/// Archive settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveConfig {
    /// Directory in which snapshots are kept.
    pub dir: PathBuf,
    /// Filename pattern formatted with the UTC time of the snapshot.
    pub format: String,
}

impl ArchiveConfig {
    /// Archive into `dir` using the default filename pattern.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            format: DEFAULT_ARCHIVE_FORMAT.to_string(),
        }
    }

    /// Override the filename pattern.
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }
}

/// Immutable configuration of the managed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiConfig {
    /// Path of the live document.
    pub document: PathBuf,
    /// Archiving settings; `None` disables archiving.
    pub archive: Option<ArchiveConfig>,
    /// Whether compressed variants are produced and served.
    pub compress: bool,
}

impl WikiConfig {
    /// Manage `document` with archiving and compression disabled.
    pub fn new(document: impl Into<PathBuf>) -> Self {
        Self {
            document: document.into(),
            archive: None,
            compress: false,
        }
    }

    /// Enable archiving.
    pub fn with_archive(mut self, archive: ArchiveConfig) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Enable or disable compressed variants.
    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Directory containing the document; staged uploads are created here so
    /// that promotion stays on one filesystem.
    pub fn document_dir(&self) -> &Path {
        parent_dir(&self.document)
    }

    /// Check the configuration for values that can never work.
    pub fn validate(&self) -> Result<()> {
        if self.document.as_os_str().is_empty() {
            return Err(Error::invalid_config("document path cannot be empty"));
        }

        if let Some(archive) = &self.archive {
            if archive.format.trim().is_empty() {
                return Err(Error::invalid_config("archive format cannot be empty"));
            }
            // Entries must land directly in the archive directory
            if archive.format.contains('/') || archive.format.contains('\\') {
                return Err(Error::invalid_config(format!(
                    "archive format {:?} must not contain path separators",
                    archive.format
                )));
            }
            if StrftimeItems::new(&archive.format).any(|item| matches!(item, Item::Error)) {
                return Err(Error::invalid_config(format!(
                    "archive format {:?} is not a valid time format",
                    archive.format
                )));
            }
        }

        Ok(())
    }
}

/// Directory containing `path`, with `.` for bare file names.
pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

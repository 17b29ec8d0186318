//! Timestamped snapshots of the document, taken before each overwrite.

use crate::config::ArchiveConfig;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

/// Upper bound on `.N` suffixes tried when snapshot names collide.
const MAX_NAME_SUFFIX: u32 = 1000;

/// Copies the live document into the archive directory.
///
/// Entries are only ever added. An entry is written to a temporary file first
/// and linked into place without replacing anything, so a partial or
/// overwritten entry is never visible.
#[derive(Debug, Clone)]
pub struct Archiver {
    dir: PathBuf,
    format: String,
}

impl Archiver {
    /// Create an archiver from its configuration.
    pub fn new(config: &ArchiveConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            format: config.format.clone(),
        }
    }

    /// The archive directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Entry name for a snapshot taken at `at`.
    pub fn entry_name(&self, at: DateTime<Utc>) -> Result<String> {
        let mut name = String::new();
        write!(name, "{}", at.format(&self.format)).map_err(|_| {
            Error::invalid_config(format!("cannot format archive name with {:?}", self.format))
        })?;
        Ok(name)
    }

    /// Snapshot `document` as it is now, naming the entry after `at`.
    ///
    /// If an entry with that name already exists, `.1`, `.2`, ... is appended.
    /// Returns the path of the new entry.
    pub fn snapshot(&self, document: &Path, at: DateTime<Utc>) -> Result<PathBuf> {
        let name = self.entry_name(at)?;
        let target = self.dir.join(&name);

        let temp = self
            .copy_to_temp(document)
            .map_err(|source| Error::archive(&target, source))?;
        let path = self.link_unique(temp, &name)?;

        info!(path = %path.display(), "archived document");
        Ok(path)
    }

    fn copy_to_temp(&self, document: &Path) -> io::Result<NamedTempFile> {
        fs::create_dir_all(&self.dir)?;

        let mut src = File::open(document)?;
        let mut temp = NamedTempFile::new_in(&self.dir)?;
        io::copy(&mut src, &mut temp)?;
        temp.as_file().sync_all()?;
        Ok(temp)
    }

    fn link_unique(&self, mut temp: NamedTempFile, name: &str) -> Result<PathBuf> {
        let mut candidate = self.dir.join(name);
        let mut suffix = 0;

        loop {
            match temp.persist_noclobber(&candidate) {
                Ok(_) => return Ok(candidate),
                Err(e)
                    if e.error.kind() == io::ErrorKind::AlreadyExists
                        && suffix < MAX_NAME_SUFFIX =>
                {
                    suffix += 1;
                    candidate = self.dir.join(format!("{}.{}", name, suffix));
                    temp = e.file;
                }
                Err(e) => return Err(Error::archive(&candidate, e.error)),
            }
        }
    }

    /// Names of all entries, oldest first.
    ///
    /// A missing archive directory has no entries.
    pub fn entries(&self) -> Result<Vec<String>> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            // Skip in-flight temporaries and anything that is not UTF-8
            match entry.file_name().into_string() {
                Ok(name) if !name.starts_with('.') => names.push(name),
                _ => continue,
            }
        }

        names.sort();
        Ok(names)
    }

    /// Open one entry by name.
    pub fn open_entry(&self, name: &str) -> Result<File> {
        let path = self.entry_path(name)?;
        let file = File::open(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::archive_entry_not_found(name)
            } else {
                e.into()
            }
        })?;

        if !file.metadata()?.is_file() {
            return Err(Error::archive_entry_not_found(name));
        }
        Ok(file)
    }

    /// Path to an entry. Names must be plain file names inside the archive.
    fn entry_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || name.starts_with('.')
            || name.contains('/')
            || name.contains('\\')
            || name.contains('\0')
        {
            return Err(Error::invalid_archive_name(name));
        }

        Ok(self.dir.join(name))
    }
}

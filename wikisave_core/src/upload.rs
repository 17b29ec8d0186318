//! Staging of uploaded documents.
//!
//! An upload is written to a private temporary file in the document's own
//! directory and fingerprinted on the way through. The temporary file is
//! removed on drop, so any path that abandons the upload cleans up after
//! itself. Promotion is a single rename onto the document path.

use crate::error::{Error, Result};
use crate::hash::{Fingerprint, HashingWriter};
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use tempfile::{NamedTempFile, TempPath};
use tracing::debug;

/// An upload being received.
pub struct Staging {
    writer: HashingWriter<NamedTempFile>,
}

impl Staging {
    /// Start staging into a new temporary file in `dir`.
    pub fn new_in(dir: &Path) -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(".upload-")
            .tempfile_in(dir)
            .map_err(Error::staging)?;
        Ok(Self {
            writer: HashingWriter::new(file),
        })
    }

    /// Stage everything `reader` yields.
    pub fn receive<R: Read>(dir: &Path, mut reader: R) -> Result<StagedUpload> {
        let mut staging = Self::new_in(dir)?;
        io::copy(&mut reader, &mut staging).map_err(Error::staging)?;
        staging.finish()
    }

    /// Bytes received so far.
    pub fn received(&self) -> u64 {
        self.writer.written()
    }

    /// Flush the upload to disk and hand it over for promotion.
    pub fn finish(self) -> Result<StagedUpload> {
        let (mut file, fingerprint, len) = self.writer.into_parts();
        file.flush().map_err(Error::staging)?;
        file.as_file().sync_all().map_err(Error::staging)?;

        debug!(bytes = len, %fingerprint, "upload staged");
        Ok(StagedUpload {
            temp: file.into_temp_path(),
            fingerprint,
            len,
        })
    }
}

impl Write for Staging {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// A fully received upload, ready to replace the document.
#[derive(Debug)]
pub struct StagedUpload {
    temp: TempPath,
    fingerprint: Fingerprint,
    len: u64,
}

impl StagedUpload {
    /// Fingerprint of the staged bytes.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Size of the staged bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the upload is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Location of the staging file.
    pub fn path(&self) -> &Path {
        &self.temp
    }

    /// Atomically rename the staged file onto `dest`.
    ///
    /// Readers see either the old file or the new one in full. An existing
    /// `dest` passes its permissions on to the new file. On failure the
    /// staging file is removed and `dest` is untouched.
    pub fn promote(self, dest: &Path) -> Result<()> {
        // Staging files are created owner-only
        match fs::metadata(dest) {
            Ok(metadata) => fs::set_permissions(&self.temp, metadata.permissions())
                .map_err(|e| Error::promote(dest, e))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::promote(dest, e)),
        }

        self.temp
            .persist(dest)
            .map_err(|e| Error::promote(dest, e.error))?;
        Ok(())
    }
}

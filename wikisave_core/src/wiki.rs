//! The managed document: startup, consistent reads and the save sequence.

use crate::archive::Archiver;
use crate::compress::{Compressor, Encoding, Variants};
use crate::config::WikiConfig;
use crate::error::{Error, Result};
use crate::hash::Fingerprint;
use crate::state::{Version, VersionState};
use crate::upload::{StagedUpload, Staging};
use chrono::Utc;
use std::fs::File;
use std::io::Read;
use std::time::SystemTime;
use tracing::{info, warn};

/// A single document with versioned, conditional saves.
///
/// Reads take the shared side of the version lock just long enough to open
/// the file. A save holds the exclusive side from the precondition check
/// until the new fingerprint is committed, covering archive, promotion and
/// compression.
#[derive(Debug)]
pub struct Wiki {
    config: WikiConfig,
    state: VersionState,
    archiver: Option<Archiver>,
    compressor: Option<Compressor>,
}

/// An open handle on the current document (or one of its variants), captured
/// together with the fingerprint it belongs to.
///
/// The file stays readable as this version even if a save renames a new
/// document into place afterwards.
#[derive(Debug)]
pub struct Current {
    /// Fingerprint of the document content.
    pub fingerprint: Fingerprint,
    /// Content coding of `file`, or `None` for the document itself.
    pub encoding: Option<Encoding>,
    /// The open file.
    pub file: File,
    /// Size of `file` in bytes.
    pub len: u64,
    /// Modification time of `file`, where the platform reports one.
    pub modified: Option<SystemTime>,
}

impl Wiki {
    /// Start managing the document described by `config`.
    ///
    /// The document must already exist; its fingerprint is computed and the
    /// compressed variants are generated.
    pub fn open(config: WikiConfig) -> Result<Self> {
        config.validate()?;

        let fingerprint = Fingerprint::of_file(&config.document).map_err(|e| match e {
            Error::Io { source } => Error::document_unavailable(&config.document, source),
            other => other,
        })?;

        let archiver = config.archive.as_ref().map(Archiver::new);
        let compressor = config
            .compress
            .then(|| Compressor::new(&config.document));
        let variants = compressor
            .as_ref()
            .map(Compressor::regenerate)
            .unwrap_or_default();

        info!(
            document = %config.document.display(),
            %fingerprint,
            ?variants,
            archive = ?archiver.as_ref().map(|a| a.dir().display().to_string()),
            "document opened"
        );

        Ok(Self {
            state: VersionState::new(Version::new(fingerprint).with_variants(variants)),
            config,
            archiver,
            compressor,
        })
    }

    /// The configuration this document was opened with.
    pub fn config(&self) -> &WikiConfig {
        &self.config
    }

    /// The archiver, when archiving is enabled.
    pub fn archiver(&self) -> Option<&Archiver> {
        self.archiver.as_ref()
    }

    /// The current version.
    pub fn current(&self) -> Version {
        self.state.current()
    }

    /// Whether compressed variants are produced.
    pub fn compresses(&self) -> bool {
        self.compressor.is_some()
    }

    /// Open the current document for reading.
    ///
    /// When compression is enabled and `accept_encoding` admits a valid
    /// variant, the variant is opened instead. The version lock is released
    /// before this returns; the caller streams from the handle without it.
    pub fn open_current(&self, accept_encoding: Option<&str>) -> Result<Current> {
        let version = self.state.read();

        let encoding = match (&self.compressor, accept_encoding) {
            (Some(_), Some(accept)) => Encoding::negotiate(accept, version.variants),
            _ => None,
        };

        let (file, encoding) = match encoding {
            Some(encoding) => {
                let path = encoding.variant_path(&self.config.document);
                match File::open(&path) {
                    Ok(file) => (file, Some(encoding)),
                    Err(e) => {
                        warn!(
                            path = %path.display(),
                            error = %e,
                            "variant unreadable, serving document"
                        );
                        (self.open_document()?, None)
                    }
                }
            }
            None => (self.open_document()?, None),
        };

        let metadata = file.metadata()?;
        Ok(Current {
            fingerprint: version.fingerprint,
            encoding,
            file,
            len: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }

    fn open_document(&self) -> Result<File> {
        File::open(&self.config.document)
            .map_err(|source| Error::document_unavailable(&self.config.document, source))
    }

    /// Begin staging an upload next to the document.
    pub fn staging(&self) -> Result<Staging> {
        Staging::new_in(self.config.document_dir())
    }

    /// Stage a whole upload from a reader.
    pub fn stage<R: Read>(&self, reader: R) -> Result<StagedUpload> {
        Staging::receive(self.config.document_dir(), reader)
    }

    /// Replace the document with a staged upload.
    ///
    /// `if_match` is the client's `If-Match` value. When present and
    /// non-empty it must name the current fingerprint (or be `*`), otherwise
    /// the save is refused with [`Error::PreconditionFailed`] and nothing
    /// changes. On success the archive gains an entry holding the previous
    /// content and the new fingerprint is returned.
    pub fn save(&self, upload: StagedUpload, if_match: Option<&str>) -> Result<Fingerprint> {
        let mut version = self.state.begin_write();

        if let Some(token) = if_match {
            if !precondition_holds(token, &version.fingerprint) {
                return Err(Error::precondition_failed(
                    token.trim(),
                    version.fingerprint.etag(),
                ));
            }
        }

        if let Some(archiver) = &self.archiver {
            archiver.snapshot(&self.config.document, Utc::now())?;
        }

        let fingerprint = upload.fingerprint();
        let len = upload.len();
        upload.promote(&self.config.document)?;

        let variants = match &self.compressor {
            Some(compressor) => compressor.regenerate(),
            None => Variants::none(),
        };

        version.commit(Version::new(fingerprint).with_variants(variants));
        info!(bytes = len, %fingerprint, ?variants, "document saved");

        Ok(fingerprint)
    }
}

/// Whether an `If-Match` header value admits a save over `current`.
///
/// An empty value is treated as absent. `*` matches any document, and a
/// comma-separated list matches if any member does.
pub fn precondition_holds(if_match: &str, current: &Fingerprint) -> bool {
    let if_match = if_match.trim();
    if if_match.is_empty() {
        return true;
    }

    if_match
        .split(',')
        .map(str::trim)
        .any(|token| token == "*" || current.matches(token))
}

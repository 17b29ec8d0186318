//! Error types for wikisave_core.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using wikisave_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while serving or saving the document.
///
/// Each stage of a save reports its own variant so callers can map the
/// outcome to a response without inspecting messages.
#[derive(Error, Debug)]
pub enum Error {
    /// The client's conditional token does not match the current fingerprint.
    #[error("Conflicting version (client: {client}, server: {current})")]
    PreconditionFailed { client: String, current: String },

    /// Receiving the upload into the staging file failed.
    #[error("Failed to stage upload: {source}")]
    Staging { source: io::Error },

    /// Copying the live document into the archive failed.
    #[error("Failed to archive document to {path}: {source}")]
    Archive { path: PathBuf, source: io::Error },

    /// Renaming the staged upload over the live document failed.
    #[error("Failed to replace document at {path}: {source}")]
    Promote { path: PathBuf, source: io::Error },

    /// Writing a compressed variant failed.
    #[error("Failed to compress document to {path}: {source}")]
    Compress { path: PathBuf, source: io::Error },

    /// The managed document could not be opened or read.
    #[error("Document unavailable at {path}: {source}")]
    DocumentUnavailable { path: PathBuf, source: io::Error },

    /// Configuration is invalid.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Archive entry name is not a plain file name.
    #[error("Invalid archive entry name: {name}")]
    InvalidArchiveName { name: String },

    /// Archive entry does not exist.
    #[error("Archive entry not found: {name}")]
    ArchiveEntryNotFound { name: String },

    /// I/O error occurred during file operations.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl Error {
    /// Create a PreconditionFailed error.
    pub fn precondition_failed(client: impl Into<String>, current: impl Into<String>) -> Self {
        Error::PreconditionFailed {
            client: client.into(),
            current: current.into(),
        }
    }

    /// Create a Staging error.
    pub fn staging(source: io::Error) -> Self {
        Error::Staging { source }
    }

    /// Create an Archive error.
    pub fn archive(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Archive {
            path: path.into(),
            source,
        }
    }

    /// Create a Promote error.
    pub fn promote(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Promote {
            path: path.into(),
            source,
        }
    }

    /// Create a Compress error.
    pub fn compress(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Compress {
            path: path.into(),
            source,
        }
    }

    /// Create a DocumentUnavailable error.
    pub fn document_unavailable(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::DocumentUnavailable {
            path: path.into(),
            source,
        }
    }

    /// Create an InvalidConfig error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Error::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create an InvalidArchiveName error.
    pub fn invalid_archive_name(name: impl Into<String>) -> Self {
        Error::InvalidArchiveName { name: name.into() }
    }

    /// Create an ArchiveEntryNotFound error.
    pub fn archive_entry_not_found(name: impl Into<String>) -> Self {
        Error::ArchiveEntryNotFound { name: name.into() }
    }

    /// Whether this is a client-side precondition failure rather than a fault.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::PreconditionFailed { .. })
    }
}

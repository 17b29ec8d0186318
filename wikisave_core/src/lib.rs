//! # Wikisave Core
//!
//! Versioned storage for a single document that is replaced wholesale by
//! clients, with optimistic concurrency.
//!
//! Every version of the document is identified by its BLAKE3 fingerprint,
//! which doubles as an HTTP strong validator. A save is only accepted if the
//! client names the current fingerprint (or names none at all), and it
//! replaces the document by atomic rename so readers never see a partial file.
//!
//! ## Features
//!
//! - Fingerprints computed while the upload streams to disk
//! - Conditional saves serialized behind one reader/writer lock
//! - Timestamped archive of every replaced version
//! - Precompressed gzip and zstd variants for cheap reads
//!
//! ## Example
//!
//! ```no_run
//! use wikisave_core::{ArchiveConfig, Wiki, WikiConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = WikiConfig::new("index.html")
//!     .with_archive(ArchiveConfig::new("old"))
//!     .with_compress(true);
//! let wiki = Wiki::open(config)?;
//!
//! // A client read the document at this version
//! let token = wiki.current().fingerprint.etag();
//!
//! // ...and later uploads its edited copy
//! let staged = wiki.stage(&b"<html>edited</html>"[..])?;
//! let fingerprint = wiki.save(staged, Some(&token))?;
//! println!("saved as {}", fingerprint);
//! # Ok(())
//! # }
//! ```

mod archive;
mod compress;
mod config;
mod error;
mod hash;
mod state;
mod upload;
mod wiki;

pub use archive::Archiver;
pub use compress::{Compressor, Encoding, Variants, ZSTD_LEVEL};
pub use config::{ArchiveConfig, DEFAULT_ARCHIVE_FORMAT, WikiConfig};
pub use error::{Error, Result};
pub use hash::{FINGERPRINT_SIZE, Fingerprint, HashingWriter};
pub use state::{ReadGuard, Version, VersionState, WriteGuard};
pub use upload::{StagedUpload, Staging};
pub use wiki::{Current, Wiki, precondition_holds};

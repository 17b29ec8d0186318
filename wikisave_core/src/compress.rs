//! Precompressed variants of the live document.
//!
//! Each variant sits next to the document (`index.html.gz`, `index.html.zst`)
//! and is rewritten atomically after every successful save.

use crate::config::parent_dir;
use crate::error::{Error, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// zstd level for variants. Levels above 19 grow the window past what
/// browsers are able to decode.
pub const ZSTD_LEVEL: i32 = 19;

/// A content coding for which a variant can be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// gzip (RFC 1952).
    Gzip,
    /// Zstandard (RFC 8878).
    Zstd,
}

impl Encoding {
    /// All encodings, in order of preference when a client rates them equally.
    pub const ALL: [Encoding; 2] = [Encoding::Zstd, Encoding::Gzip];

    /// The `Content-Encoding` token.
    pub fn token(&self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Zstd => "zstd",
        }
    }

    /// File extension of the variant, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Encoding::Gzip => "gz",
            Encoding::Zstd => "zst",
        }
    }

    /// Parse an `Accept-Encoding` coding name.
    pub fn parse(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("gzip") || token.eq_ignore_ascii_case("x-gzip") {
            Some(Encoding::Gzip)
        } else if token.eq_ignore_ascii_case("zstd") {
            Some(Encoding::Zstd)
        } else {
            None
        }
    }

    /// Path of this encoding's variant of `document`.
    pub fn variant_path(&self, document: &Path) -> PathBuf {
        let mut path = document.as_os_str().to_owned();
        path.push(".");
        path.push(self.extension());
        PathBuf::from(path)
    }

    /// Pick the variant to serve for an `Accept-Encoding` header value.
    ///
    /// Only encodings in `available` are considered. Returns `None` when the
    /// client accepts none of them, in which case the identity document is served.
    pub fn negotiate(accept_encoding: &str, available: Variants) -> Option<Encoding> {
        let mut best: Option<(Encoding, f32)> = None;
        for encoding in Encoding::ALL {
            if !available.contains(encoding) {
                continue;
            }
            let q = quality(accept_encoding, encoding);
            if q > 0.0 && best.is_none_or(|(_, best_q)| q > best_q) {
                best = Some((encoding, q));
            }
        }
        best.map(|(encoding, _)| encoding)
    }

    fn bit(self) -> u8 {
        match self {
            Encoding::Gzip => 0b01,
            Encoding::Zstd => 0b10,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Quality value the header assigns to `encoding`; 0 means not acceptable.
fn quality(accept_encoding: &str, encoding: Encoding) -> f32 {
    let mut explicit = None;
    let mut wildcard = 0.0;

    for member in accept_encoding.split(',') {
        let mut params = member.split(';');
        let coding = params.next().unwrap_or_default().trim();
        if coding.is_empty() {
            continue;
        }

        let q = match params.map(str::trim).find_map(|p| {
            p.strip_prefix("q=").or_else(|| p.strip_prefix("Q="))
        }) {
            Some(value) => match value.trim().parse::<f32>() {
                Ok(q) if (0.0..=1.0).contains(&q) => q,
                _ => continue,
            },
            None => 1.0,
        };

        if coding == "*" {
            wildcard = q;
        } else if Encoding::parse(coding) == Some(encoding) {
            explicit = Some(q);
        }
    }

    explicit.unwrap_or(wildcard)
}

/// Set of variants that are valid for the current document.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Variants(u8);

impl Variants {
    /// No variants.
    pub fn none() -> Self {
        Variants(0)
    }

    /// Every encoding.
    pub fn all() -> Self {
        Encoding::ALL.into_iter().collect()
    }

    /// Whether `encoding` is in the set.
    pub fn contains(&self, encoding: Encoding) -> bool {
        self.0 & encoding.bit() != 0
    }

    /// Add `encoding` to the set.
    pub fn insert(&mut self, encoding: Encoding) {
        self.0 |= encoding.bit();
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterate over the encodings in the set, in preference order.
    pub fn iter(&self) -> impl Iterator<Item = Encoding> {
        let variants = *self;
        Encoding::ALL.into_iter().filter(move |e| variants.contains(*e))
    }
}

impl FromIterator<Encoding> for Variants {
    fn from_iter<I: IntoIterator<Item = Encoding>>(iter: I) -> Self {
        let mut variants = Variants::none();
        for encoding in iter {
            variants.insert(encoding);
        }
        variants
    }
}

impl fmt::Debug for Variants {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Writes compressed variants of the document.
#[derive(Debug, Clone)]
pub struct Compressor {
    document: PathBuf,
}

impl Compressor {
    /// Create a compressor for the document at `document`.
    pub fn new(document: impl Into<PathBuf>) -> Self {
        Self {
            document: document.into(),
        }
    }

    /// Rewrite every variant from the live document.
    ///
    /// A variant that cannot be written is removed and left out of the
    /// returned set, so it is never served for the new content.
    pub fn regenerate(&self) -> Variants {
        let mut variants = Variants::none();
        for encoding in Encoding::ALL {
            match self.write_variant(encoding) {
                Ok(()) => variants.insert(encoding),
                Err(e) => {
                    warn!(%encoding, error = %e, "compressed variant disabled for this version");
                    self.discard(encoding);
                }
            }
        }
        variants
    }

    /// Compress the live document into one variant file, atomically.
    pub fn write_variant(&self, encoding: Encoding) -> Result<()> {
        let dest = encoding.variant_path(&self.document);
        debug!(%encoding, path = %dest.display(), "compressing document");

        self.write_variant_to(encoding, &dest)
            .map_err(|source| Error::compress(&dest, source))
    }

    fn write_variant_to(&self, encoding: Encoding, dest: &Path) -> io::Result<()> {
        let mut src = File::open(&self.document)?;
        let temp = NamedTempFile::new_in(parent_dir(dest))?;

        let temp = match encoding {
            Encoding::Gzip => {
                let mut encoder = GzEncoder::new(temp, Compression::best());
                io::copy(&mut src, &mut encoder)?;
                encoder.finish()?
            }
            Encoding::Zstd => {
                let mut encoder = zstd::Encoder::new(temp, ZSTD_LEVEL)?;
                io::copy(&mut src, &mut encoder)?;
                encoder.finish()?
            }
        };

        temp.as_file().sync_all()?;
        temp.persist(dest)?;
        Ok(())
    }

    fn discard(&self, encoding: Encoding) {
        let path = encoding.variant_path(&self.document);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove stale variant"),
        }
    }
}

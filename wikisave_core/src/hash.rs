//! Document fingerprints using BLAKE3.

use crate::error::Result;
use std::fmt;
use std::io::{self, Read, Write};
use std::path::Path;

/// Fingerprint digest size in bytes (BLAKE3 produces 256-bit hashes).
pub const FINGERPRINT_SIZE: usize = 32;

/// A 32-byte BLAKE3 digest of the document content.
///
/// Rendered externally as a quoted lowercase hex string, which makes it usable
/// directly as an HTTP strong validator (`ETag`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_SIZE]);

impl Fingerprint {
    /// Parse a quoted token (`"<64 hex chars>"`) as produced by [`Fingerprint::etag`].
    ///
    /// Returns `None` for anything that is not exactly that form, including
    /// uppercase hex: validators compare byte for byte.
    pub fn parse_etag(token: &str) -> Option<Self> {
        let hex_str = token.strip_prefix('"')?.strip_suffix('"')?;
        if hex_str.len() != FINGERPRINT_SIZE * 2
            || !hex_str.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return None;
        }

        let mut bytes = [0u8; FINGERPRINT_SIZE];
        hex::decode_to_slice(hex_str, &mut bytes).ok()?;
        Some(Fingerprint(bytes))
    }

    /// Convert to hex string (64 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The externally visible version token: hex digest wrapped in double quotes.
    pub fn etag(&self) -> String {
        format!("\"{}\"", self.to_hex())
    }

    /// Whether a client-supplied token names exactly this fingerprint.
    pub fn matches(&self, token: &str) -> bool {
        Self::parse_etag(token) == Some(*self)
    }

    /// Fingerprint raw bytes.
    pub fn of_bytes(data: &[u8]) -> Self {
        Fingerprint(*blake3::hash(data).as_bytes())
    }

    /// Fingerprint data from a reader.
    pub fn of_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut hasher = blake3::Hasher::new();
        io::copy(&mut reader, &mut hasher)?;
        Ok(Fingerprint(*hasher.finalize().as_bytes()))
    }

    /// Fingerprint a file.
    pub fn of_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::of_reader(file)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

/// Writer adapter that fingerprints everything passing through it.
///
/// Lets an upload be hashed while it is streamed to storage, in one pass.
pub struct HashingWriter<W> {
    inner: W,
    hasher: blake3::Hasher,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    /// Wrap a writer.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: blake3::Hasher::new(),
            written: 0,
        }
    }

    /// Number of bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Finish hashing, returning the inner writer, the fingerprint and the byte count.
    pub fn into_parts(self) -> (W, Fingerprint, u64) {
        let fingerprint = Fingerprint(*self.hasher.finalize().as_bytes());
        (self.inner, fingerprint, self.written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        // Only hash what actually reached the inner writer
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_hello_world() {
        let fp = Fingerprint::of_bytes(b"hello world");

        // BLAKE3 of "hello world"
        assert_eq!(
            fp.to_hex(),
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
    }

    #[test]
    fn test_etag_is_quoted_lowercase_hex() {
        let etag = Fingerprint::of_bytes(b"v1").etag();
        assert_eq!(etag.len(), FINGERPRINT_SIZE * 2 + 2);
        assert!(etag.starts_with('"') && etag.ends_with('"'));
        assert!(
            etag[1..etag.len() - 1]
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        );
    }

    #[test]
    fn test_display_matches_etag() {
        let fp = Fingerprint::of_bytes(b"v1");
        assert_eq!(fp.to_string(), fp.etag());
    }

    #[test]
    fn test_parse_etag() {
        let fp = Fingerprint::of_bytes(b"test data");
        assert_eq!(Fingerprint::parse_etag(&fp.etag()), Some(fp));

        // Unquoted, wrong length and non-hex forms are rejected
        assert_eq!(Fingerprint::parse_etag(&fp.to_hex()), None);
        assert_eq!(Fingerprint::parse_etag("\"abcd\""), None);
        assert_eq!(Fingerprint::parse_etag(&fp.etag().to_uppercase()), None);
        assert_eq!(Fingerprint::parse_etag(&format!("\"{}\"", "z".repeat(64))), None);
        assert_eq!(Fingerprint::parse_etag(""), None);
    }

    #[test]
    fn test_matches_requires_exact_token() {
        let fp = Fingerprint::of_bytes(b"v1");
        assert!(fp.matches(&fp.etag()));
        assert!(!fp.matches(&fp.to_hex()));
        assert!(!fp.matches(&format!("W/{}", fp.etag())));
        assert!(!fp.matches(&format!(" {}", fp.etag())));
        assert!(!fp.matches(&fp.etag().to_uppercase()));
        assert!(!fp.matches(&Fingerprint::of_bytes(b"v2").etag()));
    }

    #[test]
    fn test_of_reader_matches_of_bytes() {
        let data = b"some document content".repeat(1000);
        let from_reader = Fingerprint::of_reader(&data[..]).unwrap();
        assert_eq!(from_reader, Fingerprint::of_bytes(&data));
    }

    #[test]
    fn test_hashing_writer_tees() {
        let mut writer = HashingWriter::new(Vec::new());
        writer.write_all(b"hello ").unwrap();
        writer.write_all(b"world").unwrap();
        assert_eq!(writer.written(), 11);

        let (inner, fp, written) = writer.into_parts();
        assert_eq!(inner, b"hello world");
        assert_eq!(written, 11);
        assert_eq!(fp, Fingerprint::of_bytes(b"hello world"));
    }

    // Property-based tests
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            max_shrink_iters: 10000,
            ..ProptestConfig::default()
        })]

        /// Hashing the same data always produces the same fingerprint
        #[test]
        fn prop_fingerprint_deterministic(data: Vec<u8>) {
            prop_assert_eq!(Fingerprint::of_bytes(&data), Fingerprint::of_bytes(&data));
        }

        /// Flipping any single byte changes the fingerprint
        #[test]
        fn prop_single_byte_change_detected(
            data in prop::collection::vec(any::<u8>(), 1..4096),
            index: prop::sample::Index,
            flip in 1u8..=255,
        ) {
            let mut changed = data.clone();
            let i = index.index(changed.len());
            changed[i] ^= flip;
            prop_assert_ne!(Fingerprint::of_bytes(&data), Fingerprint::of_bytes(&changed));
        }

        /// Streaming through HashingWriter agrees with hashing the whole buffer
        #[test]
        fn prop_hashing_writer_agrees(chunks in prop::collection::vec(
            prop::collection::vec(any::<u8>(), 0..512), 0..16)
        ) {
            let mut writer = HashingWriter::new(Vec::new());
            for chunk in &chunks {
                writer.write_all(chunk)?;
            }
            let (inner, fp, written) = writer.into_parts();
            prop_assert_eq!(written as usize, inner.len());
            prop_assert_eq!(fp, Fingerprint::of_bytes(&inner));
        }
    }
}

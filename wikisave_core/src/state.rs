//! Version state: the authoritative fingerprint behind a single reader/writer lock.
//!
//! Readers take the shared side to obtain a consistent view of the current
//! version while they open the document. A save takes the exclusive side for
//! its whole archive/promote/compress/commit sequence, so no reader can pair
//! the new bytes with the old fingerprint or the other way around.

use crate::compress::Variants;
use crate::hash::Fingerprint;
use std::ops::Deref;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// The current version of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    /// Fingerprint of the live document bytes.
    pub fingerprint: Fingerprint,
    /// Compressed variants that were generated from exactly these bytes.
    pub variants: Variants,
}

impl Version {
    /// A version with no compressed variants.
    pub fn new(fingerprint: Fingerprint) -> Self {
        Self {
            fingerprint,
            variants: Variants::none(),
        }
    }

    /// Attach the set of valid compressed variants.
    pub fn with_variants(mut self, variants: Variants) -> Self {
        self.variants = variants;
        self
    }
}

/// Holder of the current [`Version`].
#[derive(Debug)]
pub struct VersionState {
    inner: RwLock<Version>,
}

impl VersionState {
    /// Create the state for an initial version.
    pub fn new(version: Version) -> Self {
        Self {
            inner: RwLock::new(version),
        }
    }

    /// Acquire shared access. Any number of readers may hold it at once.
    pub fn read(&self) -> ReadGuard<'_> {
        // The version is replaced by a single assignment, so a panic elsewhere
        // cannot leave it torn.
        ReadGuard(self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Acquire exclusive access, excluding all readers and other writers until
    /// the returned guard is dropped.
    pub fn begin_write(&self) -> WriteGuard<'_> {
        WriteGuard(self.inner.write().unwrap_or_else(PoisonError::into_inner))
    }

    /// Copy of the current version.
    pub fn current(&self) -> Version {
        *self.read()
    }
}

/// Shared access to the current version.
pub struct ReadGuard<'a>(RwLockReadGuard<'a, Version>);

impl Deref for ReadGuard<'_> {
    type Target = Version;

    fn deref(&self) -> &Version {
        &self.0
    }
}

/// Exclusive access to the current version. Released on drop.
pub struct WriteGuard<'a>(RwLockWriteGuard<'a, Version>);

impl WriteGuard<'_> {
    /// Publish a new version. Only reachable while exclusive access is held.
    pub fn commit(&mut self, version: Version) {
        *self.0 = version;
    }
}

impl Deref for WriteGuard<'_> {
    type Target = Version;

    fn deref(&self) -> &Version {
        &self.0
    }
}

//! Checksum-decorating part streams.
//!
//! [`ChecksumPartStreams`] wraps any [`PartStreams`] and runs a SHA-256
//! digest and a byte counter over each side: the bytes the decoder wrote and
//! the bytes the consumer read back. Comparing the two (and both against a
//! digest computed by the producer) verifies that a part survived decoding
//! and storage byte for byte.

use std::io::Read;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::context::MultipartContext;
use crate::headers::Headers;
use crate::part_streams::{PartSink, PartSource, PartStreams, PartStreamsFactory};

/// Hex-encoded SHA-256 of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[derive(Debug, Clone, Default)]
struct DigestCounter {
    hasher: Sha256,
    bytes: u64,
}

impl DigestCounter {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes = self
            .bytes
            .saturating_add(u64::try_from(data.len()).unwrap_or(u64::MAX));
    }

    fn hex(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }
}

struct DigestReader<'a> {
    inner: Box<dyn Read + 'a>,
    counter: &'a mut DigestCounter,
}

impl Read for DigestReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.counter.update(&buf[..n]);
        Ok(n)
    }
}

/// Digests and byte counts of both sides of a part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecksumSummary {
    /// SHA-256 of the bytes written by the decoder.
    pub written_digest: String,
    /// Number of bytes written by the decoder.
    pub written_bytes: u64,
    /// SHA-256 of the bytes read back by the consumer.
    pub read_digest: String,
    /// Number of bytes read back by the consumer.
    pub read_bytes: u64,
}

impl ChecksumSummary {
    /// Returns true when both sides saw exactly the same bytes.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.written_bytes == self.read_bytes && self.written_digest == self.read_digest
    }
}

/// Part streams with a running digest on each side.
#[derive(Debug)]
pub struct ChecksumPartStreams<S> {
    inner: S,
    written: DigestCounter,
    read: DigestCounter,
}

impl<S> ChecksumPartStreams<S> {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            written: DigestCounter::default(),
            read: DigestCounter::default(),
        }
    }

    /// Hex SHA-256 of everything written so far.
    #[must_use]
    pub fn written_digest(&self) -> String {
        self.written.hex()
    }

    /// Bytes written so far.
    #[must_use]
    pub fn written_bytes(&self) -> u64 {
        self.written.bytes
    }

    /// Hex SHA-256 of everything read through [`PartSource::source`] so far.
    #[must_use]
    pub fn read_digest(&self) -> String {
        self.read.hex()
    }

    /// Bytes read so far.
    #[must_use]
    pub fn read_bytes(&self) -> u64 {
        self.read.bytes
    }

    /// Both sides at once.
    #[must_use]
    pub fn summary(&self) -> ChecksumSummary {
        ChecksumSummary {
            written_digest: self.written_digest(),
            written_bytes: self.written_bytes(),
            read_digest: self.read_digest(),
            read_bytes: self.read_bytes(),
        }
    }

    /// The wrapped streams.
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Unwrap, discarding the digests.
    #[must_use]
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: PartSink> PartSink for ChecksumPartStreams<S> {
    fn write_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.inner.write_bytes(bytes)?;
        self.written.update(bytes);
        Ok(())
    }

    fn finish(&mut self) -> std::io::Result<()> {
        self.inner.finish()
    }
}

impl<S: PartSource> PartSource for ChecksumPartStreams<S> {
    fn source(&mut self) -> std::io::Result<Box<dyn Read + '_>> {
        let inner = self.inner.source()?;
        Ok(Box::new(DigestReader {
            inner,
            counter: &mut self.read,
        }))
    }
}

/// Wraps the streams of another factory in [`ChecksumPartStreams`].
#[derive(Debug, Clone, Default)]
pub struct ChecksumPartStreamsFactory<F> {
    inner: F,
}

impl<F> ChecksumPartStreamsFactory<F> {
    /// Decorate `inner`.
    #[must_use]
    pub fn new(inner: F) -> Self {
        Self { inner }
    }

    /// The decorated factory.
    #[must_use]
    pub fn inner(&self) -> &F {
        &self.inner
    }
}

impl<F: PartStreamsFactory> PartStreamsFactory for ChecksumPartStreamsFactory<F> {
    type Streams = ChecksumPartStreams<F::Streams>;

    fn new_part_streams(
        &mut self,
        context: &MultipartContext,
        headers: &Headers,
        is_form_field: bool,
    ) -> std::io::Result<Self::Streams> {
        self.inner
            .new_part_streams(context, headers, is_form_field)
            .map(ChecksumPartStreams::new)
    }
}

// Compile-time check that the decorator composes with itself.
const _: fn() = || {
    fn assert_streams<S: PartStreams>() {}
    assert_streams::<ChecksumPartStreams<ChecksumPartStreams<crate::SpooledPartStreams>>>();
};

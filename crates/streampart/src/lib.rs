//! Streaming multipart decoding for non-blocking servers.
//!
//! streampart decodes `multipart/*` request bodies as the bytes arrive:
//!
//! - **Push parsing** — feed chunks of any size; a boundary may be split anywhere
//! - **Pluggable storage** — parts go to memory or spool to disk via a factory
//! - **Nested multipart** — `multipart/mixed` parts are decoded in place
//! - **End-to-end checksums** — SHA-256 over the bytes written and read back
//!
//! # Quick Start
//!
//! ```
//! use streampart::prelude::*;
//!
//! let ctx = MultipartContext::new("multipart/form-data; boundary=XYZ", None, None)?;
//! let mut decoder = new_decoder(ctx, Vec::<MultipartEvent<SpooledPartStreams>>::new())
//!     .with_spool_threshold(Some(1024 * 1024))
//!     .build()?;
//!
//! decoder.feed(b"--XYZ\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\r\n")?;
//! decoder.feed(b"HELLO\r\n--XYZ--\r\n")?;
//! decoder.close()?;
//!
//! for event in decoder.into_listener() {
//!     if let MultipartEvent::PartReady { mut streams, .. } = event {
//!         assert_eq!(streams.bytes()?, b"HELLO");
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Crate Structure
//!
//! - [`streampart_core`] — decoder, listener protocol, part streams and checksums

#![forbid(unsafe_code)]

use std::io::Read;

pub use streampart_core as core;

pub use streampart_core::{
    ChecksumPartStreams, ChecksumPartStreamsFactory, ChecksumSummary, DecoderBuilder,
    DecoderConfig, DecoderState, DefaultPartStreamsFactory, ErrorKind, Headers, ListenerError,
    MultipartContext, MultipartDecoder, MultipartError, MultipartEvent, MultipartListener,
    PartHeaders, PartSink, PartSource, PartStreams, PartStreamsFactory, SpooledPartStreams,
    boundary_param, is_multipart, new_decoder,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        ChecksumPartStreams, DecoderConfig, Headers, MultipartContext, MultipartDecoder,
        MultipartError, MultipartEvent, MultipartListener, PartHeaders, PartSink, PartSource,
        PartStreamsFactory, ReadIntoDecoder, SpooledPartStreams, new_decoder,
    };
}

/// Buffer size used by [`ReadIntoDecoder::feed_from`].
pub const DEFAULT_READ_CHUNK: usize = 8 * 1024;

/// Extension trait for draining a blocking reader into a decoder.
pub trait ReadIntoDecoder {
    /// Feed everything `reader` yields, in chunks of at most `chunk_size`
    /// bytes, then close the decoder.
    ///
    /// Returns the number of bytes fed.
    ///
    /// # Errors
    ///
    /// Returns [`MultipartError::Io`] if reading fails, and whatever `feed`
    /// or `close` return otherwise. Protocol errors still go to the
    /// listener's `on_error`.
    fn feed_from<R: Read>(&mut self, reader: R, chunk_size: usize) -> Result<u64, MultipartError>;
}

impl<F, L> ReadIntoDecoder for MultipartDecoder<F, L>
where
    F: PartStreamsFactory,
    L: MultipartListener<F::Streams>,
{
    fn feed_from<R: Read>(
        &mut self,
        mut reader: R,
        chunk_size: usize,
    ) -> Result<u64, MultipartError> {
        let mut buf = vec![0u8; chunk_size.max(1)];
        let mut total = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(MultipartError::Io(e)),
            };
            self.feed(&buf[..n])?;
            total = total.saturating_add(n as u64);
        }
        self.close()?;
        Ok(total)
    }
}

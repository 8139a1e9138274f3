//! Core of streampart: a non-blocking, incremental multipart decoder.
//!
//! This crate provides:
//! - [`MultipartDecoder`], a push parser fed with arbitrary chunks of a
//!   `multipart/*` body
//! - [`MultipartListener`], the synchronous event protocol parts are
//!   delivered through
//! - [`PartStreamsFactory`] and the [`PartSink`]/[`PartSource`] pair that
//!   decide where part bodies are stored
//! - [`ChecksumPartStreamsFactory`] for end-to-end SHA-256 verification
//!
//! # Design Principles
//!
//! - Never blocks: every `feed` call consumes all of its input and returns
//! - Chunk boundaries are invisible to the listener
//! - Nested multipart bodies use an explicit boundary stack
//! - Protocol failures are reported once through `on_error`, then the
//!   session is terminal
//!
//! # Example
//!
//! ```
//! use streampart_core::{MultipartContext, MultipartEvent, SpooledPartStreams, new_decoder};
//!
//! let ctx = MultipartContext::new("multipart/form-data; boundary=XYZ", None, None)?;
//! let mut decoder = new_decoder(ctx, Vec::<MultipartEvent<SpooledPartStreams>>::new()).build()?;
//!
//! decoder.feed(b"--XYZ\r\nContent-Disposition: form-data; name=\"greeting\"\r\n\r\n")?;
//! decoder.feed(b"hello\r\n--XYZ--\r\n")?;
//! decoder.close()?;
//!
//! match &decoder.listener()[0] {
//!     MultipartEvent::FormFieldPartReady { field_name, value, .. } => {
//!         assert_eq!(field_name, "greeting");
//!         assert_eq!(value, "hello");
//!     }
//!     other => panic!("unexpected event {other:?}"),
//! }
//! # Ok::<(), streampart_core::MultipartError>(())
//! ```

#![forbid(unsafe_code)]

mod boundary;
mod builder;
pub mod checksum;
pub mod config;
mod context;
mod decoder;
pub mod error;
mod headers;
mod listener;
pub mod part_streams;

pub use boundary::{BoundaryContext, BoundaryStack};
pub use builder::{DecoderBuilder, new_decoder};
pub use checksum::{
    ChecksumPartStreams, ChecksumPartStreamsFactory, ChecksumSummary, sha256_hex,
};
pub use config::{DEFAULT_MAX_FORM_FIELD_SIZE, DEFAULT_MAX_HEADERS_SIZE, DecoderConfig};
pub use context::{
    MAX_BOUNDARY_LEN, MultipartContext, boundary_param, is_multipart, validate_boundary,
};
pub use decoder::{DecoderState, MultipartDecoder};
pub use error::{ErrorKind, ListenerError, MultipartError};
pub use headers::{Headers, PartHeaders, parse_headers};
pub use listener::{MultipartEvent, MultipartListener};
pub use part_streams::{
    DEFAULT_SPOOL_THRESHOLD, DefaultPartStreamsFactory, PartSink, PartSource, PartStreams,
    PartStreamsFactory, SpooledPartStreams,
};

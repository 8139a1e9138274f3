//! Fluent construction of a [`MultipartDecoder`].
//!
//! ```
//! use streampart_core::{
//!     ChecksumPartStreams, MultipartContext, MultipartEvent, SpooledPartStreams, new_decoder,
//! };
//!
//! let ctx = MultipartContext::new("multipart/form-data; boundary=XYZ", None, None)?;
//! let events: Vec<MultipartEvent<ChecksumPartStreams<SpooledPartStreams>>> = Vec::new();
//! let mut decoder = new_decoder(ctx, events)
//!     .with_max_form_field_size(64 * 1024)
//!     .with_checksums()
//!     .build()?;
//! decoder.feed(b"--XYZ--\r\n")?;
//! decoder.close()?;
//! assert_eq!(decoder.listener().len(), 1);
//! # Ok::<(), streampart_core::MultipartError>(())
//! ```

use std::path::PathBuf;

use crate::checksum::ChecksumPartStreamsFactory;
use crate::config::DecoderConfig;
use crate::context::{MultipartContext, boundary_param};
use crate::decoder::MultipartDecoder;
use crate::error::MultipartError;
use crate::listener::MultipartListener;
use crate::part_streams::{DefaultPartStreamsFactory, PartStreamsFactory};

/// Start building a decoder for `context` that reports to `listener`.
///
/// The boundary is taken from the context's content type unless
/// [`with_boundary`](DecoderBuilder::with_boundary) overrides it, and parts
/// are stored by a [`DefaultPartStreamsFactory`].
pub fn new_decoder<L>(
    context: MultipartContext,
    listener: L,
) -> DecoderBuilder<DefaultPartStreamsFactory, L> {
    DecoderBuilder {
        context,
        listener,
        factory: DefaultPartStreamsFactory::default(),
        boundary: None,
        config: DecoderConfig::default(),
    }
}

/// Builder returned by [`new_decoder`].
#[derive(Debug)]
#[must_use = "a builder does nothing until `build` is called"]
pub struct DecoderBuilder<F, L> {
    context: MultipartContext,
    listener: L,
    factory: F,
    boundary: Option<String>,
    config: DecoderConfig,
}

impl<F, L> DecoderBuilder<F, L> {
    /// Use `boundary` instead of the content type's `boundary` parameter.
    pub fn with_boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = Some(boundary.into());
        self
    }

    /// Replace all limits at once.
    pub fn with_config(mut self, config: DecoderConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum size of one part's header section.
    pub fn with_max_headers_size(mut self, size: usize) -> Self {
        self.config = self.config.max_headers_size(size);
        self
    }

    /// Set the maximum size of a buffered form field value.
    pub fn with_max_form_field_size(mut self, size: usize) -> Self {
        self.config = self.config.max_form_field_size(size);
        self
    }

    /// Store parts with a custom factory.
    pub fn with_part_streams_factory<G>(self, factory: G) -> DecoderBuilder<G, L> {
        DecoderBuilder {
            context: self.context,
            listener: self.listener,
            factory,
            boundary: self.boundary,
            config: self.config,
        }
    }

    /// Wrap the current factory so every part carries SHA-256 digests of
    /// the bytes written and read.
    pub fn with_checksums(self) -> DecoderBuilder<ChecksumPartStreamsFactory<F>, L> {
        DecoderBuilder {
            factory: ChecksumPartStreamsFactory::new(self.factory),
            context: self.context,
            listener: self.listener,
            boundary: self.boundary,
            config: self.config,
        }
    }

    /// The configuration the decoder will be built with.
    #[must_use]
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }
}

impl<L> DecoderBuilder<DefaultPartStreamsFactory, L> {
    /// Spool file parts larger than `threshold` bytes to disk (`None` keeps
    /// everything in memory).
    pub fn with_spool_threshold(mut self, threshold: Option<usize>) -> Self {
        self.factory = self.factory.spool_threshold(threshold);
        self
    }

    /// Create spooled temporary files in `dir`.
    pub fn save_temporary_files_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.factory = self.factory.temp_dir(dir);
        self
    }
}

impl<F, L> DecoderBuilder<F, L>
where
    F: PartStreamsFactory,
    L: MultipartListener<F::Streams>,
{
    /// Build the decoder.
    ///
    /// # Errors
    ///
    /// Returns [`MultipartError::MissingBoundary`] if no boundary was given
    /// and the content type has none, or
    /// [`MultipartError::InvalidBoundary`] if it is out of range.
    pub fn build(self) -> Result<MultipartDecoder<F, L>, MultipartError> {
        let boundary = match self.boundary {
            Some(boundary) => boundary,
            None => boundary_param(self.context.content_type())
                .ok_or(MultipartError::MissingBoundary)?,
        };
        MultipartDecoder::new(
            self.context,
            &boundary,
            self.factory,
            self.listener,
            self.config,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumPartStreams;
    use crate::error::ErrorKind;
    use crate::listener::MultipartEvent;
    use crate::part_streams::{PartSource, SpooledPartStreams};
    use std::io::Read;

    fn ctx(content_type: &str) -> MultipartContext {
        MultipartContext::new(content_type, None, None).unwrap()
    }

    #[test]
    fn boundary_from_content_type() {
        let mut decoder = new_decoder(
            ctx("multipart/form-data; boundary=\"abc\""),
            Vec::<MultipartEvent<SpooledPartStreams>>::new(),
        )
        .build()
        .unwrap();
        decoder.feed(b"--abc--").unwrap();
        decoder.close().unwrap();
        assert_eq!(decoder.listener().len(), 1);
    }

    #[test]
    fn explicit_boundary_overrides() {
        let mut decoder = new_decoder(
            ctx("multipart/form-data; boundary=abc"),
            Vec::<MultipartEvent<SpooledPartStreams>>::new(),
        )
        .with_boundary("other")
        .build()
        .unwrap();
        decoder.feed(b"--other--").unwrap();
        assert_eq!(decoder.listener()[0].name(), "all_parts_finished");
    }

    #[test]
    fn missing_boundary() {
        let err = new_decoder(
            ctx("multipart/form-data"),
            Vec::<MultipartEvent<SpooledPartStreams>>::new(),
        )
        .build()
        .unwrap_err();
        assert!(matches!(err, MultipartError::MissingBoundary));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn limits_flow_into_config() {
        let builder = new_decoder(
            ctx("multipart/form-data; boundary=abc"),
            Vec::<MultipartEvent<SpooledPartStreams>>::new(),
        )
        .with_max_headers_size(128)
        .with_max_form_field_size(256);
        assert_eq!(builder.config().get_max_headers_size(), 128);
        assert_eq!(builder.config().get_max_form_field_size(), 256);

        let decoder = builder
            .with_config(DecoderConfig::default())
            .build()
            .unwrap();
        assert_eq!(decoder.config(), &DecoderConfig::default());
    }

    #[test]
    fn checksummed_spooled_file_part() {
        let dir = std::env::temp_dir();
        let body: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let mut payload = b"--abc\r\nContent-Disposition: form-data; name=\"f\"; filename=\"f.bin\"\r\n\r\n".to_vec();
        payload.extend_from_slice(&body);
        payload.extend_from_slice(b"\r\n--abc--\r\n");

        let mut decoder = new_decoder(
            ctx("multipart/form-data; boundary=abc"),
            Vec::<MultipartEvent<ChecksumPartStreams<SpooledPartStreams>>>::new(),
        )
        .with_spool_threshold(Some(1024))
        .save_temporary_files_to(&dir)
        .with_checksums()
        .build()
        .unwrap();
        assert_eq!(decoder.factory().inner().get_temp_dir(), dir.as_path());

        decoder.feed(&payload).unwrap();
        decoder.close().unwrap();

        let mut events = decoder.into_listener().into_iter();
        let Some(MultipartEvent::PartReady { mut streams, .. }) = events.next() else {
            panic!("expected a file part");
        };
        assert!(streams.inner().is_spooled());
        assert_eq!(streams.written_digest(), crate::checksum::sha256_hex(&body));

        let mut out = Vec::new();
        streams.source().unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, body);
        assert!(streams.summary().is_consistent());
    }
}

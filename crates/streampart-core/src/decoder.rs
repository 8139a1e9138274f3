//! The incremental multipart decoder.
//!
//! [`MultipartDecoder`] is a push parser: the caller hands it chunks of the
//! request body as they arrive and it drives a [`MultipartListener`] from
//! inside [`feed`](MultipartDecoder::feed). Chunks may be any size, and a
//! delimiter, its trailing dashes or CRLF may be split across any number of
//! calls.
//!
//! # State machine
//!
//! ```text
//! SkipPreamble --delimiter--> Delimiter --CRLF--> Headers --blank line--> Body
//!                                 ^   |                |                    |
//!                                 |   |                '--multipart part--> SkipPreamble (depth + 1)
//!                                 |   '--"--"--> CloseDelimiter
//!                                 |                  |--inner level--> Body (inner epilogue)
//!                                 |                  '--outer level--> Epilogue
//!                                 '--------------delimiter-------------------'
//! ```
//!
//! Nested multipart bodies push a new boundary onto an explicit
//! [`BoundaryStack`]; no recursion is involved.
//!
//! # Errors
//!
//! Protocol, limit and resource failures are reported once through
//! [`MultipartListener::on_error`] and leave the decoder in
//! [`DecoderState::Error`]. `feed` itself only fails for misuse (after
//! `close` or after an error) and when a listener callback fails.

use std::io::Read;

use crate::boundary::{BoundaryStack, Scan};
use crate::config::DecoderConfig;
use crate::context::{MultipartContext, validate_boundary};
use crate::error::MultipartError;
use crate::headers::{Headers, PartHeaders, decode_text, parse_headers};
use crate::listener::MultipartListener;
use crate::part_streams::{PartSink, PartSource, PartStreamsFactory};

const CRLF: &[u8] = b"\r\n";

/// Where the decoder is within the multipart body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecoderState {
    /// Discarding bytes before the first delimiter of the current level.
    SkipPreamble,
    /// Collecting a part's header section.
    Headers,
    /// Streaming a part's body.
    Body,
    /// A delimiter was matched; expecting CRLF or `--`.
    Delimiter,
    /// Saw the first `-` of a close delimiter.
    CloseDelimiter,
    /// The outermost close delimiter was seen; remaining input is ignored.
    Epilogue,
    /// Decoding failed. Terminal.
    Error,
    /// Closed after a complete body. Terminal.
    Done,
}

impl DecoderState {
    /// Upper-case name used in logs and error messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SkipPreamble => "SKIP_PREAMBLE",
            Self::Headers => "HEADERS",
            Self::Body => "BODY",
            Self::Delimiter => "DELIMITER",
            Self::CloseDelimiter => "CLOSE_DELIMITER",
            Self::Epilogue => "EPILOGUE",
            Self::Error => "ERROR",
            Self::Done => "DONE",
        }
    }

    /// Returns true for states no input can leave.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Error | Self::Done)
    }
}

impl std::fmt::Display for DecoderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The part currently receiving body bytes.
struct ActivePart<S> {
    streams: S,
    headers: Headers,
    field_name: Option<String>,
    charset: Option<String>,
    form_field: bool,
    written: usize,
}

/// Incremental decoder for one multipart request body.
///
/// `F` supplies the streams each part is written into and `L` receives the
/// decoded parts. Use [`new_decoder`](crate::new_decoder) for a builder with
/// sensible defaults.
pub struct MultipartDecoder<F: PartStreamsFactory, L> {
    context: MultipartContext,
    config: DecoderConfig,
    factory: F,
    listener: L,
    stack: BoundaryStack,
    state: DecoderState,
    saw_cr: bool,
    pending: Vec<u8>,
    header_buf: Vec<u8>,
    active: Option<ActivePart<F::Streams>>,
    closed: bool,
    bytes_fed: u64,
    parts_finalized: usize,
}

impl<F: PartStreamsFactory, L> std::fmt::Debug for MultipartDecoder<F, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartDecoder")
            .field("content_type", &self.context.content_type())
            .field("state", &self.state)
            .field("depth", &self.stack.depth())
            .field("bytes_fed", &self.bytes_fed)
            .field("parts_finalized", &self.parts_finalized)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<F: PartStreamsFactory, L> MultipartDecoder<F, L> {
    /// Current state.
    #[must_use]
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Nesting depth of the innermost active boundary (0 for the request body).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    /// Total bytes accepted by `feed`.
    #[must_use]
    pub fn bytes_fed(&self) -> u64 {
        self.bytes_fed
    }

    /// Number of parts finalized and handed to the listener.
    #[must_use]
    pub fn parts_finalized(&self) -> usize {
        self.parts_finalized
    }

    /// Returns true once `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The request this decoder was created for.
    #[must_use]
    pub fn context(&self) -> &MultipartContext {
        &self.context
    }

    /// Active limits.
    #[must_use]
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// The factory that creates part streams.
    #[must_use]
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Borrow the listener.
    #[must_use]
    pub fn listener(&self) -> &L {
        &self.listener
    }

    /// Mutably borrow the listener, e.g. to drain recorded events between feeds.
    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    /// Consume the decoder and return its listener.
    ///
    /// Any part still open is dropped.
    #[must_use]
    pub fn into_listener(self) -> L {
        self.listener
    }
}

impl<F, L> MultipartDecoder<F, L>
where
    F: PartStreamsFactory,
    L: MultipartListener<F::Streams>,
{
    /// Create a decoder for a body delimited by `boundary`.
    ///
    /// # Errors
    ///
    /// Returns [`MultipartError::InvalidBoundary`] if the boundary is empty
    /// or longer than 70 bytes.
    pub fn new(
        context: MultipartContext,
        boundary: &str,
        factory: F,
        listener: L,
        config: DecoderConfig,
    ) -> Result<Self, MultipartError> {
        validate_boundary(boundary)?;
        tracing::debug!(
            content_type = context.content_type(),
            content_length = ?context.content_length(),
            boundary,
            "multipart decoder created"
        );
        Ok(Self {
            context,
            config,
            factory,
            listener,
            stack: BoundaryStack::new(boundary),
            state: DecoderState::SkipPreamble,
            saw_cr: false,
            // The first delimiter may appear without its leading CRLF.
            pending: CRLF.to_vec(),
            header_buf: Vec::new(),
            active: None,
            closed: false,
            bytes_fed: 0,
            parts_finalized: 0,
        })
    }

    /// Process the next chunk of the body.
    ///
    /// All of `bytes` is consumed before this returns. Decoding failures are
    /// delivered to the listener's `on_error`, after which the decoder
    /// rejects further input.
    ///
    /// # Errors
    ///
    /// - [`MultipartError::Closed`] after [`close`](Self::close).
    /// - [`MultipartError::Terminated`] after a decoding failure.
    /// - [`MultipartError::Listener`] when a listener callback fails.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), MultipartError> {
        if self.closed {
            return Err(MultipartError::Closed);
        }
        if self.state == DecoderState::Error {
            return Err(MultipartError::Terminated);
        }
        self.bytes_fed = self
            .bytes_fed
            .saturating_add(u64::try_from(bytes.len()).unwrap_or(u64::MAX));

        let mut input = bytes;
        while !input.is_empty() {
            let step = match self.state {
                DecoderState::SkipPreamble | DecoderState::Body => self.scan_body(input),
                DecoderState::Headers => self.read_headers(input),
                DecoderState::Delimiter | DecoderState::CloseDelimiter => {
                    self.read_delimiter_tail(input[0]).map(|()| 1)
                }
                DecoderState::Epilogue => Ok(input.len()),
                DecoderState::Error | DecoderState::Done => break,
            };
            match step {
                Ok(consumed) => input = &input[consumed..],
                Err(err) => return self.fail(err),
            }
        }
        Ok(())
    }

    /// Signal end of input and release resources.
    ///
    /// If the terminal boundary has not been seen, a truncation error is
    /// reported through `on_error`. Calling `close` again does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`MultipartError::Listener`] if reporting the truncation fails.
    pub fn close(&mut self) -> Result<(), MultipartError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let result = match self.state {
            DecoderState::Epilogue => {
                self.state = DecoderState::Done;
                tracing::trace!(bytes = self.bytes_fed, "multipart decoder closed");
                Ok(())
            }
            DecoderState::Done | DecoderState::Error => Ok(()),
            state => {
                let depth = self.stack.depth();
                self.fail(MultipartError::Truncated { state, depth })
            }
        };
        self.release();
        self.stack.clear();
        result
    }

    fn fail(&mut self, err: MultipartError) -> Result<(), MultipartError> {
        let state = self.state;
        self.state = DecoderState::Error;
        self.release();

        if let MultipartError::Listener(_) = err {
            tracing::debug!(%state, "multipart listener failed");
            return Err(err);
        }

        let message = err.to_string();
        tracing::warn!(
            %state,
            depth = self.stack.depth(),
            kind = ?err.kind(),
            error = %message,
            "multipart decoding failed"
        );
        self.listener
            .on_error(&message, &err)
            .map_err(MultipartError::Listener)
    }

    fn release(&mut self) {
        self.active = None;
        self.pending.clear();
        self.header_buf.clear();
        self.saw_cr = false;
    }

    /// Scan for the current level's delimiter, streaming body bytes to the
    /// active part (or discarding them in a preamble or inner epilogue).
    fn scan_body(&mut self, input: &[u8]) -> Result<usize, MultipartError> {
        let Some(delimiter_len) = self.stack.top().map(|level| level.delimiter().len()) else {
            return Ok(input.len());
        };

        if !self.pending.is_empty() {
            // Complete the partial match carried over from the last chunk.
            let carried = self.pending.len();
            let take = input.len().min(delimiter_len);
            let mut window = std::mem::take(&mut self.pending);
            window.extend_from_slice(&input[..take]);

            match self.scan(&window) {
                Scan::Found(at) => {
                    self.emit_body(&window[..at])?;
                    self.on_delimiter()?;
                    return Ok(at + delimiter_len - carried);
                }
                Scan::Partial(at) if take == input.len() => {
                    self.emit_body(&window[..at])?;
                    window.drain(..at);
                    self.pending = window;
                    return Ok(input.len());
                }
                Scan::Partial(_) => self.emit_body(&window[..carried])?,
            }
        }

        match self.scan(input) {
            Scan::Found(at) => {
                self.emit_body(&input[..at])?;
                self.on_delimiter()?;
                Ok(at + delimiter_len)
            }
            Scan::Partial(at) => {
                self.emit_body(&input[..at])?;
                self.pending.extend_from_slice(&input[at..]);
                Ok(input.len())
            }
        }
    }

    fn scan(&self, haystack: &[u8]) -> Scan {
        self.stack
            .top()
            .map_or(Scan::Partial(haystack.len()), |level| level.scan(haystack))
    }

    fn emit_body(&mut self, bytes: &[u8]) -> Result<(), MultipartError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let Some(part) = self.active.as_mut() else {
            return Ok(());
        };

        let size = part.written.saturating_add(bytes.len());
        let max = self.config.get_max_form_field_size();
        if part.form_field && size > max {
            return Err(MultipartError::FormFieldTooLarge { size, max });
        }
        part.streams
            .write_bytes(bytes)
            .map_err(MultipartError::Io)?;
        part.written = size;
        Ok(())
    }

    fn on_delimiter(&mut self) -> Result<(), MultipartError> {
        self.pending.clear();
        self.saw_cr = false;
        self.state = DecoderState::Delimiter;
        match self.active.take() {
            Some(part) => self.finalize_part(part),
            None => Ok(()),
        }
    }

    fn finalize_part(&mut self, mut part: ActivePart<F::Streams>) -> Result<(), MultipartError> {
        part.streams.finish().map_err(MultipartError::Io)?;
        self.parts_finalized += 1;
        let depth = self.stack.depth();

        if part.form_field {
            let mut raw = Vec::with_capacity(part.written);
            part.streams
                .source()
                .and_then(|mut source| source.read_to_end(&mut raw))
                .map_err(MultipartError::Io)?;

            let charset = part
                .charset
                .as_deref()
                .or_else(|| self.context.char_encoding());
            let value = decode_text(&raw, charset).into_owned();
            let field_name = part.field_name.unwrap_or_default();
            tracing::debug!(depth, field_name = %field_name, bytes = raw.len(), "form field ready");
            self.listener
                .on_form_field_part_ready(field_name, value, part.headers)
                .map_err(MultipartError::Listener)
        } else {
            tracing::debug!(
                depth,
                field_name = part.field_name.as_deref().unwrap_or_default(),
                bytes = part.written,
                "file part ready"
            );
            self.listener
                .on_part_ready(part.streams, part.headers)
                .map_err(MultipartError::Listener)
        }
    }

    fn read_headers(&mut self, input: &[u8]) -> Result<usize, MultipartError> {
        let max = self.config.get_max_headers_size();
        let old_len = self.header_buf.len();
        let take = input.len().min(max.saturating_sub(old_len));
        self.header_buf.extend_from_slice(&input[..take]);

        match header_section_end(&self.header_buf, old_len.saturating_sub(3)) {
            Some(end) => {
                let raw = std::mem::take(&mut self.header_buf);
                let headers = parse_headers(&raw[..end], self.context.char_encoding())?;
                self.start_part(headers)?;
                Ok(end - old_len)
            }
            None if take < input.len() => Err(MultipartError::HeadersTooLarge {
                size: old_len.saturating_add(input.len()),
                max,
            }),
            None => Ok(take),
        }
    }

    fn start_part(&mut self, headers: Headers) -> Result<(), MultipartError> {
        let part = PartHeaders::from_headers(&headers);

        if let Some(token) = part.nested_boundary() {
            if validate_boundary(&token).is_ok() {
                self.stack.push(&token);
                self.state = DecoderState::SkipPreamble;
                self.pending.clear();
                self.pending.extend_from_slice(CRLF);
                tracing::debug!(depth = self.stack.depth(), boundary = %token, "nested multipart started");
                return self
                    .listener
                    .on_nested_part_started(headers)
                    .map_err(MultipartError::Listener);
            }
            tracing::warn!(
                len = token.len(),
                "nested boundary out of range, treating part as opaque"
            );
        }

        let form_field = part.is_form_field();
        let streams = self
            .factory
            .new_part_streams(&self.context, &headers, form_field)
            .map_err(MultipartError::Factory)?;
        tracing::trace!(
            depth = self.stack.depth(),
            field_name = part.field_name().unwrap_or_default(),
            form_field,
            "part started"
        );
        self.active = Some(ActivePart {
            streams,
            headers,
            field_name: part.field_name().map(str::to_string),
            charset: part.charset(),
            form_field,
            written: 0,
        });
        self.state = DecoderState::Body;
        Ok(())
    }

    fn read_delimiter_tail(&mut self, byte: u8) -> Result<(), MultipartError> {
        let framing = |detail: &'static str| MultipartError::BoundaryFraming { detail };
        match (self.state, self.saw_cr, byte) {
            (DecoderState::Delimiter, false, b'-') => self.state = DecoderState::CloseDelimiter,
            (DecoderState::Delimiter, false, b'\r') => self.saw_cr = true,
            (DecoderState::Delimiter, true, b'\n') => {
                self.saw_cr = false;
                self.state = DecoderState::Headers;
            }
            (DecoderState::Delimiter, false, _) => {
                return Err(framing("expected CRLF or '--' after boundary"));
            }
            (DecoderState::Delimiter, true, _) => {
                return Err(framing("expected LF after CR following boundary"));
            }
            (_, _, b'-') => return self.close_level(),
            _ => return Err(framing("expected '--' to close boundary")),
        }
        Ok(())
    }

    fn close_level(&mut self) -> Result<(), MultipartError> {
        let depth = self.stack.pop().map_or(0, |level| level.depth());
        self.pending.clear();

        if self.stack.is_empty() {
            self.state = DecoderState::Epilogue;
            tracing::debug!(
                parts = self.parts_finalized,
                bytes = self.bytes_fed,
                "all multipart parts finished"
            );
            self.listener
                .on_all_parts_finished()
                .map_err(MultipartError::Listener)
        } else {
            // The inner epilogue runs up to the parent's next delimiter and
            // is discarded since no part is active.
            self.state = DecoderState::Body;
            tracing::debug!(depth, "nested multipart finished");
            self.listener
                .on_nested_part_finished()
                .map_err(MultipartError::Listener)
        }
    }
}

/// Offset just past the blank line ending a header section, if present.
///
/// `from` is where the search for a terminator may start; everything before
/// it has already been searched.
fn header_section_end(buf: &[u8], from: usize) -> Option<usize> {
    // A blank first line means the part has no headers.
    if buf.starts_with(CRLF) {
        return Some(2);
    }
    if buf.starts_with(b"\n") {
        return Some(1);
    }
    memchr::memchr_iter(b'\n', &buf[from..])
        .map(|offset| from + offset)
        .find_map(|lf| match buf.get(lf + 1..) {
            Some([b'\n', ..]) => Some(lf + 2),
            Some([b'\r', b'\n', ..]) => Some(lf + 3),
            _ => None,
        })
}

impl<F, L> std::io::Write for MultipartDecoder<F, L>
where
    F: PartStreamsFactory,
    L: MultipartListener<F::Streams>,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.feed(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ListenerError};
    use crate::listener::MultipartEvent;
    use crate::part_streams::{DefaultPartStreamsFactory, SpooledPartStreams};
    use tracing_test::traced_test;

    type Events = Vec<MultipartEvent<SpooledPartStreams>>;

    const XYZ_BODY: &[u8] = b"--XYZ\r\n\
Content-Disposition: form-data; name=\"metadata\"\r\n\
Content-Type: application/json\r\n\
\r\n\
{\"k\":1}\r\n\
--XYZ\r\n\
Content-Disposition: form-data; name=\"file\"; filename=\"hello.txt\"\r\n\
Content-Type: text/plain\r\n\
\r\n\
HELLO\r\n\
--XYZ--\r\n";

    fn context(char_encoding: Option<&str>) -> MultipartContext {
        MultipartContext::new(
            "multipart/form-data; boundary=XYZ",
            None,
            char_encoding.map(str::to_string),
        )
        .unwrap()
    }

    fn decoder_with(config: DecoderConfig) -> MultipartDecoder<DefaultPartStreamsFactory, Events> {
        MultipartDecoder::new(
            context(None),
            "XYZ",
            DefaultPartStreamsFactory::in_memory(),
            Vec::new(),
            config,
        )
        .unwrap()
    }

    fn decoder() -> MultipartDecoder<DefaultPartStreamsFactory, Events> {
        decoder_with(DecoderConfig::default())
    }

    fn run(body: &[u8]) -> Events {
        let mut decoder = decoder();
        decoder.feed(body).unwrap();
        decoder.close().unwrap();
        decoder.into_listener()
    }

    fn names(events: &Events) -> Vec<&'static str> {
        events.iter().map(MultipartEvent::name).collect()
    }

    fn error_kind(events: &Events) -> ErrorKind {
        match events.last() {
            Some(MultipartEvent::Error { kind, .. }) => *kind,
            other => panic!("expected an error event, got {other:?}"),
        }
    }

    fn error_message(events: &Events) -> &str {
        match events.last() {
            Some(MultipartEvent::Error { message, .. }) => message,
            other => panic!("expected an error event, got {other:?}"),
        }
    }

    fn assert_xyz_events(events: Events) {
        assert_eq!(
            names(&events),
            ["form_field_part_ready", "part_ready", "all_parts_finished"]
        );
        let mut events = events.into_iter();

        match events.next() {
            Some(MultipartEvent::FormFieldPartReady {
                field_name,
                value,
                headers,
            }) => {
                assert_eq!(field_name, "metadata");
                assert_eq!(value.len(), 7);
                let json: serde_json::Value = serde_json::from_str(&value).unwrap();
                assert_eq!(json["k"], 1);
                assert_eq!(headers.content_type(), Some("application/json"));
            }
            other => panic!("unexpected {other:?}"),
        }

        match events.next() {
            Some(MultipartEvent::PartReady {
                mut streams,
                headers,
            }) => {
                assert_eq!(streams.bytes().unwrap(), b"HELLO");
                assert_eq!(
                    PartHeaders::from_headers(&headers).file_name(),
                    Some("hello.txt")
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    // =========================================================================
    // Well-formed bodies
    // =========================================================================

    #[test]
    fn form_field_and_file_part() {
        let mut decoder = decoder();
        decoder.feed(XYZ_BODY).unwrap();
        assert_eq!(decoder.state(), DecoderState::Epilogue);
        decoder.close().unwrap();
        assert_eq!(decoder.state(), DecoderState::Done);
        assert_eq!(decoder.parts_finalized(), 2);
        assert_eq!(decoder.bytes_fed(), XYZ_BODY.len() as u64);
        assert_xyz_events(decoder.into_listener());
    }

    #[test]
    fn one_byte_at_a_time() {
        let mut decoder = decoder();
        for byte in XYZ_BODY {
            decoder.feed(std::slice::from_ref(byte)).unwrap();
        }
        decoder.close().unwrap();
        assert_xyz_events(decoder.into_listener());
    }

    #[test]
    fn every_two_way_split() {
        for split in 0..=XYZ_BODY.len() {
            let mut decoder = decoder();
            decoder.feed(&XYZ_BODY[..split]).unwrap();
            decoder.feed(&XYZ_BODY[split..]).unwrap();
            decoder.close().unwrap();
            assert_xyz_events(decoder.into_listener());
        }
    }

    #[test]
    fn zero_parts() {
        assert_eq!(names(&run(b"--XYZ--\r\n")), ["all_parts_finished"]);
        assert_eq!(names(&run(b"--XYZ--")), ["all_parts_finished"]);
    }

    #[test]
    fn preamble_and_epilogue_are_ignored() {
        let body = b"This is the preamble.\r\n--XYZ\r\n\
Content-Disposition: form-data; name=\"a\"\r\n\r\n\
value\r\n--XYZ--\r\nThis is the epilogue.\r\n--XYZ\r\nnot a part";
        let events = run(body);
        assert_eq!(names(&events), ["form_field_part_ready", "all_parts_finished"]);
        match &events[0] {
            MultipartEvent::FormFieldPartReady { value, .. } => assert_eq!(value, "value"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn delimiter_lookalikes_stay_in_body() {
        let body = b"--XYZ\r\n\
Content-Disposition: form-data; name=\"a\"\r\n\r\n\
a\r\n--XY b--XYZ c\r\r\n-\r\n--XYZ--";
        let events = run(body);
        match &events[0] {
            MultipartEvent::FormFieldPartReady { value, .. } => {
                assert_eq!(value, "a\r\n--XY b--XYZ c\r\r\n-");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_body_and_missing_headers() {
        let body = b"--XYZ\r\n\
Content-Disposition: form-data; name=\"empty\"\r\n\r\n\
\r\n--XYZ\r\n\
\r\n\
naked\r\n--XYZ--";
        let events = run(body);
        assert_eq!(
            names(&events),
            ["form_field_part_ready", "form_field_part_ready", "all_parts_finished"]
        );
        match &events[0] {
            MultipartEvent::FormFieldPartReady {
                field_name, value, ..
            } => {
                assert_eq!(field_name, "empty");
                assert_eq!(value, "");
            }
            other => panic!("unexpected {other:?}"),
        }
        match &events[1] {
            MultipartEvent::FormFieldPartReady {
                field_name,
                value,
                headers,
            } => {
                assert_eq!(field_name, "");
                assert_eq!(value, "naked");
                assert!(headers.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bare_lf_header_lines() {
        let body = b"--XYZ\r\nContent-Disposition: form-data; name=\"a\"\n\nv\r\n--XYZ--";
        let events = run(body);
        match &events[0] {
            MultipartEvent::FormFieldPartReady {
                field_name, value, ..
            } => {
                assert_eq!(field_name, "a");
                assert_eq!(value, "v");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn form_field_uses_context_charset() {
        let mut decoder = MultipartDecoder::new(
            context(Some("ISO-8859-1")),
            "XYZ",
            DefaultPartStreamsFactory::in_memory(),
            Events::new(),
            DecoderConfig::default(),
        )
        .unwrap();
        decoder
            .feed(b"--XYZ\r\nContent-Disposition: form-data; name=\"word\"\r\n\r\ncaf\xe9\r\n--XYZ--")
            .unwrap();
        decoder.close().unwrap();
        match &decoder.listener()[0] {
            MultipartEvent::FormFieldPartReady { value, .. } => assert_eq!(value, "café"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn part_charset_wins_over_context() {
        let body = b"--XYZ\r\n\
Content-Disposition: form-data; name=\"word\"\r\n\
Content-Type: text/plain; charset=windows-1252\r\n\r\n\
\x93hi\x94\r\n--XYZ--";
        let events = run(body);
        match &events[0] {
            MultipartEvent::FormFieldPartReady { value, .. } => {
                assert_eq!(value, "\u{201c}hi\u{201d}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn nested_multipart() {
        let body = b"--XYZ\r\n\
Content-Disposition: form-data; name=\"files\"\r\n\
Content-Type: multipart/mixed; boundary=INNER\r\n\r\n\
--INNER\r\n\
Content-Disposition: file; filename=\"a.txt\"\r\n\r\n\
AAA\r\n\
--INNER\r\n\
Content-Disposition: file; filename=\"b.txt\"\r\n\r\n\
BBB\r\n\
--INNER--\r\n\
inner epilogue\r\n\
--XYZ\r\n\
Content-Disposition: form-data; name=\"after\"\r\n\r\n\
ok\r\n\
--XYZ--\r\n";

        let mut decoder = decoder();
        let split = body.windows(3).position(|w| w == b"AAA").unwrap();
        decoder.feed(&body[..split]).unwrap();
        assert_eq!(decoder.depth(), 1);
        assert_eq!(decoder.state(), DecoderState::Body);
        decoder.feed(&body[split..]).unwrap();
        assert_eq!(decoder.depth(), 0);
        decoder.close().unwrap();

        let events = decoder.into_listener();
        assert_eq!(
            names(&events),
            [
                "nested_part_started",
                "part_ready",
                "part_ready",
                "nested_part_finished",
                "form_field_part_ready",
                "all_parts_finished"
            ]
        );

        let mut bodies = Vec::new();
        for event in events {
            match event {
                MultipartEvent::NestedPartStarted { headers } => {
                    let part = PartHeaders::from_headers(&headers);
                    assert_eq!(part.field_name(), Some("files"));
                    assert_eq!(part.nested_boundary().as_deref(), Some("INNER"));
                }
                MultipartEvent::PartReady { mut streams, .. } => {
                    bodies.push(streams.bytes().unwrap());
                }
                MultipartEvent::FormFieldPartReady { value, .. } => assert_eq!(value, "ok"),
                _ => {}
            }
        }
        assert_eq!(bodies, [b"AAA".to_vec(), b"BBB".to_vec()]);
    }

    #[test]
    fn write_adapter_feeds_decoder() {
        let mut decoder = decoder();
        let mut reader = XYZ_BODY;
        std::io::copy(&mut reader, &mut decoder).unwrap();
        decoder.close().unwrap();
        assert_xyz_events(decoder.into_listener());
    }

    // =========================================================================
    // Failures
    // =========================================================================

    #[test]
    fn truncated_body_reports_once() {
        let mut decoder = decoder();
        decoder
            .feed(b"--XYZ\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nabc")
            .unwrap();
        decoder.close().unwrap();
        assert_eq!(decoder.state(), DecoderState::Error);
        decoder.close().unwrap();

        let events = decoder.into_listener();
        assert_eq!(names(&events), ["error"]);
        assert_eq!(error_kind(&events), ErrorKind::Truncation);
        assert!(error_message(&events).contains("BODY"));
    }

    #[test]
    fn truncated_inside_delimiter_tail() {
        let mut decoder = decoder();
        decoder.feed(b"--XYZ-").unwrap();
        assert_eq!(decoder.state(), DecoderState::CloseDelimiter);
        decoder.close().unwrap();
        assert_eq!(error_kind(decoder.listener()), ErrorKind::Truncation);
    }

    #[test]
    fn header_without_colon() {
        let mut decoder = decoder();
        decoder
            .feed(b"--XYZ\r\nbogus header\r\n\r\nbody\r\n--XYZ--")
            .unwrap();
        assert_eq!(decoder.state(), DecoderState::Error);
        assert!(matches!(decoder.feed(b"more"), Err(MultipartError::Terminated)));
        decoder.close().unwrap();

        let events = decoder.into_listener();
        assert_eq!(names(&events), ["error"]);
        assert_eq!(error_kind(&events), ErrorKind::HeaderParsing);
        assert!(error_message(&events).contains("bogus header"));
    }

    #[test]
    fn garbage_after_boundary() {
        let bodies: [&[u8]; 3] = [
            b"--XYZ\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nv\r\n--XYZx",
            b"--XYZ\rX",
            b"--XYZ-X",
        ];
        for body in bodies {
            let events = run(body);
            assert_eq!(error_kind(&events), ErrorKind::BoundaryFraming);
            assert_eq!(events.iter().filter(|e| e.is_error()).count(), 1);
        }
        let events = run(bodies[0]);
        assert_eq!(names(&events), ["form_field_part_ready", "error"]);
    }

    #[test]
    fn garbage_after_boundary_one_byte_at_a_time() {
        let bodies: [&[u8]; 3] = [
            b"--XYZ\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nv\r\n--XYZx",
            b"--XYZ\rX",
            b"--XYZ-X",
        ];
        for body in bodies {
            let mut decoder = decoder();
            let mut fed = 0;
            for byte in body {
                if decoder.feed(std::slice::from_ref(byte)).is_err() {
                    break;
                }
                fed += 1;
            }
            // The error fires on the offending last byte, not at close.
            assert_eq!(fed, body.len());
            assert_eq!(decoder.state(), DecoderState::Error);
            assert!(matches!(
                decoder.feed(b"more"),
                Err(MultipartError::Terminated)
            ));
            decoder.close().unwrap();

            let events = decoder.into_listener();
            assert_eq!(error_kind(&events), ErrorKind::BoundaryFraming);
            assert_eq!(events.iter().filter(|e| e.is_error()).count(), 1);
        }
    }

    #[test]
    fn oversized_form_field() {
        let mut decoder = decoder_with(DecoderConfig::new().max_form_field_size(4));
        decoder
            .feed(b"--XYZ\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n12345\r\n--XYZ--")
            .unwrap();
        decoder.close().unwrap();
        let events = decoder.into_listener();
        assert_eq!(names(&events), ["error"]);
        assert_eq!(error_kind(&events), ErrorKind::Limit);
    }

    #[test]
    fn file_parts_ignore_form_field_limit() {
        let mut decoder = decoder_with(DecoderConfig::new().max_form_field_size(4));
        decoder
            .feed(b"--XYZ\r\nContent-Disposition: form-data; name=\"f\"; filename=\"f\"\r\n\r\n12345\r\n--XYZ--")
            .unwrap();
        decoder.close().unwrap();
        assert_eq!(
            names(decoder.listener()),
            ["part_ready", "all_parts_finished"]
        );
    }

    #[test]
    fn oversized_header_section() {
        let mut decoder = decoder_with(DecoderConfig::new().max_headers_size(16));
        decoder
            .feed(b"--XYZ\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nv\r\n--XYZ--")
            .unwrap();
        let events = decoder.into_listener();
        assert_eq!(names(&events), ["error"]);
        assert_eq!(error_kind(&events), ErrorKind::HeaderParsing);
        assert!(error_message(&events).contains("too large"));
    }

    #[test]
    fn feed_after_close_is_rejected() {
        let mut decoder = decoder();
        decoder.feed(XYZ_BODY).unwrap();
        decoder.close().unwrap();
        decoder.close().unwrap();
        assert!(decoder.is_closed());
        assert!(matches!(decoder.feed(b"x"), Err(MultipartError::Closed)));
        assert_eq!(names(decoder.listener()).len(), 3);
    }

    #[test]
    fn invalid_boundary_is_rejected() {
        let err = MultipartDecoder::new(
            context(None),
            "",
            DefaultPartStreamsFactory::in_memory(),
            Events::new(),
            DecoderConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    #[traced_test]
    fn failures_are_logged() {
        run(b"--XYZ\r\nno colon here\r\n\r\n");
        assert!(logs_contain("multipart decoding failed"));
    }

    // =========================================================================
    // Listener failures
    // =========================================================================

    #[derive(Default)]
    struct RejectFields {
        errors_seen: usize,
    }

    impl MultipartListener<SpooledPartStreams> for RejectFields {
        fn on_part_ready(
            &mut self,
            _: SpooledPartStreams,
            _: Headers,
        ) -> Result<(), ListenerError> {
            Ok(())
        }

        fn on_form_field_part_ready(
            &mut self,
            field_name: String,
            _: String,
            _: Headers,
        ) -> Result<(), ListenerError> {
            Err(format!("field {field_name} rejected").into())
        }

        fn on_all_parts_finished(&mut self) -> Result<(), ListenerError> {
            Ok(())
        }

        fn on_error(&mut self, _: &str, _: &MultipartError) -> Result<(), ListenerError> {
            self.errors_seen += 1;
            Ok(())
        }
    }

    #[test]
    fn listener_errors_propagate_from_feed() {
        let mut decoder = MultipartDecoder::new(
            context(None),
            "XYZ",
            DefaultPartStreamsFactory::in_memory(),
            RejectFields::default(),
            DecoderConfig::default(),
        )
        .unwrap();

        let err = decoder.feed(XYZ_BODY).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Listener);
        assert_eq!(err.to_string(), "multipart listener failed: field metadata rejected");
        assert_eq!(decoder.state(), DecoderState::Error);
        assert!(matches!(decoder.feed(b""), Err(MultipartError::Terminated)));

        decoder.close().unwrap();
        assert_eq!(decoder.listener().errors_seen, 0);
    }

    #[test]
    fn header_section_end_variants() {
        assert_eq!(header_section_end(b"\r\nbody", 0), Some(2));
        assert_eq!(header_section_end(b"A: b\r\n\r\nbody", 0), Some(8));
        assert_eq!(header_section_end(b"A: b\n\nbody", 0), Some(6));
        assert_eq!(header_section_end(b"A: b\r\n", 0), None);
        assert_eq!(header_section_end(b"A: b\r\nC: d\r\n\r", 0), None);
    }
}

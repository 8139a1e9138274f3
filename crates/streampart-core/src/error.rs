//! Error types for multipart decoding.
//!
//! Every failure the decoder can observe is a [`MultipartError`]. Protocol,
//! limit and resource failures are delivered once through
//! [`MultipartListener::on_error`](crate::MultipartListener::on_error) and
//! end the session; listener failures and usage errors are returned from
//! `feed`/`close` instead.

use crate::decoder::DecoderState;

/// Error returned by a listener callback.
///
/// Listener code runs synchronously on the caller's thread, so whatever it
/// returns is propagated out of `feed`/`close` unchanged.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Coarse classification of a [`MultipartError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid context or boundary at construction time.
    Configuration,
    /// Malformed or oversized part header section.
    HeaderParsing,
    /// Unexpected bytes after a boundary token.
    BoundaryFraming,
    /// Input ended before the terminal boundary.
    Truncation,
    /// A configured size limit was exceeded.
    Limit,
    /// The part streams factory failed.
    Factory,
    /// Writing, finishing or reading back a part failed.
    Resource,
    /// A listener callback failed.
    Listener,
    /// The session was used after it ended.
    Usage,
}

/// Errors that can occur while decoding a multipart stream.
#[derive(Debug)]
pub enum MultipartError {
    /// The content type is not a multipart media type.
    InvalidContentType { content_type: String },
    /// No boundary was supplied and none could be found in the content type.
    MissingBoundary,
    /// Boundary token is empty or longer than RFC 2046 allows.
    InvalidBoundary { len: usize },
    /// A header line has no `name: value` separator.
    HeaderParsing { line: String },
    /// The header section of a part exceeds the configured limit.
    HeadersTooLarge { size: usize, max: usize },
    /// The bytes following a boundary token are neither CRLF nor `--`.
    BoundaryFraming { detail: &'static str },
    /// Input ended while the decoder was still expecting data.
    Truncated { state: DecoderState, depth: usize },
    /// A form field body exceeds the configured limit.
    FormFieldTooLarge { size: usize, max: usize },
    /// The part streams factory failed to provide streams for a part.
    Factory(std::io::Error),
    /// I/O failure while writing to, finishing or reading back a part.
    Io(std::io::Error),
    /// A listener callback returned an error.
    Listener(ListenerError),
    /// `feed` was called after `close`.
    Closed,
    /// `feed` was called after the session failed.
    Terminated,
}

impl MultipartError {
    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidContentType { .. } | Self::MissingBoundary | Self::InvalidBoundary { .. } => {
                ErrorKind::Configuration
            }
            Self::HeaderParsing { .. } | Self::HeadersTooLarge { .. } => ErrorKind::HeaderParsing,
            Self::BoundaryFraming { .. } => ErrorKind::BoundaryFraming,
            Self::Truncated { .. } => ErrorKind::Truncation,
            Self::FormFieldTooLarge { .. } => ErrorKind::Limit,
            Self::Factory(_) => ErrorKind::Factory,
            Self::Io(_) => ErrorKind::Resource,
            Self::Listener(_) => ErrorKind::Listener,
            Self::Closed | Self::Terminated => ErrorKind::Usage,
        }
    }
}

impl std::fmt::Display for MultipartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidContentType { content_type } => {
                write!(f, "invalid content type '{content_type}': expected a multipart request")
            }
            Self::MissingBoundary => write!(f, "missing boundary in multipart Content-Type"),
            Self::InvalidBoundary { len } => {
                write!(f, "invalid multipart boundary: length {len} is outside 1..=70")
            }
            Self::HeaderParsing { line } => write!(f, "unable to parse header: {line}"),
            Self::HeadersTooLarge { size, max } => {
                write!(f, "part headers too large: {size} bytes exceeds limit of {max}")
            }
            Self::BoundaryFraming { detail } => write!(f, "invalid multipart framing: {detail}"),
            Self::Truncated { state, depth } => write!(
                f,
                "unexpected end of multipart data in state {state} at nesting depth {depth}"
            ),
            Self::FormFieldTooLarge { size, max } => {
                write!(f, "form field too large: {size} bytes exceeds limit of {max}")
            }
            Self::Factory(e) => write!(f, "failed to create part streams: {e}"),
            Self::Io(e) => write!(f, "multipart I/O error: {e}"),
            Self::Listener(e) => write!(f, "multipart listener failed: {e}"),
            Self::Closed => write!(f, "multipart decoder is closed"),
            Self::Terminated => write!(f, "multipart decoder stopped after an error"),
        }
    }
}

impl std::error::Error for MultipartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Factory(e) | Self::Io(e) => Some(e),
            Self::Listener(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<MultipartError> for std::io::Error {
    fn from(e: MultipartError) -> Self {
        match e {
            MultipartError::Io(inner) => inner,
            other => std::io::Error::other(other),
        }
    }
}

//! Request-level multipart context.

use crate::error::MultipartError;
use crate::headers::{header_params, header_token};

/// RFC 2046 recommends multipart boundary length <= 70 characters.
pub const MAX_BOUNDARY_LEN: usize = 70;

/// Immutable description of the request being decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartContext {
    content_type: String,
    content_length: Option<u64>,
    char_encoding: Option<String>,
}

impl MultipartContext {
    /// Create a context for a request.
    ///
    /// # Errors
    ///
    /// Returns [`MultipartError::InvalidContentType`] if `content_type` is not
    /// a `multipart/*` media type.
    pub fn new(
        content_type: impl Into<String>,
        content_length: Option<u64>,
        char_encoding: Option<String>,
    ) -> Result<Self, MultipartError> {
        let content_type = content_type.into();
        if !is_multipart(&content_type) {
            return Err(MultipartError::InvalidContentType { content_type });
        }
        Ok(Self {
            content_type,
            content_length,
            char_encoding,
        })
    }

    /// The request content type.
    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// The declared content length, if known.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// The request character encoding, if declared.
    #[must_use]
    pub fn char_encoding(&self) -> Option<&str> {
        self.char_encoding.as_deref()
    }
}

/// Returns true if `content_type` denotes a `multipart/*` media type.
#[must_use]
pub fn is_multipart(content_type: &str) -> bool {
    header_token(content_type)
        .get(..10)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("multipart/"))
}

/// Extract the `boundary` parameter of a multipart content type.
///
/// Returns `None` for non-multipart types and for missing or empty
/// boundaries.
#[must_use]
pub fn boundary_param(content_type: &str) -> Option<String> {
    if !is_multipart(content_type) {
        return None;
    }
    header_params(content_type)
        .find(|(key, _)| key.eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

/// Check a boundary token against RFC 2046 length rules.
///
/// # Errors
///
/// Returns [`MultipartError::InvalidBoundary`] for an empty token or one
/// longer than [`MAX_BOUNDARY_LEN`].
pub fn validate_boundary(boundary: &str) -> Result<(), MultipartError> {
    if boundary.is_empty() || boundary.len() > MAX_BOUNDARY_LEN {
        return Err(MultipartError::InvalidBoundary {
            len: boundary.len(),
        });
    }
    Ok(())
}

//! Decoder limits.

use serde::{Deserialize, Serialize};

/// Default maximum size of one part's header section (16KB).
pub const DEFAULT_MAX_HEADERS_SIZE: usize = 16 * 1024;

/// Default maximum size of a buffered form field value (1MB).
pub const DEFAULT_MAX_FORM_FIELD_SIZE: usize = 1024 * 1024;

/// Configuration for a [`MultipartDecoder`](crate::MultipartDecoder).
///
/// Can be built in code or deserialized from a configuration file; missing
/// keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Maximum size of a part header section, terminator included.
    max_headers_size: usize,
    /// Maximum size of a form field body.
    max_form_field_size: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_headers_size: DEFAULT_MAX_HEADERS_SIZE,
            max_form_field_size: DEFAULT_MAX_FORM_FIELD_SIZE,
        }
    }
}

impl DecoderConfig {
    /// Create a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum header section size.
    #[must_use]
    pub fn max_headers_size(mut self, size: usize) -> Self {
        self.max_headers_size = size;
        self
    }

    /// Set the maximum form field size.
    #[must_use]
    pub fn max_form_field_size(mut self, size: usize) -> Self {
        self.max_form_field_size = size;
        self
    }

    /// Get the maximum header section size.
    #[must_use]
    pub fn get_max_headers_size(&self) -> usize {
        self.max_headers_size
    }

    /// Get the maximum form field size.
    #[must_use]
    pub fn get_max_form_field_size(&self) -> usize {
        self.max_form_field_size
    }
}

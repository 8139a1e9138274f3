//! Part header sections.
//!
//! [`parse_headers`] turns the raw header block of one part into a
//! [`Headers`] map; [`PartHeaders`] derives the fields the decoder routes on
//! (field name, file name, content type) from that map.

use std::borrow::Cow;
use std::collections::BTreeMap;

use encoding_rs::{Encoding, UTF_8};
use serde::Serialize;

use crate::context::boundary_param;
use crate::error::MultipartError;

/// Header names of a part, lower-cased, each mapped to its values in the
/// order they appeared. Names iterate and serialize in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Headers {
    inner: BTreeMap<String, Vec<String>>,
}

impl Headers {
    /// Create empty headers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value for `name` (case-insensitive).
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.inner
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// All values for a header name (case-insensitive).
    #[must_use]
    pub fn get_all(&self, name: &str) -> Option<&[String]> {
        self.inner
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
    }

    /// First value for a header name (case-insensitive).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name)
            .and_then(<[String]>::first)
            .map(String::as_str)
    }

    /// Returns true if at least one value exists for `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(&name.to_ascii_lowercase())
    }

    /// Iterate over (name, values) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.inner
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Returns the number of distinct header names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// The `Content-Type` header value.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.get("content-type")
    }

    /// The `Content-Disposition` header value.
    #[must_use]
    pub fn content_disposition(&self) -> Option<&str> {
        self.get("content-disposition")
    }

    /// Consume the headers and return the underlying map.
    #[must_use]
    pub fn into_map(self) -> BTreeMap<String, Vec<String>> {
        self.inner
    }
}

/// Parse a raw header section into [`Headers`].
///
/// Parsing stops at the first empty (or whitespace-only) line, or at the end
/// of `raw`. Lines end in LF, optionally preceded by CR. A line starting with
/// a space or tab continues the previous value. Names are lower-cased;
/// names and values are trimmed.
///
/// An unsupported `charset` falls back to UTF-8.
///
/// # Errors
///
/// Returns [`MultipartError::HeaderParsing`] for a line without a colon.
pub fn parse_headers(raw: &[u8], charset: Option<&str>) -> Result<Headers, MultipartError> {
    let encoding = resolve_encoding(charset);
    let mut headers = Headers::new();
    let mut current: Option<(String, String)> = None;

    for raw_line in raw_lines(raw) {
        let line = encoding.decode_without_bom_handling(raw_line).0;
        if line.trim().is_empty() {
            break;
        }

        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = current.as_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }

        if let Some((name, value)) = current.take() {
            headers.add(&name, value);
        }

        let Some((name, value)) = line.split_once(':') else {
            return Err(MultipartError::HeaderParsing {
                line: line.to_string(),
            });
        };
        current = Some((name.trim().to_string(), value.trim().to_string()));
    }

    if let Some((name, value)) = current {
        headers.add(&name, value);
    }

    Ok(headers)
}

/// Split `raw` into lines with their LF / CRLF terminators stripped.
fn raw_lines(raw: &[u8]) -> impl Iterator<Item = &[u8]> {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    raw.split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
}

/// Resolve a charset label, falling back to UTF-8 when it is missing or
/// unknown.
pub(crate) fn resolve_encoding(charset: Option<&str>) -> &'static Encoding {
    let Some(label) = charset.map(str::trim).filter(|label| !label.is_empty()) else {
        return UTF_8;
    };
    Encoding::for_label(label.as_bytes()).unwrap_or_else(|| {
        tracing::warn!(charset = label, "unsupported charset, falling back to UTF-8");
        UTF_8
    })
}

/// Decode `bytes` as text in `charset` (UTF-8 when unknown).
pub(crate) fn decode_text<'a>(bytes: &'a [u8], charset: Option<&str>) -> Cow<'a, str> {
    resolve_encoding(charset).decode_without_bom_handling(bytes).0
}

/// Iterate over the `key=value` parameters of a structured header value,
/// skipping the leading token. Semicolons inside quotes do not split.
pub(crate) fn header_params(value: &str) -> impl Iterator<Item = (&str, String)> {
    split_unquoted(value, b';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .map(|(key, raw)| (key.trim(), unquote(raw)))
}

/// The leading token of a structured header value, e.g. `form-data`.
pub(crate) fn header_token(value: &str) -> &str {
    split_unquoted(value, b';').next().unwrap_or("").trim()
}

fn split_unquoted(value: &str, separator: u8) -> impl Iterator<Item = &str> {
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;
    let mut pieces = Vec::new();
    for (i, &b) in value.as_bytes().iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_quotes => escaped = true,
            b'"' => in_quotes = !in_quotes,
            _ if b == separator && !in_quotes => {
                pieces.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(&value[start..]);
    pieces.into_iter()
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        let inner = &s[1..s.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else {
                out.push(c);
            }
        }
        out
    } else {
        s.to_string()
    }
}

/// Routing view of a part's headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartHeaders {
    field_name: Option<String>,
    file_name: Option<String>,
    content_type: Option<String>,
}

impl PartHeaders {
    /// Derive the routing view from parsed headers.
    #[must_use]
    pub fn from_headers(headers: &Headers) -> Self {
        let mut field_name = None;
        let mut file_name = None;
        if let Some(disposition) = headers.content_disposition() {
            for (key, value) in header_params(disposition) {
                if key.eq_ignore_ascii_case("name") {
                    field_name = Some(value);
                } else if key.eq_ignore_ascii_case("filename") {
                    file_name = Some(value);
                }
            }
        }

        Self {
            field_name,
            file_name,
            content_type: headers.content_type().map(str::to_string),
        }
    }

    /// The `name` parameter of `Content-Disposition`.
    #[must_use]
    pub fn field_name(&self) -> Option<&str> {
        self.field_name.as_deref()
    }

    /// The `filename` parameter of `Content-Disposition`.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// The part's `Content-Type`.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Returns true when the part has no file name.
    #[must_use]
    pub fn is_form_field(&self) -> bool {
        self.file_name.is_none()
    }

    /// The `charset` parameter of the part's content type.
    #[must_use]
    pub fn charset(&self) -> Option<String> {
        let content_type = self.content_type.as_deref()?;
        header_params(content_type)
            .find(|(key, _)| key.eq_ignore_ascii_case("charset"))
            .map(|(_, value)| value)
            .filter(|value| !value.is_empty())
    }

    /// Boundary of a nested multipart body, when the part declares one.
    #[must_use]
    pub fn nested_boundary(&self) -> Option<String> {
        boundary_param(self.content_type.as_deref()?)
    }
}

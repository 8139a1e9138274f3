//! Delimiter search and the stack of active boundaries.
//!
//! Each nesting level searches for its own delimiter, `CRLF "--" token`.
//! [`BoundaryContext::scan`] reports either a complete match or the offset
//! of a trailing partial match the caller must carry into the next chunk.

use memchr::memmem::Finder;

/// Outcome of scanning a chunk for a delimiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scan {
    /// A complete delimiter starts at this offset.
    Found(usize),
    /// No complete delimiter. Bytes before this offset are body; bytes from
    /// it to the end are a proper prefix of the delimiter.
    Partial(usize),
}

/// One nesting level: a boundary token and its depth.
#[derive(Debug, Clone)]
pub struct BoundaryContext {
    token: String,
    depth: usize,
    finder: Finder<'static>,
}

impl BoundaryContext {
    fn new(token: &str, depth: usize) -> Self {
        let mut delimiter = Vec::with_capacity(token.len() + 4);
        delimiter.extend_from_slice(b"\r\n--");
        delimiter.extend_from_slice(token.as_bytes());
        Self {
            token: token.to_string(),
            depth,
            finder: Finder::new(&delimiter).into_owned(),
        }
    }

    /// The boundary token, without leading dashes.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Nesting depth; the request body is depth 0.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The full delimiter, `CRLF "--" token`.
    #[must_use]
    pub fn delimiter(&self) -> &[u8] {
        self.finder.needle()
    }

    pub(crate) fn scan(&self, haystack: &[u8]) -> Scan {
        if let Some(at) = self.finder.find(haystack) {
            return Scan::Found(at);
        }

        // Only a suffix shorter than the delimiter can be a partial match,
        // and every delimiter starts with CR.
        let delimiter = self.delimiter();
        let tail_start = haystack.len().saturating_sub(delimiter.len() - 1);
        memchr::memchr_iter(b'\r', &haystack[tail_start..])
            .map(|offset| tail_start + offset)
            .find(|&start| delimiter.starts_with(&haystack[start..]))
            .map_or(Scan::Partial(haystack.len()), Scan::Partial)
    }
}

/// Active boundaries, innermost last.
#[derive(Debug, Clone, Default)]
pub struct BoundaryStack {
    contexts: Vec<BoundaryContext>,
}

impl BoundaryStack {
    /// Create a stack holding the request-level boundary.
    #[must_use]
    pub fn new(token: &str) -> Self {
        Self {
            contexts: vec![BoundaryContext::new(token, 0)],
        }
    }

    /// Enter a nested body delimited by `token`.
    pub fn push(&mut self, token: &str) {
        let depth = self.contexts.len();
        self.contexts.push(BoundaryContext::new(token, depth));
    }

    /// Leave the innermost level.
    pub fn pop(&mut self) -> Option<BoundaryContext> {
        self.contexts.pop()
    }

    /// The innermost active level.
    #[must_use]
    pub fn top(&self) -> Option<&BoundaryContext> {
        self.contexts.last()
    }

    /// Depth of the innermost level (0 when empty).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.contexts.len().saturating_sub(1)
    }

    /// Number of active levels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Returns true once the outermost level has been closed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.contexts.clear();
    }
}

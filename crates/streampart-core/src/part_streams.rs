//! Per-part byte streams.
//!
//! The decoder writes a part's body into a [`PartSink`] while scanning and,
//! once the part is complete, hands the streams to the listener, which reads
//! the bytes back through [`PartSource`]. Where the bytes live in between is
//! up to the [`PartStreamsFactory`].
//!
//! The default factory keeps small parts in memory and spools larger file
//! parts to a temporary file, which is removed when the streams are dropped.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::context::MultipartContext;
use crate::headers::Headers;

/// Default threshold for spooling file parts to a temporary file (1MB).
pub const DEFAULT_SPOOL_THRESHOLD: usize = 1024 * 1024;

/// Write side of a part.
pub trait PartSink {
    /// Append body bytes.
    fn write_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()>;

    /// Flush and close for writing. After this the source is readable.
    fn finish(&mut self) -> std::io::Result<()>;
}

/// Read side of a part.
pub trait PartSource {
    /// Open a reader over the finished part body.
    ///
    /// Each call starts from the beginning of the body.
    fn source(&mut self) -> std::io::Result<Box<dyn Read + '_>>;
}

/// A sink paired with its source.
pub trait PartStreams: PartSink + PartSource {}

impl<T: PartSink + PartSource> PartStreams for T {}

/// Provides the streams each part is written into.
pub trait PartStreamsFactory {
    /// Streams produced by this factory.
    type Streams: PartStreams;

    /// Create streams for the part described by `headers`.
    fn new_part_streams(
        &mut self,
        context: &MultipartContext,
        headers: &Headers,
        is_form_field: bool,
    ) -> std::io::Result<Self::Streams>;
}

#[derive(Debug)]
enum Storage {
    InMemory(Vec<u8>),
    SpooledTempFile {
        path: PathBuf,
        file: Option<File>,
        len: u64,
    },
}

/// Part streams held in memory up to a threshold, then in a temporary file.
#[derive(Debug)]
pub struct SpooledPartStreams {
    storage: Storage,
    spool_threshold: Option<usize>,
    temp_dir: PathBuf,
    finished: bool,
}

impl SpooledPartStreams {
    /// Streams that never leave memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(None, std::env::temp_dir())
    }

    /// Streams that move to a file in `temp_dir` once more than
    /// `spool_threshold` bytes have been written.
    #[must_use]
    pub fn new(spool_threshold: Option<usize>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: Storage::InMemory(Vec::new()),
            spool_threshold,
            temp_dir: temp_dir.into(),
            finished: false,
        }
    }

    /// Number of bytes written so far.
    #[must_use]
    pub fn len(&self) -> u64 {
        match &self.storage {
            Storage::InMemory(data) => u64::try_from(data.len()).unwrap_or(u64::MAX),
            Storage::SpooledTempFile { len, .. } => *len,
        }
    }

    /// Returns true if no bytes have been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true when the body lives in a temporary file.
    #[must_use]
    pub fn is_spooled(&self) -> bool {
        matches!(self.storage, Storage::SpooledTempFile { .. })
    }

    /// Path of the temporary file, if the body was spooled.
    #[must_use]
    pub fn spooled_path(&self) -> Option<&Path> {
        match &self.storage {
            Storage::InMemory(_) => None,
            Storage::SpooledTempFile { path, .. } => Some(path.as_path()),
        }
    }

    /// Returns true once the sink has been finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Read the whole body into memory.
    pub fn bytes(&mut self) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.source()?.read_to_end(&mut out)?;
        Ok(out)
    }
}

impl PartSink for SpooledPartStreams {
    fn write_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        if self.finished {
            return Err(std::io::Error::other("part streams already finished"));
        }
        if bytes.is_empty() {
            return Ok(());
        }

        match &mut self.storage {
            Storage::InMemory(data) => {
                let next_size = data.len().saturating_add(bytes.len());
                if self.spool_threshold.is_some_and(|max| next_size > max) {
                    let (path, mut file) = create_spool_tempfile(&self.temp_dir)?;
                    file.write_all(data)?;
                    file.write_all(bytes)?;
                    tracing::debug!(path = %path.display(), bytes = next_size, "spooled part to temporary file");
                    self.storage = Storage::SpooledTempFile {
                        path,
                        file: Some(file),
                        len: u64::try_from(next_size).unwrap_or(u64::MAX),
                    };
                } else {
                    data.extend_from_slice(bytes);
                }
            }
            Storage::SpooledTempFile { file, len, .. } => {
                let file = file
                    .as_mut()
                    .ok_or_else(|| std::io::Error::other("spool file already closed"))?;
                file.write_all(bytes)?;
                *len = len.saturating_add(u64::try_from(bytes.len()).unwrap_or(u64::MAX));
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> std::io::Result<()> {
        if let Storage::SpooledTempFile { file, .. } = &mut self.storage {
            if let Some(mut file) = file.take() {
                file.flush()?;
            }
        }
        self.finished = true;
        Ok(())
    }
}

impl PartSource for SpooledPartStreams {
    fn source(&mut self) -> std::io::Result<Box<dyn Read + '_>> {
        if !self.finished {
            return Err(std::io::Error::other("part streams not finished"));
        }
        match &self.storage {
            Storage::InMemory(data) => Ok(Box::new(data.as_slice())),
            Storage::SpooledTempFile { path, .. } => Ok(Box::new(File::open(path)?)),
        }
    }
}

impl Drop for SpooledPartStreams {
    fn drop(&mut self) {
        if let Storage::SpooledTempFile { path, file, .. } = &mut self.storage {
            drop(file.take());
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Factory for [`SpooledPartStreams`].
///
/// Form fields always stay in memory; the decoder bounds their size.
#[derive(Debug, Clone)]
pub struct DefaultPartStreamsFactory {
    spool_threshold: Option<usize>,
    temp_dir: PathBuf,
}

impl Default for DefaultPartStreamsFactory {
    fn default() -> Self {
        Self {
            spool_threshold: Some(DEFAULT_SPOOL_THRESHOLD),
            temp_dir: std::env::temp_dir(),
        }
    }
}

impl DefaultPartStreamsFactory {
    /// Create a factory with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory that never spools to disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            spool_threshold: None,
            ..Self::default()
        }
    }

    /// Set the size above which file parts are spooled (`None` disables
    /// spooling).
    #[must_use]
    pub fn spool_threshold(mut self, threshold: Option<usize>) -> Self {
        self.spool_threshold = threshold;
        self
    }

    /// Set the directory temporary files are created in.
    #[must_use]
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Get the spool threshold.
    #[must_use]
    pub fn get_spool_threshold(&self) -> Option<usize> {
        self.spool_threshold
    }

    /// Get the temporary directory.
    #[must_use]
    pub fn get_temp_dir(&self) -> &Path {
        &self.temp_dir
    }
}

impl PartStreamsFactory for DefaultPartStreamsFactory {
    type Streams = SpooledPartStreams;

    fn new_part_streams(
        &mut self,
        _context: &MultipartContext,
        _headers: &Headers,
        is_form_field: bool,
    ) -> std::io::Result<SpooledPartStreams> {
        let threshold = if is_form_field {
            None
        } else {
            self.spool_threshold
        };
        Ok(SpooledPartStreams::new(threshold, self.temp_dir.clone()))
    }
}

static SPOOL_COUNTER: AtomicU64 = AtomicU64::new(1);

fn create_spool_tempfile(dir: &Path) -> std::io::Result<(PathBuf, File)> {
    let ts_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    for _ in 0..32 {
        let counter = SPOOL_COUNTER.fetch_add(1, Ordering::Relaxed);
        let candidate = dir.join(format!(
            "streampart-{}-{ts_nanos}-{counter}.part",
            std::process::id()
        ));

        match OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&candidate)
        {
            Ok(file) => return Ok((candidate, file)),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        "failed to allocate unique spool file",
    ))
}

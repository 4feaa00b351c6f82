//! The extractor contract and the helpers extractors use to write artifacts.

use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::types::{ExtractorDescriptor, Pair, RequestData};

/// Errors reported by an extractor.
#[derive(thiserror::Error, Debug)]
pub enum ExtractorError {
    /// An artifact could not be written.
    #[error("cannot write {}: {source}", .path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Failed(String),
}

impl ExtractorError {
    pub fn failed(reason: impl Into<String>) -> Self {
        ExtractorError::Failed(reason.into())
    }

    pub(crate) fn write(path: &Path, source: std::io::Error) -> Self {
        ExtractorError::OutputWrite {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A pluggable component that selects pairs and turns them into artifacts.
///
/// An extractor is constructed once per run with its own output directory,
/// asked about every pair through [`matches`](Extractor::matches), and then
/// handed its matches through a single call to [`consume`](Extractor::consume).
pub trait Extractor {
    fn descriptor(&self) -> ExtractorDescriptor;

    /// Decide whether a request belongs to this extractor.
    fn matches(&self, request: &RequestData) -> Result<bool, ExtractorError>;

    /// Process every matched pair, in capture order.
    fn consume(&mut self, pairs: PairStream) -> Result<(), ExtractorError>;
}

/// Shared cancellation flag for one run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Single-pass sequence of the pairs an extractor matched.
///
/// Not `Clone`: the sequence can be walked once.
pub struct PairStream {
    pairs: std::vec::IntoIter<Arc<Pair>>,
    cancel: CancelToken,
    pulled: Arc<AtomicUsize>,
}

impl PairStream {
    pub fn new(pairs: Vec<Arc<Pair>>, cancel: CancelToken) -> Self {
        Self {
            pairs: pairs.into_iter(),
            cancel,
            pulled: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Count of pairs taken from this stream, readable after the stream is gone.
    pub(crate) fn pulled_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.pulled)
    }

    /// Whether the run has been cancelled. Extractors may stop early and
    /// write what they have.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Iterator for PairStream {
    type Item = Arc<Pair>;

    fn next(&mut self) -> Option<Self::Item> {
        let pair = self.pairs.next()?;
        self.pulled.fetch_add(1, Ordering::Relaxed);
        Some(pair)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.pairs.size_hint()
    }
}

impl ExactSizeIterator for PairStream {}

impl fmt::Debug for PairStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairStream")
            .field("remaining", &self.pairs.len())
            .finish()
    }
}

/// Builds an extractor inside the output directory it is given.
pub type ExtractorFactory =
    Box<dyn FnOnce(PathBuf) -> Result<Box<dyn Extractor>, ExtractorError>>;

/// An extractor that has been described but not yet constructed.
pub struct ExtractorCandidate {
    pub descriptor: ExtractorDescriptor,
    pub factory: ExtractorFactory,
}

impl ExtractorCandidate {
    pub fn new<F>(descriptor: ExtractorDescriptor, factory: F) -> Self
    where
        F: FnOnce(PathBuf) -> Result<Box<dyn Extractor>, ExtractorError> + 'static,
    {
        Self {
            descriptor,
            factory: Box::new(factory),
        }
    }
}

impl fmt::Debug for ExtractorCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractorCandidate")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Create an extractor's output directory.
pub fn ensure_dir(dir: &Path) -> Result<(), ExtractorError> {
    fs::create_dir_all(dir).map_err(|e| ExtractorError::write(dir, e))
}

/// Write `value` as pretty JSON to `dir/file_name`.
pub fn write_json<T: Serialize + ?Sized>(
    dir: &Path,
    file_name: &str,
    value: &T,
) -> Result<PathBuf, ExtractorError> {
    let path = dir.join(file_name);
    let file = File::create(&path).map_err(|e| ExtractorError::write(&path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer
        .flush()
        .map_err(|e| ExtractorError::write(&path, e))?;
    Ok(path)
}

/// Append-only JSON-lines artifact.
pub struct JsonLinesWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    lines: usize,
}

impl JsonLinesWriter {
    pub fn create(path: PathBuf) -> Result<Self, ExtractorError> {
        let file = File::create(&path).map_err(|e| ExtractorError::write(&path, e))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            lines: 0,
        })
    }

    pub fn write<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ExtractorError> {
        serde_json::to_writer(&mut self.writer, value)?;
        self.writer
            .write_all(b"\n")
            .map_err(|e| ExtractorError::write(&self.path, e))?;
        self.lines += 1;
        Ok(())
    }

    /// Raw bytes followed by a newline, for payloads that are not JSON.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), ExtractorError> {
        self.writer
            .write_all(bytes)
            .and_then(|_| self.writer.write_all(b"\n"))
            .map_err(|e| ExtractorError::write(&self.path, e))?;
        self.lines += 1;
        Ok(())
    }

    /// Flush and close, returning the number of lines written.
    pub fn finish(mut self) -> Result<usize, ExtractorError> {
        self.writer
            .flush()
            .map_err(|e| ExtractorError::write(&self.path, e))?;
        Ok(self.lines)
    }
}

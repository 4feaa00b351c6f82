//! Dispatch engine: drives one container through the correlator and fans pairs out to extractors.
//!
//! Every pair is offered to every live extractor's predicate once, in
//! registration order. Accepted pairs are buffered per extractor. When the
//! pair stream is exhausted, each extractor with at least one match is handed
//! its buffer through a single `consume` call. Errors and panics are contained
//! to the extractor that raised them.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::Serialize;

use crate::container::ArchiveReader;
use crate::correlator::{correlate, CorrelationStats};
use crate::extractor::{CancelToken, ExtractorError, PairStream};
use crate::registry::{ExtractorRegistry, LoadedExtractor};
use crate::types::{CapturedEntry, Pair, WarcexError, WarcexResult};

/// How an extractor failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PluginRuntime,
    OutputWrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    /// No pair matched, so `consume` was never called.
    NotInvoked,
    Failed { kind: FailureKind, message: String },
}

/// Per-extractor result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractorReport {
    pub name: String,
    pub output_dir: PathBuf,
    pub invoked: bool,
    /// Pairs the predicate accepted.
    pub matched: usize,
    /// Pairs the extractor actually pulled from its stream.
    pub delivered: usize,
    pub outcome: Outcome,
}

impl ExtractorReport {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { .. })
    }

    /// The failure as a pipeline error, if the extractor failed.
    pub fn error(&self) -> Option<WarcexError> {
        match &self.outcome {
            Outcome::Failed {
                kind: FailureKind::PluginRuntime,
                message,
            } => Some(WarcexError::PluginRuntime {
                extractor: self.name.clone(),
                reason: message.clone(),
            }),
            Outcome::Failed {
                kind: FailureKind::OutputWrite,
                message,
            } => Some(WarcexError::OutputWrite {
                extractor: self.name.clone(),
                reason: message.clone(),
            }),
            _ => None,
        }
    }
}

/// Result of running one container.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub container: PathBuf,
    pub stats: CorrelationStats,
    pub cancelled: bool,
    pub extractors: Vec<ExtractorReport>,
}

impl RunReport {
    /// No extractor was loaded, so nothing was dispatched.
    pub fn nothing_to_do(&self) -> bool {
        self.extractors.is_empty()
    }

    pub fn failures(&self) -> usize {
        self.extractors.iter().filter(|e| e.is_failure()).count()
    }

    pub fn invoked(&self) -> usize {
        self.extractors.iter().filter(|e| e.invoked).count()
    }
}

struct Slot {
    loaded: LoadedExtractor,
    matched: Vec<Arc<Pair>>,
    failure: Option<(FailureKind, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchEngine {
    cancel: CancelToken,
}

impl DispatchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an externally controlled cancellation token.
    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self { cancel }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Open `container` and dispatch its pairs to the registry's extractors.
    pub fn run(&self, container: &Path, registry: ExtractorRegistry) -> WarcexResult<RunReport> {
        let reader = ArchiveReader::open(container)?;
        self.run_entries(container, reader, registry)
    }

    /// Dispatch an already opened entry stream.
    pub fn run_entries<I>(
        &self,
        container: &Path,
        entries: I,
        registry: ExtractorRegistry,
    ) -> WarcexResult<RunReport>
    where
        I: IntoIterator<Item = WarcexResult<CapturedEntry>>,
    {
        let mut slots: Vec<Slot> = registry
            .into_entries()
            .into_iter()
            .map(|loaded| Slot {
                loaded,
                matched: Vec::new(),
                failure: None,
            })
            .collect();

        if slots.is_empty() {
            tracing::warn!("No extractors loaded for {}, nothing to do", container.display());
            return Ok(RunReport {
                container: container.to_path_buf(),
                stats: CorrelationStats::default(),
                cancelled: false,
                extractors: Vec::new(),
            });
        }

        tracing::info!(
            "Processing {} with {} extractor(s)",
            container.display(),
            slots.len()
        );

        let mut pairs = correlate(entries).with_cancel(self.cancel.clone());
        for item in pairs.by_ref() {
            let pair = Arc::new(item?);
            for slot in slots.iter_mut().filter(|s| s.failure.is_none()) {
                offer(slot, &pair);
            }
        }
        let cancelled = pairs.was_cancelled();
        let stats = pairs.into_stats();

        tracing::info!(
            "Correlated {} pair(s) from {} request(s) and {} response(s)",
            stats.pairs,
            stats.requests,
            stats.responses
        );

        let extractors = slots
            .into_iter()
            .map(|slot| self.deliver(slot))
            .collect();

        Ok(RunReport {
            container: container.to_path_buf(),
            stats,
            cancelled,
            extractors,
        })
    }

    fn deliver(&self, slot: Slot) -> ExtractorReport {
        let Slot {
            loaded,
            matched,
            failure,
        } = slot;
        let LoadedExtractor {
            descriptor,
            output_dir,
            mut extractor,
        } = loaded;
        let name = descriptor.name;

        let mut report = ExtractorReport {
            name: name.clone(),
            output_dir,
            invoked: false,
            matched: 0,
            delivered: 0,
            outcome: Outcome::NotInvoked,
        };

        if let Some((kind, message)) = failure {
            report.outcome = Outcome::Failed { kind, message };
            return report;
        }
        if matched.is_empty() {
            tracing::debug!("{name}: no matching pairs, not invoked");
            return report;
        }

        report.invoked = true;
        report.matched = matched.len();
        tracing::info!("{name}: consuming {} pair(s)", matched.len());

        let stream = PairStream::new(matched, self.cancel.clone());
        let pulled = stream.pulled_counter();
        let result = catch_unwind(AssertUnwindSafe(|| extractor.consume(stream)));
        report.delivered = pulled.load(Ordering::Relaxed);
        report.outcome = match result {
            Ok(Ok(())) => Outcome::Succeeded,
            Ok(Err(e)) => {
                let (kind, message) = classify(&e);
                Outcome::Failed { kind, message }
            }
            Err(payload) => Outcome::Failed {
                kind: FailureKind::PluginRuntime,
                message: format!("panicked: {}", panic_message(payload.as_ref())),
            },
        };

        if let Some(error) = report.error() {
            tracing::error!("{error}");
        }
        report
    }
}

/// Evaluate one extractor's predicate for one pair.
fn offer(slot: &mut Slot, pair: &Arc<Pair>) {
    let extractor = &slot.loaded.extractor;
    let result = catch_unwind(AssertUnwindSafe(|| extractor.matches(&pair.request)));
    let failure = match result {
        Ok(Ok(true)) => {
            slot.matched.push(Arc::clone(pair));
            return;
        }
        Ok(Ok(false)) => return,
        Ok(Err(e)) => classify(&e),
        Err(payload) => (
            FailureKind::PluginRuntime,
            format!("panicked: {}", panic_message(payload.as_ref())),
        ),
    };

    tracing::error!(
        "Extractor '{}' failed while matching {}: {}; it will not be invoked",
        slot.loaded.descriptor.name,
        pair.request.url,
        failure.1
    );
    slot.matched.clear();
    slot.failure = Some(failure);
}

fn classify(error: &ExtractorError) -> (FailureKind, String) {
    match error {
        ExtractorError::OutputWrite { .. } => (FailureKind::OutputWrite, error.to_string()),
        _ => (FailureKind::PluginRuntime, error.to_string()),
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

//! Pair correlator: rebuilds request/response transactions from interleaved entries.
//!
//! Requests are queued per target URI. A response pairs with the oldest queued
//! request for the same URI; a response with nothing queued is an orphan and is
//! dropped. Requests still queued at end of stream are dropped as incomplete.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use crate::extractor::CancelToken;
use crate::types::{
    CapturedEntry, EntryKind, Pair, RequestData, ResponseData, WarcexError, WarcexResult,
};

/// Per-URI correlation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationState {
    /// No request is waiting for a response.
    Waiting,
    /// This many requests are queued, oldest first.
    Pending(usize),
}

/// Counters kept while correlating one container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CorrelationStats {
    pub requests: u64,
    pub responses: u64,
    pub pairs: u64,
    pub orphan_responses: u64,
    pub incomplete_requests: u64,
    pub skipped_records: u64,
}

#[derive(Debug, Default)]
pub struct PairCorrelator {
    pending: HashMap<String, VecDeque<CapturedEntry>>,
    stats: CorrelationStats,
    finished: bool,
}

impl PairCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one entry. Returns the pair it completes, if any.
    pub fn push(&mut self, entry: CapturedEntry) -> Option<Pair> {
        match entry.kind {
            EntryKind::Request => {
                self.stats.requests += 1;
                self.pending
                    .entry(entry.target_uri.clone())
                    .or_default()
                    .push_back(entry);
                None
            }
            EntryKind::Response => {
                self.stats.responses += 1;
                let request = match self.pending.get_mut(&entry.target_uri) {
                    Some(queue) => {
                        let request = queue.pop_front();
                        if queue.is_empty() {
                            self.pending.remove(&entry.target_uri);
                        }
                        request
                    }
                    None => None,
                };

                let Some(request) = request else {
                    self.stats.orphan_responses += 1;
                    tracing::warn!(
                        "Dropping orphan response for {} (entry {})",
                        entry.target_uri,
                        entry.capture_sequence
                    );
                    return None;
                };

                self.stats.pairs += 1;
                Some(build_pair(request, entry))
            }
        }
    }

    /// Count a record the reader could not parse.
    pub fn record_skipped(&mut self, error: &WarcexError) {
        self.stats.skipped_records += 1;
        tracing::warn!("Skipping record: {error}");
    }

    /// Close the stream, dropping every request still waiting for a response.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let mut dropped: Vec<_> = self.pending.drain().collect();
        dropped.sort_by(|a, b| a.0.cmp(&b.0));
        for (uri, queue) in dropped {
            self.stats.incomplete_requests += queue.len() as u64;
            tracing::warn!(
                "Dropping {} incomplete request(s) for {uri}: no response captured",
                queue.len()
            );
        }
    }

    pub fn state(&self, target_uri: &str) -> CorrelationState {
        match self.pending.get(target_uri) {
            Some(queue) if !queue.is_empty() => CorrelationState::Pending(queue.len()),
            _ => CorrelationState::Waiting,
        }
    }

    pub fn stats(&self) -> &CorrelationStats {
        &self.stats
    }
}

fn build_pair(request: CapturedEntry, response: CapturedEntry) -> Pair {
    let sequence = request.capture_sequence;
    let response_sequence = response.capture_sequence;
    let response = ResponseData::from_entry(response);
    let request = RequestData::from_entry(request, response.content_type());

    Pair {
        sequence,
        response_sequence,
        request,
        response,
    }
}

/// Lazy pair stream over an entry stream.
///
/// Record parse errors are counted and skipped. Fatal errors are passed
/// through and end the stream.
pub struct Pairs<I> {
    entries: I,
    correlator: PairCorrelator,
    cancel: Option<CancelToken>,
    cancelled: bool,
    done: bool,
}

/// Correlate an entry stream into pairs.
pub fn correlate<I>(entries: I) -> Pairs<I::IntoIter>
where
    I: IntoIterator<Item = WarcexResult<CapturedEntry>>,
{
    Pairs {
        entries: entries.into_iter(),
        correlator: PairCorrelator::new(),
        cancel: None,
        cancelled: false,
        done: false,
    }
}

impl<I> Pairs<I> {
    /// Stop pulling entries once `token` is set.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn stats(&self) -> &CorrelationStats {
        self.correlator.stats()
    }

    /// Whether the stream stopped early because of cancellation.
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Release the entry source, returning the final counters.
    pub fn into_stats(mut self) -> CorrelationStats {
        self.correlator.finish();
        self.correlator.stats
    }
}

impl<I> Iterator for Pairs<I>
where
    I: Iterator<Item = WarcexResult<CapturedEntry>>,
{
    type Item = WarcexResult<Pair>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                tracing::info!("Cancellation requested, no further entries will be read");
                self.cancelled = true;
                self.done = true;
                break;
            }

            match self.entries.next() {
                None => self.done = true,
                Some(Ok(entry)) => {
                    if let Some(pair) = self.correlator.push(entry) {
                        return Some(Ok(pair));
                    }
                }
                Some(Err(e)) if e.is_fatal() => {
                    self.done = true;
                    return Some(Err(e));
                }
                Some(Err(e)) => self.correlator.record_skipped(&e),
            }
        }

        self.correlator.finish();
        None
    }
}

//! WARC record framing and conversion of records into captured entries.

use std::io::{BufRead, Read};

use crate::http::{parse_message, StartLine};
use crate::types::{CapturedEntry, EntryKind, Headers};

/// One framed WARC record: named headers plus the raw content block.
#[derive(Debug, Clone)]
pub(crate) struct WarcRecord {
    pub headers: Headers,
    pub block: Vec<u8>,
}

impl WarcRecord {
    pub fn record_type(&self) -> Option<&str> {
        self.headers.get("WARC-Type")
    }

    pub fn target_uri(&self) -> Option<&str> {
        self.headers
            .get("WARC-Target-URI")
            .map(|u| u.trim_start_matches('<').trim_end_matches('>'))
    }
}

/// Why a record could not be produced.
#[derive(Debug)]
pub(crate) enum RecordError {
    /// The record is unusable but the stream can continue.
    Malformed(String),
    /// The underlying stream failed; nothing more can be read from it.
    Io(std::io::Error),
}

/// Streaming reader over consecutive WARC records.
pub(crate) struct WarcRecordReader<R> {
    reader: R,
    pending_line: Option<String>,
    done: bool,
}

impl<R: BufRead> WarcRecordReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending_line: None,
            done: false,
        }
    }

    fn read_line(&mut self) -> Result<Option<String>, RecordError> {
        if let Some(line) = self.pending_line.take() {
            return Ok(Some(line));
        }
        let mut buf = Vec::new();
        let n = self
            .reader
            .read_until(b'\n', &mut buf)
            .map_err(RecordError::Io)?;
        if n == 0 {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&buf);
        Ok(Some(line.trim_end_matches(|c: char| c == '\r' || c == '\n').to_string()))
    }

    /// Skip forward to the next line that opens a record and keep it for the next read.
    fn resync(&mut self) -> Result<(), RecordError> {
        while let Some(line) = self.read_line()? {
            if line.starts_with("WARC/") {
                self.pending_line = Some(line);
                return Ok(());
            }
        }
        self.done = true;
        Ok(())
    }

    fn read_record(&mut self) -> Result<Option<WarcRecord>, RecordError> {
        let version = loop {
            match self.read_line()? {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => break line,
            }
        };

        if !version.starts_with("WARC/") {
            self.resync()?;
            return Err(RecordError::Malformed(format!(
                "expected WARC version line, found {:?}",
                truncate(&version)
            )));
        }

        let mut headers = Headers::new();
        loop {
            match self.read_line()? {
                None => {
                    self.done = true;
                    return Err(RecordError::Malformed(
                        "stream ended inside record headers".to_string(),
                    ));
                }
                Some(line) if line.is_empty() => break,
                Some(line) => {
                    if let Some((name, value)) = line.split_once(':') {
                        headers.push(name.trim(), value.trim());
                    }
                }
            }
        }

        let length = headers
            .get("Content-Length")
            .and_then(|v| v.trim().parse::<usize>().ok());
        let Some(length) = length else {
            self.resync()?;
            return Err(RecordError::Malformed(
                "missing or invalid Content-Length".to_string(),
            ));
        };

        let mut block = Vec::with_capacity(length.min(1 << 20));
        let read = (&mut self.reader)
            .take(length as u64)
            .read_to_end(&mut block)
            .map_err(RecordError::Io)?;
        if read < length {
            self.done = true;
            return Err(RecordError::Malformed(format!(
                "record truncated: expected {length} bytes, found {read}"
            )));
        }

        Ok(Some(WarcRecord { headers, block }))
    }
}

impl<R: BufRead> Iterator for WarcRecordReader<R> {
    type Item = Result<WarcRecord, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(RecordError::Io(e)) => {
                self.done = true;
                Some(Err(RecordError::Io(e)))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

fn truncate(line: &str) -> String {
    line.chars().take(60).collect()
}

/// Convert a WARC record into a captured entry.
///
/// Returns `Ok(None)` for records that carry no HTTP transaction half
/// (warcinfo, metadata, resource, revisit, non-HTTP payloads).
pub(crate) fn entry_from_record(
    record: WarcRecord,
    capture_sequence: u64,
) -> Result<Option<CapturedEntry>, String> {
    let kind = match record.record_type().map(|t| t.to_ascii_lowercase()).as_deref() {
        Some("request") => EntryKind::Request,
        Some("response") => EntryKind::Response,
        other => {
            tracing::debug!("Skipping WARC record of type {:?}", other.unwrap_or("<none>"));
            return Ok(None);
        }
    };

    if let Some(ct) = record.headers.get("Content-Type") {
        if !ct.trim().to_ascii_lowercase().starts_with("application/http") {
            tracing::debug!("Skipping non-HTTP {kind:?} record with content type {ct:?}");
            return Ok(None);
        }
    }

    let target_uri = record
        .target_uri()
        .filter(|u| !u.is_empty())
        .ok_or_else(|| "record has no WARC-Target-URI".to_string())?
        .to_string();
    let record_id = record.headers.get("WARC-Record-ID").map(str::to_string);
    let captured_at = record.headers.get("WARC-Date").map(str::to_string);

    let message = parse_message(&record.block).map_err(|e| format!("{target_uri}: {e}"))?;

    let (http_method, status_code) = match (kind, message.start) {
        (EntryKind::Request, StartLine::Request { method, .. }) => (Some(method), None),
        (EntryKind::Response, StartLine::Status { code }) => (None, Some(code)),
        (EntryKind::Request, StartLine::Status { .. }) => {
            return Err(format!("{target_uri}: request record holds a status line"));
        }
        (EntryKind::Response, StartLine::Request { .. }) => {
            return Err(format!("{target_uri}: response record holds a request line"));
        }
    };

    Ok(Some(CapturedEntry {
        kind,
        target_uri,
        http_method,
        status_code,
        headers: message.headers,
        body: message.body,
        capture_sequence,
        record_id,
        captured_at,
    }))
}

//! Core data types for captured entries, correlated pairs and extractor descriptors.

use std::path::PathBuf;

use serde::{Deserialize, Serialize, Serializer};

/// Ordered HTTP header list with case-insensitive lookup.
///
/// Names keep the case they were captured with; duplicates are preserved in
/// capture order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a header, keeping any existing values for the same name.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in capture order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Mutable access to the most recently pushed value.
    pub(crate) fn last_value_mut(&mut self) -> Option<&mut String> {
        self.0.last_mut().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Whether a captured entry is the request or the response half of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Request,
    Response,
}

/// One raw request or response record read from a container.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedEntry {
    pub kind: EntryKind,
    pub target_uri: String,
    /// Set for requests only.
    pub http_method: Option<String>,
    /// Set for responses only.
    pub status_code: Option<u16>,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// Position of this entry in the container, assigned by the reader.
    pub capture_sequence: u64,
    pub record_id: Option<String>,
    pub captured_at: Option<String>,
}

impl CapturedEntry {
    /// Create a request entry with no headers and an empty body.
    pub fn request(capture_sequence: u64, target_uri: &str, method: &str) -> Self {
        Self {
            kind: EntryKind::Request,
            target_uri: target_uri.to_string(),
            http_method: Some(method.to_string()),
            status_code: None,
            headers: Headers::new(),
            body: Vec::new(),
            capture_sequence,
            record_id: None,
            captured_at: None,
        }
    }

    /// Create a response entry with no headers and an empty body.
    pub fn response(capture_sequence: u64, target_uri: &str, status_code: u16) -> Self {
        Self {
            kind: EntryKind::Response,
            target_uri: target_uri.to_string(),
            http_method: None,
            status_code: Some(status_code),
            headers: Headers::new(),
            body: Vec::new(),
            capture_sequence,
            record_id: None,
            captured_at: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// Request body decoded according to its method and content type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PostData {
    Empty,
    Form(Vec<(String, String)>),
    Json(serde_json::Value),
    Raw(#[serde(serialize_with = "serialize_lossy")] Vec<u8>),
}

impl PostData {
    /// Decode a request body.
    ///
    /// Only `POST`, `PUT` and `PATCH` bodies are parsed. Form and JSON bodies
    /// that fail to parse are kept raw.
    pub fn from_body(method: &str, content_type: Option<&str>, body: &[u8]) -> Self {
        if body.is_empty() {
            return PostData::Empty;
        }

        let parses_body = ["POST", "PUT", "PATCH"]
            .iter()
            .any(|m| method.eq_ignore_ascii_case(m));
        if !parses_body {
            return PostData::Raw(body.to_vec());
        }

        let mime = content_type
            .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
            .unwrap_or_default();

        if mime == "application/x-www-form-urlencoded" {
            if let Ok(text) = std::str::from_utf8(body) {
                let pairs = url::form_urlencoded::parse(text.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                return PostData::Form(pairs);
            }
        } else if mime.contains("json") {
            if let Ok(value) = serde_json::from_slice(body) {
                return PostData::Json(value);
            }
        }

        PostData::Raw(body.to_vec())
    }

    /// First form value for `key`, if the body was form encoded.
    pub fn form_value(&self, key: &str) -> Option<&str> {
        match self {
            PostData::Form(pairs) => pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, PostData::Empty)
    }
}

fn serialize_lossy<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

/// Request view handed to extractor predicates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestData {
    pub url: String,
    pub method: String,
    pub headers: Headers,
    pub post_data: PostData,
    /// Content type of the paired response, empty when the response has none.
    pub response_type: String,
    pub timestamp: Option<String>,
}

impl RequestData {
    /// Build the request view from a request entry and its paired response's content type.
    pub fn from_entry(entry: CapturedEntry, response_type: &str) -> Self {
        let method = entry.http_method.unwrap_or_else(|| "GET".to_string());
        let post_data =
            PostData::from_body(&method, entry.headers.get("Content-Type"), &entry.body);

        Self {
            url: entry.target_uri,
            method,
            headers: entry.headers,
            post_data,
            response_type: response_type.to_string(),
            timestamp: entry.captured_at,
        }
    }

    /// Decoded query-string pairs of the request URL.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let query = match url::Url::parse(&self.url) {
            Ok(parsed) => parsed.query().unwrap_or("").to_string(),
            Err(_) => self
                .url
                .split_once('?')
                .map(|(_, q)| q.split('#').next().unwrap_or("").to_string())
                .unwrap_or_default(),
        };

        url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    /// The URL without its query string or fragment.
    pub fn endpoint(&self) -> &str {
        let end = self
            .url
            .find(|c: char| c == '?' || c == '#')
            .unwrap_or(self.url.len());
        &self.url[..end]
    }
}

/// Response view handed to extractors.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseData {
    pub status_code: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl ResponseData {
    pub fn from_entry(entry: CapturedEntry) -> Self {
        Self {
            status_code: entry.status_code.unwrap_or(0),
            headers: entry.headers,
            body: entry.body,
        }
    }

    /// Declared content type, empty when absent.
    pub fn content_type(&self) -> &str {
        self.headers.get("Content-Type").unwrap_or("")
    }

    /// Declared `Content-Length`, if present and numeric.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get("Content-Length")
            .and_then(|v| v.trim().parse().ok())
    }

    /// Parse the body as JSON when the content type says it is JSON.
    pub fn json(&self) -> Option<serde_json::Value> {
        if !self.content_type().to_ascii_lowercase().contains("json") {
            return None;
        }
        serde_json::from_slice(&self.body).ok()
    }

    /// Decode the body as a single JSON document or as JSON lines.
    ///
    /// Returns `None` for an empty body, a body that is not UTF-8, or one
    /// where any non-blank line fails to parse.
    pub fn json_documents(&self) -> Option<Vec<serde_json::Value>> {
        if self.body.is_empty() {
            return None;
        }
        let text = std::str::from_utf8(&self.body).ok()?;

        if let Ok(value) = serde_json::from_str(text) {
            return Some(vec![value]);
        }

        let mut docs = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            docs.push(serde_json::from_str(line).ok()?);
        }
        if docs.is_empty() {
            None
        } else {
            Some(docs)
        }
    }
}

/// A correlated request/response transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Pair {
    /// Capture sequence of the request entry.
    pub sequence: u64,
    /// Capture sequence of the response entry.
    pub response_sequence: u64,
    pub request: RequestData,
    pub response: ResponseData,
}

/// Static description of an extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractorDescriptor {
    pub name: String,
    pub version: u32,
    pub description: String,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub output_data: Vec<String>,
}

/// Errors that can occur in the replay pipeline.
#[derive(thiserror::Error, Debug)]
pub enum WarcexError {
    /// The container cannot be opened or its index is unreadable. Fatal for a run.
    #[error("Archive format error in {}: {reason}", .path.display())]
    ArchiveFormat { path: PathBuf, reason: String },

    /// A single record could not be parsed and was skipped.
    #[error("Record parse error at record {record}: {reason}")]
    RecordParse { record: u64, reason: String },

    #[error("Failed to load extractor '{source_name}': {reason}")]
    PluginLoad { source_name: String, reason: String },

    #[error("Extractor '{extractor}' failed: {reason}")]
    PluginRuntime { extractor: String, reason: String },

    #[error("Extractor '{extractor}' could not write output: {reason}")]
    OutputWrite { extractor: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WarcexError {
    /// Whether this error aborts the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WarcexError::ArchiveFormat { .. })
    }

    pub(crate) fn archive(path: &std::path::Path, reason: impl Into<String>) -> Self {
        WarcexError::ArchiveFormat {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub(crate) fn load(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        WarcexError::PluginLoad {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience result type.
pub type WarcexResult<T> = Result<T, WarcexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_case_insensitive() {
        let headers: Headers = vec![("Content-Type", "text/html"), ("Set-Cookie", "a=1")]
            .into_iter()
            .collect();
        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
        assert!(headers.get("Accept").is_none());
    }

    #[test]
    fn test_headers_keep_duplicates_in_order() {
        let mut headers = Headers::new();
        headers.push("Set-Cookie", "a=1");
        headers.push("set-cookie", "b=2");
        let all: Vec<_> = headers.get_all("SET-COOKIE").collect();
        assert_eq!(all, vec!["a=1", "b=2"]);
        assert_eq!(headers.get("Set-Cookie"), Some("a=1"));
    }

    #[test]
    fn test_post_data_form() {
        let data = PostData::from_body(
            "POST",
            Some("application/x-www-form-urlencoded; charset=UTF-8"),
            b"user=alice&msg=hello+world",
        );
        assert_eq!(data.form_value("user"), Some("alice"));
        assert_eq!(data.form_value("msg"), Some("hello world"));
    }

    #[test]
    fn test_post_data_json() {
        let data = PostData::from_body("POST", Some("application/json"), br#"{"a": 1}"#);
        assert_eq!(data, PostData::Json(serde_json::json!({"a": 1})));
    }

    #[test]
    fn test_post_data_bad_json_is_raw() {
        let data = PostData::from_body("POST", Some("application/json"), b"{not json");
        assert_eq!(data, PostData::Raw(b"{not json".to_vec()));
    }

    #[test]
    fn test_post_data_get_is_not_parsed() {
        let data = PostData::from_body("GET", Some("application/json"), br#"{"a": 1}"#);
        assert!(matches!(data, PostData::Raw(_)));
        assert!(PostData::from_body("POST", None, b"").is_empty());
    }

    #[test]
    fn test_query_pairs_and_endpoint() {
        let entry = CapturedEntry::request(0, "https://example.com/search?q=rust&page=2#top", "GET");
        let request = RequestData::from_entry(entry, "text/html");
        assert_eq!(
            request.query_pairs(),
            vec![
                ("q".to_string(), "rust".to_string()),
                ("page".to_string(), "2".to_string())
            ]
        );
        assert_eq!(request.endpoint(), "https://example.com/search");
        assert_eq!(request.response_type, "text/html");
    }

    #[test]
    fn test_json_documents() {
        let single = ResponseData {
            status_code: 200,
            headers: Headers::new(),
            body: br#"{"data": 1}"#.to_vec(),
        };
        assert_eq!(single.json_documents().map(|d| d.len()), Some(1));

        let lines = ResponseData {
            body: b"{\"a\": 1}\n{\"b\": 2}\n".to_vec(),
            ..single.clone()
        };
        assert_eq!(lines.json_documents().map(|d| d.len()), Some(2));

        let broken = ResponseData {
            body: b"{\"a\": 1}\nnope\n".to_vec(),
            ..single.clone()
        };
        assert!(broken.json_documents().is_none());

        let empty = ResponseData {
            body: Vec::new(),
            ..single
        };
        assert!(empty.json_documents().is_none());
    }

    #[test]
    fn test_response_json_requires_content_type() {
        let mut response = ResponseData::from_entry(
            CapturedEntry::response(1, "https://example.com/api", 200).with_body(r#"{"ok":true}"#),
        );
        assert!(response.json().is_none());
        response.headers.push("Content-Type", "application/json");
        assert_eq!(response.json(), Some(serde_json::json!({"ok": true})));
    }
}

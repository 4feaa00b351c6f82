//! Loading externally supplied extractors from JSON manifests.
//!
//! A manifest describes an extractor declaratively:
//!
//! ```json
//! {
//!   "name": "search-api",
//!   "version": 1,
//!   "description": "Search API responses",
//!   "match": {
//!     "endpoints": ["https://example.com/api/search*", "//v[0-9]+/items$/"],
//!     "methods": ["GET"],
//!     "content_types": ["json"]
//!   },
//!   "output": { "file": "search.jsonl", "format": "jsonl" }
//! }
//! ```

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::extractor::{
    ensure_dir, write_json, Extractor, ExtractorCandidate, ExtractorError, JsonLinesWriter,
    PairStream,
};
use crate::types::{ExtractorDescriptor, Pair, PostData, RequestData, WarcexError, WarcexResult};

/// Turns an external source into an extractor candidate.
pub trait ExtractorLoader {
    fn load(&self, path: &Path) -> WarcexResult<ExtractorCandidate>;
}

/// Loader for JSON extractor manifests.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestLoader;

impl ExtractorLoader for ManifestLoader {
    fn load(&self, path: &Path) -> WarcexResult<ExtractorCandidate> {
        let label = path.display().to_string();
        let manifest = ExtractorManifest::from_path(path)?;
        let rules = manifest
            .compile()
            .map_err(|reason| WarcexError::load(&label, reason))?;
        let descriptor = manifest.descriptor();

        tracing::debug!("Loaded manifest {} from {label}", descriptor.name);

        let built_descriptor = descriptor.clone();
        Ok(ExtractorCandidate::new(descriptor, move |output_dir| {
            Ok(Box::new(ManifestExtractor::new(built_descriptor, rules, output_dir))
                as Box<dyn Extractor>)
        }))
    }
}

/// On-disk manifest format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractorManifest {
    pub name: String,
    pub version: u32,
    pub description: String,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub output_data: Vec<String>,
    #[serde(rename = "match")]
    pub matcher: MatchSection,
    #[serde(default)]
    pub output: OutputSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchSection {
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    /// Substrings of the response content type, compared case-insensitively.
    #[serde(default)]
    pub content_types: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSection {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    #[default]
    Jsonl,
}

impl ExtractorManifest {
    pub fn from_path(path: &Path) -> WarcexResult<Self> {
        let label = path.display().to_string();
        let text = std::fs::read_to_string(path)
            .map_err(|e| WarcexError::load(&label, format!("cannot read manifest: {e}")))?;
        serde_json::from_str(&text)
            .map_err(|e| WarcexError::load(&label, format!("invalid manifest: {e}")))
    }

    /// Name of the artifact the extractor writes.
    pub fn output_file(&self) -> String {
        self.output.file.clone().unwrap_or_else(|| match self.output.format {
            OutputFormat::Json => "records.json".to_string(),
            OutputFormat::Jsonl => "records.jsonl".to_string(),
        })
    }

    pub fn descriptor(&self) -> ExtractorDescriptor {
        let output_data = if self.output_data.is_empty() {
            vec![self.output_file()]
        } else {
            self.output_data.clone()
        };
        ExtractorDescriptor {
            name: self.name.clone(),
            version: self.version,
            description: self.description.clone(),
            instructions: self.instructions.clone(),
            output_data,
        }
    }

    /// Validate the match and output sections.
    pub fn compile(&self) -> Result<MatchRules, String> {
        if self.matcher.endpoints.is_empty() {
            return Err("match.endpoints must list at least one pattern".to_string());
        }
        let endpoints = self
            .matcher
            .endpoints
            .iter()
            .map(|p| EndpointPattern::parse(p))
            .collect::<Result<Vec<_>, _>>()?;

        let file = self.output_file();
        let has_separator = file.contains(|c: char| c == '/' || c == '\\');
        if file.is_empty() || has_separator || file == "." || file == ".." {
            return Err(format!("output.file must be a plain file name, got {file:?}"));
        }

        Ok(MatchRules {
            endpoints,
            methods: self
                .matcher
                .methods
                .iter()
                .map(|m| m.to_ascii_uppercase())
                .collect(),
            content_types: self
                .matcher
                .content_types
                .iter()
                .map(|c| c.to_ascii_lowercase())
                .collect(),
            file,
            format: self.output.format,
        })
    }
}

/// URL pattern: an exact URL, a prefix ending in `*`, or a regular expression in `/…/`.
#[derive(Debug, Clone)]
pub enum EndpointPattern {
    Exact(String),
    Prefix(String),
    Regex(Regex),
}

impl EndpointPattern {
    pub fn parse(pattern: &str) -> Result<Self, String> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err("endpoint pattern must not be empty".to_string());
        }
        if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
            let body = &pattern[1..pattern.len() - 1];
            return Regex::new(body)
                .map(EndpointPattern::Regex)
                .map_err(|e| format!("invalid endpoint regex {pattern:?}: {e}"));
        }
        if let Some(prefix) = pattern.strip_suffix('*') {
            return Ok(EndpointPattern::Prefix(prefix.to_string()));
        }
        Ok(EndpointPattern::Exact(pattern.to_string()))
    }

    /// Exact patterns ignore the query string; the others see the full URL.
    pub fn matches(&self, request: &RequestData) -> bool {
        match self {
            EndpointPattern::Exact(url) => {
                request.endpoint() == url.as_str() || request.url == *url
            }
            EndpointPattern::Prefix(prefix) => request.url.starts_with(prefix.as_str()),
            EndpointPattern::Regex(re) => re.is_match(&request.url),
        }
    }
}

/// Compiled match and output rules of a manifest.
#[derive(Debug, Clone)]
pub struct MatchRules {
    endpoints: Vec<EndpointPattern>,
    methods: Vec<String>,
    content_types: Vec<String>,
    file: String,
    format: OutputFormat,
}

impl MatchRules {
    pub fn accepts(&self, request: &RequestData) -> bool {
        if !self.methods.is_empty() && !self.methods.iter().any(|m| *m == request.method) {
            return false;
        }
        if !self.content_types.is_empty() {
            let response_type = request.response_type.to_ascii_lowercase();
            if !self.content_types.iter().any(|c| response_type.contains(c.as_str())) {
                return false;
            }
        }
        self.endpoints.iter().any(|p| p.matches(request))
    }
}

/// Extractor built from a manifest. Writes one record per matched pair.
pub struct ManifestExtractor {
    descriptor: ExtractorDescriptor,
    rules: MatchRules,
    output_dir: PathBuf,
}

impl ManifestExtractor {
    pub fn new(descriptor: ExtractorDescriptor, rules: MatchRules, output_dir: PathBuf) -> Self {
        Self {
            descriptor,
            rules,
            output_dir,
        }
    }
}

impl Extractor for ManifestExtractor {
    fn descriptor(&self) -> ExtractorDescriptor {
        self.descriptor.clone()
    }

    fn matches(&self, request: &RequestData) -> Result<bool, ExtractorError> {
        Ok(self.rules.accepts(request))
    }

    fn consume(&mut self, pairs: PairStream) -> Result<(), ExtractorError> {
        ensure_dir(&self.output_dir)?;
        let path = self.output_dir.join(&self.rules.file);

        match self.rules.format {
            OutputFormat::Jsonl => {
                let mut writer = JsonLinesWriter::create(path)?;
                for pair in pairs {
                    writer.write(&PairRecord::from(pair.as_ref()))?;
                }
                let written = writer.finish()?;
                tracing::debug!("{} wrote {written} record(s)", self.descriptor.name);
            }
            OutputFormat::Json => {
                let pairs: Vec<_> = pairs.collect();
                let records: Vec<PairRecord> =
                    pairs.iter().map(|pair| PairRecord::from(pair.as_ref())).collect();
                write_json(&self.output_dir, &self.rules.file, &records)?;
            }
        }
        Ok(())
    }
}

/// Serialised form of a pair in manifest artifacts.
#[derive(Debug, Serialize)]
struct PairRecord<'a> {
    sequence: u64,
    url: &'a str,
    method: &'a str,
    timestamp: Option<&'a str>,
    query: Vec<(String, String)>,
    post_data: &'a PostData,
    status_code: u16,
    content_type: &'a str,
    body: serde_json::Value,
}

impl<'a> From<&'a Pair> for PairRecord<'a> {
    fn from(pair: &'a Pair) -> Self {
        let body = match pair.response.json_documents() {
            Some(mut docs) if docs.len() == 1 => docs.remove(0),
            Some(docs) => serde_json::Value::Array(docs),
            None => serde_json::Value::String(
                String::from_utf8_lossy(&pair.response.body).into_owned(),
            ),
        };

        Self {
            sequence: pair.sequence,
            url: &pair.request.url,
            method: &pair.request.method,
            timestamp: pair.request.timestamp.as_deref(),
            query: pair.request.query_pairs(),
            post_data: &pair.request.post_data,
            status_code: pair.response.status_code,
            content_type: pair.response.content_type(),
            body,
        }
    }
}

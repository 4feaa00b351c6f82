//! API map extractor: inventories the JSON endpoints a session talked to.
//!
//! Produces three artifacts:
//! - `endpoints.json`: every endpoint with its methods, status codes and hit count
//! - `response_formats.json`: the merged shape of each endpoint's JSON responses
//! - `api_map.json`: endpoints grouped by host, then path

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::extractor::{
    ensure_dir, write_json, Extractor, ExtractorCandidate, ExtractorError, PairStream,
};
use crate::types::{ExtractorDescriptor, Pair, RequestData};

pub const NAME: &str = "api-map";

const ENDPOINTS_FILE: &str = "endpoints.json";
const FORMATS_FILE: &str = "response_formats.json";
const MAP_FILE: &str = "api_map.json";

/// Nesting depth beyond which shapes are summarised.
const MAX_SHAPE_DEPTH: usize = 12;

pub fn descriptor() -> ExtractorDescriptor {
    ExtractorDescriptor {
        name: NAME.to_string(),
        version: 1,
        description: "Maps the JSON API endpoints seen in a session and their response formats."
            .to_string(),
        instructions: Some(
            "Use the site as usual so that the pages you care about load their data, \
             then save the Web Archive file."
                .to_string(),
        ),
        output_data: vec![
            ENDPOINTS_FILE.to_string(),
            FORMATS_FILE.to_string(),
            MAP_FILE.to_string(),
        ],
    }
}

pub fn candidate() -> ExtractorCandidate {
    ExtractorCandidate::new(descriptor(), |output_dir| {
        Ok(Box::new(ApiMapExtractor::new(output_dir)) as Box<dyn Extractor>)
    })
}

#[derive(Debug, Default, Serialize)]
struct EndpointSummary {
    endpoint: String,
    methods: BTreeSet<String>,
    status_codes: BTreeSet<u16>,
    query_keys: BTreeSet<String>,
    count: u64,
    first_seen: u64,
}

pub struct ApiMapExtractor {
    output_dir: PathBuf,
    endpoints: BTreeMap<String, EndpointSummary>,
    formats: BTreeMap<String, Value>,
}

impl ApiMapExtractor {
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            endpoints: BTreeMap::new(),
            formats: BTreeMap::new(),
        }
    }

    fn record(&mut self, pair: &Pair) {
        let endpoint = pair.request.endpoint().to_string();
        let summary = self
            .endpoints
            .entry(endpoint.clone())
            .or_insert_with(|| EndpointSummary {
                endpoint: endpoint.clone(),
                first_seen: pair.sequence,
                ..Default::default()
            });
        summary.count += 1;
        summary.methods.insert(pair.request.method.clone());
        summary.status_codes.insert(pair.response.status_code);
        summary
            .query_keys
            .extend(pair.request.query_pairs().into_iter().map(|(k, _)| k));

        if let Some(docs) = pair.response.json_documents() {
            for doc in &docs {
                let observed = shape_of(doc, 0);
                let merged = match self.formats.remove(&endpoint) {
                    Some(existing) => merge_shapes(existing, observed),
                    None => observed,
                };
                self.formats.insert(endpoint.clone(), merged);
            }
        }
    }

    fn host_map(&self) -> BTreeMap<String, BTreeMap<String, Vec<String>>> {
        let mut hosts: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
        for summary in self.endpoints.values() {
            let (host, path) = split_endpoint(&summary.endpoint);
            hosts
                .entry(host)
                .or_default()
                .insert(path, summary.methods.iter().cloned().collect());
        }
        hosts
    }
}

impl Extractor for ApiMapExtractor {
    fn descriptor(&self) -> ExtractorDescriptor {
        descriptor()
    }

    fn matches(&self, request: &RequestData) -> Result<bool, ExtractorError> {
        Ok(request.response_type.to_ascii_lowercase().contains("json"))
    }

    fn consume(&mut self, mut pairs: PairStream) -> Result<(), ExtractorError> {
        while let Some(pair) = pairs.next() {
            self.record(&pair);
            if pairs.is_cancelled() {
                break;
            }
        }

        ensure_dir(&self.output_dir)?;
        let endpoints: Vec<&EndpointSummary> = self.endpoints.values().collect();
        write_json(&self.output_dir, ENDPOINTS_FILE, &endpoints)?;
        write_json(&self.output_dir, FORMATS_FILE, &self.formats)?;
        write_json(&self.output_dir, MAP_FILE, &self.host_map())?;

        tracing::info!("{NAME}: mapped {} endpoint(s)", self.endpoints.len());
        Ok(())
    }
}

fn split_endpoint(endpoint: &str) -> (String, String) {
    match url::Url::parse(endpoint) {
        Ok(parsed) => (
            parsed.host_str().unwrap_or("").to_string(),
            parsed.path().to_string(),
        ),
        Err(_) => (String::new(), endpoint.to_string()),
    }
}

/// Describe a JSON value by type, keeping object keys and array element shapes.
fn shape_of(value: &Value, depth: usize) -> Value {
    match value {
        Value::Null => Value::from("null"),
        Value::Bool(_) => Value::from("boolean"),
        Value::Number(_) => Value::from("number"),
        Value::String(_) => Value::from("string"),
        Value::Array(_) | Value::Object(_) if depth >= MAX_SHAPE_DEPTH => Value::from("..."),
        Value::Array(items) => {
            let element = items
                .iter()
                .map(|item| shape_of(item, depth + 1))
                .reduce(merge_shapes);
            Value::Array(element.into_iter().collect())
        }
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), shape_of(v, depth + 1)))
                .collect(),
        ),
    }
}

fn merge_shapes(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut left), Value::Object(right)) => {
            for (key, shape) in right {
                let merged = match left.remove(&key) {
                    Some(existing) => merge_shapes(existing, shape),
                    None => shape,
                };
                left.insert(key, merged);
            }
            Value::Object(left)
        }
        (Value::Array(left), Value::Array(right)) => {
            let element = left.into_iter().chain(right).reduce(merge_shapes);
            Value::Array(element.into_iter().collect())
        }
        (left, right) if left == right => left,
        (Value::String(left), right) if left == "null" => right,
        (left, Value::String(right)) if right == "null" => left,
        (left, right) => {
            let mut union = Map::new();
            union.insert("one_of".to_string(), Value::Array(vec![left, right]));
            Value::Object(union)
        }
    }
}

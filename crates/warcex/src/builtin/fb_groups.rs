//! Facebook Groups extractor: collects the GraphQL traffic behind a group feed.

use std::fs::{self, File};
use std::io::ErrorKind;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

use crate::extractor::{
    ensure_dir, write_json, Extractor, ExtractorCandidate, ExtractorError, PairStream,
};
use crate::types::{ExtractorDescriptor, RequestData};

pub const NAME: &str = "fb-groups";

const ENDPOINT: &str = "https://www.facebook.com/api/graphql/";
const DATA_FILE: &str = "data_pairs.json";
const BAD_DATA_FILE: &str = "bad_request_json_data.dat";

pub fn descriptor() -> ExtractorDescriptor {
    ExtractorDescriptor {
        name: NAME.to_string(),
        version: 1,
        description: "Facebook Groups extractor that collects posts and comments.".to_string(),
        instructions: Some(
            "Visit the Facebook Groups page and scroll down to load more content. \
             Click on the comments to open them up, and keep doing this if comments remain \
             collapsed. Then move on to the next story and repeat the process. Once you have \
             loaded all the content you want to extract, save the Web Archive file."
                .to_string(),
        ),
        output_data: vec![DATA_FILE.to_string(), BAD_DATA_FILE.to_string()],
    }
}

pub fn candidate() -> ExtractorCandidate {
    ExtractorCandidate::new(descriptor(), |output_dir| {
        Ok(Box::new(FbGroupsExtractor::new(output_dir)) as Box<dyn Extractor>)
    })
}

#[derive(Debug, Serialize)]
struct DataPair<'a> {
    request: &'a RequestData,
    response_count: usize,
    response: Vec<Value>,
}

pub struct FbGroupsExtractor {
    output_dir: PathBuf,
}

impl FbGroupsExtractor {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }
}

impl Extractor for FbGroupsExtractor {
    fn descriptor(&self) -> ExtractorDescriptor {
        descriptor()
    }

    fn matches(&self, request: &RequestData) -> Result<bool, ExtractorError> {
        Ok(request.endpoint() == ENDPOINT)
    }

    fn consume(&mut self, mut pairs: PairStream) -> Result<(), ExtractorError> {
        ensure_dir(&self.output_dir)?;

        let mut kept = Vec::new();
        let mut bad: Option<BufWriter<File>> = None;
        let bad_path = self.output_dir.join(BAD_DATA_FILE);
        // Left over from an earlier run into the same directory.
        match fs::remove_file(&bad_path) {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                return Err(ExtractorError::write(&bad_path, e));
            }
            _ => {}
        }

        while let Some(pair) = pairs.next() {
            match pair.response.json_documents() {
                Some(docs) => kept.push((pair, docs)),
                None => {
                    tracing::debug!("{NAME}: response {} is not JSON", pair.response_sequence);
                    if bad.is_none() {
                        let file = File::create(&bad_path)
                            .map_err(|e| ExtractorError::write(&bad_path, e))?;
                        bad = Some(BufWriter::new(file));
                    }
                    if let Some(writer) = bad.as_mut() {
                        writer
                            .write_all(&pair.response.body)
                            .and_then(|_| writer.write_all(b"\n"))
                            .map_err(|e| ExtractorError::write(&bad_path, e))?;
                    }
                }
            }
            if pairs.is_cancelled() {
                tracing::info!("{NAME}: cancelled, writing {} collected pair(s)", kept.len());
                break;
            }
        }

        if let Some(mut writer) = bad {
            writer.flush().map_err(|e| ExtractorError::write(&bad_path, e))?;
        }

        let data: Vec<DataPair> = kept
            .iter()
            .map(|(pair, docs)| DataPair {
                request: &pair.request,
                response_count: docs.len(),
                response: docs.clone(),
            })
            .collect();
        write_json(&self.output_dir, DATA_FILE, &data)?;
        tracing::info!("{NAME}: wrote {} data pair(s)", data.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::CancelToken;
    use crate::types::{CapturedEntry, Pair, ResponseData};
    use std::sync::Arc;

    fn graphql_pair(seq: u64, body: &str) -> Arc<Pair> {
        let request = CapturedEntry::request(seq, ENDPOINT, "POST")
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body("fb_api_req_friendly_name=GroupsFeed&doc_id=42");
        Arc::new(Pair {
            sequence: seq,
            response_sequence: seq + 1,
            request: RequestData::from_entry(request, "text/html"),
            response: ResponseData::from_entry(
                CapturedEntry::response(seq + 1, ENDPOINT, 200).with_body(body),
            ),
        })
    }

    #[test]
    fn test_matches_graphql_endpoint_only() {
        let extractor = FbGroupsExtractor::new(PathBuf::from("/unused"));
        let graphql = graphql_pair(0, "{}");
        assert!(extractor.matches(&graphql.request).unwrap());

        let other = RequestData::from_entry(
            CapturedEntry::request(0, "https://www.facebook.com/groups/1", "GET"),
            "text/html",
        );
        assert!(!extractor.matches(&other).unwrap());
    }

    #[test]
    fn test_consume_writes_pairs_and_bad_bodies() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join(NAME);
        let mut extractor = FbGroupsExtractor::new(out.clone());

        let pairs = vec![
            graphql_pair(0, r#"{"data": {"node": 1}}"#),
            graphql_pair(2, "{\"data\": 1}\n{\"data\": 2}\n"),
            graphql_pair(4, "<html>not json</html>"),
        ];
        extractor
            .consume(PairStream::new(pairs, CancelToken::new()))
            .unwrap();

        let text = std::fs::read_to_string(out.join(DATA_FILE)).unwrap();
        let data: Vec<Value> = serde_json::from_str(&text).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["response_count"], 1);
        assert_eq!(data[1]["response_count"], 2);
        assert_eq!(data[0]["request"]["url"], ENDPOINT);
        assert_eq!(data[0]["request"]["post_data"]["type"], "form");

        let bad = std::fs::read_to_string(out.join(BAD_DATA_FILE)).unwrap();
        assert!(bad.contains("not json"));
    }

    #[test]
    fn test_rerun_replaces_bad_bodies() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join(NAME);
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join(BAD_DATA_FILE), "stale body from last run\n").unwrap();

        FbGroupsExtractor::new(out.clone())
            .consume(PairStream::new(
                vec![graphql_pair(0, "fresh bad body")],
                CancelToken::new(),
            ))
            .unwrap();
        let bad = std::fs::read_to_string(out.join(BAD_DATA_FILE)).unwrap();
        assert_eq!(bad, "fresh bad body\n");

        FbGroupsExtractor::new(out.clone())
            .consume(PairStream::new(vec![graphql_pair(0, "{}")], CancelToken::new()))
            .unwrap();
        assert!(!out.join(BAD_DATA_FILE).exists());
    }

    #[test]
    fn test_consume_without_bad_bodies_skips_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join(NAME);
        let mut extractor = FbGroupsExtractor::new(out.clone());
        extractor
            .consume(PairStream::new(vec![graphql_pair(0, "[]")], CancelToken::new()))
            .unwrap();
        assert!(out.join(DATA_FILE).exists());
        assert!(!out.join(BAD_DATA_FILE).exists());
    }
}

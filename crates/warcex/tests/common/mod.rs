//! Fixture builders shared by the integration tests.

#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::Path;

pub fn warc_record(kind: &str, uri: &str, date: &str, http: &[u8]) -> Vec<u8> {
    let mut record = format!(
        "WARC/1.1\r\n\
         WARC-Type: {kind}\r\n\
         WARC-Record-ID: <urn:uuid:{kind}-{}>\r\n\
         WARC-Date: {date}\r\n\
         WARC-Target-URI: {uri}\r\n\
         Content-Type: application/http; msgtype={kind}\r\n\
         Content-Length: {}\r\n\r\n",
        uri.len(),
        http.len()
    )
    .into_bytes();
    record.extend_from_slice(http);
    record.extend_from_slice(b"\r\n\r\n");
    record
}

pub fn request(method: &str, uri: &str, content_type: Option<&str>, body: &str) -> Vec<u8> {
    let path = uri
        .splitn(4, '/')
        .nth(3)
        .map(|p| format!("/{p}"))
        .unwrap_or_else(|| "/".to_string());
    let mut http = format!("{method} {path} HTTP/1.1\r\nHost: example\r\n");
    if let Some(ct) = content_type {
        http.push_str(&format!("Content-Type: {ct}\r\n"));
    }
    http.push_str(&format!("Content-Length: {}\r\n\r\n{body}", body.len()));
    warc_record("request", uri, "2025-03-01T10:00:00Z", http.as_bytes())
}

pub fn response(uri: &str, status: u16, content_type: &str, body: &str) -> Vec<u8> {
    let http = format!(
        "HTTP/1.1 {status} OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    warc_record("response", uri, "2025-03-01T10:00:01Z", http.as_bytes())
}

pub fn warcinfo() -> Vec<u8> {
    let body = b"software: test\r\nformat: WARC File Format 1.1\r\n";
    let mut record = format!(
        "WARC/1.1\r\nWARC-Type: warcinfo\r\nContent-Type: application/warc-fields\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    record.extend_from_slice(body);
    record.extend_from_slice(b"\r\n\r\n");
    record
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Write a WACZ package holding the given WARC members plus a datapackage.json.
pub fn write_wacz(path: &Path, members: &[(&str, Vec<u8>)]) {
    let file = File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);

    zip.start_file("datapackage.json", options).unwrap();
    zip.write_all(br#"{"profile": "data-package", "resources": []}"#)
        .unwrap();
    for (name, data) in members {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

pub const GRAPHQL: &str = "https://www.facebook.com/api/graphql/";

/// A session with Facebook GraphQL traffic, a JSON API call and an HTML page.
pub fn session_warc() -> Vec<u8> {
    [
        warcinfo(),
        request("GET", "https://www.facebook.com/groups/1", None, ""),
        request(
            "POST",
            GRAPHQL,
            Some("application/x-www-form-urlencoded"),
            "fb_api_req_friendly_name=GroupsFeed&doc_id=1",
        ),
        response(
            "https://www.facebook.com/groups/1",
            200,
            "text/html",
            "<html></html>",
        ),
        response(
            GRAPHQL,
            200,
            "text/html; charset=utf-8",
            "{\"data\":{\"node\":{\"id\":\"1\"}}}\n{\"label\":\"stream\"}",
        ),
        request("GET", "https://api.example.com/v1/items?page=1", None, ""),
        response(
            "https://api.example.com/v1/items?page=1",
            200,
            "application/json",
            r#"{"items":[{"id":1,"title":"a"}]}"#,
        ),
        response("https://www.facebook.com/orphan", 404, "text/html", "gone"),
        request(
            "POST",
            GRAPHQL,
            Some("application/x-www-form-urlencoded"),
            "doc_id=2",
        ),
    ]
    .concat()
}

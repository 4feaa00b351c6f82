//! Integration tests for the `warcex` binary.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;

fn warcex(args: &[&str], extractor_dir: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_warcex"))
        .args(args)
        .env("WARCEX_EXTRACTOR_DIR", extractor_dir)
        .env_remove("WARCEX_OUTPUT")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run warcex")
}

fn record(kind: &str, uri: &str, http: &str) -> String {
    format!(
        "WARC/1.1\r\nWARC-Type: {kind}\r\nWARC-Target-URI: {uri}\r\nWARC-Date: 2025-03-01T10:00:00Z\r\nContent-Type: application/http\r\nContent-Length: {}\r\n\r\n{http}\r\n\r\n",
        http.len()
    )
}

fn write_session(path: &Path) {
    let api = "https://api.example.com/v1/items";
    let body = r#"{"items": [{"id": 1}]}"#;
    let warc = [
        record("request", api, "GET /v1/items HTTP/1.1\r\nHost: api.example.com\r\n\r\n"),
        record(
            "response",
            api,
            &format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
                body.len()
            ),
        ),
    ]
    .concat();

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(warc.as_bytes()).unwrap();
    let gz = encoder.finish().unwrap();

    let mut zip = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
    let options = zip::write::SimpleFileOptions::default();
    zip.start_file("archive/data.warc.gz", options).unwrap();
    zip.write_all(&gz).unwrap();
    zip.finish().unwrap();
}

#[test]
fn test_extract_runs_builtins() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("session.wacz");
    write_session(&input);
    let out = dir.path().join("out");

    let output = warcex(
        &[
            "extract",
            input.to_str().unwrap(),
            "-o",
            out.to_str().unwrap(),
            "--json",
        ],
        dir.path(),
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let results: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(results[0]["status"], "completed");
    assert_eq!(results[0]["report"]["stats"]["pairs"], 1);
    assert!(out.join("api-map").join("endpoints.json").exists());
    assert!(!out.join("fb-groups").exists());
}

#[test]
fn test_extract_multiple_inputs_use_subdirectories() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.wacz");
    let second = dir.path().join("second.wacz");
    write_session(&first);
    write_session(&second);
    let out = dir.path().join("out");

    let output = warcex(
        &[
            "extract",
            first.to_str().unwrap(),
            second.to_str().unwrap(),
            "-e",
            "api-map",
            "-o",
            out.to_str().unwrap(),
        ],
        dir.path(),
    );
    assert!(output.status.success());
    assert!(out.join("first").join("api-map").join("api_map.json").exists());
    assert!(out.join("second").join("api-map").join("api_map.json").exists());
}

#[test]
fn test_extract_with_manifest_by_name() {
    let dir = tempfile::tempdir().unwrap();
    let manifests = dir.path().join("extractors");
    std::fs::create_dir(&manifests).unwrap();
    std::fs::write(
        manifests.join("items.json"),
        r#"{"name": "items", "version": 1, "description": "Items",
            "match": {"endpoints": ["https://api.example.com/v1/items"]}}"#,
    )
    .unwrap();

    let input = dir.path().join("session.wacz");
    write_session(&input);
    let out = dir.path().join("out");

    let output = warcex(
        &[
            "extract",
            input.to_str().unwrap(),
            "-e",
            "items",
            "-o",
            out.to_str().unwrap(),
        ],
        &manifests,
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let text = std::fs::read_to_string(out.join("items").join("records.jsonl")).unwrap();
    assert_eq!(text.lines().count(), 1);
}

#[test]
fn test_extract_invalid_container_exits_1() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("broken.wacz");
    std::fs::write(&input, b"not a zip at all").unwrap();

    let output = warcex(&["extract", input.to_str().unwrap()], dir.path());
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_extract_nothing_to_do_exits_2() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("session.wacz");
    write_session(&input);

    let output = warcex(
        &["extract", input.to_str().unwrap(), "-e", "no-such-extractor"],
        dir.path(),
    );
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_list_json() {
    let dir = tempfile::tempdir().unwrap();
    let output = warcex(&["list", "--json"], dir.path());
    assert!(output.status.success());

    let entries: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(entries[0]["number"], 1);
    assert_eq!(entries[0]["name"], "fb-groups");
    assert_eq!(entries[1]["name"], "api-map");
}

#[test]
fn test_info_by_number_and_partial_name() {
    let dir = tempfile::tempdir().unwrap();

    let output = warcex(&["info", "1"], dir.path());
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("fb-groups (v1)"));
    assert!(stdout.contains("data_pairs.json"));

    let output = warcex(&["info", "api"], dir.path());
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("No exact match"));
}

#[test]
fn test_info_unknown_exits_1() {
    let dir = tempfile::tempdir().unwrap();
    let output = warcex(&["info", "nothing-like-this"], dir.path());
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Available: fb-groups, api-map"));
}

#[test]
fn test_completions() {
    let dir = tempfile::tempdir().unwrap();
    let output = warcex(&["completions", "bash"], dir.path());
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("warcex"));
}

#[test]
fn test_bad_arguments_exit_1() {
    let dir = tempfile::tempdir().unwrap();
    let output = warcex(&["extract"], dir.path());
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_help_exits_0_and_prints_usage() {
    let dir = tempfile::tempdir().unwrap();
    let output = warcex(&["--help"], dir.path());
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("extract"));

    let output = warcex(&["extract"], dir.path());
    assert!(String::from_utf8_lossy(&output.stderr).contains("<INPUTS>"));
}

//! `warcex extract`: run extractors over one or more containers.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use warcex::{
    builtin, CancelToken, DispatchEngine, ExtractorRegistry, ExtractorSource, Outcome, RunReport,
};

use super::{catalog, resolve_selector, CliResult, ExitStatus};

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub inputs: Vec<PathBuf>,
    /// Selectors given with `--extractor`. Empty means every built-in.
    pub extractors: Vec<String>,
    pub output_root: PathBuf,
    pub extractor_dir: PathBuf,
    pub json: bool,
}

/// Outcome of one input, as printed with `--json`.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum InputResult {
    Completed {
        report: RunReport,
        load_errors: Vec<String>,
    },
    Fatal {
        container: PathBuf,
        error: String,
    },
}

/// Run every input through its own registry and dispatch engine.
///
/// Blocking: call from a blocking context.
pub fn run_extract(options: &ExtractOptions, cancel: CancelToken) -> CliResult<ExitStatus> {
    let known = catalog(&options.extractor_dir);
    let sources: Vec<ExtractorSource> = if options.extractors.is_empty() {
        builtin::names()
            .into_iter()
            .map(ExtractorSource::Builtin)
            .collect()
    } else {
        options
            .extractors
            .iter()
            .map(|selector| resolve_selector(selector, &known))
            .collect()
    };

    let mut results = Vec::new();
    for (input, output_root) in options.inputs.iter().zip(output_roots(options)) {
        if cancel.is_cancelled() {
            tracing::warn!("Cancelled, skipping {}", input.display());
            break;
        }

        let mut registry = ExtractorRegistry::new(&output_root);
        let load = registry.load_all(&sources);
        let load_errors: Vec<String> = load.errors.iter().map(|e| e.to_string()).collect();

        let engine = DispatchEngine::with_cancel(cancel.clone());
        let result = match engine.run(input, registry) {
            Ok(report) => InputResult::Completed {
                report,
                load_errors,
            },
            Err(e) => {
                tracing::error!("{e}");
                InputResult::Fatal {
                    container: input.clone(),
                    error: e.to_string(),
                }
            }
        };

        if !options.json {
            print_result(&result, &output_root);
        }
        results.push(result);
    }

    if options.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    }

    Ok(exit_status(&results, cancel.is_cancelled()))
}

/// Output root of each input, in input order.
///
/// With several inputs each one writes under its own sub-directory named
/// after the container. Names that collide (compared case-insensitively) get
/// `-2`, `-3`, ... appended so no two runs share a directory.
fn output_roots(options: &ExtractOptions) -> Vec<PathBuf> {
    if options.inputs.len() <= 1 {
        return vec![options.output_root.clone(); options.inputs.len()];
    }

    let mut taken = HashSet::new();
    options
        .inputs
        .iter()
        .map(|input| {
            let stem = container_stem(input);
            let mut dir = stem.clone();
            let mut suffix = 2;
            while !taken.insert(dir.to_lowercase()) {
                dir = format!("{stem}-{suffix}");
                suffix += 1;
            }
            if dir != stem {
                tracing::info!("{} writes to {dir} to avoid a name clash", input.display());
            }
            options.output_root.join(dir)
        })
        .collect()
}

/// File name without `.wacz`, `.warc` or `.warc.gz`.
fn container_stem(input: &Path) -> String {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());
    let lower = name.to_ascii_lowercase();
    for suffix in [".warc.gz", ".wacz", ".warc", ".zip"] {
        if lower.ends_with(suffix) && lower.len() > suffix.len() {
            return name[..name.len() - suffix.len()].to_string();
        }
    }
    name
}

fn exit_status(results: &[InputResult], cancelled: bool) -> ExitStatus {
    let fatal = results
        .iter()
        .any(|r| matches!(r, InputResult::Fatal { .. }));
    let all_idle = results.iter().all(|r| match r {
        InputResult::Completed { report, .. } => report.nothing_to_do(),
        InputResult::Fatal { .. } => false,
    });

    if fatal {
        ExitStatus::Fatal
    } else if cancelled {
        ExitStatus::Cancelled
    } else if all_idle {
        ExitStatus::NothingToDo
    } else {
        ExitStatus::Success
    }
}

fn print_result(result: &InputResult, output_root: &Path) {
    match result {
        InputResult::Fatal { container, error } => {
            eprintln!("Failed to process {}: {error}", container.display());
        }
        InputResult::Completed {
            report,
            load_errors,
        } => {
            for error in load_errors {
                eprintln!("Warning: {error}");
            }
            println!("{}", report.container.display());
            if report.nothing_to_do() {
                println!("  Nothing to do: no extractors loaded");
                return;
            }

            let stats = &report.stats;
            println!(
                "  Pairs: {} ({} requests, {} responses, {} orphan, {} incomplete, {} skipped)",
                stats.pairs,
                stats.requests,
                stats.responses,
                stats.orphan_responses,
                stats.incomplete_requests,
                stats.skipped_records
            );
            for extractor in &report.extractors {
                let status = match &extractor.outcome {
                    Outcome::Succeeded => "ok".to_string(),
                    Outcome::NotInvoked => "no matches".to_string(),
                    Outcome::Failed { message, .. } => format!("failed: {message}"),
                };
                let count = if extractor.delivered == extractor.matched {
                    extractor.delivered.to_string()
                } else {
                    format!("{}/{}", extractor.delivered, extractor.matched)
                };
                println!("  {:<20} {count:>9} pair(s)  {status}", extractor.name);
            }
            if report.cancelled {
                println!("  Cancelled before the container was fully read");
            }
            println!("  Output: {}", output_root.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_stem() {
        assert_eq!(container_stem(Path::new("/a/session.wacz")), "session");
        assert_eq!(container_stem(Path::new("capture.WARC.GZ")), "capture");
        assert_eq!(container_stem(Path::new("capture.warc")), "capture");
        assert_eq!(container_stem(Path::new(".wacz")), ".wacz");
    }

    fn options_for(inputs: &[&str]) -> ExtractOptions {
        ExtractOptions {
            inputs: inputs.iter().map(PathBuf::from).collect(),
            extractors: Vec::new(),
            output_root: PathBuf::from("out"),
            extractor_dir: PathBuf::from("/nonexistent"),
            json: false,
        }
    }

    #[test]
    fn test_output_root_per_input() {
        assert_eq!(
            output_roots(&options_for(&["one.wacz"])),
            vec![PathBuf::from("out")]
        );
        assert_eq!(
            output_roots(&options_for(&["one.wacz", "two.warc.gz"])),
            vec![PathBuf::from("out/one"), PathBuf::from("out/two")]
        );
    }

    #[test]
    fn test_colliding_stems_get_distinct_roots() {
        let roots = output_roots(&options_for(&[
            "a/session.warc",
            "b/session.warc",
            "session.WACZ",
            "c/session-2.warc.gz",
        ]));
        assert_eq!(
            roots,
            vec![
                PathBuf::from("out/session"),
                PathBuf::from("out/session-2"),
                PathBuf::from("out/session-3"),
                PathBuf::from("out/session-2-2"),
            ]
        );
    }

    fn write_api_capture(path: &Path, host: &str) {
        let uri = format!("https://{host}/items");
        let body = r#"{"items": []}"#;
        let http_request = "GET /items HTTP/1.1\r\n\r\n".to_string();
        let http_response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{body}"
        );
        let record = |kind: &str, http: &str| {
            format!(
                "WARC/1.1\r\nWARC-Type: {kind}\r\nWARC-Target-URI: {uri}\r\nContent-Type: application/http\r\nContent-Length: {}\r\n\r\n{http}\r\n\r\n",
                http.len()
            )
        };
        let warc = record("request", &http_request) + &record("response", &http_response);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, warc).unwrap();
    }

    #[test]
    fn test_same_named_inputs_keep_separate_output() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a").join("session.warc");
        let second = dir.path().join("b").join("session.warc");
        write_api_capture(&first, "one.test");
        write_api_capture(&second, "two.test");

        let out = dir.path().join("out");
        let options = ExtractOptions {
            inputs: vec![first, second],
            extractors: vec!["api-map".to_string()],
            output_root: out.clone(),
            extractor_dir: dir.path().to_path_buf(),
            json: true,
        };
        let status = run_extract(&options, CancelToken::new()).unwrap();
        assert_eq!(status, ExitStatus::Success);

        let read = |sub: &str| {
            let path = out.join(sub).join("api-map").join("endpoints.json");
            std::fs::read_to_string(path).unwrap()
        };
        assert!(read("session").contains("one.test"));
        assert!(!read("session").contains("two.test"));
        assert!(read("session-2").contains("two.test"));
    }

    #[test]
    fn test_missing_input_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let options = ExtractOptions {
            inputs: vec![dir.path().join("missing.wacz")],
            extractors: Vec::new(),
            output_root: dir.path().join("out"),
            extractor_dir: dir.path().to_path_buf(),
            json: true,
        };
        let status = run_extract(&options, CancelToken::new()).unwrap();
        assert_eq!(status, ExitStatus::Fatal);
    }

    #[test]
    fn test_unknown_extractor_only_is_nothing_to_do() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("capture.warc");
        let warcinfo = "WARC/1.1\r\nWARC-Type: warcinfo\r\nContent-Length: 0\r\n\r\n\r\n\r\n";
        std::fs::write(&input, warcinfo).unwrap();
        let options = ExtractOptions {
            inputs: vec![input],
            extractors: vec!["does-not-exist".to_string()],
            output_root: dir.path().join("out"),
            extractor_dir: dir.path().to_path_buf(),
            json: true,
        };
        let status = run_extract(&options, CancelToken::new()).unwrap();
        assert_eq!(status, ExitStatus::NothingToDo);
    }
}

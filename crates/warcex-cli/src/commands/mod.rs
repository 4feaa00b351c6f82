//! Subcommand implementations.

pub mod extract;
pub mod info;
pub mod list;

use std::path::{Path, PathBuf};

use serde::Serialize;

use warcex::{builtin, ExtractorDescriptor, ExtractorManifest, ExtractorSource, WarcexError};

use crate::config::discover_manifests;

pub use extract::{run_extract, ExtractOptions};
pub use info::run_info;
pub use list::run_list;

/// Process exit status of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Fatal,
    NothingToDo,
    Cancelled,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Fatal => 1,
            ExitStatus::NothingToDo => 2,
            ExitStatus::Cancelled => 130,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CliError {
    #[error("No extractor matches '{query}'{}", suggestion_text(.suggestions))]
    UnknownExtractor {
        query: String,
        suggestions: Vec<String>,
    },

    #[error(transparent)]
    Warcex(#[from] WarcexError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn suggestion_text(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(". Available: {}", suggestions.join(", "))
    }
}

pub type CliResult<T> = Result<T, CliError>;

/// Where a catalog entry comes from.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "location", rename_all = "snake_case")]
pub enum CatalogSource {
    Builtin,
    Manifest(PathBuf),
}

/// One extractor known to the CLI, numbered from 1.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub number: usize,
    #[serde(flatten)]
    pub descriptor: ExtractorDescriptor,
    pub source: CatalogSource,
}

impl CatalogEntry {
    pub fn extractor_source(&self) -> ExtractorSource {
        match &self.source {
            CatalogSource::Builtin => ExtractorSource::Builtin(self.descriptor.name.clone()),
            CatalogSource::Manifest(path) => ExtractorSource::External(path.clone()),
        }
    }
}

/// Built-in extractors followed by the manifests found in `extractor_dir`.
///
/// Manifests that cannot be read are skipped with a warning.
pub fn catalog(extractor_dir: &Path) -> Vec<CatalogEntry> {
    let mut entries: Vec<CatalogEntry> = builtin::descriptors()
        .into_iter()
        .map(|descriptor| CatalogEntry {
            number: 0,
            descriptor,
            source: CatalogSource::Builtin,
        })
        .collect();

    for path in discover_manifests(extractor_dir) {
        match ExtractorManifest::from_path(&path) {
            Ok(manifest) => entries.push(CatalogEntry {
                number: 0,
                descriptor: manifest.descriptor(),
                source: CatalogSource::Manifest(path),
            }),
            Err(e) => tracing::warn!("{e}"),
        }
    }

    for (index, entry) in entries.iter_mut().enumerate() {
        entry.number = index + 1;
    }
    entries
}

/// Turn an `--extractor` selector into a source.
///
/// Names that are neither built-in nor a file are looked up among the
/// catalog's manifests by extractor name.
pub fn resolve_selector(selector: &str, catalog: &[CatalogEntry]) -> ExtractorSource {
    let source = ExtractorSource::parse(selector);
    if let ExtractorSource::Builtin(name) = &source {
        if builtin::candidate(name).is_none() {
            if let Some(entry) = catalog.iter().find(|e| {
                matches!(e.source, CatalogSource::Manifest(_))
                    && e.descriptor.name.eq_ignore_ascii_case(name)
            }) {
                return entry.extractor_source();
            }
        }
    }
    source
}

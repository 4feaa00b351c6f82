//! Extractor registry: loads, validates and constructs the extractors for one run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use crate::builtin;
use crate::dispatch::panic_message;
use crate::extractor::{Extractor, ExtractorCandidate};
use crate::loader::{ExtractorLoader, ManifestLoader};
use crate::types::{ExtractorDescriptor, WarcexError, WarcexResult};

/// Where an extractor comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractorSource {
    /// A built-in extractor, looked up by name.
    Builtin(String),
    /// An extractor described by a file on disk.
    External(PathBuf),
}

impl ExtractorSource {
    /// Interpret a command-line selector.
    ///
    /// Existing files and names ending in `.json` are external sources,
    /// everything else names a built-in.
    pub fn parse(selector: &str) -> Self {
        let path = Path::new(selector);
        let is_manifest = selector.to_ascii_lowercase().ends_with(".json");
        if is_manifest || path.is_file() {
            ExtractorSource::External(path.to_path_buf())
        } else {
            ExtractorSource::Builtin(selector.to_string())
        }
    }

    pub fn label(&self) -> String {
        match self {
            ExtractorSource::Builtin(name) => name.clone(),
            ExtractorSource::External(path) => path.display().to_string(),
        }
    }
}

/// A constructed extractor together with its exclusive output directory.
pub struct LoadedExtractor {
    pub descriptor: ExtractorDescriptor,
    pub output_dir: PathBuf,
    pub extractor: Box<dyn Extractor>,
}

/// Outcome of loading a batch of sources.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub errors: Vec<WarcexError>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct ExtractorRegistry {
    output_root: PathBuf,
    loader: Box<dyn ExtractorLoader>,
    entries: Vec<LoadedExtractor>,
}

impl ExtractorRegistry {
    /// Create an empty registry whose extractors write under `output_root`.
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            loader: Box::new(ManifestLoader),
            entries: Vec::new(),
        }
    }

    /// Replace the loader used for external sources.
    pub fn with_loader(mut self, loader: impl ExtractorLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Validate and construct one extractor.
    pub fn register(&mut self, candidate: ExtractorCandidate) -> WarcexResult<()> {
        let ExtractorCandidate {
            descriptor,
            factory,
        } = candidate;
        let name = descriptor.name.clone();

        validate_descriptor(&descriptor).map_err(|reason| WarcexError::load(&name, reason))?;

        if self.entries.iter().any(|e| e.descriptor.name == name) {
            return Err(WarcexError::load(
                &name,
                "an extractor with this name is already registered",
            ));
        }

        let output_dir = self.output_root.join(&name);
        if self
            .entries
            .iter()
            .any(|e| same_location(&e.output_dir, &output_dir))
        {
            return Err(WarcexError::load(
                &name,
                format!("output location {} is already claimed", output_dir.display()),
            ));
        }

        let dir = output_dir.clone();
        let built = catch_unwind(AssertUnwindSafe(move || {
            let extractor = factory(dir)?;
            let actual = extractor.descriptor();
            Ok::<_, crate::extractor::ExtractorError>((extractor, actual))
        }));

        let (extractor, actual) = match built {
            Ok(Ok(built)) => built,
            Ok(Err(e)) => {
                return Err(WarcexError::load(
                    &name,
                    format!("construction failed: {e}"),
                ))
            }
            Err(payload) => {
                return Err(WarcexError::load(
                    &name,
                    format!("construction panicked: {}", panic_message(payload.as_ref())),
                ))
            }
        };

        if actual.name != name {
            return Err(WarcexError::load(
                &name,
                format!("constructed extractor reports a different name '{}'", actual.name),
            ));
        }

        tracing::debug!(
            "Registered extractor {name} v{} -> {}",
            descriptor.version,
            output_dir.display()
        );
        self.entries.push(LoadedExtractor {
            descriptor,
            output_dir,
            extractor,
        });
        Ok(())
    }

    /// Resolve a source into a candidate and register it.
    pub fn load(&mut self, source: &ExtractorSource) -> WarcexResult<()> {
        let candidate = match source {
            ExtractorSource::Builtin(name) => builtin::candidate(name)
                .ok_or_else(|| WarcexError::load(name, "no built-in extractor with this name"))?,
            ExtractorSource::External(path) => self.loader.load(path)?,
        };
        self.register(candidate)
    }

    /// Load every source, isolating failures to the source that caused them.
    pub fn load_all<'a>(
        &mut self,
        sources: impl IntoIterator<Item = &'a ExtractorSource>,
    ) -> LoadReport {
        let mut report = LoadReport::default();
        for source in sources {
            let before = self.entries.len();
            match self.load(source) {
                Ok(()) => {
                    if let Some(entry) = self.entries.get(before) {
                        report.loaded.push(entry.descriptor.name.clone());
                    }
                }
                Err(e) => {
                    tracing::warn!("{e}");
                    report.errors.push(e);
                }
            }
        }
        report
    }

    pub fn descriptors(&self) -> Vec<&ExtractorDescriptor> {
        self.entries.iter().map(|e| &e.descriptor).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hand the constructed extractors over, in registration order.
    pub fn into_entries(self) -> Vec<LoadedExtractor> {
        self.entries
    }
}

/// Check the structural rules every descriptor must satisfy.
pub fn validate_descriptor(descriptor: &ExtractorDescriptor) -> Result<(), String> {
    if descriptor.name.is_empty() {
        return Err("name must not be empty".to_string());
    }
    if let Some(bad) = descriptor
        .name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(format!("name contains invalid character {bad:?}"));
    }
    if descriptor.name.starts_with('.') {
        return Err("name must not start with '.'".to_string());
    }
    if descriptor.version < 1 {
        return Err("version must be at least 1".to_string());
    }
    if descriptor.description.trim().is_empty() {
        return Err("description must not be empty".to_string());
    }
    Ok(())
}

fn same_location(a: &Path, b: &Path) -> bool {
    a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
}

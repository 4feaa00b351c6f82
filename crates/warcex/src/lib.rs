//! WARCex: replay archived HTTP traffic from WACZ/WARC containers through pluggable extractors.

pub mod builtin;
pub mod container;
pub mod correlator;
pub mod dispatch;
pub mod extractor;
mod http;
pub mod loader;
pub mod registry;
pub mod types;
mod warc;

pub use container::{ArchiveReader, ContainerKind};
pub use correlator::{correlate, CorrelationState, CorrelationStats, PairCorrelator};
pub use dispatch::{DispatchEngine, ExtractorReport, FailureKind, Outcome, RunReport};
pub use extractor::{CancelToken, Extractor, ExtractorCandidate, ExtractorError, PairStream};
pub use loader::{ExtractorLoader, ExtractorManifest, ManifestLoader};
pub use registry::{ExtractorRegistry, ExtractorSource, LoadReport};
pub use types::*;

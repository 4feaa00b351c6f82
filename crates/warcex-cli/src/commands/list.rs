//! `warcex list`: show every available extractor.

use std::path::Path;

use super::{catalog, CatalogSource, CliResult, ExitStatus};

pub fn run_list(extractor_dir: &Path, json: bool) -> CliResult<ExitStatus> {
    let entries = catalog(extractor_dir);

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(ExitStatus::Success);
    }

    println!("Available extractors:");
    for entry in &entries {
        let origin = match &entry.source {
            CatalogSource::Builtin => "built-in".to_string(),
            CatalogSource::Manifest(path) => path.display().to_string(),
        };
        let d = &entry.descriptor;
        println!(
            "  {:>2}. {} (v{}) - {}",
            entry.number, d.name, d.version, d.description
        );
        println!("      source: {origin}");
    }
    println!();
    println!("Use `warcex info <NAME|NUMBER>` for details.");

    Ok(ExitStatus::Success)
}

//! `warcex info`: describe one extractor.

use std::path::Path;

use super::{catalog, CatalogEntry, CatalogSource, CliError, CliResult, ExitStatus};

/// How a query was resolved.
#[derive(Debug, PartialEq, Eq)]
pub enum Lookup {
    Number,
    ExactName,
    /// Matched by substring; the user is told which extractor was picked.
    Partial,
}

/// Find a catalog entry by number, exact name, or name substring (in that order).
pub fn find_entry<'a>(
    entries: &'a [CatalogEntry],
    query: &str,
) -> Option<(&'a CatalogEntry, Lookup)> {
    let query = query.trim();

    if let Ok(number) = query.parse::<usize>() {
        if let Some(entry) = entries.iter().find(|e| e.number == number) {
            return Some((entry, Lookup::Number));
        }
    }

    if let Some(entry) = entries
        .iter()
        .find(|e| e.descriptor.name.eq_ignore_ascii_case(query))
    {
        return Some((entry, Lookup::ExactName));
    }

    let needle = query.to_ascii_lowercase();
    if needle.is_empty() {
        return None;
    }
    entries
        .iter()
        .find(|e| e.descriptor.name.to_ascii_lowercase().contains(&needle))
        .map(|e| (e, Lookup::Partial))
}

pub fn run_info(extractor_dir: &Path, query: &str, json: bool) -> CliResult<ExitStatus> {
    let entries = catalog(extractor_dir);

    let Some((entry, lookup)) = find_entry(&entries, query) else {
        return Err(CliError::UnknownExtractor {
            query: query.to_string(),
            suggestions: entries
                .iter()
                .take(5)
                .map(|e| e.descriptor.name.clone())
                .collect(),
        });
    };

    if lookup == Lookup::Partial {
        eprintln!(
            "No exact match for '{query}', showing '{}'",
            entry.descriptor.name
        );
    }

    if json {
        println!("{}", serde_json::to_string_pretty(entry)?);
        return Ok(ExitStatus::Success);
    }

    let d = &entry.descriptor;
    println!("{} (v{})", d.name, d.version);
    println!("  {}", d.description);
    match &entry.source {
        CatalogSource::Builtin => println!("  Source: built-in"),
        CatalogSource::Manifest(path) => println!("  Source: {}", path.display()),
    }
    if let Some(instructions) = &d.instructions {
        println!();
        println!("Instructions:");
        println!("  {instructions}");
    }
    if !d.output_data.is_empty() {
        println!();
        println!("Output:");
        for artifact in &d.output_data {
            println!("  - {artifact}");
        }
    }

    Ok(ExitStatus::Success)
}

//! Built-in extractors.

pub mod api_map;
pub mod fb_groups;

use crate::extractor::ExtractorCandidate;
use crate::types::ExtractorDescriptor;

/// Descriptors of every built-in extractor, in catalog order.
pub fn descriptors() -> Vec<ExtractorDescriptor> {
    vec![fb_groups::descriptor(), api_map::descriptor()]
}

pub fn names() -> Vec<String> {
    descriptors().into_iter().map(|d| d.name).collect()
}

/// Look up a built-in extractor by name, ignoring case.
pub fn candidate(name: &str) -> Option<ExtractorCandidate> {
    match name.to_ascii_lowercase().as_str() {
        fb_groups::NAME => Some(fb_groups::candidate()),
        api_map::NAME => Some(api_map::candidate()),
        _ => None,
    }
}

//! Configuration resolution for output and extractor locations.

use std::path::{Path, PathBuf};

pub const OUTPUT_ENV: &str = "WARCEX_OUTPUT";
pub const EXTRACTOR_DIR_ENV: &str = "WARCEX_EXTRACTOR_DIR";

/// Resolve the root directory extractors write under.
pub fn resolve_output_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    if let Ok(env_path) = std::env::var(OUTPUT_ENV) {
        if !env_path.is_empty() {
            return PathBuf::from(env_path);
        }
    }

    PathBuf::from("warcex-output")
}

/// Resolve the directory scanned for extractor manifests.
pub fn resolve_extractor_dir() -> PathBuf {
    if let Ok(env_path) = std::env::var(EXTRACTOR_DIR_ENV) {
        if !env_path.is_empty() {
            return PathBuf::from(env_path);
        }
    }

    let cwd_dir = PathBuf::from(".warcex/extractors");
    if cwd_dir.is_dir() {
        return cwd_dir;
    }

    resolve_default_extractor_dir()
}

fn resolve_default_extractor_dir() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());

    PathBuf::from(home).join(".warcex").join("extractors")
}

/// Manifest files (`*.json`) in `dir`, sorted by file name. A missing directory yields none.
pub fn discover_manifests(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut manifests: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("json"))
        })
        .collect();
    manifests.sort();
    manifests
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_output_wins() {
        let root = resolve_output_root(Some(Path::new("/data/run-1")));
        assert_eq!(root, PathBuf::from("/data/run-1"));
    }

    #[test]
    fn test_discover_manifests_sorted_json_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.json"), "{}").unwrap();
        std::fs::write(dir.path().join("a.JSON"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("nested.json")).unwrap();

        let found = discover_manifests(dir.path());
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.JSON", "b.json"]);
    }

    #[test]
    fn test_missing_dir_has_no_manifests() {
        assert!(discover_manifests(Path::new("/nonexistent/warcex/extractors")).is_empty());
    }
}

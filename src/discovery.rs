//! Discovery Module
//!
//! Recursively scans a source tree for the units a rewrite run should touch.

use std::io;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::error::{ConvertError, Result};

/// Extensions rewritten when the caller names none.
pub const DEFAULT_EXTENSIONS: &[&str] = &["php", "phpt", "phtml"];

// ═══════════════════════════════════════════════════════════════════════════════
// SOURCE DISCOVERY
// ═══════════════════════════════════════════════════════════════════════════════

fn is_excluded(entry: &DirEntry, excluded_dirs: &[String]) -> bool {
    entry.file_type().is_dir()
        && entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map_or(false, |name| excluded_dirs.iter().any(|d| d == name))
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| {
            extensions.iter().any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(ext))
        })
}

/// Recursively find all files under `root` whose extension is allow-listed,
/// skipping any directory named in `excluded_dirs`. Sorted for stable output.
pub fn discover_sources(
    root: &Path,
    extensions: &[String],
    excluded_dirs: &[String],
) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| !is_excluded(entry, excluded_dirs));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            let source = e
                .into_io_error()
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop"));
            ConvertError::io(&path, source)
        })?;
        let path = entry.path();
        if entry.file_type().is_file() && has_extension(path, extensions) {
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn exts() -> Vec<String> {
        DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn test_finds_allow_listed_files_and_skips_excluded_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("Http")).unwrap();
        fs::create_dir_all(root.join("vendor/lib")).unwrap();
        fs::write(root.join("loader.php"), "<?php").unwrap();
        fs::write(root.join("Http/Request.PHP"), "<?php").unwrap();
        fs::write(root.join("Http/readme.txt"), "x").unwrap();
        fs::write(root.join("vendor/lib/skip.php"), "<?php").unwrap();

        let found = discover_sources(root, &exts(), &["vendor".to_string()]).unwrap();
        assert_eq!(
            found,
            vec![root.join("Http/Request.PHP"), root.join("loader.php")]
        );
    }

    #[test]
    fn test_missing_root_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_sources(&dir.path().join("nope"), &exts(), &[]).unwrap_err();
        assert!(matches!(err, ConvertError::Io { .. }));
    }
}

//! Configuration tables shared read-only by every rewrite and bundle run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{ConvertError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// REWRITE OPTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Target dialect of a rewrite run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// No namespaces, no closures: flatten and extract.
    #[default]
    Legacy,
    /// Native namespaces and closures: leave the code structure alone.
    Native,
}

/// Explicit fully-qualified name → short name overrides. Lookups are exact;
/// a leading namespace separator on either side is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenameTable(BTreeMap<String, String>);

impl RenameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, full: &str, short: &str) {
        self.0.insert(
            full.trim_start_matches('\\').to_string(),
            short.trim_start_matches('\\').to_string(),
        );
    }

    pub fn get(&self, full: &str) -> Option<&str> {
        self.0.get(full.trim_start_matches('\\')).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacement {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RewriteOptions {
    pub dialect: Dialect,
    /// Prepend `prefix` to flattened class names under a protected root.
    pub prefixed: bool,
    pub prefix: String,
    /// Namespace roots whose classes get the rename/prefix treatment.
    /// Empty means every name is protected.
    pub protected_roots: Vec<String>,
    pub renamed: RenameTable,
    /// Literal substitutions applied to the raw text before lexing.
    pub replacements: Vec<Replacement>,
    /// `@phpversion` values marking a unit as unusable on the legacy target.
    pub newer_only_versions: Vec<String>,
    /// Version in `/*5.2* ... */` activation comments.
    pub legacy_marker: String,
    /// Documentation tags whose arguments are never rewritten.
    pub exempt_tags: Vec<String>,
    /// Runtime helper class backing extracted closures.
    pub closure_shim: String,
    /// Add `@package <namespace>` to doc comments of flattened units.
    pub annotate_package: bool,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        RewriteOptions {
            dialect: Dialect::Legacy,
            prefixed: true,
            prefix: "N".to_string(),
            protected_roots: vec!["Nette".to_string()],
            renamed: RenameTable::new(),
            replacements: Vec::new(),
            newer_only_versions: vec!["5.3".to_string(), "5.4".to_string()],
            legacy_marker: "5.2".to_string(),
            exempt_tags: vec!["@package".to_string()],
            closure_shim: "NClosureFix".to_string(),
            annotate_package: true,
        }
    }
}

impl RewriteOptions {
    pub fn legacy(prefixed: bool) -> Self {
        RewriteOptions {
            prefixed,
            ..Self::default()
        }
    }

    pub fn native() -> Self {
        RewriteOptions {
            dialect: Dialect::Native,
            ..Self::default()
        }
    }

    /// Whether a fully-qualified name (no leading separator) lies under one of
    /// the protected roots.
    pub fn is_protected(&self, full: &str) -> bool {
        if self.protected_roots.is_empty() {
            return true;
        }
        self.protected_roots.iter().any(|root| {
            let root = root.trim_matches('\\');
            full.get(..root.len())
                .map_or(false, |head| head.eq_ignore_ascii_case(root))
                && full.as_bytes().get(root.len()) == Some(&b'\\')
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUNDLE OPTIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BundleOptions {
    /// Re-derive `namespace X{ ... }` blocks in the output.
    pub use_namespaces: bool,
    /// Format marker written into the header line.
    pub header_marker: String,
    /// Root namespace named in the header line.
    pub root_namespace: String,
    /// Annotation tags (e.g. `@Target`) whose doc comments survive stripping.
    /// Empty keeps any doc comment with a capitalised annotation.
    pub retained_annotations: Vec<String>,
    /// Base classes that may be missing at runtime; subclasses get wrapped in
    /// an existence check.
    pub optional_bases: Vec<String>,
    /// Autoloader class whose registration line splits the loader unit.
    pub loader_class: String,
    /// File names never inlined by `bundle_package`.
    pub skip_files: Vec<String>,
}

impl Default for BundleOptions {
    fn default() -> Self {
        BundleOptions {
            use_namespaces: true,
            header_marker: "netteloader".to_string(),
            root_namespace: "Nette\\Framework".to_string(),
            retained_annotations: Vec::new(),
            optional_bases: vec!["PDO".to_string()],
            loader_class: "NetteLoader".to_string(),
            skip_files: vec!["loader.php".to_string(), "NetteLoader.php".to_string()],
        }
    }
}

impl BundleOptions {
    pub fn legacy() -> Self {
        BundleOptions {
            use_namespaces: false,
            ..Self::default()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIG FILE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub rewrite: RewriteOptions,
    pub bundle: BundleOptions,
}

impl Config {
    pub fn from_json(json: &str) -> Result<Config> {
        serde_json::from_str(json).map_err(|e| ConvertError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Config> {
        let data = fs::read_to_string(path).map_err(|e| ConvertError::io(path, e))?;
        Self::from_json(&data).map_err(|e| match e {
            ConvertError::Config(msg) => ConvertError::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = Config::from_json(
            r#"{ "rewrite": { "prefixed": false, "renamed": { "Nette\\Object": "Object" } } }"#,
        )
        .unwrap();
        assert!(!config.rewrite.prefixed);
        assert_eq!(config.rewrite.prefix, "N");
        assert_eq!(config.rewrite.renamed.get("\\Nette\\Object"), Some("Object"));
        assert!(config.bundle.use_namespaces);
    }

    #[test]
    fn test_dialect_names() {
        let config = Config::from_json(r#"{ "rewrite": { "dialect": "native" } }"#).unwrap();
        assert_eq!(config.rewrite.dialect, Dialect::Native);
        assert!(Config::from_json(r#"{ "rewrite": { "dialect": "ancient" } }"#).is_err());
    }

    #[test]
    fn test_protected_roots_match_whole_segments() {
        let options = RewriteOptions::default();
        assert!(options.is_protected("Nette\\Object"));
        assert!(!options.is_protected("NetteX\\Object"));
        assert!(!options.is_protected("Nette"));

        let everything = RewriteOptions {
            protected_roots: vec![],
            ..RewriteOptions::default()
        };
        assert!(everything.is_protected("Anything"));
    }
}

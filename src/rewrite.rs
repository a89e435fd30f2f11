//! Rewrite Engine
//!
//! Runs the passes over one unit, in order:
//!
//! 1. drop check (`@phpversion` of a newer-only dialect),
//! 2. literal replacements and version markers,
//! 3. language substitutions (`__DIR__`, late static binding, `?:`),
//! 4. qualification / flattening,
//! 5. closure extraction,
//! 6. `@package` tagging and blank-line consolidation.
//!
//! The native dialect keeps the code structure and only gets the textual
//! clean-ups. Rewriting is a pure function of (text, path, options), so a
//! tree is processed in parallel with the options shared read-only.

use log::{debug, info};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

use crate::closures::extract_closures;
use crate::compat;
use crate::config::{Dialect, RewriteOptions};
use crate::discovery::discover_sources;
use crate::error::{ConvertError, Result};
use crate::lexer::tokenize;
use crate::qualify::qualify;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    Rewritten {
        text: String,
        /// Closures lifted out of the unit.
        lifted: usize,
    },
    /// The unit only makes sense on the newer dialect.
    Dropped,
}

impl RewriteOutcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            RewriteOutcome::Rewritten { text, .. } => Some(text),
            RewriteOutcome::Dropped => None,
        }
    }
}

/// What `rewrite_file` did on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    Unchanged,
    Written,
    Deleted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeReport {
    pub written: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
    pub unchanged: usize,
}

/// Rewrite one unit's text for the configured dialect.
pub fn rewrite_source(path: &Path, text: &str, options: &RewriteOptions) -> Result<RewriteOutcome> {
    let text = compat::apply_replacements(text, &options.replacements);

    if options.dialect == Dialect::Native {
        // still has to lex
        tokenize(&text).map_err(|e| e.with_path(path))?;
        return Ok(RewriteOutcome::Rewritten {
            text: compat::consolidate_blank_lines(&text),
            lifted: 0,
        });
    }

    if compat::is_newer_only(&text, &options.newer_only_versions) {
        debug!("[Downlevel] dropping {}", path.display());
        return Ok(RewriteOutcome::Dropped);
    }

    let text = compat::activate_version_markers(&text, &options.legacy_marker)
        .map_err(|e| e.with_path(path))?;
    let text = compat::substitute_legacy_constructs(&text).map_err(|e| e.with_path(path))?;
    let text = compat::expand_short_ternary(&text);

    let qualified = qualify(&text, path, options)?;
    let (text, closures) = extract_closures(&qualified.text, path, &options.closure_shim)?;

    let text = if options.annotate_package {
        compat::annotate_package(&text, &qualified.namespace)
    } else {
        text
    };

    Ok(RewriteOutcome::Rewritten {
        text: compat::consolidate_blank_lines(&text),
        lifted: closures.entries().len(),
    })
}

/// Rewrite a unit in place. The file is written only when its text changed
/// and deleted when the unit is dropped.
pub fn rewrite_file(path: &Path, options: &RewriteOptions) -> Result<FileAction> {
    let original = fs::read_to_string(path).map_err(|e| ConvertError::io(path, e))?;

    match rewrite_source(path, &original, options)? {
        RewriteOutcome::Dropped => {
            fs::remove_file(path).map_err(|e| ConvertError::io(path, e))?;
            Ok(FileAction::Deleted)
        }
        RewriteOutcome::Rewritten { text, .. } if text != original => {
            fs::write(path, text).map_err(|e| ConvertError::io(path, e))?;
            Ok(FileAction::Written)
        }
        RewriteOutcome::Rewritten { .. } => Ok(FileAction::Unchanged),
    }
}

/// Rewrite every allow-listed unit under `root` in parallel. The first failure
/// aborts the batch and is returned with the failing path.
pub fn rewrite_tree(
    root: &Path,
    extensions: &[String],
    excluded_dirs: &[String],
    options: &RewriteOptions,
) -> Result<TreeReport> {
    let files = discover_sources(root, extensions, excluded_dirs)?;
    info!(
        "[Downlevel] rewriting {} files under {} ({:?})",
        files.len(),
        root.display(),
        options.dialect
    );

    let actions = files
        .par_iter()
        .map(|path| rewrite_file(path, options).map(|action| (path.clone(), action)))
        .collect::<Result<Vec<_>>>()?;

    let mut report = TreeReport::default();
    for (path, action) in actions {
        match action {
            FileAction::Written => report.written.push(path),
            FileAction::Deleted => report.deleted.push(path),
            FileAction::Unchanged => report.unchanged += 1,
        }
    }
    info!(
        "[Downlevel] {} written, {} deleted, {} unchanged",
        report.written.len(),
        report.deleted.len(),
        report.unchanged
    );
    Ok(report)
}

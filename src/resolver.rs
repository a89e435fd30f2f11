//! Alias/Namespace Resolver
//!
//! Tracks the namespace a unit is currently in and the aliases its `use`
//! declarations introduced, and turns bare or partially qualified class names
//! into fully-qualified ones.
//!
//! Fully-qualified names are kept without a leading separator
//! (`Nette\Object`, never `\Nette\Object`).

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{ConvertError, Result};

/// Names resolved by the enclosing class rather than by namespace rules.
const RELATIVE_NAMES: &[&str] = &["self", "parent", "static"];

#[derive(Debug, Clone, Default)]
pub struct NameResolver {
    namespace: String,
    /// lower-cased short name → fully-qualified path
    aliases: HashMap<String, String>,
}

impl NameResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Enter a namespace block. Aliases never leak from one block to the next.
    pub fn enter_namespace(&mut self, namespace: &str) {
        self.namespace = namespace.trim_matches('\\').to_string();
        self.aliases.clear();
    }

    /// Register `use <class> [as <alias>]`. A later import with the same short
    /// name silently replaces the earlier one.
    pub fn add_import(&mut self, class: &str, alias: Option<&str>) {
        let class = class.trim_start_matches('\\');
        let short = match alias {
            Some(alias) => alias,
            None => last_segment(class),
        };
        self.aliases
            .insert(short.to_ascii_lowercase(), class.to_string());
    }

    pub fn alias(&self, short: &str) -> Option<&str> {
        self.aliases
            .get(&short.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Resolve an identifier to its fully-qualified path.
    pub fn resolve(&self, identifier: &str) -> Result<String> {
        if identifier.is_empty()
            || RELATIVE_NAMES
                .iter()
                .any(|n| n.eq_ignore_ascii_case(identifier))
        {
            return Ok(identifier.to_string());
        }

        let unrooted = identifier.strip_prefix('\\');
        let name = unrooted.unwrap_or(identifier);
        if name.split('\\').any(str::is_empty) {
            return Err(ConvertError::Resolution {
                path: PathBuf::new(),
                subject: identifier.to_string(),
                reason: "empty namespace segment".to_string(),
            });
        }
        if unrooted.is_some() {
            return Ok(name.to_string());
        }

        let (first, rest) = match name.find('\\') {
            Some(i) => (&name[..i], &name[i..]),
            None => (name, ""),
        };
        if let Some(target) = self.alias(first) {
            return Ok(format!("{}{}", target, rest));
        }
        if self.namespace.is_empty() {
            Ok(name.to_string())
        } else {
            Ok(format!("{}\\{}", self.namespace, name))
        }
    }
}

pub fn last_segment(name: &str) -> &str {
    match name.rfind('\\') {
        Some(i) => &name[i + 1..],
        None => name,
    }
}

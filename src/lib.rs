//! # Downlevel Ground Truth
//!
//! Turns PHP 5.3 sources into PHP 5.2 sources and merges a graph of sources
//! into one compact file.
//!
//! ## Rewrite Invariants
//!
//! 1. **Lossless Lexing**: concatenating the token texts of a unit reproduces
//!    the unit byte for byte. Every pass works on tokens and re-serializes.
//!
//! 2. **Name Resolution**: a class name resolves against, in order,
//!    - a leading `\` (already fully qualified),
//!    - the `use` alias bound to its first segment,
//!    - the current namespace.
//!
//!    `self`, `parent` and `static` never resolve. An empty segment is an error
//!    (DL-ERR-RESOLVE-001).
//!
//! 3. **Flattening**: resolved names under a protected root become their
//!    rename-table entry or last segment, prefixed with `N` unless they follow
//!    the interface convention (`IComponent`).
//!    - `Nette\Http\Request` → `NRequest`
//!    - `Nette\IComponent` → `IComponent`
//!    - `Other\Thing` → `Thing`
//!
//! 4. **Closures**: every closure literal becomes a lifted top-level function
//!    plus a shim call carrying its captures. A closure nested in a lifted body
//!    is a hard error (DL-ERR-CLOSURE-001).
//!
//! 5. **Idempotence**: rewriting an already rewritten unit yields it unchanged.
//!
//! ## Bundle Invariants
//!
//! 1. Each unit is inlined at most once, whatever directive includes it.
//! 2. At most one namespace block is open; it is closed before the next one
//!    opens and before the output ends.
//! 3. Returning from an inlined unit re-opens the includer's namespace block
//!    and re-emits its imports.

mod bundle;
mod closures;
mod compat;
mod config;
mod cursor;
mod discovery;
mod error;
mod include;
mod lexer;
mod qualify;
mod resolver;
mod rewrite;

#[cfg(test)]
mod rewrite_tests;

pub use bundle::{bundle_package, bundle_root, finalize_output, split_loader, BundleState, Bundler};
pub use closures::{extract_closures, shim_source, ClosureTable, LiftedClosure};
pub use config::{BundleOptions, Config, Dialect, RenameTable, Replacement, RewriteOptions};
pub use cursor::{Pattern, TokenCursor, NAME};
pub use discovery::{discover_sources, DEFAULT_EXTENSIONS};
pub use error::{ConvertError, Result};
pub use include::evaluate as evaluate_include;
pub use lexer::{serialize, tokenize, Keyword, Token, TokenKind};
pub use qualify::{qualify, ClassNamer, QualifyOutput};
pub use resolver::NameResolver;
pub use rewrite::{rewrite_file, rewrite_source, rewrite_tree, FileAction, RewriteOutcome, TreeReport};

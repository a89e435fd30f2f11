//! Bundler / Minifier
//!
//! Merges a graph of units into one compact file. Inclusion directives whose
//! target can be evaluated statically are replaced by the included unit's
//! content (each unit at most once); everything else is copied token by token
//! with whitespace and comments squeezed out.
//!
//! ## Invariants
//!
//! 1. At most one `namespace X{` block is open at any point of the output; a
//!    block is closed before another opens and before the output ends.
//! 2. After an inlined unit changed the namespace, the including unit's
//!    namespace block is re-opened and its imports re-emitted.
//! 3. A unit path is inlined at most once per bundle.

use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::BundleOptions;
use crate::error::{excerpt, ConvertError, Result};
use crate::include;
use crate::lexer::{tokenize, Keyword, Token, TokenKind};

lazy_static! {
    static ref TRAILING_BLANKS_RE: Regex = Regex::new(r"[\t ]+\n").unwrap();
    static ref ANNOTATION_RE: Regex = Regex::new(r" @[A-Z]").unwrap();
}

/// Characters next to which a dropped space needs no replacement.
const SEPARATORS: &str = "!\"#$&'()*+,-./:;<=>?@[\\]^`{|}";

fn is_separator(c: Option<char>) -> bool {
    c.map_or(true, |c| c.is_whitespace() || SEPARATORS.contains(c))
}

/// Two separators that would read as one different token once the space
/// between them is gone: `- -$a`, `+ +$a`, `1 . 2`, `$a < <<<EOT`.
fn would_fuse(prev: Option<char>, next: Option<char>) -> bool {
    let (Some(prev), Some(next)) = (prev, next) else {
        return false;
    };
    match (prev, next) {
        ('.', d) | (d, '.') if d.is_ascii_digit() => true,
        ('+', '+' | '=')
        | ('-', '-' | '=' | '>')
        | ('&', '&' | '=')
        | ('|', '|' | '=')
        | ('<', '<' | '=' | '>')
        | ('>', '>' | '=')
        | ('=', '=' | '>')
        | ('!', '=')
        | ('.', '.' | '=')
        | ('*', '*' | '=' | '/')
        | ('/', '/' | '*' | '=')
        | ('%', '=')
        | ('^', '=')
        | (':', ':')
        | ('?', '>') => true,
        _ => false,
    }
}

/// A directive being collected until its terminating token.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Pending {
    Namespace,
    Use,
    Include(String),
}

/// State threaded through the depth-first traversal.
#[derive(Debug, Default)]
pub struct BundleState {
    /// Currently open namespace block, if any.
    pub namespace: Option<String>,
    /// Imports already emitted inside the open namespace block.
    pub imports: Vec<String>,
    /// Canonical paths of every unit inlined so far.
    pub visited: HashSet<PathBuf>,
    pub in_php: bool,
    /// Banner comment: the first doc comment seen.
    pub first_comment: Option<String>,
}

impl BundleState {
    fn switch_namespace(&mut self, out: &mut String, namespace: &str) {
        if self.namespace.as_deref() == Some(namespace) {
            return;
        }
        if self.namespace.is_some() {
            out.push('}');
        }
        out.push_str(&format!("namespace {}{{", namespace));
        self.namespace = Some(namespace.to_string());
        self.imports.clear();
    }
}

pub struct Bundler<'o> {
    options: &'o BundleOptions,
    state: BundleState,
    output: String,
}

impl<'o> Bundler<'o> {
    pub fn new(options: &'o BundleOptions) -> Self {
        Bundler {
            options,
            state: BundleState::default(),
            output: String::new(),
        }
    }

    pub fn state(&self) -> &BundleState {
        &self.state
    }

    fn canonical(path: &Path) -> Result<PathBuf> {
        fs::canonicalize(path).map_err(|e| ConvertError::io(path, e))
    }

    /// Inline one unit from disk, unless it was inlined before.
    pub fn add_file(&mut self, path: &Path) -> Result<()> {
        let canonical = Self::canonical(path)?;
        if !self.state.visited.insert(canonical.clone()) {
            debug!("[Downlevel] already inlined {}", path.display());
            return Ok(());
        }
        debug!("[Downlevel] inlining {}", path.display());
        let content = fs::read_to_string(&canonical).map_err(|e| ConvertError::io(path, e))?;
        let content = self.wrap_optional_base(&content, &canonical)?;
        self.add_content(&content, &canonical)
    }

    /// A class extending a base that may be missing at runtime is declared only
    /// when the base exists.
    fn wrap_optional_base(&self, content: &str, path: &Path) -> Result<String> {
        if self.options.optional_bases.is_empty() {
            return Ok(content.to_string());
        }
        let tokens = tokenize(content).map_err(|e| e.with_path(path))?;
        let significant: Vec<&Token> = tokens.iter().filter(|t| !t.kind.is_trivia()).collect();
        for window in significant.windows(4) {
            if !(window[0].is_keyword(Keyword::Class) && window[2].is_keyword(Keyword::Extends)) {
                continue;
            }
            let base = window[3].text.trim_start_matches('\\');
            let base = if window[3].is_punct("\\") {
                significant
                    .iter()
                    .find(|t| t.offset > window[3].offset)
                    .map_or("", |t| t.text.as_str())
            } else {
                base
            };
            if let Some(optional) = self.options.optional_bases.iter().find(|b| b.as_str() == base) {
                let at = window[0].offset;
                return Ok(format!(
                    "{}if (class_exists('{}')){{ {} }}",
                    &content[..at],
                    optional,
                    &content[at..]
                ));
            }
        }
        Ok(content.to_string())
    }

    fn is_retained(&self, doc: &str) -> bool {
        if self.options.retained_annotations.is_empty() {
            return ANNOTATION_RE.is_match(doc);
        }
        self.options.retained_annotations.iter().any(|tag| {
            let tag = format!("@{}", tag.trim_start_matches('@'));
            doc.match_indices(&tag).any(|(i, _)| {
                !doc[i + tag.len()..]
                    .chars()
                    .next()
                    .map_or(false, |c| c.is_alphanumeric() || c == '_')
            })
        })
    }

    fn emit(&mut self, text: &str, space: &mut bool) {
        if *space {
            let (prev, next) = (self.output.chars().last(), text.chars().next());
            if !is_separator(prev) && !is_separator(next) {
                self.output.push('\n');
            } else if would_fuse(prev, next) {
                self.output.push(' ');
            }
            *space = false;
        }
        self.output.push_str(text);
    }

    /// Copy one unit's text into the output. `origin` is the file the text came
    /// from; relative inclusion targets are resolved against its directory.
    pub fn add_content(&mut self, content: &str, origin: &Path) -> Result<()> {
        let declares_namespace = |tokens: &[Token]| {
            tokens
                .iter()
                .any(|t| t.is_keyword(Keyword::Namespace))
        };
        let mut tokens = tokenize(content).map_err(|e| e.with_path(origin))?;
        let mut source = content.to_string();
        if self.options.use_namespaces && !declares_namespace(&tokens) && content.starts_with("<?php") {
            source = format!("<?php\nnamespace;{}", &content["<?php".len()..]);
            tokens = tokenize(&source).map_err(|e| e.with_path(origin))?;
        }

        let mut start = 0;
        if self.state.in_php {
            if tokens.first().map_or(false, |t| t.kind == TokenKind::OpenTag) {
                start = 1;
            } else {
                self.output.push_str("?>");
                self.state.in_php = false;
            }
        }

        let last_code = tokens
            .iter()
            .rposition(|t| match t.kind {
                TokenKind::EndOfInput => false,
                TokenKind::InlineHtml => !t.text.trim().is_empty(),
                _ => true,
            });

        // `true` marks the brace that opened a braced namespace declaration
        let mut braces: Vec<bool> = Vec::new();
        let mut space = start == 1;
        let mut pending: Option<Pending> = None;
        let mut expr = String::new();

        let mut i = start;
        while i < tokens.len() {
            let token = &tokens[i];
            i += 1;
            match token.kind {
                TokenKind::EndOfInput => break,
                TokenKind::Whitespace | TokenKind::Comment => {
                    if pending.is_some() {
                        expr.push(' ');
                    } else {
                        space = true;
                    }
                    continue;
                }
                TokenKind::Keyword(Keyword::Public) if self.drops_public(&tokens, i) => {
                    continue;
                }
                TokenKind::DocComment => {
                    if self.state.first_comment.is_none() {
                        self.state.first_comment = Some(token.text.clone());
                        self.output.push_str(&token.text);
                        self.output.push('\n');
                        space = true;
                        continue;
                    }
                    if !self.is_retained(&token.text) {
                        space = true;
                        continue;
                    }
                }
                TokenKind::Keyword(kw) if kw.is_inclusion() => {
                    pending = Some(Pending::Include(token.text.clone()));
                    expr.clear();
                    continue;
                }
                TokenKind::Keyword(Keyword::Namespace) => {
                    pending = Some(Pending::Namespace);
                    expr.clear();
                    continue;
                }
                TokenKind::Keyword(Keyword::Use) => {
                    pending = Some(Pending::Use);
                    expr.clear();
                    continue;
                }
                _ => {}
            }

            if let Some(directive) = pending.clone() {
                let ends = token.kind == TokenKind::CloseTag
                    || token.is_punct(";")
                    || token.is_punct("{")
                    || token.is_punct(",")
                    || (directive == Pending::Use && token.is_punct("("));
                if ends {
                    let value = expr.trim().to_string();
                    match directive {
                        Pending::Namespace => {
                            self.state.switch_namespace(&mut self.output, &value);
                            if token.is_punct("{") {
                                braces.push(true);
                            }
                        }
                        Pending::Use => {
                            if token.is_punct("(") {
                                self.output.push_str("use(");
                            } else if !self.state.imports.contains(&value) {
                                self.output.push_str(&format!("use\n{};", value));
                                self.state.imports.push(value);
                            }
                        }
                        Pending::Include(directive) => {
                            self.inline(&directive, &value, origin, &source, token)?;
                            if !self.state.in_php && token.kind != TokenKind::CloseTag {
                                self.output.push_str("<?php ");
                                self.state.in_php = true;
                            }
                        }
                    }
                    if !token.is_punct(",") {
                        pending = None;
                    }
                    expr.clear();
                    if token.kind != TokenKind::CloseTag {
                        continue;
                    }
                } else {
                    expr.push_str(&token.text);
                    continue;
                }
            }

            match token.kind {
                TokenKind::OpenTag => self.state.in_php = true,
                TokenKind::CloseTag => {
                    if last_code == Some(i - 1) {
                        break;
                    }
                    self.state.in_php = false;
                }
                TokenKind::Punctuation => match token.text.as_str() {
                    "{" => braces.push(false),
                    "}" => {
                        if braces.pop() == Some(true) {
                            continue;
                        }
                    }
                    ")" => {
                        if self.output.ends_with(',') {
                            self.output.pop();
                        }
                    }
                    _ => {}
                },
                _ => {}
            }

            self.emit(&token.text, &mut space);
        }
        Ok(())
    }

    /// `public` in front of `function`, possibly via `static`, `abstract` or
    /// `final`, is the default and can go.
    fn drops_public(&self, tokens: &[Token], from: usize) -> bool {
        let mut significant = tokens[from..].iter().filter(|t| !t.kind.is_trivia());
        match significant.next() {
            Some(t) if t.is_keyword(Keyword::Function) => true,
            Some(t)
                if t.is_keyword(Keyword::Static)
                    || t.is_keyword(Keyword::Abstract)
                    || t.is_keyword(Keyword::Final) =>
            {
                significant
                    .next()
                    .map_or(false, |t| t.is_keyword(Keyword::Function))
            }
            _ => false,
        }
    }

    /// Replace an inclusion directive by the included unit, or keep it when
    /// the target is dynamic.
    fn inline(
        &mut self,
        directive: &str,
        expr: &str,
        origin: &Path,
        source: &str,
        at: &Token,
    ) -> Result<()> {
        let Some(target) = include::evaluate(expr, origin) else {
            self.output.push_str(&format!(" {} {};", directive, expr));
            return Ok(());
        };
        if !target.is_file() {
            return Err(ConvertError::resolution(
                origin,
                &target.display().to_string(),
                &format!("included file not found near `{}`", excerpt(source, at.offset)),
            ));
        }

        let namespace = self.state.namespace.clone();
        let imports = self.state.imports.clone();
        self.add_file(&target)?;

        if self.state.namespace != namespace {
            if !self.state.in_php {
                self.output.push_str("<?php ");
                self.state.in_php = true;
            }
            if self.state.namespace.is_some() {
                self.output.push('}');
                self.state.namespace = None;
            }
            if let Some(namespace) = namespace {
                self.output.push_str(&format!("namespace {}{{", namespace));
                if !imports.is_empty() && !namespace.is_empty() {
                    self.output.push_str(&format!("use\n{};", imports.join(",")));
                }
                self.state.namespace = Some(namespace);
            }
            self.state.imports = imports;
        }
        Ok(())
    }

    /// Close the open namespace block and hand back the raw merged text.
    pub fn finish(mut self) -> String {
        if self.state.namespace.take().is_some() {
            if !self.state.in_php {
                self.output.push_str("<?php ");
            }
            self.output.push('}');
        }
        self.output
    }
}

/// Header line, line endings and trailing blanks of the final artifact.
pub fn finalize_output(raw: &str, options: &BundleOptions) -> String {
    let header = format!("<?php //{}={}\n", options.header_marker, options.root_namespace);
    let body = match raw.strip_prefix("<?php") {
        Some(rest) => format!("{}{}", header, rest),
        None => format!("{}?>{}", header, raw),
    };
    let body = body.replace("\r\n", "\n");
    TRAILING_BLANKS_RE
        .replace_all(&body, "\n")
        .trim()
        .to_string()
}

/// Bundle every unit reachable from `root` through inclusion directives.
pub fn bundle_root(root: &Path, options: &BundleOptions) -> Result<String> {
    info!("[Downlevel] bundling {}", root.display());
    let mut bundler = Bundler::new(options);
    bundler.add_file(root)?;
    Ok(finalize_output(&bundler.finish(), options))
}

/// Split the loader around its dynamic-loading line.
pub fn split_loader(loader: &str, options: &BundleOptions, path: &Path) -> Result<(String, String)> {
    let pattern = format!(
        r"(?m)^(?:require|.*{}::).*;\s*",
        regex::escape(&options.loader_class)
    );
    let re = Regex::new(&pattern).map_err(|e| ConvertError::Config(e.to_string()))?;
    let parts: Vec<&str> = re.split(loader).filter(|p| !p.is_empty()).collect();
    match parts.as_slice() {
        [head, tail] => Ok((head.to_string(), tail.to_string())),
        _ => Err(ConvertError::Structural {
            path: path.to_path_buf(),
            reason: format!(
                "loader splits into {} parts around its loading line, expected 2",
                parts.len()
            ),
        }),
    }
}

/// Bundle a whole package: the loader without its loading line, then every
/// file in load order, then the rest of the loader and the epilogue files.
pub fn bundle_package(
    loader: &Path,
    files: &[PathBuf],
    epilogue: &[PathBuf],
    options: &BundleOptions,
) -> Result<String> {
    info!("[Downlevel] bundling package from {}", loader.display());
    let text = fs::read_to_string(loader).map_err(|e| ConvertError::io(loader, e))?;
    let (head, tail) = split_loader(&text, options, loader)?;

    let mut bundler = Bundler::new(options);
    let canonical = Bundler::canonical(loader)?;
    bundler.state.visited.insert(canonical.clone());
    bundler.add_content(&head, &canonical)?;

    for file in files {
        let skipped = file
            .file_name()
            .map_or(false, |name| options.skip_files.iter().any(|s| name == s.as_str()));
        if skipped {
            debug!("[Downlevel] skipping {}", file.display());
            continue;
        }
        bundler.add_file(file)?;
    }

    bundler.add_content(&format!("<?php {}", tail), &canonical)?;
    for file in epilogue {
        if file.is_file() {
            bundler.add_file(file)?;
        } else {
            debug!("[Downlevel] no epilogue file {}", file.display());
        }
    }
    Ok(finalize_output(&bundler.finish(), options))
}

//! Qualification / Flattening Pass
//!
//! First rewrite pass. Walks the token stream of one unit and:
//!
//! 1. drops `namespace X;` declarations (braced ones keep a bare `{` block),
//! 2. feeds `use` imports into the resolver and drops them,
//! 3. replaces class names in class-relationship positions (declarations,
//!    `extends`, `implements`, `new`, `instanceof`, `Foo::`, type hints) by
//!    their flattened short form,
//! 4. applies the same flattening to type names in comments and to
//!    fully-qualified names inside string literals.
//!
//! ## Flattening Rule
//!
//! A resolved name under a protected root becomes its RenameTable entry or its
//! last segment; with prefixing enabled, a capitalised short name gets the
//! marker prepended unless it follows the interface convention (`I` followed
//! by another capital). Names outside protected roots become their last
//! segment, never prefixed. Names in the global namespace are already flat
//! and stay as written, which keeps a second run a no-op.

use regex::{Captures, Regex};
use std::path::Path;

use crate::config::RewriteOptions;
use crate::cursor::{Pattern, TokenCursor, NAME};
use crate::error::{excerpt, ConvertError, Result};
use crate::lexer::{tokenize, Keyword, Token, TokenKind};
use crate::resolver::{last_segment, NameResolver};

/// Tags whose argument is a type in documentation comments.
const TYPE_TAGS: &str = r"@var(?:\s+array of)?|returns?|param|throws|@link|property[\w-]*";

const CLASS_CONTEXT: &[Pattern<'static>] = &[
    Pattern::Kind(TokenKind::Keyword(Keyword::InstanceOf)),
    Pattern::Kind(TokenKind::Keyword(Keyword::Extends)),
    Pattern::Kind(TokenKind::Keyword(Keyword::Implements)),
    Pattern::Kind(TokenKind::Keyword(Keyword::New)),
    Pattern::Kind(TokenKind::Keyword(Keyword::Class)),
    Pattern::Kind(TokenKind::Keyword(Keyword::Interface)),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifyOutput {
    pub text: String,
    /// Namespace in effect at the end of the unit (empty when none).
    pub namespace: String,
}

/// Maps resolved class names to their flattened form.
pub struct ClassNamer<'o> {
    options: &'o RewriteOptions,
}

impl<'o> ClassNamer<'o> {
    pub fn new(options: &'o RewriteOptions) -> Self {
        ClassNamer { options }
    }

    /// Short form of a fully-qualified name.
    pub fn flatten(&self, full: &str) -> String {
        let full = full.trim_start_matches('\\');
        // names already in the global namespace are flat
        if !full.contains('\\') || is_relative(full) {
            return full.to_string();
        }
        let short = last_segment(full);
        if !self.options.is_protected(full) {
            return short.to_string();
        }
        let short = self.options.renamed.get(full).unwrap_or(short);
        if self.options.prefixed && needs_prefix(short) {
            format!("{}{}", self.options.prefix, short)
        } else {
            short.to_string()
        }
    }
}

fn is_relative(name: &str) -> bool {
    ["self", "parent", "static"]
        .iter()
        .any(|n| n.eq_ignore_ascii_case(name))
}

/// Capitalised, and not an interface name such as `IComponent`.
fn needs_prefix(short: &str) -> bool {
    let mut chars = short.chars();
    match (chars.next(), chars.next()) {
        (Some('I'), Some(second)) if second.is_ascii_uppercase() => false,
        (Some(first), _) => first.is_ascii_uppercase(),
        _ => false,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// QUALIFIER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Qualifier<'o> {
    path: &'o Path,
    namer: ClassNamer<'o>,
    resolver: NameResolver,
    comment_re: Regex,
    single_quoted_re: Option<Regex>,
    other_string_re: Option<Regex>,
}

impl<'o> Qualifier<'o> {
    pub fn new(path: &'o Path, options: &'o RewriteOptions) -> Result<Self> {
        let exempt: Vec<String> = options
            .exempt_tags
            .iter()
            .map(|t| regex::escape(t))
            .collect();
        let tags = if exempt.is_empty() {
            TYPE_TAGS.to_string()
        } else {
            format!("{}|{}", TYPE_TAGS, exempt.join("|"))
        };
        let comment_re = compile(&format!(
            r"(?P<tag>(?:{})\s+)?(?P<name>\\?[A-Z][\w\\|]+)(?P<colons>::)?",
            tags
        ))?;

        let roots: Vec<String> = options
            .protected_roots
            .iter()
            .map(|r| regex::escape(r.trim_matches('\\')))
            .collect();
        let string_re = |slashes: &str| -> Result<Option<Regex>> {
            if roots.is_empty() {
                return Ok(None);
            }
            compile(&format!(
                r#"(?P<name>(?:{roots})\\{s}(?:\w+\\{s})*\w+)(?P<tail>[ ,.:'"()]|\\')"#,
                roots = roots.join("|"),
                s = slashes
            ))
            .map(Some)
        };

        Ok(Qualifier {
            path,
            namer: ClassNamer::new(options),
            resolver: NameResolver::new(),
            comment_re,
            single_quoted_re: string_re("{1}")?,
            other_string_re: string_re("{1,2}")?,
        })
    }

    /// Resolve and flatten a class name found in code.
    fn replace_class(&self, identifier: &str, token: &Token, source: &str) -> Result<String> {
        let full = self.resolver.resolve(identifier).map_err(|e| match e {
            ConvertError::Resolution { subject, reason, .. } => ConvertError::Resolution {
                path: self.path.to_path_buf(),
                subject,
                reason: format!("{} near `{}`", reason, excerpt(source, token.offset)),
            },
            other => other.with_path(self.path),
        })?;
        Ok(self.namer.flatten(&full))
    }

    /// Like `replace_class`, but names that do not resolve are left as written.
    fn replace_prose_class(&self, identifier: &str) -> String {
        match self.resolver.resolve(identifier) {
            Ok(full) => self.namer.flatten(&full),
            Err(_) => identifier.to_string(),
        }
    }

    pub fn run(mut self, source: &str) -> Result<QualifyOutput> {
        let tokens = tokenize(source).map_err(|e| e.with_path(self.path))?;
        let mut cursor = TokenCursor::new(&tokens);
        let mut out = String::with_capacity(source.len());

        // inside `interface X extends A, B` until the body opens
        let mut interface_header = false;

        while let Some(token) = cursor.next_token() {
            if token.is_punct("{") {
                interface_header = false;
            }
            match token.kind {
                TokenKind::Keyword(Keyword::Namespace) => {
                    let namespace = cursor.fetch_all(NAME);
                    self.resolver.enter_namespace(&namespace);
                    let end = cursor.fetch(&[Pattern::Punct(";"), Pattern::Punct("{")]);
                    if end.map_or(false, |t| t.is_punct("{")) {
                        out.push('{');
                    }
                }

                TokenKind::Keyword(Keyword::Use) => {
                    if cursor.is_next(&[Pattern::Punct("(")]) {
                        out.push_str(&token.text);
                        continue;
                    }
                    loop {
                        let class = cursor.fetch_all(NAME);
                        let alias = if cursor
                            .fetch(&[Pattern::Kind(TokenKind::Keyword(Keyword::As))])
                            .is_some()
                        {
                            cursor
                                .fetch(&[Pattern::Kind(TokenKind::Identifier)])
                                .map(|t| t.text.as_str())
                        } else {
                            None
                        };
                        if !class.is_empty() {
                            self.resolver.add_import(&class, alias);
                        }
                        if cursor.fetch(&[Pattern::Punct(",")]).is_none() {
                            break;
                        }
                    }
                    cursor.fetch(&[Pattern::Punct(";")]);
                }

                _ if cursor.is_current(CLASS_CONTEXT) => {
                    if token.is_keyword(Keyword::Interface) {
                        interface_header = true;
                    }
                    let takes_list = token.is_keyword(Keyword::Implements)
                        || (interface_header && token.is_keyword(Keyword::Extends));
                    let mut current = token;
                    loop {
                        out.push_str(&current.text);
                        out.push_str(&cursor.fetch_all(&[Pattern::Kind(TokenKind::Whitespace)]));
                        let name = cursor.fetch_all(NAME);
                        out.push_str(&self.replace_class(&name, current, source)?);
                        if !takes_list {
                            break;
                        }
                        match cursor.fetch(&[Pattern::Punct(",")]) {
                            Some(comma) => current = comma,
                            None => break,
                        }
                    }
                }

                _ if cursor.is_current(NAME) => {
                    let identifier = format!("{}{}", token.text, cursor.fetch_all(NAME));
                    if cursor.is_next(&[Pattern::Punct("::"), Pattern::Kind(TokenKind::Variable)])
                        || is_by_ref_param(&cursor, &out)
                    {
                        out.push_str(&self.replace_class(&identifier, token, source)?);
                    } else {
                        out.push_str(&identifier);
                    }
                }

                TokenKind::Comment | TokenKind::DocComment => {
                    out.push_str(&self.rewrite_comment(&token.text));
                }

                TokenKind::StringLiteral => {
                    out.push_str(&self.rewrite_string(&token.text));
                }

                _ => out.push_str(&token.text),
            }
        }

        Ok(QualifyOutput {
            text: out,
            namespace: self.resolver.namespace().to_string(),
        })
    }

    /// `@var Foo|Bar`, `@throws Foo\Bar`, `Foo::method()` and any backslashed
    /// name in a comment. Exempt tags and plain capitalised words stay as they
    /// are.
    fn rewrite_comment(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in self.comment_re.captures_iter(text) {
            let whole = caps.get(0).map_or(0..0, |m| m.range());
            out.push_str(&text[last..whole.start]);
            out.push_str(&self.rewrite_comment_match(text, &caps));
            last = whole.end;
        }
        out.push_str(&text[last..]);
        out
    }

    fn rewrite_comment_match(&self, text: &str, caps: &Captures) -> String {
        let whole = &caps[0];
        let tag = caps.name("tag").map_or("", |m| m.as_str());
        let colons = caps.name("colons").map_or("", |m| m.as_str());
        let Some(name) = caps.name("name") else {
            return whole.to_string();
        };

        if tag.is_empty() {
            let preceded_by_word = text[..name.start()]
                .bytes()
                .last()
                .map_or(true, |b| b.is_ascii_alphanumeric() || b == b'_');
            if preceded_by_word {
                return whole.to_string();
            }
        }
        if self
            .namer
            .options
            .exempt_tags
            .iter()
            .any(|t| tag.starts_with(t.as_str()))
        {
            return whole.to_string();
        }
        if tag.is_empty() && colons.is_empty() && !name.as_str().contains('\\') {
            return whole.to_string();
        }

        let parts: Vec<String> = name
            .as_str()
            .split('|')
            .map(|part| {
                if part.bytes().any(|b| b.is_ascii_lowercase()) {
                    self.replace_prose_class(part)
                } else {
                    part.to_string()
                }
            })
            .collect();
        format!("{}{}{}", tag, parts.join("|"), colons)
    }

    /// Class names spelled out in strings are always fully qualified.
    fn rewrite_string(&self, text: &str) -> String {
        let re = if text.starts_with('\'') {
            self.single_quoted_re.as_ref()
        } else {
            self.other_string_re.as_ref()
        };
        let Some(re) = re else {
            return text.to_string();
        };
        re.replace_all(text, |caps: &Captures| {
            let name = caps["name"].replace("\\\\", "\\");
            format!(
                "{}{}",
                self.replace_prose_class(&format!("\\{}", name)),
                &caps["tail"]
            )
        })
        .into_owned()
    }
}

/// `Foo &$x` in a parameter list. The `&` must touch the variable and the
/// name must open a parameter, otherwise it reads as a bitwise and.
fn is_by_ref_param(cursor: &TokenCursor, out: &str) -> bool {
    let opens_param = out
        .trim_end()
        .ends_with(|c: char| c == '(' || c == ',');
    let mut ahead = cursor.clone();
    opens_param
        && ahead.fetch(&[Pattern::Punct("&")]).is_some()
        && ahead
            .next_token()
            .map_or(false, |t| t.kind == TokenKind::Variable)
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| ConvertError::Config(format!("invalid name pattern: {}", e)))
}

/// Run the qualification pass over one unit.
pub fn qualify(source: &str, path: &Path, options: &RewriteOptions) -> Result<QualifyOutput> {
    Qualifier::new(path, options)?.run(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenameTable;

    fn run(src: &str, options: &RewriteOptions) -> String {
        qualify(src, Path::new("test.php"), options).unwrap().text
    }

    fn open_roots(prefixed: bool) -> RewriteOptions {
        RewriteOptions {
            prefixed,
            protected_roots: vec![],
            ..RewriteOptions::default()
        }
    }

    #[test]
    fn test_namespace_import_and_extends() {
        let src = "<?php\nnamespace Foo;\nuse Bar\\Baz as B;\nclass X extends B {}\n";
        let out = run(src, &open_roots(true));
        assert!(out.contains("class NX extends NBaz {}"), "{}", out);
        assert!(!out.contains("namespace"));
        assert!(!out.contains("use "));
    }

    #[test]
    fn test_braced_namespace_becomes_block() {
        let out = run("<?php namespace A { class B {} }", &open_roots(false));
        assert_eq!(out, "<?php { class B {} }");
    }

    #[test]
    fn test_interface_names_are_not_prefixed() {
        let src = "<?php namespace Nette; class Control implements IComponent, \\ArrayAccess {}";
        let out = run(src, &RewriteOptions::default());
        assert!(out.contains("class NControl implements IComponent, ArrayAccess {}"), "{}", out);
    }

    #[test]
    fn test_names_outside_protected_root_are_not_prefixed() {
        let src = "<?php namespace Nette\\Http; $r = new \\Foo\\Request; $x = new Response;";
        let out = run(src, &RewriteOptions::default());
        assert!(out.contains("new Request;"));
        assert!(out.contains("new NResponse;"));
    }

    #[test]
    fn test_static_access_and_type_hints() {
        let src = "<?php namespace Nette; use Nette\\Utils\\Strings; function f(Strings $s) { return Strings::lower(Foo\\Bar::X); }";
        let out = run(src, &RewriteOptions::default());
        assert!(out.contains("function f(NStrings $s)"), "{}", out);
        assert!(out.contains("NStrings::lower(NBar::X)"), "{}", out);
    }

    #[test]
    fn test_plain_calls_and_constants_are_untouched() {
        let src = "<?php namespace Nette; echo strlen(PHP_EOL), Foo\\bar(), TRUE;";
        let out = run(src, &RewriteOptions::default());
        assert!(out.ends_with("echo strlen(PHP_EOL), Foo\\bar(), TRUE;"), "{}", out);
    }

    #[test]
    fn test_argument_list_after_new_is_not_a_class_list() {
        let src = "<?php namespace Nette; $x = array(new Foo, NULL, TRUE); f($a instanceof Bar, FALSE);";
        let out = run(src, &RewriteOptions::default());
        assert!(out.ends_with("$x = array(new NFoo, NULL, TRUE); f($a instanceof NBar, FALSE);"), "{}", out);
    }

    #[test]
    fn test_interface_extends_takes_a_list() {
        let src = r"<?php namespace Nette; interface IControl extends IComponent, Foo\Countable { function f(Bar $b, $c = PHP_EOL); }";
        let out = run(src, &RewriteOptions::default());
        assert!(out.contains("interface IControl extends IComponent, NCountable {"), "{}", out);
        assert!(out.contains("function f(NBar $b, $c = PHP_EOL);"), "{}", out);
    }

    #[test]
    fn test_by_reference_type_hint() {
        let src = "<?php namespace Nette; function f(Foo &$x, $y = MASK &$z) {}";
        let out = run(src, &RewriteOptions::default());
        assert!(out.contains("function f(NFoo &$x, $y = MASK &$z)"), "{}", out);
    }

    #[test]
    fn test_rename_table_wins_over_last_segment() {
        let mut renamed = RenameTable::new();
        renamed.insert("Nette\\Forms\\Controls\\Button", "FormButton");
        let options = RewriteOptions {
            renamed,
            ..RewriteOptions::default()
        };
        let src = "<?php namespace Nette\\Forms\\Controls; class Button {} class SubmitButton extends Button {}";
        let out = run(src, &options);
        assert!(out.contains("class NFormButton {}"));
        assert!(out.contains("class NSubmitButton extends NFormButton {}"));
    }

    #[test]
    fn test_global_names_are_not_prefixed_again() {
        let src = "<?php class NX extends NBaz {} new NClosureFix;";
        assert_eq!(run(src, &open_roots(true)), src);
    }

    #[test]
    fn test_unprefixed_mode() {
        let src = "<?php namespace Nette; class Object {}";
        assert_eq!(run(src, &RewriteOptions::legacy(false)), "<?php  class Object {}");
    }

    #[test]
    fn test_doc_comment_types_are_rewritten() {
        let src = "<?php namespace Nette;\n/** @var \\Nette\\Http\\Request|NULL */\n";
        let out = run(src, &RewriteOptions::default());
        assert!(out.contains("/** @var NRequest|NULL */"), "{}", out);
    }

    #[test]
    fn test_exempt_tag_and_bare_words_are_kept() {
        let src = "<?php\n/**\n * Nette Framework\n * @package Nette\\Application\n */\n";
        assert_eq!(run(src, &RewriteOptions::default()), src);
    }

    #[test]
    fn test_fully_qualified_string_literals() {
        let src = "<?php $a = 'Nette\\Object'; $b = \"Nette\\\\Forms\\\\Form\"; $c = 'Other\\Thing';";
        let out = run(src, &RewriteOptions::default());
        assert!(out.contains("$a = 'NObject';"), "{}", out);
        assert!(out.contains("$b = \"NForm\";"), "{}", out);
        assert!(out.contains("$c = 'Other\\Thing';"));
    }

    #[test]
    fn test_closure_use_clause_is_kept() {
        let src = "<?php $f = function() use ($x) { return $x; };";
        assert_eq!(run(src, &RewriteOptions::default()), src);
    }

    #[test]
    fn test_malformed_name_is_a_resolution_error() {
        let src = "<?php new Foo\\\\Bar;";
        let err = qualify(src, Path::new("bad.php"), &RewriteOptions::default()).unwrap_err();
        assert!(matches!(err, ConvertError::Resolution { .. }));
        assert_eq!(err.path(), Some(Path::new("bad.php")));
    }

    #[test]
    fn test_reports_last_namespace() {
        let out = qualify("<?php namespace Nette\\Http;", Path::new("a.php"), &RewriteOptions::default()).unwrap();
        assert_eq!(out.namespace, "Nette\\Http");
    }
}

//! Legacy compatibility rules applied around the qualification pass:
//! version-conditional markers, late-static-binding and magic-constant
//! substitutions, short-ternary expansion, `@package` tagging and blank-line
//! consolidation.

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::Replacement;
use crate::error::ConvertError;
use crate::lexer::{tokenize, Keyword, Token, TokenKind};

lazy_static! {
    /// `a ?: b` with a simple left operand, optionally a single call.
    static ref SHORT_TERNARY_RE: Regex =
        Regex::new(r"([\[(= ])([^()\s]+(?:\([^()]*\))?) \?: ").unwrap();

    static ref DOC_CLOSE_RE: Regex = Regex::new(r"(?m)^ \*/").unwrap();

    static ref CRLF_RUN_RE: Regex = Regex::new(r"(?:\r\n){5,}").unwrap();
    static ref LF_RUN_RE: Regex = Regex::new(r"\n{5,}").unwrap();
}

/// Marker comment pair delimiting code valid only for the newer dialect.
const NEWER_ONLY_DELIMITER: &str = "/**/";

/// Upper bound on `?:` expansion rounds; each round removes at least one.
const MAX_TERNARY_ROUNDS: usize = 64;

/// Whether the unit declares itself unusable on the legacy target
/// (`@phpversion 5.3`).
pub fn is_newer_only(source: &str, versions: &[String]) -> bool {
    versions
        .iter()
        .any(|v| source.contains(&format!("@phpversion {}", v)))
}

pub fn apply_replacements(source: &str, replacements: &[Replacement]) -> String {
    replacements
        .iter()
        .fold(source.to_string(), |s, r| s.replace(&r.from, &r.to))
}

// ═══════════════════════════════════════════════════════════════════════════════
// VERSION MARKERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Uncomment `/*5.2* code */` and delete `/**/ code /**/` regions together with
/// the whitespace after the closing delimiter.
pub fn activate_version_markers(source: &str, marker: &str) -> Result<String, ConvertError> {
    let tokens = tokenize(source)?;
    let opening = format!("/*{}*", marker);
    let mut out = String::with_capacity(source.len());
    let mut i = 0;

    while i < tokens.len() {
        let token = &tokens[i];
        if token.kind == TokenKind::Comment {
            if token.text.starts_with(&opening) && token.text.len() >= opening.len() + 2 {
                out.push_str(token.text[opening.len()..token.text.len() - 2].trim());
                i += 1;
                continue;
            }
            if token.text == NEWER_ONLY_DELIMITER {
                let closing = tokens[i + 1..]
                    .iter()
                    .position(|t| t.kind == TokenKind::Comment && t.text == NEWER_ONLY_DELIMITER);
                if let Some(rel) = closing {
                    i += rel + 2;
                    while i < tokens.len() && tokens[i].kind == TokenKind::Whitespace {
                        i += 1;
                    }
                    continue;
                }
            }
        }
        out.push_str(&token.text);
        i += 1;
    }
    Ok(out)
}

// ═══════════════════════════════════════════════════════════════════════════════
// LANGUAGE SUBSTITUTIONS
// ═══════════════════════════════════════════════════════════════════════════════

fn next_significant(tokens: &[Token], from: usize) -> Option<usize> {
    (from..tokens.len()).find(|&i| !tokens[i].kind.is_trivia())
}

fn prev_significant(tokens: &[Token], before: usize) -> Option<usize> {
    (0..before).rev().find(|&i| !tokens[i].kind.is_trivia())
}

/// Replace constructs the legacy runtime lacks with their closest equivalent:
/// `__DIR__`, `static::`, `new static`, `get_called_class()` and
/// `E_USER_DEPRECATED`.
pub fn substitute_legacy_constructs(source: &str) -> Result<String, ConvertError> {
    let tokens = tokenize(source)?;
    let mut out = String::with_capacity(source.len());
    let mut i = 0;

    while i < tokens.len() {
        let token = &tokens[i];
        match token.kind {
            TokenKind::Identifier if token.text.eq_ignore_ascii_case("__DIR__") => {
                out.push_str("dirname(__FILE__)");
            }
            TokenKind::Identifier if token.text == "E_USER_DEPRECATED" => {
                out.push_str("E_USER_WARNING");
            }
            TokenKind::Identifier if token.text.eq_ignore_ascii_case("get_called_class") => {
                let open = next_significant(&tokens, i + 1).filter(|&j| tokens[j].is_punct("("));
                let close = open
                    .and_then(|j| next_significant(&tokens, j + 1))
                    .filter(|&j| tokens[j].is_punct(")"));
                match close {
                    Some(j) => {
                        out.push_str("__CLASS__");
                        i = j + 1;
                        continue;
                    }
                    None => out.push_str(&token.text),
                }
            }
            TokenKind::Keyword(Keyword::Static) => {
                let before_colons = next_significant(&tokens, i + 1)
                    .map_or(false, |j| tokens[j].is_punct("::"));
                let after_new = prev_significant(&tokens, i)
                    .map_or(false, |j| tokens[j].is_keyword(Keyword::New));
                if before_colons || after_new {
                    out.push_str("self");
                } else {
                    out.push_str(&token.text);
                }
            }
            _ => out.push_str(&token.text),
        }
        i += 1;
    }
    Ok(out)
}

/// `$a ?: $b` → `($tmp=$a) ? $tmp : $b`.
pub fn expand_short_ternary(source: &str) -> String {
    let mut current = source.to_string();
    for _ in 0..MAX_TERNARY_ROUNDS {
        let next = SHORT_TERNARY_RE
            .replace_all(&current, "${1}($$tmp=${2}) ? $$tmp : ")
            .into_owned();
        if next == current {
            break;
        }
        current = next;
    }
    current
}

// ═══════════════════════════════════════════════════════════════════════════════
// OUTPUT TOUCH-UPS
// ═══════════════════════════════════════════════════════════════════════════════

/// Tag every doc comment of a flattened unit with the namespace it came from,
/// unless the unit already carries `@package` somewhere.
pub fn annotate_package(source: &str, namespace: &str) -> String {
    if namespace.is_empty() || source.contains("@package") {
        return source.to_string();
    }
    let line = format!(" * @package {}\n */", namespace);
    DOC_CLOSE_RE
        .replace_all(source, regex::NoExpand(&line))
        .into_owned()
}

/// Collapse runs of more than four line breaks to four.
pub fn consolidate_blank_lines(source: &str) -> String {
    let s = CRLF_RUN_RE.replace_all(source, "\r\n\r\n\r\n\r\n");
    LF_RUN_RE.replace_all(&s, "\n\n\n\n").into_owned()
}

//! Static evaluation of inclusion targets.
//!
//! Only the forms a build can resolve without running code are understood:
//! string literals, `.` concatenation, parentheses, `__DIR__`, `__FILE__` and
//! `dirname(...)`. Anything else makes the target dynamic and the directive
//! is kept as written.

use std::path::{Path, PathBuf};

use crate::lexer::{tokenize, Token, TokenKind};

struct Evaluator<'a> {
    tokens: Vec<Token>,
    pos: usize,
    file: &'a Path,
}

impl<'a> Evaluator<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, punct: &str) -> bool {
        if self.peek().map_or(false, |t| t.is_punct(punct)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn concat(&mut self) -> Option<String> {
        let mut value = self.primary()?;
        while self.eat(".") {
            value.push_str(&self.primary()?);
        }
        Some(value)
    }

    fn primary(&mut self) -> Option<String> {
        let token = self.peek()?.clone();
        self.pos += 1;
        match token.kind {
            TokenKind::StringLiteral => unquote(&token.text),
            TokenKind::Punctuation if token.text == "(" => {
                let value = self.concat()?;
                self.eat(")").then_some(value)
            }
            TokenKind::Identifier => match token.text.to_ascii_lowercase().as_str() {
                "__dir__" => Some(dir_of(self.file)),
                "__file__" => Some(self.file.to_string_lossy().into_owned()),
                "dirname" => {
                    if !self.eat("(") {
                        return None;
                    }
                    let inner = self.concat()?;
                    if !self.eat(")") {
                        return None;
                    }
                    Some(dir_of(Path::new(&inner)))
                }
                _ => None,
            },
            _ => None,
        }
    }
}

fn dir_of(path: &Path) -> String {
    path.parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".to_string())
}

/// Value of a string literal without interpolation.
fn unquote(literal: &str) -> Option<String> {
    let quote = literal.chars().next()?;
    if literal.len() < 2 || !literal.ends_with(quote) {
        return None;
    }
    let inner = &literal[1..literal.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    match quote {
        '\'' => {
            while let Some(c) = chars.next() {
                match (c, chars.clone().next()) {
                    ('\\', Some(next @ ('\\' | '\''))) => {
                        out.push(next);
                        chars.next();
                    }
                    _ => out.push(c),
                }
            }
        }
        '"' => {
            while let Some(c) = chars.next() {
                match c {
                    '$' => return None,
                    '\\' => match chars.next() {
                        Some('n') => out.push('\n'),
                        Some('t') => out.push('\t'),
                        Some(next @ ('\\' | '"' | '$')) => out.push(next),
                        Some(other) => {
                            out.push('\\');
                            out.push(other);
                        }
                        None => out.push('\\'),
                    },
                    _ => out.push(c),
                }
            }
        }
        _ => return None,
    }
    Some(out)
}

/// Evaluate the expression of an inclusion directive found in `file`.
/// Relative results are taken relative to the directory of `file`.
pub fn evaluate(expr: &str, file: &Path) -> Option<PathBuf> {
    let tokens = tokenize(&format!("<?php {}", expr)).ok()?;
    let tokens: Vec<Token> = tokens
        .into_iter()
        .filter(|t| {
            !t.kind.is_trivia() && !matches!(t.kind, TokenKind::OpenTag | TokenKind::EndOfInput)
        })
        .collect();
    let mut evaluator = Evaluator {
        tokens,
        pos: 0,
        file,
    };
    let value = evaluator.concat()?;
    if evaluator.pos != evaluator.tokens.len() || value.is_empty() {
        return None;
    }
    let path = PathBuf::from(value);
    if path.is_absolute() {
        Some(path)
    } else {
        Some(Path::new(&dir_of(file)).join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file() -> &'static Path {
        Path::new("/src/Nette/loader.php")
    }

    #[test]
    fn test_dir_constants_and_concatenation() {
        assert_eq!(
            evaluate("__DIR__ . '/Utils/Object.php'", file()),
            Some(PathBuf::from("/src/Nette/Utils/Object.php"))
        );
        assert_eq!(
            evaluate("(dirname(__FILE__) . \"/a.php\")", file()),
            Some(PathBuf::from("/src/Nette/a.php"))
        );
        assert_eq!(
            evaluate("dirname(__DIR__) . '/x.php'", file()),
            Some(PathBuf::from("/src/x.php"))
        );
    }

    #[test]
    fn test_relative_literal_resolves_against_including_dir() {
        assert_eq!(
            evaluate("'common/Helpers.php'", file()),
            Some(PathBuf::from("/src/Nette/common/Helpers.php"))
        );
    }

    #[test]
    fn test_dynamic_targets_are_not_evaluated() {
        assert_eq!(evaluate("$dir . '/a.php'", file()), None);
        assert_eq!(evaluate("\"$name.php\"", file()), None);
        assert_eq!(evaluate("LIBS_DIR . '/a.php'", file()), None);
        assert_eq!(evaluate("'a.php' . ", file()), None);
    }

    #[test]
    fn test_single_quote_escapes() {
        assert_eq!(unquote(r"'it\'s\\x'"), Some(r"it's\x".to_string()));
        assert_eq!(unquote(r"'keep\n'"), Some(r"keep\n".to_string()));
    }
}

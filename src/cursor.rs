//! Token cursor with peek / fetch / consume-while / consume-until operations.
//!
//! The cursor never drops tokens from the underlying slice; "ignored" kinds are
//! only skipped while looking for the next meaningful token.

use crate::lexer::{Token, TokenKind};

/// What a cursor query matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern<'p> {
    Kind(TokenKind),
    Punct(&'p str),
}

impl Pattern<'_> {
    pub fn matches(&self, token: &Token) -> bool {
        match self {
            Pattern::Kind(kind) => token.kind == *kind,
            Pattern::Punct(text) => token.is_punct(text),
        }
    }
}

/// Identifier segments and namespace separators.
pub const NAME: &[Pattern<'static>] = &[Pattern::Kind(TokenKind::Identifier), Pattern::Punct("\\")];

const DEFAULT_IGNORED: &[TokenKind] = &[
    TokenKind::Whitespace,
    TokenKind::Comment,
    TokenKind::DocComment,
];

fn any_match(patterns: &[Pattern], token: &Token) -> bool {
    patterns.iter().any(|p| p.matches(token))
}

#[derive(Clone)]
pub struct TokenCursor<'t> {
    tokens: &'t [Token],
    /// Index of the next token to consume.
    position: usize,
    /// Index of the most recently consumed token.
    current: Option<usize>,
    ignored: &'t [TokenKind],
}

impl<'t> TokenCursor<'t> {
    pub fn new(tokens: &'t [Token]) -> Self {
        Self::with_ignored(tokens, DEFAULT_IGNORED)
    }

    pub fn with_ignored(tokens: &'t [Token], ignored: &'t [TokenKind]) -> Self {
        TokenCursor {
            tokens,
            position: 0,
            current: None,
            ignored,
        }
    }

    fn is_ignored(&self, token: &Token) -> bool {
        self.ignored.contains(&token.kind)
    }

    fn get(&self, index: usize) -> Option<&'t Token> {
        self.tokens
            .get(index)
            .filter(|t| t.kind != TokenKind::EndOfInput)
    }

    /// Advance by exactly one raw token, ignored kinds included.
    pub fn next_token(&mut self) -> Option<&'t Token> {
        let token = self.get(self.position)?;
        self.current = Some(self.position);
        self.position += 1;
        Some(token)
    }

    pub fn current(&self) -> Option<&'t Token> {
        self.current.and_then(|i| self.get(i))
    }

    pub fn is_current(&self, patterns: &[Pattern]) -> bool {
        self.current().map_or(false, |t| any_match(patterns, t))
    }

    /// Index of the next token that is not ignored.
    fn next_significant(&self) -> Option<usize> {
        (self.position..self.tokens.len()).find(|&i| !self.is_ignored(&self.tokens[i]))
    }

    /// Next meaningful token, without consuming anything.
    pub fn peek(&self) -> Option<&'t Token> {
        self.next_significant().and_then(|i| self.get(i))
    }

    pub fn is_next(&self, patterns: &[Pattern]) -> bool {
        self.peek().map_or(false, |t| any_match(patterns, t))
    }

    /// Skip ignored tokens and consume the next token if it matches.
    /// Nothing is consumed when it does not.
    pub fn fetch(&mut self, patterns: &[Pattern]) -> Option<&'t Token> {
        let index = self.next_significant()?;
        let token = self.get(index)?;
        if !any_match(patterns, token) {
            return None;
        }
        self.current = Some(index);
        self.position = index + 1;
        Some(token)
    }

    /// Concatenate consecutive matching tokens. Ignored tokens between matches
    /// are consumed and dropped; ignored tokens after the last match stay.
    pub fn fetch_all(&mut self, patterns: &[Pattern]) -> String {
        let mut out = String::new();
        let mut index = self.position;
        while let Some(token) = self.get(index) {
            if any_match(patterns, token) {
                out.push_str(&token.text);
                self.current = Some(index);
                self.position = index + 1;
            } else if !self.is_ignored(token) {
                break;
            }
            index += 1;
        }
        out
    }

    /// Consume raw tokens up to (not including) the first delimiter found
    /// outside of nested brackets. An unmatched closing bracket also stops.
    pub fn fetch_until(&mut self, delimiters: &[Pattern]) -> String {
        let mut out = String::new();
        let mut depth = 0usize;
        while let Some(token) = self.get(self.position) {
            if depth == 0 && any_match(delimiters, token) {
                break;
            }
            if token.kind == TokenKind::Punctuation {
                match token.text.as_str() {
                    "(" | "[" | "{" => depth += 1,
                    ")" | "]" | "}" => {
                        if depth == 0 {
                            break;
                        }
                        depth -= 1;
                    }
                    _ => {}
                }
            }
            out.push_str(&token.text);
            self.current = Some(self.position);
            self.position += 1;
        }
        out
    }

    /// Like `fetch_until`, but hands back the consumed tokens.
    pub fn fetch_tokens_until(&mut self, delimiters: &[Pattern]) -> &'t [Token] {
        let start = self.position;
        self.fetch_until(delimiters);
        &self.tokens[start..self.position]
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::{tokenize, Keyword};

    #[test]
    fn test_fetch_all_absorbs_qualified_name() {
        let tokens = tokenize("<?php \\Foo\\Bar $x").unwrap();
        let mut cursor = TokenCursor::new(&tokens);
        cursor.next_token();
        assert_eq!(cursor.fetch_all(NAME), "\\Foo\\Bar");
        // trailing whitespace is left for the caller
        assert_eq!(cursor.next_token().unwrap().kind, TokenKind::Whitespace);
    }

    #[test]
    fn test_fetch_skips_ignored_but_consumes_nothing_on_miss() {
        let tokens = tokenize("<?php /* c */ ; x").unwrap();
        let mut cursor = TokenCursor::new(&tokens);
        cursor.next_token();
        assert!(cursor.fetch(&[Pattern::Punct("{")]).is_none());
        assert_eq!(cursor.position(), 1);
        assert!(cursor.fetch(&[Pattern::Punct(";")]).is_some());
        assert!(cursor.is_current(&[Pattern::Punct(";")]));
    }

    #[test]
    fn test_fetch_until_balances_nested_delimiters() {
        let tokens = tokenize("<?php ($a = f($b), $c) { }").unwrap();
        let mut cursor = TokenCursor::new(&tokens);
        cursor.next_token();
        cursor.fetch(&[Pattern::Punct("(")]);
        assert_eq!(cursor.fetch_until(&[Pattern::Punct(")")]), "$a = f($b), $c");
        assert!(cursor.fetch(&[Pattern::Punct(")")]).is_some());
    }

    #[test]
    fn test_is_next_peeks_past_trivia() {
        let tokens = tokenize("<?php use  (").unwrap();
        let mut cursor = TokenCursor::new(&tokens);
        cursor.next_token();
        let used = cursor.fetch(&[Pattern::Kind(TokenKind::Keyword(Keyword::Use))]);
        assert!(used.is_some());
        assert!(cursor.is_next(&[Pattern::Punct("(")]));
    }
}

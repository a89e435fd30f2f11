//! Lexer for PHP Source
//!
//! Converts raw PHP text into a flat, lossless token sequence. Every byte of
//! the input belongs to exactly one token, so concatenating the token texts
//! reproduces the input. Syntax beyond lexical well-formedness is not checked.

use std::path::PathBuf;

use crate::error::ConvertError;

// ═══════════════════════════════════════════════════════════════════════════════
// TOKEN TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// PHP reserved words. Matching is case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Abstract,
    And,
    Array,
    As,
    Break,
    Callable,
    Case,
    Catch,
    Class,
    Clone,
    Const,
    Continue,
    Declare,
    Default,
    Do,
    Echo,
    Else,
    ElseIf,
    Empty,
    EndDeclare,
    EndFor,
    EndForeach,
    EndIf,
    EndSwitch,
    EndWhile,
    Eval,
    Exit,
    Extends,
    Final,
    Finally,
    For,
    Foreach,
    Function,
    Global,
    Goto,
    If,
    Implements,
    Include,
    IncludeOnce,
    InstanceOf,
    InsteadOf,
    Interface,
    Isset,
    List,
    Namespace,
    New,
    Or,
    Print,
    Private,
    Protected,
    Public,
    Require,
    RequireOnce,
    Return,
    Static,
    Switch,
    Throw,
    Trait,
    Try,
    Unset,
    Use,
    Var,
    While,
    Xor,
    Yield,
}

impl Keyword {
    pub fn from_word(word: &str) -> Option<Keyword> {
        let kw = match word.to_ascii_lowercase().as_str() {
            "abstract" => Keyword::Abstract,
            "and" => Keyword::And,
            "array" => Keyword::Array,
            "as" => Keyword::As,
            "break" => Keyword::Break,
            "callable" => Keyword::Callable,
            "case" => Keyword::Case,
            "catch" => Keyword::Catch,
            "class" => Keyword::Class,
            "clone" => Keyword::Clone,
            "const" => Keyword::Const,
            "continue" => Keyword::Continue,
            "declare" => Keyword::Declare,
            "default" => Keyword::Default,
            "do" => Keyword::Do,
            "echo" => Keyword::Echo,
            "else" => Keyword::Else,
            "elseif" => Keyword::ElseIf,
            "empty" => Keyword::Empty,
            "enddeclare" => Keyword::EndDeclare,
            "endfor" => Keyword::EndFor,
            "endforeach" => Keyword::EndForeach,
            "endif" => Keyword::EndIf,
            "endswitch" => Keyword::EndSwitch,
            "endwhile" => Keyword::EndWhile,
            "eval" => Keyword::Eval,
            "exit" | "die" => Keyword::Exit,
            "extends" => Keyword::Extends,
            "final" => Keyword::Final,
            "finally" => Keyword::Finally,
            "for" => Keyword::For,
            "foreach" => Keyword::Foreach,
            "function" => Keyword::Function,
            "global" => Keyword::Global,
            "goto" => Keyword::Goto,
            "if" => Keyword::If,
            "implements" => Keyword::Implements,
            "include" => Keyword::Include,
            "include_once" => Keyword::IncludeOnce,
            "instanceof" => Keyword::InstanceOf,
            "insteadof" => Keyword::InsteadOf,
            "interface" => Keyword::Interface,
            "isset" => Keyword::Isset,
            "list" => Keyword::List,
            "namespace" => Keyword::Namespace,
            "new" => Keyword::New,
            "or" => Keyword::Or,
            "print" => Keyword::Print,
            "private" => Keyword::Private,
            "protected" => Keyword::Protected,
            "public" => Keyword::Public,
            "require" => Keyword::Require,
            "require_once" => Keyword::RequireOnce,
            "return" => Keyword::Return,
            "static" => Keyword::Static,
            "switch" => Keyword::Switch,
            "throw" => Keyword::Throw,
            "trait" => Keyword::Trait,
            "try" => Keyword::Try,
            "unset" => Keyword::Unset,
            "use" => Keyword::Use,
            "var" => Keyword::Var,
            "while" => Keyword::While,
            "xor" => Keyword::Xor,
            "yield" => Keyword::Yield,
            _ => return None,
        };
        Some(kw)
    }

    /// Inclusion directives (`include`, `require` and their `_once` forms).
    pub fn is_inclusion(self) -> bool {
        matches!(
            self,
            Keyword::Include | Keyword::IncludeOnce | Keyword::Require | Keyword::RequireOnce
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Text outside of `<?php ... ?>` blocks.
    InlineHtml,
    OpenTag,
    CloseTag,
    Identifier,
    Keyword(Keyword),
    Variable,
    Number,
    StringLiteral,
    Comment,
    DocComment,
    Whitespace,
    Punctuation,
    EndOfInput,
}

impl TokenKind {
    /// Whitespace and comments carry no meaning for the rewrite passes.
    pub fn is_trivia(self) -> bool {
        matches!(
            self,
            TokenKind::Whitespace | TokenKind::Comment | TokenKind::DocComment
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// Byte offset of the token in the source it was lexed from.
    pub offset: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, offset: usize) -> Self {
        Token {
            kind,
            text: text.into(),
            offset,
        }
    }

    pub fn is_keyword(&self, keyword: Keyword) -> bool {
        self.kind == TokenKind::Keyword(keyword)
    }

    pub fn is_punct(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punctuation && self.text == punct
    }
}

/// Multi-character operators, longest first.
const OPERATORS: &[&str] = &[
    "<<=", ">>=", "===", "!==", "...", "::", "->", "=>", "==", "!=", "<>", "<=", ">=", "&&",
    "||", "++", "--", "+=", "-=", "*=", "/=", ".=", "%=", "&=", "|=", "^=", "<<", ">>",
];

// ═══════════════════════════════════════════════════════════════════════════════
// LEXER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Lexer<'src> {
    source: &'src str,
    bytes: &'src [u8],
    pos: usize,
    in_code: bool,
    tokens: Vec<Token>,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Lexer {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            in_code: false,
            tokens: Vec::new(),
        }
    }

    /// Tokenize the whole source. The returned sequence always ends with an
    /// empty `EndOfInput` token.
    pub fn tokenize(mut self) -> Result<Vec<Token>, ConvertError> {
        while self.pos < self.bytes.len() {
            if self.in_code {
                self.lex_code()?;
            } else {
                self.lex_inline_html();
            }
        }
        let end = self.bytes.len();
        self.tokens.push(Token::new(TokenKind::EndOfInput, "", end));
        Ok(self.tokens)
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        let text = &self.source[start..self.pos];
        self.tokens.push(Token::new(kind, text, start));
    }

    fn peek_at(&self, offset: usize) -> u8 {
        self.bytes.get(self.pos + offset).copied().unwrap_or(0)
    }

    /// Byte comparison; `pos` may sit inside a multi-byte character while a
    /// comment or string is being skipped.
    fn starts_with(&self, s: &str) -> bool {
        self.bytes[self.pos..].starts_with(s.as_bytes())
    }

    fn error(&self, message: &str, offset: usize) -> ConvertError {
        ConvertError::Lex {
            path: PathBuf::new(),
            message: message.to_string(),
            offset,
        }
    }

    // === Outside PHP blocks ===

    fn lex_inline_html(&mut self) {
        let start = self.pos;
        let open = find_open_tag(&self.source[start..]);
        match open {
            Some((at, len)) => {
                if at > 0 {
                    self.pos = start + at;
                    self.push(TokenKind::InlineHtml, start);
                }
                let tag_start = self.pos;
                self.pos += len;
                self.push(TokenKind::OpenTag, tag_start);
                self.in_code = true;
            }
            None => {
                self.pos = self.bytes.len();
                self.push(TokenKind::InlineHtml, start);
            }
        }
    }

    // === Inside PHP blocks ===

    fn lex_code(&mut self) -> Result<(), ConvertError> {
        let start = self.pos;
        let c = self.peek_at(0);

        if self.starts_with("?>") {
            self.pos += 2;
            if self.starts_with("\r\n") {
                self.pos += 2;
            } else if self.peek_at(0) == b'\n' {
                self.pos += 1;
            }
            self.push(TokenKind::CloseTag, start);
            self.in_code = false;
            return Ok(());
        }

        if c.is_ascii_whitespace() {
            while self.pos < self.bytes.len() && self.peek_at(0).is_ascii_whitespace() {
                self.pos += 1;
            }
            self.push(TokenKind::Whitespace, start);
            return Ok(());
        }

        if c == b'#' || self.starts_with("//") {
            self.skip_line_comment();
            self.push(TokenKind::Comment, start);
            return Ok(());
        }

        if self.starts_with("/*") {
            let is_doc = self.starts_with("/**") && self.peek_at(3).is_ascii_whitespace();
            match self.source[start + 2..].find("*/") {
                Some(end) => self.pos = start + 2 + end + 2,
                None => return Err(self.error("unterminated comment", start)),
            }
            let kind = if is_doc {
                TokenKind::DocComment
            } else {
                TokenKind::Comment
            };
            self.push(kind, start);
            return Ok(());
        }

        if c == b'$' && is_ident_start(self.peek_at(1)) {
            self.pos += 1;
            self.skip_ident();
            self.push(TokenKind::Variable, start);
            return Ok(());
        }

        if is_ident_start(c) {
            self.skip_ident();
            let kind = self.classify_word(start);
            self.push(kind, start);
            return Ok(());
        }

        if c.is_ascii_digit() || (c == b'.' && self.peek_at(1).is_ascii_digit()) {
            self.lex_number();
            self.push(TokenKind::Number, start);
            return Ok(());
        }

        match c {
            b'\'' => {
                self.lex_single_quoted()?;
                self.push(TokenKind::StringLiteral, start);
                return Ok(());
            }
            b'"' | b'`' => {
                self.lex_interpolated(c)?;
                self.push(TokenKind::StringLiteral, start);
                return Ok(());
            }
            _ => {}
        }

        if self.starts_with("<<<") {
            self.lex_heredoc()?;
            self.push(TokenKind::StringLiteral, start);
            return Ok(());
        }

        let len = OPERATORS
            .iter()
            .find(|op| self.starts_with(op))
            .map(|op| op.len())
            .unwrap_or_else(|| {
                self.source[start..]
                    .chars()
                    .next()
                    .map(char::len_utf8)
                    .unwrap_or(1)
            });
        self.pos += len;
        self.push(TokenKind::Punctuation, start);
        Ok(())
    }

    fn skip_ident(&mut self) {
        while self.pos < self.bytes.len() && is_ident_char(self.peek_at(0)) {
            self.pos += 1;
        }
    }

    /// Reserved words stay identifiers when they are part of a qualified name
    /// or follow a member/static access operator.
    fn classify_word(&self, start: usize) -> TokenKind {
        let word = &self.source[start..self.pos];
        let Some(keyword) = Keyword::from_word(word) else {
            return TokenKind::Identifier;
        };
        if self.peek_at(0) == b'\\' || (start > 0 && self.bytes[start - 1] == b'\\') {
            return TokenKind::Identifier;
        }
        let previous = self.tokens.iter().rev().find(|t| !t.kind.is_trivia());
        if let Some(prev) = previous {
            if prev.is_punct("->") || prev.is_punct("::") {
                return TokenKind::Identifier;
            }
        }
        TokenKind::Keyword(keyword)
    }

    fn skip_line_comment(&mut self) {
        while self.pos < self.bytes.len() {
            let c = self.peek_at(0);
            if c == b'\n' || c == b'\r' || self.starts_with("?>") {
                break;
            }
            self.pos += 1;
        }
    }

    fn lex_number(&mut self) {
        let hex = self.starts_with("0x") || self.starts_with("0X");
        while self.pos < self.bytes.len() {
            let c = self.peek_at(0);
            if c.is_ascii_alphanumeric() || c == b'_' || c == b'.' {
                self.pos += 1;
            } else if (c == b'+' || c == b'-')
                && !hex
                && matches!(self.bytes[self.pos - 1], b'e' | b'E')
                && self.peek_at(1).is_ascii_digit()
            {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn lex_single_quoted(&mut self) -> Result<(), ConvertError> {
        let start = self.pos;
        self.pos += 1;
        while self.pos < self.bytes.len() {
            match self.peek_at(0) {
                b'\\' => self.pos += 2,
                b'\'' => {
                    self.pos += 1;
                    return Ok(());
                }
                _ => self.pos += 1,
            }
        }
        Err(self.error("unterminated string literal", start))
    }

    /// Double-quoted and backtick strings. `{$expr}` interpolation may itself
    /// contain quotes, so braces opened by `{$` are balanced.
    fn lex_interpolated(&mut self, quote: u8) -> Result<(), ConvertError> {
        let start = self.pos;
        self.pos += 1;
        let mut depth = 0usize;
        while self.pos < self.bytes.len() {
            let c = self.peek_at(0);
            if depth > 0 {
                match c {
                    b'{' => depth += 1,
                    b'}' => depth -= 1,
                    b'\'' => {
                        self.lex_single_quoted()?;
                        continue;
                    }
                    b'"' => {
                        self.lex_interpolated(b'"')?;
                        continue;
                    }
                    _ => {}
                }
                self.pos += 1;
                continue;
            }
            match c {
                b'\\' => self.pos += 2,
                b'{' if self.peek_at(1) == b'$' => {
                    depth = 1;
                    self.pos += 2;
                }
                _ if c == quote => {
                    self.pos += 1;
                    return Ok(());
                }
                _ => self.pos += 1,
            }
        }
        Err(self.error("unterminated string literal", start))
    }

    /// `<<<ID` / `<<<"ID"` / `<<<'ID'` up to a line starting with `ID`.
    fn lex_heredoc(&mut self) -> Result<(), ConvertError> {
        let start = self.pos;
        self.pos += 3;
        while matches!(self.peek_at(0), b' ' | b'\t') {
            self.pos += 1;
        }
        let quote = self.peek_at(0);
        if quote == b'"' || quote == b'\'' {
            self.pos += 1;
        }
        let label_start = self.pos;
        self.skip_ident();
        let label = &self.source[label_start..self.pos];
        if label.is_empty() {
            return Err(self.error("malformed heredoc label", start));
        }
        if quote == b'"' || quote == b'\'' {
            if self.peek_at(0) != quote {
                return Err(self.error("malformed heredoc label", start));
            }
            self.pos += 1;
        }

        let mut line_start = match self.source[self.pos..].find('\n') {
            Some(nl) => self.pos + nl + 1,
            None => return Err(self.error("unterminated heredoc", start)),
        };
        loop {
            let rest = &self.source[line_start..];
            if rest.starts_with(label) {
                let after = rest.as_bytes().get(label.len()).copied().unwrap_or(0);
                if !is_ident_char(after) {
                    self.pos = line_start + label.len();
                    return Ok(());
                }
            }
            match rest.find('\n') {
                Some(nl) => line_start += nl + 1,
                None => return Err(self.error("unterminated heredoc", start)),
            }
        }
    }
}

/// Locate the next PHP open tag; returns its position and length.
fn find_open_tag(text: &str) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut from = 0;
    while let Some(found) = text[from..].find("<?") {
        let at = from + found;
        let rest = &text[at + 2..];
        if rest.len() >= 3 && rest[..3].eq_ignore_ascii_case("php") {
            let after = &rest[3..];
            let ws = if after.starts_with("\r\n") {
                2
            } else if after
                .as_bytes()
                .first()
                .map_or(false, |c| c.is_ascii_whitespace())
            {
                1
            } else if after.is_empty() {
                0
            } else {
                from = at + 2;
                continue;
            };
            return Some((at, 5 + ws));
        }
        if rest.starts_with('=') {
            return Some((at, 3));
        }
        if bytes.get(at + 2).map_or(false, |c| c.is_ascii_whitespace()) {
            return Some((at, 2));
        }
        from = at + 2;
    }
    None
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c >= 0x80
}

fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c >= 0x80
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, ConvertError> {
    Lexer::new(source).tokenize()
}

/// Re-serialize a token sequence.
pub fn serialize(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.text.as_str()).collect()
}

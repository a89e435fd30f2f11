//! Closure Extraction Pass
//!
//! Second rewrite pass, legacy dialect only. The legacy runtime has no
//! anonymous functions, so every closure literal
//!
//! ```text
//! function ($x) use (&$total, $factor) { $total += $x * $factor; }
//! ```
//!
//! is lifted into a named top-level function whose leading parameters are the
//! captures, and the literal is replaced by a call to the runtime shim that
//! pairs the lifted function with the captured values:
//!
//! ```text
//! NClosureFix::create('_lc_1a2b3c4d_0', array('total' => &$total, 'factor' => $factor), '$x', '$x')
//!
//! function _lc_1a2b3c4d_0(&$total, $factor, $x) { $total += $x * $factor; }
//! ```
//!
//! The shim hands back a `create_function` lambda taking the closure's own
//! parameters, so the result is a string callable and `$f($x)` keeps working.
//!
//! Lifted names are `_lc_<8 hex of SHA-256(unit path)>_<index>`, so units
//! bundled together never clash. A closure nested inside a body being lifted
//! cannot be expressed and fails the unit.

use sha2::{Digest, Sha256};
use std::path::Path;

use crate::cursor::{Pattern, TokenCursor};
use crate::error::{excerpt, ConvertError, Result};
use crate::lexer::{tokenize, Keyword, Token, TokenKind};

const FUNCTION: Pattern<'static> = Pattern::Kind(TokenKind::Keyword(Keyword::Function));

/// One closure moved out of line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiftedClosure {
    pub name: String,
    pub by_ref: bool,
    /// Capture parameters as written in the `use` clause, `&` included.
    pub captures: Vec<String>,
    pub params: String,
    /// The parameters as the shim forwards them: `&$a, $b`.
    pub args: String,
    /// Body including its braces.
    pub body: String,
}

impl LiftedClosure {
    fn declaration(&self) -> String {
        let mut params: Vec<&str> = self.captures.iter().map(String::as_str).collect();
        let own = self.params.trim();
        if !own.is_empty() {
            params.push(own);
        }
        format!(
            "function {}{}({}) {}",
            if self.by_ref { "&" } else { "" },
            self.name,
            params.join(", "),
            self.body
        )
    }

    fn call(&self, shim: &str) -> String {
        let vars: Vec<String> = self
            .captures
            .iter()
            .map(|capture| {
                let var = capture.trim_start_matches('&').trim();
                format!("'{}' => {}", var.trim_start_matches('$'), capture)
            })
            .collect();
        let mut call = format!("{}::create('{}', array({})", shim, self.name, vars.join(", "));
        let own = self.params.trim();
        if !own.is_empty() {
            call.push_str(&format!(", '{}', '{}'", php_quote(own), self.args));
        }
        call.push(')');
        call
    }
}

/// Body of a single-quoted PHP literal.
fn php_quote(text: &str) -> String {
    text.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Parameter names of a closure, with their by-reference markers:
/// `&$a, Foo $b = array(1, 2)` forwards as `&$a, $b`.
fn forwarded_args(params: &[Token]) -> String {
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut by_ref = false;
    let mut named = false;
    for token in params {
        match token.kind {
            TokenKind::Punctuation => match token.text.as_str() {
                "(" | "[" | "{" => depth += 1,
                ")" | "]" | "}" => depth = depth.saturating_sub(1),
                "," if depth == 0 => {
                    by_ref = false;
                    named = false;
                }
                "&" if depth == 0 && !named => by_ref = true,
                _ => {}
            },
            TokenKind::Variable if depth == 0 && !named => {
                args.push(format!("{}{}", if by_ref { "&" } else { "" }, token.text));
                named = true;
            }
            _ => {}
        }
    }
    args.join(", ")
}

/// Per-unit table of lifted closures, indexed in order of appearance.
///
/// Lifted functions are declared unconditionally at the end of their unit.
/// A unit holding closures must therefore be loaded once per request; a
/// plain `include` running it twice fails with "Cannot redeclare". Bundles
/// inline every unit once, so they are not affected.
#[derive(Debug, Default)]
pub struct ClosureTable {
    stem: String,
    entries: Vec<LiftedClosure>,
}

impl ClosureTable {
    pub fn new(path: &Path) -> Self {
        let digest = Sha256::digest(path.to_string_lossy().as_bytes());
        let stem = digest
            .iter()
            .take(4)
            .map(|b| format!("{:02x}", b))
            .collect::<String>();
        ClosureTable {
            stem: format!("_lc_{}", stem),
            entries: Vec::new(),
        }
    }

    pub fn next_name(&self) -> String {
        format!("{}_{}", self.stem, self.entries.len())
    }

    pub fn push(&mut self, closure: LiftedClosure) {
        self.entries.push(closure);
    }

    pub fn entries(&self) -> &[LiftedClosure] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Legacy stand-in for a closure: a lifted function plus captured values,
/// exposed as a string callable.
pub fn shim_source(class: &str) -> String {
    format!(
        r#"if (!class_exists('{class}', FALSE)) {{
/** @internal */
class {class}
{{
	public static $fixes = array();

	static function create($callback, $vars, $params = '', $args = '')
	{{
		$id = count(self::$fixes);
		self::$fixes[$id] = array($callback, $vars);
		$forward = $args === '' ? 'func_get_args()' : "array($args)";
		return create_function($params, "return {class}::invoke($id, $forward);");
	}}

	static function invoke($id, $args)
	{{
		$all = array();
		foreach (self::$fixes[$id][1] as $key => $value) {{
			$all[] = & self::$fixes[$id][1][$key];
		}}
		foreach ($args as $key => $value) {{
			$all[] = & $args[$key];
		}}
		return call_user_func_array(self::$fixes[$id][0], $all);
	}}
}}
}}
"#,
        class = class
    )
}

/// `function (` or `function &(`, with trivia allowed in between.
fn starts_closure(cursor: &TokenCursor) -> bool {
    if !cursor.is_current(&[FUNCTION]) {
        return false;
    }
    match cursor.peek() {
        Some(t) if t.is_punct("(") => true,
        Some(t) if t.is_punct("&") => {
            let mut ahead = cursor.clone();
            ahead.fetch(&[Pattern::Punct("&")]);
            ahead.is_next(&[Pattern::Punct("(")])
        }
        _ => false,
    }
}

fn split_captures(list: &str) -> Vec<String> {
    list.split(',')
        .map(|c| c.split_whitespace().collect::<String>())
        .filter(|c| !c.is_empty())
        .collect()
}

pub struct ClosureExtractor<'a> {
    path: &'a Path,
    shim: &'a str,
    source: &'a str,
    table: ClosureTable,
}

impl<'a> ClosureExtractor<'a> {
    pub fn new(path: &'a Path, shim: &'a str, source: &'a str) -> Self {
        ClosureExtractor {
            path,
            shim,
            source,
            table: ClosureTable::new(path),
        }
    }

    fn unsupported(&self, token: &Token, construct: &str) -> ConvertError {
        ConvertError::UnsupportedConstruct {
            path: self.path.to_path_buf(),
            construct: construct.to_string(),
            context: excerpt(self.source, token.offset),
        }
    }

    /// Parse one closure literal; the cursor sits on its `function` keyword.
    fn lift(&mut self, cursor: &mut TokenCursor, keyword: &Token) -> Result<LiftedClosure> {
        let by_ref = cursor.fetch(&[Pattern::Punct("&")]).is_some();
        cursor.fetch(&[Pattern::Punct("(")]);
        let param_tokens = cursor.fetch_tokens_until(&[Pattern::Punct(")")]);
        let params: String = param_tokens.iter().map(|t| t.text.as_str()).collect();
        let args = forwarded_args(param_tokens);
        cursor.fetch(&[Pattern::Punct(")")]);

        let mut captures = Vec::new();
        if cursor
            .fetch(&[Pattern::Kind(TokenKind::Keyword(Keyword::Use))])
            .is_some()
        {
            cursor.fetch(&[Pattern::Punct("(")]);
            captures = split_captures(&cursor.fetch_until(&[Pattern::Punct(")")]));
            cursor.fetch(&[Pattern::Punct(")")]);
        }

        if cursor.fetch(&[Pattern::Punct("{")]).is_none() {
            return Err(ConvertError::Structural {
                path: self.path.to_path_buf(),
                reason: format!(
                    "closure without a body near `{}`",
                    excerpt(self.source, keyword.offset)
                ),
            });
        }
        let inner = cursor.fetch_tokens_until(&[Pattern::Punct("}")]);
        cursor.fetch(&[Pattern::Punct("}")]);

        let mut nested = TokenCursor::new(inner);
        while nested.next_token().is_some() {
            if starts_closure(&nested) {
                if let Some(token) = nested.current() {
                    return Err(self.unsupported(token, "nested closure"));
                }
            }
        }

        let body: String = inner.iter().map(|t| t.text.as_str()).collect();
        Ok(LiftedClosure {
            name: self.table.next_name(),
            by_ref,
            captures,
            params,
            args,
            body: format!("{{{}}}", body),
        })
    }

    pub fn run(mut self) -> Result<(String, ClosureTable)> {
        let tokens = tokenize(self.source).map_err(|e| e.with_path(self.path))?;
        let mut cursor = TokenCursor::new(&tokens);
        let mut out = String::with_capacity(self.source.len());
        let mut shim_at = None;
        let mut ends_in_php = true;

        while let Some(token) = cursor.next_token() {
            match token.kind {
                TokenKind::OpenTag => {
                    ends_in_php = true;
                    out.push_str(&token.text);
                    if shim_at.is_none() {
                        shim_at = Some(out.len());
                    }
                }
                TokenKind::CloseTag => {
                    ends_in_php = false;
                    out.push_str(&token.text);
                }
                TokenKind::Keyword(Keyword::Function) if starts_closure(&cursor) => {
                    let closure = self.lift(&mut cursor, token)?;
                    out.push_str(&closure.call(self.shim));
                    self.table.push(closure);
                }
                _ => out.push_str(&token.text),
            }
        }

        if self.table.is_empty() {
            return Ok((out, self.table));
        }

        if !ends_in_php {
            out.push_str("<?php\n");
        }
        for closure in self.table.entries() {
            out.push_str("\n\n");
            out.push_str(&closure.declaration());
        }
        out.push('\n');

        if let Some(at) = shim_at {
            out.insert_str(at, &format!("{}\n", shim_source(self.shim)));
        }
        Ok((out, self.table))
    }
}

/// Lift every closure literal of one unit.
pub fn extract_closures(source: &str, path: &Path, shim: &str) -> Result<(String, ClosureTable)> {
    ClosureExtractor::new(path, shim, source).run()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(src: &str) -> Result<(String, ClosureTable)> {
        extract_closures(src, Path::new("lib/Foo.php"), "NClosureFix")
    }

    #[test]
    fn test_closure_with_captures_is_lifted() {
        let src = "<?php\n$f = function($x) use (&$total, $factor) { $total += $x * $factor; };\n";
        let (out, table) = extract(src).unwrap();
        let name = &table.entries()[0].name;
        assert!(out.contains(&format!(
            "$f = NClosureFix::create('{}', array('total' => &$total, 'factor' => $factor), '$x', '$x');",
            name
        )));
        assert!(out.ends_with(&format!(
            "function {}(&$total, $factor, $x) {{ $total += $x * $factor; }}\n",
            name
        )));
        assert!(out.starts_with("<?php\nif (!class_exists('NClosureFix', FALSE)) {"));
    }

    #[test]
    fn test_names_are_stable_per_path_and_index() {
        let src = "<?php a(function() { return 1; }, function &() { return 2; });";
        let (out, table) = extract(src).unwrap();
        let names: Vec<_> = table.entries().iter().map(|c| c.name.clone()).collect();
        assert!(names[0].starts_with("_lc_") && names[0].ends_with("_0"));
        assert_eq!(names[0].len(), "_lc_".len() + 8 + 2);
        assert_eq!(names[1], format!("{}1", &names[0][..names[0].len() - 1]));
        assert!(out.contains(&format!("function &{}() {{ return 2; }}", names[1])));

        let (_, again) = extract(src).unwrap();
        assert_eq!(again.entries()[0].name, names[0]);
        let (_, other) = extract_closures(src, Path::new("lib/Bar.php"), "NClosureFix").unwrap();
        assert_ne!(other.entries()[0].name, names[0]);
    }

    #[test]
    fn test_directly_invoked_closure_gets_a_string_callable() {
        let src = "<?php $f = function(&$out, NForm $form, $mode = 'a\\'b') { $out = $form; };\n$f($out, $form);\n";
        let (out, table) = extract(src).unwrap();
        let closure = &table.entries()[0];
        assert_eq!(closure.args, "&$out, $form, $mode");
        assert!(out.contains(&format!(
            "$f = NClosureFix::create('{}', array(), '&$out, NForm $form, $mode = \\'a\\\\\\'b\\'', '&$out, $form, $mode');",
            closure.name
        )), "{}", out);
        assert!(out.contains("$f($out, $form);"));

        let shim = shim_source("NClosureFix");
        assert!(shim.contains("return create_function($params, \"return NClosureFix::invoke($id, $forward);\");"));
        assert!(!shim.contains("'invoke')"));
    }

    #[test]
    fn test_forwarded_args_skip_defaults() {
        let tokens = tokenize("<?php $a, array $b = array(1, $c), &$d").unwrap();
        assert_eq!(forwarded_args(&tokens), "$a, $b, &$d");
    }

    #[test]
    fn test_nested_closure_is_rejected() {
        let src = "<?php $f = function() { return function() { return 1; }; };";
        let err = extract(src).unwrap_err();
        match err {
            ConvertError::UnsupportedConstruct { path, construct, .. } => {
                assert_eq!(path, Path::new("lib/Foo.php"));
                assert_eq!(construct, "nested closure");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_named_functions_and_methods_are_untouched() {
        let src = "<?php function a() {} class B { static function c() { return function_exists('x'); } }";
        let (out, table) = extract(src).unwrap();
        assert!(table.is_empty());
        assert_eq!(out, src);
    }

    #[test]
    fn test_unit_ending_in_html_reopens_php() {
        let src = "<?php $f = function() { echo 1; }; ?>\n<p>done</p>\n";
        let (out, _) = extract(src).unwrap();
        assert!(out.contains("<p>done</p>\n<?php\n\n\nfunction _lc_"));
    }

    #[test]
    fn test_extraction_is_a_fixpoint() {
        let src = "<?php $f = function($a) { return $a; };";
        let (once, _) = extract(src).unwrap();
        let (twice, table) = extract(&once).unwrap();
        assert!(table.is_empty());
        assert_eq!(once, twice);
    }
}

//! End-to-end tests of the rewrite engine over whole units.

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use crate::config::{RewriteOptions, Replacement};
    use crate::error::ConvertError;
    use crate::rewrite::{rewrite_file, rewrite_source, rewrite_tree, FileAction, RewriteOutcome};

    fn rewrite(src: &str, options: &RewriteOptions) -> String {
        match rewrite_source(Path::new("Nette/Unit.php"), src, options).unwrap() {
            RewriteOutcome::Rewritten { text, .. } => text,
            RewriteOutcome::Dropped => panic!("unit was dropped"),
        }
    }

    fn everything_protected() -> RewriteOptions {
        RewriteOptions {
            protected_roots: vec![],
            ..RewriteOptions::default()
        }
    }

    const PRESENTER: &str = r#"<?php

/**
 * Nette Framework
 */

namespace Nette\Application;

use Nette,
	Nette\Http\IResponse;

/**
 * Base presenter.
 *
 * @property-read Nette\Http\Request $request
 */
abstract class Presenter extends Nette\Object implements IPresenter
{
	/** @var array of Nette\Forms\Form */
	private $forms = array();

	/**
	 * @return IResponse
	 */
	public function run(Request $request)
	{
		$name = $request->getPresenterName() ?: 'Default';
		$filter = function($form) use (&$name) {
			return $form->name === $name;
		};
		if (!$request instanceof Nette\Http\Request) {
			throw new Nette\InvalidStateException("Class 'Nette\Http\Request' expected.");
		}
		return static::create(__DIR__);
	}
}
"#;

    // ═══════════════════════════════════════════════════════════════════════════════
    // SCENARIOS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_scenario_namespace_import_extends() {
        let src = "<?php\nnamespace Foo;\nuse Bar\\Baz as B;\nclass X extends B {}\n";
        let options = RewriteOptions {
            protected_roots: vec!["Foo".to_string(), "Bar".to_string()],
            ..RewriteOptions::default()
        };
        let out = rewrite(src, &options);
        assert!(out.contains("class NX extends NBaz {}"), "{}", out);
    }

    #[test]
    fn test_scenario_nested_closure_names_unit() {
        let src = "<?php $f = function() { $g = function() {}; };";
        let err = rewrite_source(Path::new("lib/Nested.php"), src, &RewriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, ConvertError::UnsupportedConstruct { .. }));
        assert_eq!(err.path(), Some(Path::new("lib/Nested.php")));
        assert_eq!(err.code(), "DL-ERR-CLOSURE-001");
    }

    #[test]
    fn test_scenario_doc_comment_type() {
        let src = "<?php\nnamespace App;\n/** @var \\Foo\\Bar */\n/**\n * @package Foo\\Bar\n */\n";
        let out = rewrite(src, &everything_protected());
        assert!(out.contains("/** @var NBar */"), "{}", out);
        assert!(out.contains("/**\n * @package Foo\\Bar\n */"), "{}", out);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // WHOLE UNITS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_presenter_is_down_leveled() {
        let out = rewrite(PRESENTER, &RewriteOptions::default());

        assert!(!out.contains("namespace Nette"));
        assert!(!out.contains("use Nette"));
        assert!(out.contains("abstract class NPresenter extends NObject implements IPresenter"));
        assert!(out.contains("@property-read NRequest $request"), "{}", out);
        assert!(out.contains("@var array of NForm"));
        assert!(out.contains("@return IResponse"));
        assert!(out.contains("public function run(NRequest $request)"));
        assert!(out.contains("($tmp=$request->getPresenterName()) ? $tmp : 'Default'"));
        assert!(out.contains("$request instanceof NRequest"));
        assert!(out.contains("throw new NInvalidStateException(\"Class 'NRequest' expected.\")"), "{}", out);
        assert!(out.contains("return self::create(dirname(__FILE__));"));
        assert!(out.contains("NClosureFix::create('_lc_"));
        assert!(out.contains("array('name' => &$name)"));
        assert!(out.contains(" * @package Nette\\Application\n */"));
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let options = RewriteOptions::default();
        let once = rewrite(PRESENTER, &options);
        let twice = rewrite(&once, &options);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_rewrite_is_deterministic() {
        let options = RewriteOptions::default();
        assert_eq!(rewrite(PRESENTER, &options), rewrite(PRESENTER, &options));
    }

    #[test]
    fn test_native_dialect_keeps_structure() {
        let options = RewriteOptions {
            replacements: vec![Replacement {
                from: "Nette Framework".to_string(),
                to: "Nette Framework (native)".to_string(),
            }],
            ..RewriteOptions::native()
        };
        let out = rewrite(PRESENTER, &options);
        assert!(out.contains("namespace Nette\\Application;"));
        assert!(out.contains("function($form) use (&$name)"));
        assert!(out.contains(" * Nette Framework (native)"));
    }

    #[test]
    fn test_non_ascii_comments_survive_rewrite() {
        let src = "<?php\nnamespace Nette;\n// café ✓\n# naïve\nclass Foo {}\n";
        let out = rewrite(src, &RewriteOptions::default());
        assert!(out.contains("// café ✓\n# naïve\nclass NFoo {}"), "{}", out);
    }

    #[test]
    fn test_constants_in_argument_lists_keep_their_names() {
        let src = "<?php\nnamespace Nette;\n$x = array(new Foo, NULL, TRUE);\nf($a instanceof Bar, FALSE);\n";
        let out = rewrite(src, &RewriteOptions::default());
        assert!(out.contains("$x = array(new NFoo, NULL, TRUE);\nf($a instanceof NBar, FALSE);"), "{}", out);
    }

    #[test]
    fn test_newer_only_unit_is_dropped() {
        let src = "<?php\n/** @phpversion 5.3 */\nnamespace A;\n";
        let outcome = rewrite_source(Path::new("a.php"), src, &RewriteOptions::default()).unwrap();
        assert_eq!(outcome, RewriteOutcome::Dropped);
    }

    #[test]
    fn test_lex_error_carries_path() {
        let err = rewrite_source(Path::new("broken.php"), "<?php $a = 'open", &RewriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, ConvertError::Lex { .. }));
        assert_eq!(err.path(), Some(Path::new("broken.php")));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // WRITE-BACK
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_rewrite_file_writes_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain.php");
        let spaced = dir.path().join("spaced.php");
        let dropped = dir.path().join("dropped.php");
        fs::write(&plain, "<?php echo 1;\n").unwrap();
        fs::write(&spaced, "<?php namespace Nette; class A {}\n").unwrap();
        fs::write(&dropped, "<?php // @phpversion 5.3\n").unwrap();

        let options = RewriteOptions::default();
        assert_eq!(rewrite_file(&plain, &options).unwrap(), FileAction::Unchanged);
        assert_eq!(rewrite_file(&spaced, &options).unwrap(), FileAction::Written);
        assert_eq!(fs::read_to_string(&spaced).unwrap(), "<?php  class NA {}\n");
        assert_eq!(rewrite_file(&dropped, &options).unwrap(), FileAction::Deleted);
        assert!(!dropped.exists());
    }

    #[test]
    fn test_rewrite_tree_reports_and_aborts_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Http")).unwrap();
        fs::write(dir.path().join("Http/Request.php"), "<?php namespace Nette\\Http; class Request {}").unwrap();
        fs::write(dir.path().join("plain.php"), "<?php echo 1;").unwrap();

        let exts = vec!["php".to_string()];
        let report = rewrite_tree(dir.path(), &exts, &[], &RewriteOptions::default()).unwrap();
        assert_eq!(report.written, vec![dir.path().join("Http/Request.php")]);
        assert_eq!(report.unchanged, 1);

        let bad = dir.path().join("bad.php");
        fs::write(&bad, "<?php /* open").unwrap();
        let err = rewrite_tree(dir.path(), &exts, &[], &RewriteOptions::default()).unwrap_err();
        assert_eq!(err.path(), Some(bad.as_path()));
    }
}

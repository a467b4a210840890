//! Source access for one analysis request.
//!
//! A [`SourceUnit`] holds the raw text of the file being analyzed and, for
//! languages with tree detectors, a parse tree built on first demand. The
//! tree is parsed at most once per unit and shared by every tree detector
//! of the request.

mod grammar;
pub mod text;
pub mod tree;

use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::OnceCell;
use tree_sitter::{Parser, Tree};

pub use grammar::{init as init_grammars, is_initialized as grammars_initialized, Grammar};

use crate::error::DetectError;

/// Parse outcome cached on the unit.
enum ParseOutcome {
    Parsed(Tree),
    Failed { line: usize, reason: String },
}

/// Raw text plus its lazily built, request-scoped syntax tree.
pub struct SourceUnit<'a> {
    source: &'a str,
    lines: Vec<&'a str>,
    grammar: Option<Grammar>,
    strict: bool,
    tree: OnceCell<ParseOutcome>,
    parses: AtomicUsize,
}

impl<'a> SourceUnit<'a> {
    /// Create a unit. `grammar` is `None` for text-only languages.
    pub fn new(source: &'a str, grammar: Option<Grammar>) -> Self {
        Self {
            source,
            lines: source.lines().collect(),
            grammar,
            strict: false,
            tree: OnceCell::new(),
            parses: AtomicUsize::new(0),
        }
    }

    /// Report syntax-error nodes as a parse failure.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// The source text, unchanged.
    pub fn text(&self) -> &'a str {
        self.source
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.source.as_bytes()
    }

    /// Source lines without terminators. Line `n` (1-indexed) is `lines()[n - 1]`.
    pub fn lines(&self) -> &[&'a str] {
        &self.lines
    }

    pub fn grammar(&self) -> Option<Grammar> {
        self.grammar
    }

    /// The parse tree, built on first call.
    pub fn tree(&self) -> Result<&Tree, DetectError> {
        let grammar = self.grammar.ok_or_else(|| {
            DetectError::Internal("tree requested for a text-only language".to_string())
        })?;

        match self.tree.get_or_init(|| self.parse(grammar)) {
            ParseOutcome::Parsed(tree) => Ok(tree),
            ParseOutcome::Failed { line, reason } => Err(DetectError::Parse {
                language: grammar.name(),
                line: *line,
                reason: reason.clone(),
            }),
        }
    }

    /// How many times this unit has run the parser. Never more than one.
    pub fn parse_count(&self) -> usize {
        self.parses.load(Ordering::SeqCst)
    }

    fn parse(&self, grammar: Grammar) -> ParseOutcome {
        self.parses.fetch_add(1, Ordering::SeqCst);

        let language = match grammar.language() {
            Ok(l) => l,
            Err(reason) => {
                return ParseOutcome::Failed {
                    line: 1,
                    reason: format!("grammar unavailable: {}", reason),
                }
            }
        };

        let mut parser = Parser::new();
        if let Err(e) = parser.set_language(language) {
            return ParseOutcome::Failed {
                line: 1,
                reason: e.to_string(),
            };
        }

        let Some(tree) = parser.parse(self.source, None) else {
            return ParseOutcome::Failed {
                line: 1,
                reason: "parser produced no tree".to_string(),
            };
        };

        if self.strict && tree.root_node().has_error() {
            let line = tree::first_error(tree.root_node())
                .map(|n| n.start_position().row + 1)
                .unwrap_or(1);
            return ParseOutcome::Failed {
                line,
                reason: "syntax error".to_string(),
            };
        }

        ParseOutcome::Parsed(tree)
    }

    /// 1-indexed character column of a byte offset within a 1-indexed line.
    pub fn char_col(&self, line: usize, byte_col: usize) -> usize {
        self.lines
            .get(line.saturating_sub(1))
            .map(|l| text::char_col(l, byte_col))
            .unwrap_or(byte_col + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_only_unit_never_parses() {
        let unit = SourceUnit::new("module 0x1::m {}", None);
        assert!(unit.tree().is_err());
        assert_eq!(unit.parse_count(), 0);
        assert_eq!(unit.lines().len(), 1);
    }

    #[test]
    fn test_tree_is_parsed_once() {
        let unit = SourceUnit::new("package main\nfunc main() {}\n", Some(Grammar::Go));
        let first = unit.tree().unwrap().root_node().id();
        let second = unit.tree().unwrap().root_node().id();
        assert_eq!(first, second);
        assert_eq!(unit.parse_count(), 1);
    }

    #[test]
    fn test_tolerant_mode_keeps_broken_trees() {
        let unit = SourceUnit::new("fn main( {", Some(Grammar::Rust));
        let tree = unit.tree().unwrap();
        assert!(tree.root_node().has_error());
    }

    #[test]
    fn test_strict_mode_reports_parse_failure() {
        let unit = SourceUnit::new("fn ok() {}\nfn main( {", Some(Grammar::Rust)).strict(true);
        let err = unit.tree().unwrap_err();
        assert!(err.is_parse());
        assert!(err.to_string().contains("Rust"));
        // The failure is cached too.
        assert!(unit.tree().is_err());
        assert_eq!(unit.parse_count(), 1);
    }

    #[test]
    fn test_char_col_counts_characters() {
        let unit = SourceUnit::new("let é = a + b;", None);
        // byte offset of '+' is 11 ('é' is two bytes), character column 11.
        assert_eq!(unit.char_col(1, 11), 11);
    }
}

//! Vulnerability detectors.
//!
//! Every (language, category) pair has exactly one detector. Detector
//! bodies are plain functions that return [`Hit`]s; the wrappers here bind
//! a body to its category and source-access strategy.

mod access_control;
mod call_safety;
mod catalog;
mod flow;
mod freeze_bypass;
mod logic_defect;
mod overflow;
mod randomness;
mod reentrancy;
mod scope;
mod syntax;

pub use catalog::Catalog;

use lazy_static::lazy_static;
use regex::Regex;
use tree_sitter::{Node, Tree};

use crate::config::AuditConfig;
use crate::error::DetectError;
use crate::finding::{Category, Hit};
use crate::source::text::ScanLine;
use crate::source::SourceUnit;

/// How a detector reads its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Line-oriented scanning of the raw text.
    Text,
    /// Traversal of the request's syntax tree.
    Tree,
}

/// One category's detector for one language.
pub trait Detector: Send + Sync {
    /// Stable identifier, e.g. `sol-reentrancy`.
    fn name(&self) -> &'static str;

    fn category(&self) -> Category;

    fn strategy(&self) -> Strategy;

    /// Scan a unit. Returns an empty list when nothing matches.
    fn scan(&self, unit: &SourceUnit<'_>, config: &AuditConfig) -> Result<Vec<Hit>, DetectError>;
}

pub type TextScan = fn(&SourceUnit<'_>, &AuditConfig) -> Vec<Hit>;
pub type TreeScan = fn(&SourceUnit<'_>, &Tree, &AuditConfig) -> Result<Vec<Hit>, DetectError>;

/// Detector backed by a text scanning function.
pub struct TextDetector {
    name: &'static str,
    category: Category,
    scan: TextScan,
}

impl TextDetector {
    pub fn new(name: &'static str, category: Category, scan: TextScan) -> Self {
        Self {
            name,
            category,
            scan,
        }
    }
}

impl Detector for TextDetector {
    fn name(&self) -> &'static str {
        self.name
    }

    fn category(&self) -> Category {
        self.category
    }

    fn strategy(&self) -> Strategy {
        Strategy::Text
    }

    fn scan(&self, unit: &SourceUnit<'_>, config: &AuditConfig) -> Result<Vec<Hit>, DetectError> {
        Ok((self.scan)(unit, config))
    }
}

/// Detector backed by a syntax-tree traversal. The tree comes from the
/// unit, so every tree detector of a request shares one parse.
pub struct TreeDetector {
    name: &'static str,
    category: Category,
    scan: TreeScan,
}

impl TreeDetector {
    pub fn new(name: &'static str, category: Category, scan: TreeScan) -> Self {
        Self {
            name,
            category,
            scan,
        }
    }
}

impl Detector for TreeDetector {
    fn name(&self) -> &'static str {
        self.name
    }

    fn category(&self) -> Category {
        self.category
    }

    fn strategy(&self) -> Strategy {
        Strategy::Tree
    }

    fn scan(&self, unit: &SourceUnit<'_>, config: &AuditConfig) -> Result<Vec<Hit>, DetectError> {
        let tree = unit.tree()?;
        (self.scan)(unit, tree, config)
    }
}

lazy_static! {
    /// TODO-style markers inside comments.
    static ref TODO_MARKER: Regex = Regex::new(r"\b(TODO|FIXME|XXX|HACK)\b").unwrap();
}

/// Hit at the start of a syntax node.
fn node_hit(unit: &SourceUnit<'_>, node: Node<'_>, message: impl Into<String>) -> Hit {
    let pos = node.start_position();
    let line = pos.row + 1;
    Hit::new(line, unit.char_col(line, pos.column), message)
}

/// Hit at a byte offset of a 0-indexed line.
fn line_hit(unit: &SourceUnit<'_>, idx: usize, byte_col: usize, message: impl Into<String>) -> Hit {
    let line = idx + 1;
    Hit::new(line, unit.char_col(line, byte_col), message)
}

/// TODO/FIXME markers in the comment channel of scanned lines.
fn todo_hits(unit: &SourceUnit<'_>, lines: &[ScanLine]) -> Vec<Hit> {
    let mut hits = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        if let Some(m) = TODO_MARKER.find(&line.comment) {
            hits.push(
                line_hit(
                    unit,
                    idx,
                    m.start(),
                    format!("{} marker left in code", m.as_str()),
                )
                .with_suggestion("Resolve or track the pending work before deployment"),
            );
        }
    }
    hits
}

/// TODO/FIXME markers inside comment nodes of a syntax tree.
fn todo_hits_in_tree(unit: &SourceUnit<'_>, root: Node<'_>) -> Vec<Hit> {
    use crate::source::tree::{find_kinds, node_text};

    let mut hits = Vec::new();
    for comment in find_kinds(root, &["comment", "line_comment", "block_comment"]) {
        let text = node_text(comment, unit.text());
        if let Some(m) = TODO_MARKER.find(text) {
            // Column of the marker itself, which may sit on a later line of
            // a block comment.
            let start = comment.start_byte() + m.start();
            let line_start = unit.text()[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
            let line = unit.text()[..start].matches('\n').count();
            hits.push(
                line_hit(
                    unit,
                    line,
                    start - line_start,
                    format!("{} marker left in code", m.as_str()),
                )
                .with_suggestion("Resolve or track the pending work before deployment"),
            );
        }
    }
    hits
}

//! Syntax-tree helpers shared by the tree detectors.

use streaming_iterator::StreamingIterator;
use tree_sitter::{Language, Node, Query, QueryCursor};

use crate::error::DetectError;

/// Visit every node under `root` (inclusive) depth-first, in source order.
pub fn walk<'t>(root: Node<'t>, mut visit: impl FnMut(Node<'t>)) {
    let mut cursor = root.walk();
    loop {
        visit(cursor.node());

        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.node() == root {
                return;
            }
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

/// Every node of the given kinds under `root`, in source order.
pub fn find_kinds<'t>(root: Node<'t>, kinds: &[&str]) -> Vec<Node<'t>> {
    let mut found = Vec::new();
    walk(root, |n| {
        if kinds.contains(&n.kind()) {
            found.push(n);
        }
    });
    found
}

/// First `ERROR` or missing node in source order.
pub fn first_error(root: Node<'_>) -> Option<Node<'_>> {
    let mut first = None;
    walk(root, |n| {
        if first.is_none() && (n.is_error() || n.is_missing()) {
            first = Some(n);
        }
    });
    first
}

/// Source text covered by a node.
pub fn node_text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// 1-indexed line of a node's start.
pub fn line(node: Node<'_>) -> usize {
    node.start_position().row + 1
}

/// Nearest strict ancestor whose kind is one of `kinds`.
pub fn ancestor<'t>(node: Node<'t>, kinds: &[&str]) -> Option<Node<'t>> {
    let mut current = node.parent();
    while let Some(n) = current {
        if kinds.contains(&n.kind()) {
            return Some(n);
        }
        current = n.parent();
    }
    None
}

/// Operator token of a binary or compound-assignment node.
pub fn operator<'s>(node: Node<'_>, source: &'s str) -> Option<&'s str> {
    if let Some(op) = node.child_by_field_name("operator") {
        return Some(node_text(op, source));
    }
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .find(|c| !c.is_named())
        .map(|c| node_text(c, source));
    found
}

/// Nodes bound to `capture` by every match of `query`.
pub fn query_captures<'t>(
    language: &Language,
    query: &str,
    root: Node<'t>,
    source: &str,
    capture: &str,
) -> Result<Vec<Node<'t>>, DetectError> {
    let query = Query::new(language, query)?;
    let Some(index) = query.capture_index_for_name(capture) else {
        return Err(DetectError::Internal(format!(
            "query has no capture named @{}",
            capture
        )));
    };

    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(&query, root, source.as_bytes());
    let mut nodes = Vec::new();

    while let Some(m) = matches.next() {
        for c in m.captures {
            if c.index == index {
                nodes.push(c.node);
            }
        }
    }

    nodes.sort_by_key(|n| n.start_byte());
    nodes.dedup_by_key(|n| n.id());
    Ok(nodes)
}

const COMMENT_KINDS: &[&str] = &["comment", "line_comment", "block_comment"];

/// Statements under `body` in source order. A statement is a named,
/// non-comment child of a node whose kind is in `containers`.
pub fn statements<'t>(body: Node<'t>, containers: &[&str]) -> Vec<Node<'t>> {
    let mut found = Vec::new();
    walk(body, |n| {
        if n == body
            || !n.is_named()
            || COMMENT_KINDS.contains(&n.kind())
            || containers.contains(&n.kind())
        {
            return;
        }
        if n.parent().is_some_and(|p| containers.contains(&p.kind())) {
            found.push(n);
        }
    });
    found
}

/// Index into `statements` of the innermost statement containing `node`,
/// or `None` when it lies outside all of them.
pub fn statement_ordinal(statements: &[Node<'_>], node: Node<'_>) -> Option<usize> {
    statements
        .iter()
        .rposition(|s| s.start_byte() <= node.start_byte() && node.end_byte() <= s.end_byte())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Grammar, SourceUnit};

    const GO: &str = "package main\n\nfunc f() {\n\ta := 1\n\tif a > 0 {\n\t\ta = a + 1\n\t}\n\treturn\n}\n";

    #[test]
    fn test_walk_visits_in_source_order() {
        let unit = SourceUnit::new(GO, Some(Grammar::Go));
        let root = unit.tree().unwrap().root_node();
        let mut last = 0;
        let mut count = 0;
        walk(root, |n| {
            assert!(n.start_byte() >= last);
            last = n.start_byte();
            count += 1;
        });
        assert!(count > 10);
        assert_eq!(find_kinds(root, &["source_file"]).len(), 1);
    }

    #[test]
    fn test_find_kinds_and_operator() {
        let unit = SourceUnit::new(GO, Some(Grammar::Go));
        let root = unit.tree().unwrap().root_node();
        let ops: Vec<&str> = find_kinds(root, &["binary_expression"])
            .into_iter()
            .filter_map(|n| operator(n, GO))
            .collect();
        assert_eq!(ops, vec![">", "+"]);
    }

    #[test]
    fn test_statements_are_ordered() {
        let unit = SourceUnit::new(GO, Some(Grammar::Go));
        let root = unit.tree().unwrap().root_node();
        let func = find_kinds(root, &["function_declaration"])[0];
        let stmts = statements(func, &["block", "statement_list"]);
        let lines: Vec<usize> = stmts.iter().map(|s| line(*s)).collect();
        assert_eq!(lines, vec![4, 5, 6, 8]);

        let add = find_kinds(root, &["binary_expression"])[1];
        assert_eq!(statement_ordinal(&stmts, add), Some(2));
    }

    #[test]
    fn test_query_captures() {
        let unit = SourceUnit::new(GO, Some(Grammar::Go));
        let root = unit.tree().unwrap().root_node();
        let lang = Grammar::Go.language().unwrap();
        let names = query_captures(
            lang,
            "(function_declaration name: (identifier) @name)",
            root,
            GO,
            "name",
        )
        .unwrap();
        assert_eq!(names.len(), 1);
        assert_eq!(node_text(names[0], GO), "f");
    }

    #[test]
    fn test_bad_query_is_an_error() {
        let unit = SourceUnit::new(GO, Some(Grammar::Go));
        let root = unit.tree().unwrap().root_node();
        let lang = Grammar::Go.language().unwrap();
        assert!(query_captures(lang, "(no_such_node) @x", root, GO, "x").is_err());
    }

    #[test]
    fn test_first_error() {
        let src = "package main\nfunc f( {\n";
        let unit = SourceUnit::new(src, Some(Grammar::Go));
        let root = unit.tree().unwrap().root_node();
        assert!(first_error(root).is_some());
        let clean = SourceUnit::new(GO, Some(Grammar::Go));
        assert!(first_error(clean.tree().unwrap().root_node()).is_none());
    }
}

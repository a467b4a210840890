//! Integer overflow: `+ - *` without a checked helper or compiler guarantee.

use lazy_static::lazy_static;
use regex::Regex;
use tree_sitter::Tree;

use crate::config::AuditConfig;
use crate::error::DetectError;
use crate::finding::{Category, Hit};
use crate::language::Lang;
use crate::source::text::{binary_ops, scan_lines, CommentStyle};
use crate::source::tree::{ancestor, find_kinds, node_text, operator};
use crate::source::SourceUnit;

use super::syntax::{
    enclosing_fn, is_string_literal, lhs, rhs, sol_checked_by_compiler, sol_in_unchecked,
    GO_FUNCTIONS, RS_FUNCTIONS,
};
use super::{line_hit, node_hit, Catalog, TextDetector, TreeDetector};

lazy_static! {
    static ref MOVE_SAFE: Regex = Regex::new(r"\b(overflow|safe|checked)_(add|sub|mul)\b").unwrap();
    static ref VY_UNSAFE: Regex = Regex::new(r"\bunsafe_(add|sub|mul)\s*\(").unwrap();
    static ref VY_UNCHECKED: Regex = Regex::new(r"(@unchecked\b|\bunchecked\s*:)").unwrap();
    static ref GO_GUARD: Regex = Regex::new(r"\bbits\.(Add|Sub|Mul)(32|64)?\b|\bmath\.(Max|Min)(Int|Uint)").unwrap();
    static ref RS_GUARD: Regex =
        Regex::new(r"\b(checked|saturating|wrapping|overflowing)_(add|sub|mul)\b|\bWrapping\s*\(").unwrap();
}

const ARITH: &[&str] = &["+", "-", "*", "+=", "-=", "*="];

pub(super) fn register(catalog: &mut Catalog) {
    catalog.insert(Lang::Move, TextDetector::new("move-overflow", Category::Overflow, scan_move));
    catalog.insert(Lang::Solidity, TreeDetector::new("sol-overflow", Category::Overflow, scan_solidity));
    catalog.insert(Lang::Vyper, TextDetector::new("vy-overflow", Category::Overflow, scan_vyper));
    catalog.insert(Lang::Go, TreeDetector::new("go-overflow", Category::Overflow, scan_go));
    catalog.insert(Lang::Rust, TreeDetector::new("rs-overflow", Category::Overflow, scan_rust));
}

fn helper_name(op: &str) -> &'static str {
    match op.trim_end_matches('=') {
        "+" => "add",
        "-" => "sub",
        _ => "mul",
    }
}

fn scan_move(unit: &SourceUnit<'_>, _config: &AuditConfig) -> Vec<Hit> {
    let lines = scan_lines(unit.lines(), CommentStyle::CLike);
    let mut hits = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let Some(&(col, op)) = binary_ops(&line.code).first() else {
            continue;
        };
        let guarded = MOVE_SAFE.is_match(&line.code)
            || (idx > 0 && MOVE_SAFE.is_match(&lines[idx - 1].code));
        if guarded {
            continue;
        }
        let helper = helper_name(&op.to_string());
        hits.push(
            line_hit(
                unit,
                idx,
                col,
                format!("Possible integer overflow: `{}` used directly on integers", op),
            )
            .with_suggestion(format!("Use overflow_{} or a checked helper", helper)),
        );
    }

    hits
}

fn scan_solidity(unit: &SourceUnit<'_>, tree: &Tree, _config: &AuditConfig) -> Result<Vec<Hit>, DetectError> {
    if sol_checked_by_compiler(unit.text()) {
        return Ok(Vec::new());
    }

    let root = tree.root_node();
    let mut hits = Vec::new();

    for node in find_kinds(root, &["binary_expression", "augmented_assignment_expression"]) {
        let Some(op) = operator(node, unit.text()) else {
            continue;
        };
        if !ARITH.contains(&op) || sol_in_unchecked(node) {
            continue;
        }
        if ancestor(node, &["constant_variable_declaration"]).is_some() {
            continue;
        }
        hits.push(
            node_hit(
                unit,
                node,
                format!(
                    "Possible integer overflow: `{}` is unchecked before Solidity 0.8 and not in an unchecked block",
                    op
                ),
            )
            .with_suggestion("Require pragma ^0.8.0 or use SafeMath"),
        );
    }

    Ok(hits)
}

fn scan_vyper(unit: &SourceUnit<'_>, _config: &AuditConfig) -> Vec<Hit> {
    let lines = scan_lines(unit.lines(), CommentStyle::Hash);
    let mut hits = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        if let Some(m) = VY_UNSAFE.find(&line.code) {
            hits.push(
                line_hit(
                    unit,
                    idx,
                    m.start(),
                    format!(
                        "Possible integer overflow: `{}` skips Vyper's built-in overflow check",
                        m.as_str().trim_end_matches('(').trim()
                    ),
                )
                .with_suggestion("Use the checked operator unless wrapping is intended"),
            );
        } else if let Some(m) = VY_UNCHECKED.find(&line.code) {
            hits.push(
                line_hit(
                    unit,
                    idx,
                    m.start(),
                    "Possible integer overflow: unchecked block disables Vyper's overflow checks",
                )
                .with_suggestion("Remove the unchecked marker unless wrapping is intended"),
            );
        }
    }

    hits
}

fn scan_go(unit: &SourceUnit<'_>, tree: &Tree, _config: &AuditConfig) -> Result<Vec<Hit>, DetectError> {
    let root = tree.root_node();
    let src = unit.text();
    let mut hits = Vec::new();

    for node in find_kinds(root, &["binary_expression", "assignment_statement"]) {
        let Some(op) = operator(node, src) else {
            continue;
        };
        if !ARITH.contains(&op) {
            continue;
        }
        let operands = [lhs(node), rhs(node)];
        if operands.iter().flatten().any(|n| is_string_literal(*n)) {
            continue;
        }
        if ancestor(node, &["const_declaration"]).is_some() {
            continue;
        }
        if let Some(func) = enclosing_fn(node, GO_FUNCTIONS) {
            if GO_GUARD.is_match(node_text(func, src)) {
                continue;
            }
        }
        hits.push(
            node_hit(
                unit,
                node,
                format!("Possible integer overflow: Go `{}` wraps silently on overflow", op),
            )
            .with_suggestion(format!(
                "Check bounds against math.Max* or use bits.{}64",
                match helper_name(op) {
                    "add" => "Add",
                    "sub" => "Sub",
                    _ => "Mul",
                }
            )),
        );
    }

    Ok(hits)
}

fn scan_rust(unit: &SourceUnit<'_>, tree: &Tree, _config: &AuditConfig) -> Result<Vec<Hit>, DetectError> {
    let root = tree.root_node();
    let src = unit.text();
    let mut hits = Vec::new();

    for node in find_kinds(root, &["binary_expression", "compound_assignment_expr"]) {
        let Some(op) = operator(node, src) else {
            continue;
        };
        if !ARITH.contains(&op) {
            continue;
        }
        let operands = [lhs(node), rhs(node)];
        if operands.iter().flatten().any(|n| is_string_literal(*n)) {
            continue;
        }
        if ancestor(node, &["const_item", "static_item", "array_type"]).is_some() {
            continue;
        }
        if let Some(func) = enclosing_fn(node, RS_FUNCTIONS) {
            if RS_GUARD.is_match(node_text(func, src)) {
                continue;
            }
        }
        let helper = helper_name(op);
        hits.push(
            node_hit(
                unit,
                node,
                format!("Possible integer overflow: `{}` wraps in release builds", op),
            )
            .with_suggestion(format!("Use checked_{} or saturating_{}", helper, helper)),
        );
    }

    Ok(hits)
}

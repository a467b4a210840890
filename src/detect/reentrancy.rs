//! Reentrancy: an external call followed closely by a state write.

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;
use tree_sitter::{Node, Tree};

use crate::config::AuditConfig;
use crate::error::DetectError;
use crate::finding::{Category, Hit};
use crate::language::Lang;
use crate::source::text::{scan_lines, CommentStyle, ScanLine};
use crate::source::tree::{ancestor, find_kinds, node_text, statement_ordinal, statements, walk};
use crate::source::SourceUnit;

use super::flow::{Flow, StepKind};
use super::scope::{move_functions, vyper_functions, TextFn};
use super::syntax::{
    callee, callee_path, go_external_call, go_package_vars, last_segment, lhs, root_ident,
    rs_external_call, sol_external_call, sol_modifiers, sol_state_vars, GO_BLOCKS, GO_FUNCTIONS,
    RS_BLOCKS, RS_FUNCTIONS, SOL_BLOCKS,
};
use super::{Catalog, TextDetector, TreeDetector};

lazy_static! {
    static ref MOVE_CALL: Regex = Regex::new(
        r"(?:\b0x[0-9a-fA-F]+::\w+::\w+|\b(?:\w+::)*(?:send|transfer|pay)\w*)\s*(?:<[^()]*>)?\s*\("
    )
    .unwrap();
    static ref MOVE_WRITE: Regex =
        Regex::new(r"^\s*(?:\*\s*)?[A-Za-z_]\w*(?:\.[A-Za-z_]\w*)+\s*(?:[-+*/]?=)[^=]|^\s*\*\s*[A-Za-z_]\w*\s*=[^=]").unwrap();
    static ref MOVE_GUARD: Regex = Regex::new(r"(?i)\b(lock|nonreentrant|reentrancy_guard|mutex)\w*\b").unwrap();
    static ref VY_CALL: Regex = Regex::new(
        r"\b(?:send|raw_call)\s*\(|\bextcall\s+|\b[A-Z]\w*\s*\([^()]*\)\s*\.\s*\w+\s*\(|\.\s*transfer\s*\("
    )
    .unwrap();
    static ref VY_WRITE: Regex = Regex::new(r"^\s*self\.[\w\[\]. ]*?\s*[-+*/]?=[^=]").unwrap();
}

const RS_LOCKS: &[&str] = &["lock", "write", "try_lock", "try_write"];

pub(super) fn register(catalog: &mut Catalog) {
    catalog.insert(Lang::Move, TextDetector::new("move-reentrancy", Category::Reentrancy, scan_move));
    catalog.insert(Lang::Solidity, TreeDetector::new("sol-reentrancy", Category::Reentrancy, scan_solidity));
    catalog.insert(Lang::Vyper, TextDetector::new("vy-reentrancy", Category::Reentrancy, scan_vyper));
    catalog.insert(Lang::Go, TreeDetector::new("go-reentrancy", Category::Reentrancy, scan_go));
    catalog.insert(Lang::Rust, TreeDetector::new("rs-reentrancy", Category::Reentrancy, scan_rust));
}

/// One hit per call that has a write inside the window.
fn report(flow: &Flow, window: usize) -> Vec<Hit> {
    flow.calls()
        .into_iter()
        .filter_map(|call| {
            let write = flow.write_after(call, window)?;
            Some(
                Hit::new(
                    call.line,
                    call.col,
                    format!(
                        "Possible reentrancy: external call `{}` is followed by state write `{}` at line {}",
                        call.label, write.label, write.line
                    ),
                )
                .with_suggestion("Update state before the external call or add a reentrancy guard"),
            )
        })
        .collect()
}

/// Flow of a text-scanned function with regex-classified lines.
fn text_flow(
    unit: &SourceUnit<'_>,
    lines: &[ScanLine],
    func: &TextFn,
    call: &Regex,
    write: &Regex,
    guard: Option<&Regex>,
) -> Flow {
    let mut flow = Flow::new();
    for (idx, ord) in func.body_lines(lines) {
        let code = &lines[idx].code;
        if let Some(g) = guard {
            if let Some(m) = g.find(code) {
                flow.push(StepKind::Guard, ord, idx + 1, unit.char_col(idx + 1, m.start()), m.as_str());
            }
        }
        // The signature line names the function itself.
        if let Some(m) = call.find(code).filter(|_| idx != func.decl) {
            let label = m.as_str().trim_end_matches('(').trim();
            flow.push(StepKind::Call, ord, idx + 1, unit.char_col(idx + 1, m.start()), label);
        }
        if write.is_match(code) && !code.trim_start().starts_with("let ") {
            let label = code.trim().trim_end_matches(';');
            flow.push(StepKind::Write, ord, idx + 1, unit.char_col(idx + 1, 0), label);
        }
    }
    flow
}

fn scan_move(unit: &SourceUnit<'_>, config: &AuditConfig) -> Vec<Hit> {
    let lines = scan_lines(unit.lines(), CommentStyle::CLike);
    let mut hits = Vec::new();

    for func in move_functions(&lines) {
        let flow = text_flow(unit, &lines, &func, &MOVE_CALL, &MOVE_WRITE, Some(&MOVE_GUARD));
        hits.extend(report(&flow, config.reentrancy_window));
    }

    hits
}

fn scan_vyper(unit: &SourceUnit<'_>, config: &AuditConfig) -> Vec<Hit> {
    let lines = scan_lines(unit.lines(), CommentStyle::Hash);
    let mut hits = Vec::new();

    for func in vyper_functions(&lines) {
        if func.header.contains("@nonreentrant") {
            continue;
        }
        let flow = text_flow(unit, &lines, &func, &VY_CALL, &VY_WRITE, None);
        hits.extend(report(&flow, config.reentrancy_window));
    }

    hits
}

/// Push a step at `node` with its statement ordinal.
fn push(flow: &mut Flow, unit: &SourceUnit<'_>, stmts: &[Node<'_>], kind: StepKind, node: Node<'_>, label: &str) {
    let Some(ord) = statement_ordinal(stmts, node) else {
        return;
    };
    let pos = node.start_position();
    let line = pos.row + 1;
    let label = label.lines().next().unwrap_or("").trim();
    flow.push(kind, ord, line, unit.char_col(line, pos.column), label);
}

fn is_reentrancy_modifier(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.contains("nonreentrant") || lower.contains("noreentrancy") || lower == "lock" || lower == "mutex"
}

fn scan_solidity(unit: &SourceUnit<'_>, tree: &Tree, config: &AuditConfig) -> Result<Vec<Hit>, DetectError> {
    let src = unit.text();
    let root = tree.root_node();
    let state_vars = sol_state_vars(root, src);
    let mut hits = Vec::new();

    for func in find_kinds(root, &["function_definition", "fallback_receive_definition"]) {
        if sol_modifiers(func, src).into_iter().any(is_reentrancy_modifier) {
            continue;
        }
        let Some(body) = func.child_by_field_name("body") else {
            continue;
        };
        let stmts = statements(body, SOL_BLOCKS);
        let mut flow = Flow::new();

        walk(body, |node| match node.kind() {
            "call_expression" => {
                if let Some(label) = sol_external_call(node, src) {
                    push(&mut flow, unit, &stmts, StepKind::Call, node, &label);
                }
            }
            "assignment_expression" | "augmented_assignment_expression" | "update_expression" => {
                let Some(target) = lhs(node) else {
                    return;
                };
                let target_text = node_text(target, src);
                let root_name = root_ident(target_text);
                if root_name.to_ascii_lowercase().contains("lock") {
                    push(&mut flow, unit, &stmts, StepKind::Guard, node, target_text);
                } else if state_vars.contains(root_name) {
                    push(&mut flow, unit, &stmts, StepKind::Write, node, node_text(node, src));
                }
            }
            _ => {}
        });

        hits.extend(report(&flow, config.reentrancy_window));
    }

    Ok(hits)
}

/// Whether a Go assignment target reaches beyond the local frame.
fn go_shared_target(target: Node<'_>, package_vars: &HashSet<String>, src: &str) -> bool {
    let mut cursor = target.walk();
    let first = if target.kind() == "expression_list" {
        target.named_children(&mut cursor).next()
    } else {
        Some(target)
    };
    match first {
        Some(n) => {
            matches!(n.kind(), "selector_expression" | "index_expression" | "unary_expression")
                || (n.kind() == "identifier" && package_vars.contains(node_text(n, src)))
        }
        None => false,
    }
}

fn scan_go(unit: &SourceUnit<'_>, tree: &Tree, config: &AuditConfig) -> Result<Vec<Hit>, DetectError> {
    let src = unit.text();
    let root = tree.root_node();
    let package_vars = go_package_vars(root, src);
    let mut hits = Vec::new();

    for func in find_kinds(root, GO_FUNCTIONS) {
        let Some(body) = func.child_by_field_name("body") else {
            continue;
        };
        let stmts = statements(body, GO_BLOCKS);
        let mut flow = Flow::new();

        walk(body, |node| match node.kind() {
            "call_expression" => {
                if let Some(target) = callee(node) {
                    let path = callee_path(node_text(target, src));
                    if matches!(last_segment(&path), "Lock" | "RLock") {
                        push(&mut flow, unit, &stmts, StepKind::Guard, node, &path);
                        return;
                    }
                }
                if let Some(label) = go_external_call(node, src) {
                    push(&mut flow, unit, &stmts, StepKind::Call, node, &label);
                }
            }
            "assignment_statement" | "inc_statement" | "dec_statement" => {
                let Some(target) = lhs(node) else {
                    return;
                };
                if go_shared_target(target, &package_vars, src) {
                    push(&mut flow, unit, &stmts, StepKind::Write, node, node_text(node, src));
                }
            }
            _ => {}
        });

        hits.extend(report(&flow, config.reentrancy_window));
    }

    Ok(hits)
}

fn scan_rust(unit: &SourceUnit<'_>, tree: &Tree, config: &AuditConfig) -> Result<Vec<Hit>, DetectError> {
    let src = unit.text();
    let root = tree.root_node();
    let mut hits = Vec::new();

    for func in find_kinds(root, RS_FUNCTIONS) {
        let Some(body) = func.child_by_field_name("body") else {
            continue;
        };
        let stmts = statements(body, RS_BLOCKS);
        let mut flow = Flow::new();

        walk(body, |node| match node.kind() {
            "await_expression" => {
                let text = node_text(node, src);
                let label = text.trim_end_matches(".await").trim_end();
                push(&mut flow, unit, &stmts, StepKind::Call, node, label);
            }
            "call_expression" => {
                let Some(target) = callee(node) else {
                    return;
                };
                let path = callee_path(node_text(target, src));
                if RS_LOCKS.contains(&last_segment(&path)) {
                    push(&mut flow, unit, &stmts, StepKind::Guard, node, &path);
                } else if ancestor(node, &["await_expression"]).is_none() {
                    if let Some(label) = rs_external_call(node, src) {
                        push(&mut flow, unit, &stmts, StepKind::Call, node, &label);
                    }
                }
            }
            "assignment_expression" | "compound_assignment_expr" => {
                let Some(target) = lhs(node) else {
                    return;
                };
                let text = node_text(target, src).trim_start();
                if text.starts_with("self.") || text.starts_with('*') || text.contains('.') {
                    push(&mut flow, unit, &stmts, StepKind::Write, node, node_text(node, src));
                }
            }
            _ => {}
        });

        hits.extend(report(&flow, config.reentrancy_window));
    }

    Ok(hits)
}

//! Call safety: calls into other modules or contracts with no
//! authorization check shortly before them.

use lazy_static::lazy_static;
use regex::Regex;
use tree_sitter::{Node, Tree};

use crate::config::AuditConfig;
use crate::error::DetectError;
use crate::finding::{Category, Hit};
use crate::language::Lang;
use crate::source::text::{scan_lines, CommentStyle, ScanLine};
use crate::source::tree::{find_kinds, node_text, statement_ordinal, statements, walk};
use crate::source::SourceUnit;

use super::flow::{Flow, StepKind};
use super::scope::{move_functions, vyper_functions, TextFn};
use super::syntax::{
    callee, callee_path, go_external_call, last_segment, rs_attributes, rs_external_call,
    sol_external_call, sol_keywords, sol_modifiers, GO_BLOCKS, GO_FUNCTIONS, RS_BLOCKS,
    RS_FUNCTIONS, SOL_BLOCKS,
};
use super::{Catalog, TextDetector, TreeDetector};

lazy_static! {
    static ref MOVE_XCALL: Regex =
        Regex::new(r"\b0x[0-9a-fA-F]+::[A-Za-z_]\w*::[A-Za-z_]\w*\s*(?:<[^()]*>)?\s*\(").unwrap();
    pub(super) static ref MOVE_AUTH: Regex = Regex::new(
        r"signer::address_of|\bhas_role\b|\bonly_owner\b|\bis_admin\b|\bassert_owner\b|assert!\s*\([^;]*\b(signer|owner|admin|sender)|if\s*\([^)]*\bsigner"
    )
    .unwrap();
    static ref VY_XCALL: Regex =
        Regex::new(r"\braw_call\s*\(|\bextcall\s+|\b[A-Z]\w*\s*\([^()]*\)\s*\.\s*\w+\s*\(").unwrap();
    pub(super) static ref VY_AUTH: Regex =
        Regex::new(r"\bassert\b[^#]*\bmsg\.sender\b|\bassert\s+self\.\w*(owner|admin|auth)\w*\[").unwrap();
    pub(super) static ref SOL_AUTH: Regex = Regex::new(
        r"msg\.sender\s*[!=]=|[!=]=\s*msg\.sender|_msgSender\(\)\s*[!=]=|[!=]=\s*_msgSender\(\)|\bhasRole\s*\(|\b_checkOwner\s*\(|\b_checkRole\s*\(|\bisOwner\s*\("
    )
    .unwrap();
    pub(super) static ref SOL_ACCESS_MODIFIER: Regex =
        Regex::new(r"(?i)^(only\w*|auth\w*|requiresauth|\w*(owner|admin|role)\w*)$").unwrap();
    pub(super) static ref GO_AUTH: Regex = Regex::new(
        r"(?i)^(authenticate|authorize|auth\w*|verify\w*|checkauth\w*|checktoken|checkpermission\w*|checkrole|validatetoken|validatejwt|isadmin|isowner|isauthori[sz]ed|isauthenticated|requireauth\w*|getclientidentity|assertattributevalue)$"
    )
    .unwrap();
    pub(super) static ref RS_AUTH: Regex = Regex::new(
        r"\b(require_auth|check_auth|authorize|authenticate|verify_signature|is_admin|is_owner|only_owner|assert_owner|has_role|ensure_signed|ensure_root|require_signer|predecessor_account_id|signer_account_id)\b|\bis_signer\b"
    )
    .unwrap();
    static ref RS_AUTH_ASSERT: Regex =
        Regex::new(r"^(assert|assert_eq|require|ensure)!?[\s\S]*\b(signer|owner|admin|authority|caller|sender)\b").unwrap();
}

pub(super) fn register(catalog: &mut Catalog) {
    catalog.insert(Lang::Move, TextDetector::new("move-call-safety", Category::CallSafety, scan_move));
    catalog.insert(Lang::Solidity, TreeDetector::new("sol-call-safety", Category::CallSafety, scan_solidity));
    catalog.insert(Lang::Vyper, TextDetector::new("vy-call-safety", Category::CallSafety, scan_vyper));
    catalog.insert(Lang::Go, TreeDetector::new("go-call-safety", Category::CallSafety, scan_go));
    catalog.insert(Lang::Rust, TreeDetector::new("rs-call-safety", Category::CallSafety, scan_rust));
}

/// One hit per call with no authorization inside the lookback.
fn report(flow: &Flow, lookback: usize, suggestion: &str) -> Vec<Hit> {
    flow.calls()
        .into_iter()
        .filter(|call| !flow.authorized_before(call, lookback))
        .map(|call| {
            Hit::new(
                call.line,
                call.col,
                format!(
                    "External call `{}` has no authorization check in the preceding {} statements",
                    call.label, lookback
                ),
            )
            .with_suggestion(suggestion)
        })
        .collect()
}

fn text_flow(unit: &SourceUnit<'_>, lines: &[ScanLine], func: &TextFn, call: &Regex, auth: &Regex) -> Flow {
    let mut flow = Flow::new();
    for (idx, ord) in func.body_lines(lines) {
        let code = &lines[idx].code;
        if let Some(m) = auth.find(code) {
            flow.push(StepKind::Auth, ord, idx + 1, unit.char_col(idx + 1, m.start()), m.as_str());
        }
        if idx == func.decl {
            continue;
        }
        if let Some(m) = call.find(code) {
            let label = m.as_str().trim_end_matches('(').trim();
            flow.push(StepKind::Call, ord, idx + 1, unit.char_col(idx + 1, m.start()), label);
        }
    }
    flow
}

fn scan_move(unit: &SourceUnit<'_>, config: &AuditConfig) -> Vec<Hit> {
    let lines = scan_lines(unit.lines(), CommentStyle::CLike);
    let mut hits = Vec::new();

    for func in move_functions(&lines) {
        let flow = text_flow(unit, &lines, &func, &MOVE_XCALL, &MOVE_AUTH);
        hits.extend(report(
            &flow,
            config.call_lookback,
            "Check the signer address or a capability before calling into another module",
        ));
    }

    hits
}

fn scan_vyper(unit: &SourceUnit<'_>, config: &AuditConfig) -> Vec<Hit> {
    let lines = scan_lines(unit.lines(), CommentStyle::Hash);
    let mut hits = Vec::new();

    for func in vyper_functions(&lines) {
        if func.header.contains("@internal") || func.header.contains("@view") || func.header.contains("@pure") {
            continue;
        }
        let flow = text_flow(unit, &lines, &func, &VY_XCALL, &VY_AUTH);
        hits.extend(report(
            &flow,
            config.call_lookback,
            "Add `assert msg.sender == self.owner` before the external call",
        ));
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
    flow.push(kind, ord, line, unit.char_col(line, pos.column), label.trim());
}

fn scan_solidity(unit: &SourceUnit<'_>, tree: &Tree, config: &AuditConfig) -> Result<Vec<Hit>, DetectError> {
    let src = unit.text();
    let root = tree.root_node();
    let mut hits = Vec::new();

    for func in find_kinds(root, &["function_definition", "fallback_receive_definition"]) {
        let keywords = sol_keywords(func, src);
        if keywords.iter().any(|k| matches!(*k, "internal" | "private" | "view" | "pure")) {
            continue;
        }
        if sol_modifiers(func, src).iter().any(|m| SOL_ACCESS_MODIFIER.is_match(m)) {
            continue;
        }
        let Some(body) = func.child_by_field_name("body") else {
            continue;
        };
        let stmts = statements(body, SOL_BLOCKS);
        let mut flow = Flow::new();

        walk(body, |node| match node.kind() {
            "call_expression" => {
                let text = node_text(node, src);
                let name = callee(node).map(|c| node_text(c, src).trim()).unwrap_or("");
                if matches!(name, "require" | "assert") && SOL_AUTH.is_match(text) {
                    push(&mut flow, unit, &stmts, StepKind::Auth, node, name);
                } else if let Some(label) = sol_external_call(node, src) {
                    push(&mut flow, unit, &stmts, StepKind::Call, node, &label);
                } else if matches!(name, "_checkOwner" | "_checkRole" | "hasRole" | "isOwner") {
                    push(&mut flow, unit, &stmts, StepKind::Auth, node, name);
                }
            }
            "if_statement" => {
                if let Some(cond) = node.child_by_field_name("condition") {
                    if SOL_AUTH.is_match(node_text(cond, src)) {
                        push(&mut flow, unit, &stmts, StepKind::Auth, node, "if");
                    }
                }
            }
            _ => {}
        });

        hits.extend(report(
            &flow,
            config.call_lookback,
            "Restrict the caller with a modifier such as onlyOwner or a require on msg.sender",
        ));
    }

    Ok(hits)
}

fn scan_go(unit: &SourceUnit<'_>, tree: &Tree, config: &AuditConfig) -> Result<Vec<Hit>, DetectError> {
    let src = unit.text();
    let root = tree.root_node();
    let mut hits = Vec::new();

    for func in find_kinds(root, GO_FUNCTIONS) {
        let Some(body) = func.child_by_field_name("body") else {
            continue;
        };
        let stmts = statements(body, GO_BLOCKS);
        let mut flow = Flow::new();

        walk(body, |node| {
            if node.kind() != "call_expression" {
                return;
            }
            let Some(target) = callee(node) else {
                return;
            };
            let path = callee_path(node_text(target, src));
            if GO_AUTH.is_match(last_segment(&path)) {
                push(&mut flow, unit, &stmts, StepKind::Auth, node, &path);
            } else if let Some(label) = go_external_call(node, src) {
                push(&mut flow, unit, &stmts, StepKind::Call, node, &label);
            }
        });

        hits.extend(report(
            &flow,
            config.call_lookback,
            "Authenticate the caller (token, session or client identity) before the outbound call",
        ));
    }

    Ok(hits)
}

/// Attributes that restrict who may invoke a Rust function.
fn rs_guarded_by_attribute(func: Node<'_>, src: &str) -> bool {
    rs_attributes(func, src).iter().any(|a| {
        a.contains("access_control") || a.contains("only_owner") || a.contains("private") || a.contains("guard")
    })
}

fn scan_rust(unit: &SourceUnit<'_>, tree: &Tree, config: &AuditConfig) -> Result<Vec<Hit>, DetectError> {
    let src = unit.text();
    let root = tree.root_node();
    let mut hits = Vec::new();

    for func in find_kinds(root, RS_FUNCTIONS) {
        if rs_guarded_by_attribute(func, src) {
            continue;
        }
        let Some(body) = func.child_by_field_name("body") else {
            continue;
        };
        let stmts = statements(body, RS_BLOCKS);
        let mut flow = Flow::new();

        walk(body, |node| match node.kind() {
            "call_expression" => {
                let Some(target) = callee(node) else {
                    return;
                };
                let path = callee_path(node_text(target, src));
                if RS_AUTH.is_match(last_segment(&path)) {
                    push(&mut flow, unit, &stmts, StepKind::Auth, node, &path);
                } else if let Some(label) = rs_external_call(node, src) {
                    push(&mut flow, unit, &stmts, StepKind::Call, node, &label);
                }
            }
            "macro_invocation" => {
                let text = node_text(node, src);
                if RS_AUTH.is_match(text) || RS_AUTH_ASSERT.is_match(text) {
                    push(&mut flow, unit, &stmts, StepKind::Auth, node, &callee_path(text));
                }
            }
            "field_expression" => {
                if node_text(node, src).ends_with(".is_signer") {
                    push(&mut flow, unit, &stmts, StepKind::Auth, node, "is_signer");
                }
            }
            _ => {}
        });

        hits.extend(report(
            &flow,
            config.call_lookback,
            "Verify the signer or caller identity before invoking another program",
        ));
    }

    Ok(hits)
}

//! Logic defects: unconditional failure, loops that never exit, swallowed
//! errors, panicking accessors, empty bodies and leftover TODO markers.

use lazy_static::lazy_static;
use regex::Regex;
use tree_sitter::{Node, Tree};

use crate::config::AuditConfig;
use crate::error::DetectError;
use crate::finding::{Category, Hit};
use crate::language::Lang;
use crate::source::text::{indented_block_end, scan_lines, CommentStyle, ScanLine};
use crate::source::tree::{ancestor, find_kinds, node_text};
use crate::source::SourceUnit;

use super::scope::{move_functions, solidity_functions, vyper_functions, TextFn};
use super::syntax::{callee, callee_path, last_segment, rs_in_test, GO_FUNCTIONS};
use super::{line_hit, node_hit, todo_hits, todo_hits_in_tree, Catalog, TextDetector, TreeDetector};

lazy_static! {
    static ref ASSERT_FALSE: Regex = Regex::new(r"\bassert!?\s*\(\s*false\s*[,)]").unwrap();
    static ref MOVE_ABORT: Regex = Regex::new(r"\babort\b\s*\(?\s*\w").unwrap();
    static ref MOVE_LOOP: Regex = Regex::new(r"\bwhile\s*\(\s*true\s*\)|\bloop\s*\{").unwrap();
    static ref MOVE_EXTRACT: Regex = Regex::new(r"\boption::(extract|destroy_some)\s*\(").unwrap();
    static ref LOOP_EXIT: Regex = Regex::new(r"\b(break|return|abort|revert|selfdestruct)\b").unwrap();
    static ref SOL_EMPTY_IF: Regex = Regex::new(r"\bif\s*\(.*\)\s*\{\s*\}").unwrap();
    static ref SOL_EMPTY_CATCH: Regex = Regex::new(r"\bcatch\b[^{]*\{\s*\}").unwrap();
    static ref SOL_LOOP: Regex = Regex::new(r"\bwhile\s*\(\s*true\s*\)|\bfor\s*\(\s*;\s*;\s*\)").unwrap();
    static ref SOL_BARE_CALL: Regex =
        Regex::new(r"^\s*[\w.\[\]()]+\.(call|delegatecall|staticcall|send)\s*[({]").unwrap();
    static ref VY_ASSERT_FALSE: Regex = Regex::new(r"\bassert\s+False\b").unwrap();
    static ref CONDITIONAL: Regex = Regex::new(r"\b(if|else|match)\b").unwrap();
}

pub(super) fn register(catalog: &mut Catalog) {
    catalog.insert(Lang::Move, TextDetector::new("move-logic-defect", Category::LogicDefect, scan_move));
    catalog.insert(Lang::Solidity, TextDetector::new("sol-logic-defect", Category::LogicDefect, scan_solidity));
    catalog.insert(Lang::Vyper, TextDetector::new("vy-logic-defect", Category::LogicDefect, scan_vyper));
    catalog.insert(Lang::Go, TreeDetector::new("go-logic-defect", Category::LogicDefect, scan_go));
    catalog.insert(Lang::Rust, TreeDetector::new("rs-logic-defect", Category::LogicDefect, scan_rust));
}

/// Whether line `idx` runs under a branch: an `if`/`else`/`match` on the
/// same line, a brace-less branch on the previous code line, or any
/// enclosing brace block opened by one.
fn conditional(lines: &[ScanLine], idx: usize) -> bool {
    if CONDITIONAL.is_match(&lines[idx].code) {
        return true;
    }
    let prev = lines[..idx].iter().rev().find(|l| !l.is_blank());
    let braceless = prev.is_some_and(|l| {
        let code = l.code.trim();
        CONDITIONAL.is_match(code) && !code.ends_with(';') && !code.ends_with('}')
    });
    if braceless {
        return true;
    }

    let mut depth = 0usize;
    for i in (0..idx).rev() {
        let code = &lines[i].code;
        for (pos, ch) in code.char_indices().rev() {
            match ch {
                '}' => depth += 1,
                '{' if depth > 0 => depth -= 1,
                '{' if opens_branch(lines, i, pos) => return true,
                _ => {}
            }
        }
    }
    false
}

/// Whether the `{` at byte `pos` of line `i` opens a branch body. A brace
/// alone on its line belongs to the previous code line.
fn opens_branch(lines: &[ScanLine], i: usize, pos: usize) -> bool {
    let head = lines[i].code[..pos].trim();
    if !head.is_empty() {
        return CONDITIONAL.is_match(head);
    }
    lines[..i]
        .iter()
        .rev()
        .find(|l| !l.is_blank())
        .is_some_and(|l| CONDITIONAL.is_match(&l.code))
}

/// Line closing the brace block that opens after byte `from` of line
/// `start`.
fn block_end_from(lines: &[ScanLine], start: usize, from: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, line) in lines.iter().enumerate().skip(start) {
        let code = if i == start { line.code.get(from..).unwrap_or("") } else { &line.code };
        for ch in code.chars() {
            match ch {
                '{' => depth += 1,
                '}' if depth > 0 => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
    }
    None
}

/// Hit for a `while (true)`-style loop whose block has no exit.
fn endless_loop(unit: &SourceUnit<'_>, lines: &[ScanLine], idx: usize, col: usize) -> Option<Hit> {
    let end = block_end_from(lines, idx, col)?;
    let exits = lines[idx..=end].iter().any(|l| LOOP_EXIT.is_match(&l.code));
    if exits {
        return None;
    }
    Some(
        line_hit(unit, idx, col, "Loop condition is always true and the body never exits")
            .with_suggestion("Add a break or return path, or bound the loop"),
    )
}

/// Whether a brace-bodied function has nothing between its braces.
fn empty_brace_body(func: &TextFn, lines: &[ScanLine]) -> bool {
    if !func.has_body {
        return false;
    }
    let code = func.body_code(lines);
    let (Some(open), Some(close)) = (code.find('{'), code.rfind('}')) else {
        return false;
    };
    open < close && code[open + 1..close].trim().is_empty()
}

fn empty_body_hit(unit: &SourceUnit<'_>, lines: &[ScanLine], func: &TextFn, keyword: &str) -> Hit {
    let col = lines[func.decl].code.find(keyword).unwrap_or(0);
    line_hit(unit, func.decl, col, format!("Function `{}` has an empty body", func.name))
        .with_suggestion("Implement the function or remove it")
}

fn scan_move(unit: &SourceUnit<'_>, _config: &AuditConfig) -> Vec<Hit> {
    let lines = scan_lines(unit.lines(), CommentStyle::CLike);
    let mut hits = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let code = &line.code;
        if let Some(m) = ASSERT_FALSE.find(code) {
            hits.push(
                line_hit(unit, idx, m.start(), "Assertion on `false` always aborts")
                    .with_suggestion("Replace with an explicit abort code or a real condition"),
            );
        }
        if let Some(m) = MOVE_ABORT.find(code) {
            if !conditional(&lines, idx) {
                hits.push(
                    line_hit(unit, idx, m.start(), "Unconditional abort makes the following code unreachable")
                        .with_suggestion("Guard the abort with a condition or remove the dead code"),
                );
            }
        }
        if let Some(m) = MOVE_LOOP.find(code) {
            hits.extend(endless_loop(unit, &lines, idx, m.start()));
        }
        if let Some(m) = MOVE_EXTRACT.find(code) {
            hits.push(
                line_hit(
                    unit,
                    idx,
                    m.start(),
                    format!("`option::{}` aborts when the option is none", &m.as_str()[8..].trim_end_matches('(').trim()),
                )
                .with_suggestion("Check option::is_some first or use option::get_with_default"),
            );
        }
    }

    for func in move_functions(&lines) {
        if empty_brace_body(&func, &lines) {
            hits.push(empty_body_hit(unit, &lines, &func, "fun"));
        }
    }

    hits.extend(todo_hits(unit, &lines));
    sort(&mut hits);
    hits
}

fn scan_solidity(unit: &SourceUnit<'_>, _config: &AuditConfig) -> Vec<Hit> {
    let lines = scan_lines(unit.lines(), CommentStyle::CLikeQuoted);
    let mut hits = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let code = &line.code;
        if let Some(m) = ASSERT_FALSE.find(code) {
            hits.push(
                line_hit(unit, idx, m.start(), "Assertion on `false` always reverts")
                    .with_suggestion("Use revert with a custom error or a real condition"),
            );
        }
        if let Some(m) = SOL_EMPTY_IF.find(code) {
            hits.push(
                line_hit(unit, idx, m.start(), "Empty `if` block; the condition has no effect")
                    .with_suggestion("Handle the condition or remove the branch"),
            );
        }
        if let Some(m) = SOL_EMPTY_CATCH.find(code) {
            hits.push(
                line_hit(unit, idx, m.start(), "Empty `catch` block silently swallows the failure")
                    .with_suggestion("Revert, emit an event or record the failure"),
            );
        }
        if let Some(m) = SOL_LOOP.find(code) {
            hits.extend(endless_loop(unit, &lines, idx, m.start()));
        }
        if let Some(caps) = SOL_BARE_CALL.captures(code) {
            let start = caps.get(0).map(|m| m.start() + indent_of(code)).unwrap_or(0);
            hits.push(
                line_hit(
                    unit,
                    idx,
                    start,
                    format!("Return value of low-level `{}` is ignored", &caps[1]),
                )
                .with_suggestion("Check the returned success flag"),
            );
        }
    }

    for func in solidity_functions(&lines) {
        if func.header.contains("virtual") || matches!(func.name.as_str(), "constructor" | "receive" | "fallback") {
            continue;
        }
        if empty_brace_body(&func, &lines) {
            hits.push(empty_body_hit(unit, &lines, &func, "function"));
        }
    }

    hits.extend(todo_hits(unit, &lines));
    sort(&mut hits);
    hits
}

fn indent_of(code: &str) -> usize {
    code.len() - code.trim_start().len()
}

fn scan_vyper(unit: &SourceUnit<'_>, _config: &AuditConfig) -> Vec<Hit> {
    let lines = scan_lines(unit.lines(), CommentStyle::Hash);
    let mut hits = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        if let Some(m) = VY_ASSERT_FALSE.find(&line.code) {
            hits.push(
                line_hit(unit, idx, m.start(), "`assert False` always reverts")
                    .with_suggestion("Use raise with a reason or a real condition"),
            );
        }
    }

    for func in vyper_functions(&lines) {
        let header_line = &lines[func.decl].code;
        let one_line_pass = header_line.trim_end().ends_with("pass")
            && header_line.contains(':');
        let body_only_pass = func.has_body
            && func
                .body_lines(&lines)
                .iter()
                .all(|(i, _)| lines[*i].code.trim() == "pass");
        if one_line_pass || body_only_pass {
            hits.push(empty_body_hit(unit, &lines, &func, "def"));
        }
        // An indented block whose only statement is `pass` under an
        // if/else inside the function swallows the branch.
        for (i, _) in func.body_lines(&lines) {
            let code = lines[i].code.trim();
            if !(code.starts_with("if ") || code.starts_with("else")) || !code.ends_with(':') {
                continue;
            }
            let end = indented_block_end(&lines, i);
            if end > i && (i + 1..=end).all(|k| lines[k].is_blank() || lines[k].code.trim() == "pass") {
                let col = indent_of(&lines[i].code);
                hits.push(
                    line_hit(unit, i, col, "Branch body is only `pass`; the condition has no effect")
                        .with_suggestion("Handle the condition or remove the branch"),
                );
            }
        }
    }

    hits.extend(todo_hits(unit, &lines));
    sort(&mut hits);
    hits
}

fn sort(hits: &mut [Hit]) {
    hits.sort_by_key(|h| (h.line, h.col));
}

/// Whether a block node holds no statements.
fn empty_block(block: Node<'_>) -> bool {
    let mut cursor = block.walk();
    let empty = block
        .named_children(&mut cursor)
        .all(|c| c.kind() == "comment" || c.kind() == "line_comment" || c.kind() == "block_comment"
            || (c.kind() == "statement_list" && c.named_child_count() == 0));
    empty
}

/// Whether anything under `node` leaves a loop or the function.
fn exits(node: Node<'_>, src: &str, calls: &[&str]) -> bool {
    let kinds = ["break_statement", "return_statement", "break_expression", "return_expression", "goto_statement"];
    if !find_kinds(node, &kinds).is_empty() {
        return true;
    }
    find_kinds(node, &["call_expression", "macro_invocation"])
        .into_iter()
        .any(|c| {
            let path = callee_path(node_text(c, src));
            calls.contains(&last_segment(&path)) || calls.contains(&path.as_str())
        })
}

/// Whether a type assertion binds a second `ok` value and so cannot panic.
fn comma_ok(assertion: Node<'_>) -> bool {
    let Some(list) = assertion.parent().filter(|p| p.kind() == "expression_list") else {
        return false;
    };
    let Some(stmt) = list.parent() else {
        return false;
    };
    match stmt.kind() {
        "short_var_declaration" | "assignment_statement" => stmt
            .child_by_field_name("left")
            .is_some_and(|left| left.named_child_count() == 2),
        "var_spec" => {
            let mut cursor = stmt.walk();
            let names = stmt.children_by_field_name("name", &mut cursor).count();
            names == 2
        }
        _ => false,
    }
}

fn scan_go(unit: &SourceUnit<'_>, tree: &Tree, _config: &AuditConfig) -> Result<Vec<Hit>, DetectError> {
    let src = unit.text();
    let root = tree.root_node();
    let mut hits = Vec::new();

    for node in find_kinds(root, &["if_statement"]) {
        let cond = node.child_by_field_name("condition").map(|c| node_text(c, src)).unwrap_or("");
        let Some(body) = node.child_by_field_name("consequence") else {
            continue;
        };
        if cond.contains("!= nil") && cond.contains("err") && empty_block(body) {
            hits.push(
                node_hit(unit, node, "Error is checked but the `if err != nil` branch is empty")
                    .with_suggestion("Return, wrap or log the error"),
            );
        }
    }

    for node in find_kinds(root, &["for_statement"]) {
        let mut cursor = node.walk();
        let has_clause = node
            .named_children(&mut cursor)
            .any(|c| c.kind() != "block" && c.kind() != "comment");
        let Some(body) = node.child_by_field_name("body") else {
            continue;
        };
        if !has_clause && !exits(body, src, &["panic", "Exit", "Fatal", "Fatalf"]) {
            hits.push(
                node_hit(unit, node, "`for {}` loop has no break or return")
                    .with_suggestion("Add an exit condition or a select on a done channel"),
            );
        }
    }

    for call in find_kinds(root, &["call_expression"]) {
        let Some(target) = callee(call) else {
            continue;
        };
        if node_text(target, src) != "panic" {
            continue;
        }
        let conditional = ancestor(
            call,
            &["if_statement", "expression_case", "default_case", "type_case", "communication_case", "func_literal"],
        )
        .is_some();
        if !conditional {
            hits.push(
                node_hit(unit, call, "Unconditional panic aborts the program")
                    .with_suggestion("Return an error instead of panicking"),
            );
        }
    }

    for node in find_kinds(root, &["type_assertion_expression"]) {
        if comma_ok(node) {
            continue;
        }
        hits.push(
            node_hit(
                unit,
                node,
                format!("Type assertion `{}` panics when the dynamic type differs", node_text(node, src)),
            )
            .with_suggestion("Use the two-value form `v, ok := x.(T)` and handle !ok"),
        );
    }

    for call in find_kinds(root, &["call_expression"]) {
        let Some(target) = callee(call) else {
            continue;
        };
        let path = callee_path(node_text(target, src));
        if last_segment(&path).starts_with("Must") {
            hits.push(
                node_hit(unit, call, format!("`{}` panics instead of returning its error", path))
                    .with_suggestion("Call the error-returning variant and handle the error"),
            );
        }
    }

    for node in find_kinds(root, &["assignment_statement", "short_var_declaration"]) {
        let (Some(left), Some(right)) = (node.child_by_field_name("left"), node.child_by_field_name("right")) else {
            continue;
        };
        let mut cursor = left.walk();
        let last_is_blank = left
            .named_children(&mut cursor)
            .last()
            .is_some_and(|n| node_text(n, src) == "_");
        let mut rcursor = right.walk();
        let call = right.named_children(&mut rcursor).find(|n| n.kind() == "call_expression");
        if let (true, Some(call)) = (last_is_blank, call) {
            let name = callee(call).map(|c| callee_path(node_text(c, src))).unwrap_or_default();
            hits.push(
                node_hit(unit, node, format!("Error returned by `{}` is discarded", name))
                    .with_suggestion("Handle the error instead of assigning it to `_`"),
            );
        }
    }

    for func in find_kinds(root, GO_FUNCTIONS) {
        let Some(body) = func.child_by_field_name("body") else {
            continue;
        };
        if empty_block(body) {
            let name = func.child_by_field_name("name").map(|n| node_text(n, src)).unwrap_or("func");
            hits.push(
                node_hit(unit, func, format!("Function `{}` has an empty body", name))
                    .with_suggestion("Implement the function or remove it"),
            );
        }
    }

    hits.extend(todo_hits_in_tree(unit, root));
    sort(&mut hits);
    Ok(hits)
}

fn scan_rust(unit: &SourceUnit<'_>, tree: &Tree, _config: &AuditConfig) -> Result<Vec<Hit>, DetectError> {
    let src = unit.text();
    let root = tree.root_node();
    let mut hits = Vec::new();

    for call in find_kinds(root, &["call_expression"]) {
        let Some(target) = callee(call) else {
            continue;
        };
        if target.kind() != "field_expression" {
            continue;
        }
        let Some(field) = target.child_by_field_name("field") else {
            continue;
        };
        let method = node_text(field, src);
        if !matches!(method, "unwrap" | "expect") || rs_in_test(call, src) {
            continue;
        }
        hits.push(
            node_hit(unit, field, format!("`.{}()` panics when the value is None or Err", method))
                .with_suggestion("Propagate with `?` or handle the None/Err case"),
        );
    }

    for mac in find_kinds(root, &["macro_invocation"]) {
        if rs_in_test(mac, src) {
            continue;
        }
        let name = mac
            .child_by_field_name("macro")
            .map(|m| node_text(m, src))
            .unwrap_or("");
        let message = match last_segment(name) {
            "todo" | "unimplemented" => format!("`{}!` leaves the code path unimplemented", last_segment(name)),
            "panic" | "unreachable" if ancestor(mac, &["if_expression", "match_arm", "else_clause", "closure_expression"]).is_none() => {
                format!("Unconditional `{}!` aborts the program", last_segment(name))
            }
            _ => continue,
        };
        hits.push(node_hit(unit, mac, message).with_suggestion("Return an error instead of panicking"));
    }

    for node in find_kinds(root, &["loop_expression"]) {
        let Some(body) = node.child_by_field_name("body") else {
            continue;
        };
        if !exits(body, src, &["panic", "exit", "process::exit", "std::process::exit"]) {
            hits.push(
                node_hit(unit, node, "`loop` has no break or return")
                    .with_suggestion("Add an exit condition"),
            );
        }
    }

    for arm in find_kinds(root, &["match_arm"]) {
        let pattern = arm.child_by_field_name("pattern").map(|p| node_text(p, src)).unwrap_or("");
        let Some(value) = arm.child_by_field_name("value") else {
            continue;
        };
        if pattern.trim_start().starts_with("Err") && value.kind() == "block" && empty_block(value) {
            hits.push(
                node_hit(unit, arm, "`Err` arm is empty; the error is silently dropped")
                    .with_suggestion("Propagate or log the error"),
            );
        }
    }

    for stmt in find_kinds(root, &["let_declaration"]) {
        let pattern = stmt.child_by_field_name("pattern").map(|p| node_text(p, src)).unwrap_or("");
        let Some(value) = stmt.child_by_field_name("value") else {
            continue;
        };
        if pattern == "_" && value.kind() == "call_expression" && !rs_in_test(stmt, src) {
            let name = callee(value).map(|c| callee_path(node_text(c, src))).unwrap_or_default();
            hits.push(
                node_hit(unit, stmt, format!("Result of `{}` is discarded with `let _`", name))
                    .with_suggestion("Handle the result or propagate it with `?`"),
            );
        }
    }

    for func in find_kinds(root, &["function_item"]) {
        if ancestor(func, &["trait_item"]).is_some() || rs_in_test(func, src) {
            continue;
        }
        let Some(body) = func.child_by_field_name("body") else {
            continue;
        };
        let returns_unit = func.child_by_field_name("return_type").is_none();
        if returns_unit && empty_block(body) {
            let name = func.child_by_field_name("name").map(|n| node_text(n, src)).unwrap_or("fn");
            if name == "main" {
                continue;
            }
            hits.push(
                node_hit(unit, func, format!("Function `{}` has an empty body", name))
                    .with_suggestion("Implement the function or remove it"),
            );
        }
    }

    hits.extend(todo_hits_in_tree(unit, root));
    sort(&mut hits);
    Ok(hits)
}

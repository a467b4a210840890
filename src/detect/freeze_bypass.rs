//! Freeze bypass: direct mutable access to protected state that skips a
//! frozen/paused guard.

use lazy_static::lazy_static;
use regex::Regex;
use tree_sitter::{Node, Tree};

use crate::config::AuditConfig;
use crate::error::DetectError;
use crate::finding::{Category, Hit};
use crate::language::Lang;
use crate::source::text::{scan_lines, CommentStyle, ScanLine};
use crate::source::tree::{find_kinds, node_text, walk};
use crate::source::SourceUnit;

use super::scope::{enclosing, move_functions, solidity_functions, vyper_functions, TextFn};
use super::syntax::{
    callee, callee_path, enclosing_fn, go_package_vars, last_segment, lhs, rs_in_test, GO_FUNCTIONS,
    RS_FUNCTIONS,
};
use super::{line_hit, node_hit, Catalog, TextDetector, TreeDetector};

lazy_static! {
    /// A frozen/paused check anywhere in code.
    static ref FROZEN_CHECK: Regex = Regex::new(
        r"(?i)\b(when_?not_?paused|when_?not_?frozen|not_?frozen|not_?paused|require_?not_?paused|assert_?not_?frozen|check_?not_?frozen|is_?frozen|is_?paused)\b|!\s*(?:self\.)?_?(?:frozen|paused)\b|\bnot\s+self\.(?:frozen|paused)\b|\b(?:frozen|paused)\s*==\s*false\b"
    )
    .unwrap();
    static ref MOVE_DIRECT: Regex = Regex::new(r"\bborrow_global_mut\s*<\s*([\w:]+)\s*>\s*\(").unwrap();
    static ref MOVE_INDIRECT: Regex =
        Regex::new(r"\bborrow_global\s*<\s*([\w:]+)\s*>\s*\(.*\)\s*\.\s*borrow_mut\s*\(").unwrap();
    static ref SOL_LOW_LEVEL: Regex = Regex::new(r"\.\s*(delegatecall|call)\s*[({]|\b(sstore)\s*\(").unwrap();
    static ref VY_LOW_LEVEL: Regex = Regex::new(r"\b(raw_call|send|selfdestruct)\s*\(").unwrap();
}

pub(super) fn register(catalog: &mut Catalog) {
    catalog.insert(Lang::Move, TextDetector::new("move-freeze-bypass", Category::FreezeBypass, scan_move));
    catalog.insert(Lang::Solidity, TextDetector::new("sol-freeze-bypass", Category::FreezeBypass, scan_solidity));
    catalog.insert(Lang::Vyper, TextDetector::new("vy-freeze-bypass", Category::FreezeBypass, scan_vyper));
    catalog.insert(Lang::Go, TreeDetector::new("go-freeze-bypass", Category::FreezeBypass, scan_go));
    catalog.insert(Lang::Rust, TreeDetector::new("rs-freeze-bypass", Category::FreezeBypass, scan_rust));
}

/// Whether the function enclosing line `idx` checks a frozen flag in its
/// header or on an earlier line.
fn text_guarded(lines: &[ScanLine], fns: &[TextFn], idx: usize) -> bool {
    let Some(func) = enclosing(fns, idx) else {
        return false;
    };
    FROZEN_CHECK.is_match(&func.header)
        || lines[func.decl..idx].iter().any(|l| FROZEN_CHECK.is_match(&l.code))
}

fn scan_move(unit: &SourceUnit<'_>, _config: &AuditConfig) -> Vec<Hit> {
    let lines = scan_lines(unit.lines(), CommentStyle::CLike);
    let fns = move_functions(&lines);
    let mut hits = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let (caps, message) = if let Some(c) = MOVE_DIRECT.captures(&line.code) {
            let msg = format!("`borrow_global_mut<{}>` mutates global state without a frozen check", &c[1]);
            (c, msg)
        } else if let Some(c) = MOVE_INDIRECT.captures(&line.code) {
            let msg = format!("`borrow_global<{}>` is mutated through borrow_mut without a frozen check", &c[1]);
            (c, msg)
        } else {
            continue;
        };
        if text_guarded(&lines, &fns, idx) {
            continue;
        }
        let col = caps.get(0).map(|m| m.start()).unwrap_or(0);
        hits.push(
            line_hit(unit, idx, col, message)
                .with_suggestion("Assert the resource is not frozen before borrowing it mutably"),
        );
    }

    hits
}

fn scan_solidity(unit: &SourceUnit<'_>, _config: &AuditConfig) -> Vec<Hit> {
    let lines = scan_lines(unit.lines(), CommentStyle::CLikeQuoted);
    let fns = solidity_functions(&lines);
    let mut hits = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let Some(caps) = SOL_LOW_LEVEL.captures(&line.code) else {
            continue;
        };
        if text_guarded(&lines, &fns, idx) {
            continue;
        }
        let kind = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()).unwrap_or("call");
        let col = caps.get(0).map(|m| m.start()).unwrap_or(0);
        hits.push(
            line_hit(
                unit,
                idx,
                col,
                format!("Low-level `{}` can bypass freeze modifiers such as whenNotPaused", kind),
            )
            .with_suggestion("Guard the function with whenNotPaused or check the frozen flag first"),
        );
    }

    hits
}

fn scan_vyper(unit: &SourceUnit<'_>, _config: &AuditConfig) -> Vec<Hit> {
    let lines = scan_lines(unit.lines(), CommentStyle::Hash);
    let fns = vyper_functions(&lines);
    let mut hits = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let Some(caps) = VY_LOW_LEVEL.captures(&line.code) else {
            continue;
        };
        if text_guarded(&lines, &fns, idx) {
            continue;
        }
        hits.push(
            line_hit(
                unit,
                idx,
                caps.get(0).map(|m| m.start()).unwrap_or(0),
                format!("`{}` moves value without checking the frozen flag", &caps[1]),
            )
            .with_suggestion("Add `assert not self.frozen` before the call"),
        );
    }

    hits
}

/// Whether the function enclosing `node` checks a frozen flag before it.
fn tree_guarded(node: Node<'_>, src: &str, kinds: &[&str]) -> bool {
    let Some(func) = enclosing_fn(node, kinds) else {
        return false;
    };
    let before = src.get(func.start_byte()..node.start_byte()).unwrap_or("");
    FROZEN_CHECK.is_match(before)
}

/// Whether the function enclosing `node` takes a lock before it.
fn go_locked(node: Node<'_>, src: &str) -> bool {
    let Some(func) = enclosing_fn(node, GO_FUNCTIONS) else {
        return false;
    };
    let mut locked = false;
    walk(func, |n| {
        if locked || n.kind() != "call_expression" || n.start_byte() >= node.start_byte() {
            return;
        }
        if let Some(target) = callee(n) {
            locked = matches!(last_segment(&callee_path(node_text(target, src))), "Lock" | "RLock");
        }
    });
    locked
}

fn scan_go(unit: &SourceUnit<'_>, tree: &Tree, _config: &AuditConfig) -> Result<Vec<Hit>, DetectError> {
    let src = unit.text();
    let root = tree.root_node();
    let package_vars = go_package_vars(root, src);
    let mut hits = Vec::new();

    for call in find_kinds(root, &["call_expression"]) {
        let Some(target) = callee(call) else {
            continue;
        };
        if last_segment(&callee_path(node_text(target, src))) == "BypassFreeze" {
            hits.push(
                node_hit(unit, call, "`BypassFreeze()` skips the freeze mechanism")
                    .with_suggestion("Remove the bypass or restrict it to an audited admin path"),
            );
        }
    }

    for sel in find_kinds(root, &["selector_expression", "qualified_type"]) {
        if node_text(sel, src) == "unsafe.Pointer" && !tree_guarded(sel, src, GO_FUNCTIONS) {
            hits.push(
                node_hit(unit, sel, "`unsafe.Pointer` writes memory outside the type system")
                    .with_suggestion("Avoid unsafe access to protected state"),
            );
        }
    }

    for node in find_kinds(root, &["assignment_statement", "inc_statement", "dec_statement"]) {
        if enclosing_fn(node, GO_FUNCTIONS).is_none() {
            continue;
        }
        let Some(target) = lhs(node) else {
            continue;
        };
        let mut cursor = target.walk();
        let first = if target.kind() == "expression_list" {
            target.named_children(&mut cursor).next()
        } else {
            Some(target)
        };
        let Some(first) = first else {
            continue;
        };
        let name = match first.kind() {
            "identifier" => node_text(first, src),
            "index_expression" | "selector_expression" => first
                .named_child(0)
                .filter(|n| n.kind() == "identifier")
                .map(|n| node_text(n, src))
                .unwrap_or(""),
            _ => "",
        };
        if !package_vars.contains(name) || go_locked(node, src) || tree_guarded(node, src, GO_FUNCTIONS) {
            continue;
        }
        hits.push(
            node_hit(unit, node, format!("Package-level variable `{}` is written without holding a lock", name))
                .with_suggestion("Protect shared state with a mutex and a frozen check"),
        );
    }

    hits.sort_by_key(|h| (h.line, h.col));
    Ok(hits)
}

fn scan_rust(unit: &SourceUnit<'_>, tree: &Tree, _config: &AuditConfig) -> Result<Vec<Hit>, DetectError> {
    let src = unit.text();
    let root = tree.root_node();
    let mut hits = Vec::new();

    let nodes = find_kinds(root, &["unsafe_block", "call_expression", "static_item"]);
    for node in nodes {
        if rs_in_test(node, src) || tree_guarded(node, src, RS_FUNCTIONS) {
            continue;
        }
        let message = match node.kind() {
            "unsafe_block" => "`unsafe` block bypasses borrow checking of protected state".to_string(),
            "static_item" => {
                let mut cursor = node.walk();
                let mutable = node.children(&mut cursor).any(|c| c.kind() == "mutable_specifier");
                if !mutable {
                    continue;
                }
                let name = node.child_by_field_name("name").map(|n| node_text(n, src)).unwrap_or("");
                format!("`static mut {}` is global state any code can change", name)
            }
            _ => {
                let Some(target) = callee(node) else {
                    continue;
                };
                let path = callee_path(node_text(target, src));
                match last_segment(&path) {
                    "get_unchecked_mut" => "`get_unchecked_mut()` skips bounds and freeze checks".to_string(),
                    "transmute" => format!("`{}` reinterprets memory and can forge protected state", path),
                    _ => continue,
                }
            }
        };
        hits.push(
            node_hit(unit, node, message).with_suggestion("Use safe accessors that honor the freeze flag"),
        );
    }

    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Grammar;

    fn text(scan: fn(&SourceUnit<'_>, &AuditConfig) -> Vec<Hit>, src: &str) -> Vec<Hit> {
        let unit = SourceUnit::new(src, None);
        scan(&unit, &AuditConfig::default())
    }

    fn tree(
        scan: fn(&SourceUnit<'_>, &Tree, &AuditConfig) -> Result<Vec<Hit>, DetectError>,
        grammar: Grammar,
        src: &str,
    ) -> Vec<Hit> {
        let unit = SourceUnit::new(src, Some(grammar));
        let t = unit.tree().unwrap();
        scan(&unit, t, &AuditConfig::default()).unwrap()
    }

    fn lines_of(hits: &[Hit]) -> Vec<usize> {
        hits.iter().map(|h| h.line).collect()
    }

    #[test]
    fn test_move_borrow_global_mut() {
        let src = "module 0x1::bank {\n    public fun take(a: address) acquires Store {\n        let s = borrow_global_mut<Store>(a);\n        s.v = 0;\n    }\n    public fun take_checked(a: address) acquires Store {\n        assert!(!is_frozen(a), 1);\n        let s = borrow_global_mut<Store>(a);\n    }\n}\n";
        let hits = text(scan_move, src);
        assert_eq!(lines_of(&hits), vec![3]);
        assert_eq!(hits[0].col, Some(17));
        assert!(hits[0].message.contains("borrow_global_mut<Store>"));
    }

    #[test]
    fn test_solidity_delegatecall_and_pause_modifier() {
        let src = r#"contract P {
    function exec(address t, bytes calldata d) external {
        t.delegatecall(d);
    }
    function execPaused(address t, bytes calldata d) external whenNotPaused {
        t.delegatecall(d);
    }
    function raw() external {
        assembly { sstore(0, 1) }
    }
}
"#;
        let hits = text(scan_solidity, src);
        assert_eq!(lines_of(&hits), vec![3, 9]);
        assert!(hits[1].message.contains("sstore"));
    }

    #[test]
    fn test_vyper_raw_call_needs_frozen_assert() {
        let src = "@external\ndef pay(to: address):\n    send(to, 1)\n\n@external\ndef pay_checked(to: address):\n    assert not self.frozen\n    send(to, 1)\n";
        assert_eq!(lines_of(&text(scan_vyper, src)), vec![3]);
    }

    #[test]
    fn test_go_bypass_and_package_writes() {
        let src = "package main\n\nimport \"sync\"\n\nvar balance int\nvar mu sync.Mutex\n\nfunc a() {\n\tBypassFreeze()\n\tbalance = 0\n}\n\nfunc b() {\n\tmu.Lock()\n\tdefer mu.Unlock()\n\tbalance++\n}\n";
        let hits = tree(scan_go, Grammar::Go, src);
        assert_eq!(lines_of(&hits), vec![9, 10]);
    }

    #[test]
    fn test_rust_unsafe_and_static_mut() {
        let src = r#"static mut COUNTER: u64 = 0;
static LIMIT: u64 = 9;

fn bump(v: &mut [u64]) {
    unsafe {
        let x = v.get_unchecked_mut(0);
        *x += 1;
    }
}
"#;
        let hits = tree(scan_rust, Grammar::Rust, src);
        assert_eq!(lines_of(&hits), vec![1, 5, 6]);
    }

    #[test]
    fn test_clean_sources() {
        assert!(tree(scan_rust, Grammar::Rust, "fn f(v: &[u8]) -> u8 { v[0] }").is_empty());
        assert!(text(scan_move, "module 0x1::m { fun f(): u64 { 1 } }").is_empty());
    }
}

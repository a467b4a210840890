//! Grammar-specific node helpers for the tree detectors.

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;
use tree_sitter::Node;

use crate::source::tree::{ancestor, find_kinds, node_text};

lazy_static! {
    static ref ROOT_IDENT: Regex = Regex::new(r"^\s*\*?\s*([A-Za-z_]\w*)").unwrap();
    static ref PRAGMA: Regex = Regex::new(r"pragma\s+solidity\s+([^;]+);").unwrap();
    static ref VERSION: Regex = Regex::new(r"(>=|<=|>|<|\^|~|=)?\s*(\d+)\.(\d+)(?:\.(\d+))?").unwrap();
}

pub const STRING_KINDS: &[&str] = &[
    "string",
    "string_literal",
    "interpreted_string_literal",
    "raw_string_literal",
    "hex_string_literal",
    "unicode_string_literal",
];

/// Leading identifier of an lvalue or callee text (`self.a.b` → `self`).
pub fn root_ident(text: &str) -> &str {
    ROOT_IDENT
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or("")
}

/// Collapse whitespace and drop call options / generics after the callee
/// path (`a.call{value: v}` → `a.call`).
pub fn callee_path(text: &str) -> String {
    let cut = text.find(&['{', '(', '<', '!'][..]).unwrap_or(text.len());
    text[..cut].chars().filter(|c| !c.is_whitespace()).collect()
}

/// Last `.` or `::` segment of a callee path.
pub fn last_segment(path: &str) -> &str {
    path.rsplit(&['.', ':'][..]).next().unwrap_or(path)
}

/// Strip Solidity `expression` and parenthesis wrappers.
pub fn unwrap_expr(mut node: Node<'_>) -> Node<'_> {
    while matches!(node.kind(), "expression" | "parenthesized_expression")
        && node.named_child_count() == 1
    {
        match node.named_child(0) {
            Some(inner) => node = inner,
            None => break,
        }
    }
    node
}

/// Callee of a call node, by `function` field or first named child.
pub fn callee<'t>(call: Node<'t>) -> Option<Node<'t>> {
    call.child_by_field_name("function")
        .or_else(|| call.named_child(0))
        .map(unwrap_expr)
}

/// Left-hand side of an assignment-like node.
pub fn lhs<'t>(node: Node<'t>) -> Option<Node<'t>> {
    node.child_by_field_name("left")
        .or_else(|| node.named_child(0))
        .map(unwrap_expr)
}

/// Right-hand side of a binary or assignment-like node.
pub fn rhs<'t>(node: Node<'t>) -> Option<Node<'t>> {
    node.child_by_field_name("right")
        .or_else(|| {
            let n = node.named_child_count();
            if n >= 2 {
                node.named_child(n - 1)
            } else {
                None
            }
        })
        .map(unwrap_expr)
}

pub fn is_string_literal(node: Node<'_>) -> bool {
    STRING_KINDS.contains(&unwrap_expr(node).kind())
}

// --- Solidity -------------------------------------------------------------

pub const SOL_FUNCTIONS: &[&str] = &[
    "function_definition",
    "constructor_definition",
    "fallback_receive_definition",
    "modifier_definition",
];

pub const SOL_BLOCKS: &[&str] = &["function_body", "block_statement", "statement"];

/// Name of a Solidity function, or its kind for unnamed ones.
pub fn sol_function_name<'s>(func: Node<'_>, source: &'s str) -> &'s str {
    match func.child_by_field_name("name") {
        Some(n) => node_text(n, source),
        None => match func.kind() {
            "constructor_definition" => "constructor",
            "modifier_definition" => "modifier",
            _ if func.child(0).is_some_and(|c| c.kind() == "receive") => "receive",
            _ => "fallback",
        },
    }
}

/// Names of the modifiers invoked on a function.
pub fn sol_modifiers<'s>(func: Node<'_>, source: &'s str) -> Vec<&'s str> {
    let mut names = Vec::new();
    let mut cursor = func.walk();
    for child in func.children(&mut cursor) {
        if child.kind() == "modifier_invocation" {
            let text = node_text(child, source);
            let end = text.find('(').unwrap_or(text.len());
            names.push(text[..end].trim());
        }
    }
    names
}

/// Visibility and mutability keywords of a function header.
pub fn sol_keywords<'s>(func: Node<'_>, source: &'s str) -> Vec<&'s str> {
    let mut words = Vec::new();
    let mut cursor = func.walk();
    for child in func.children(&mut cursor) {
        match child.kind() {
            "visibility" | "state_mutability" => words.push(node_text(child, source).trim()),
            "public" | "external" | "internal" | "private" | "view" | "pure" | "payable" => {
                words.push(child.kind())
            }
            _ => {}
        }
    }
    words
}

/// Receivers that are language built-ins rather than other contracts.
const SOL_BUILTIN_ROOTS: &[&str] = &[
    "abi", "block", "tx", "super", "type", "string", "bytes", "this", "Math", "SafeMath", "Strings",
];

/// Members that compute values or touch local storage.
const SOL_LOCAL_MEMBERS: &[&str] = &[
    "add", "sub", "mul", "div", "mod", "push", "pop", "length", "encode", "encodePacked",
    "encodeWithSelector", "encodeWithSignature", "encodeCall", "decode", "concat", "max", "min",
    "toString", "isContract", "recover", "toEthSignedMessageHash",
];

/// Label of a call that leaves the contract (`token.transfer`,
/// `msg.sender.call`), or `None` for internal and built-in calls.
pub fn sol_external_call(call: Node<'_>, source: &str) -> Option<String> {
    let target = callee(call)?;
    // Call options (`a.call{value: v}`) wrap the member access.
    if !matches!(target.kind(), "member_expression" | "struct_expression") {
        return None;
    }
    let text = node_text(target, source);
    let text = &text[..text.find('{').unwrap_or(text.len())];
    let path: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let (object, member) = path.rsplit_once('.')?;
    let root = root_ident(object);

    if root.is_empty() || SOL_BUILTIN_ROOTS.contains(&root) || SOL_LOCAL_MEMBERS.contains(&member) {
        return None;
    }
    Some(path)
}

/// Declared contract state variables.
pub fn sol_state_vars(root: Node<'_>, source: &str) -> HashSet<String> {
    find_kinds(root, &["state_variable_declaration"])
        .into_iter()
        .filter_map(|decl| decl.child_by_field_name("name"))
        .map(|n| node_text(n, source).to_string())
        .collect()
}

/// Whether a node sits inside an `unchecked { }` block.
pub fn sol_in_unchecked(node: Node<'_>) -> bool {
    let mut current = node.parent();
    while let Some(n) = current {
        if n.kind() == "block_statement" {
            let mut cursor = n.walk();
            let unchecked = n.children(&mut cursor).any(|c| c.kind() == "unchecked");
            if unchecked {
                return true;
            }
        }
        current = n.parent();
    }
    false
}

/// Whether the `pragma solidity` constraint only admits compilers with
/// built-in overflow checks (0.8 and later). Missing pragmas admit any
/// compiler.
pub fn sol_checked_by_compiler(source: &str) -> bool {
    let Some(caps) = PRAGMA.captures(source) else {
        return false;
    };
    let constraint = &caps[1];
    if constraint.contains("||") {
        return constraint
            .split("||")
            .all(|alt| lowest_admitted(alt).is_some_and(|v| v >= (0, 8)));
    }
    lowest_admitted(constraint).is_some_and(|v| v >= (0, 8))
}

/// Lowest (major, minor) a constraint such as `>=0.7.0 <0.9.0` admits.
fn lowest_admitted(constraint: &str) -> Option<(u32, u32)> {
    let mut lowest = None;
    for caps in VERSION.captures_iter(constraint) {
        let op = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        if op == "<" || op == "<=" {
            continue;
        }
        let major = caps[2].parse::<u32>().ok()?;
        let minor = caps[3].parse::<u32>().ok()?;
        let v = (major, minor);
        lowest = Some(match lowest {
            Some(l) if l >= v => l,
            _ => v,
        });
    }
    lowest
}

// --- Go -------------------------------------------------------------------

pub const GO_FUNCTIONS: &[&str] = &["function_declaration", "method_declaration"];

pub const GO_BLOCKS: &[&str] = &["block", "statement_list"];

/// Selector method names that reach another service or chain.
const GO_EXTERNAL: &[&str] = &[
    "Get", "Post", "Do", "Head", "PostForm", "Call", "CallContract", "Invoke", "InvokeChaincode",
    "Send", "SendTransaction", "Transfer", "DoRequest",
];

/// Callee path of a Go call that leaves the process (`client.Do`,
/// `http.Get`, `stub.InvokeChaincode`).
pub fn go_external_call(call: Node<'_>, source: &str) -> Option<String> {
    let target = callee(call)?;
    if target.kind() != "selector_expression" {
        return None;
    }
    let path = callee_path(node_text(target, source));
    if GO_EXTERNAL.contains(&last_segment(&path)) || path.starts_with("http.") {
        Some(path)
    } else {
        None
    }
}

/// Names bound by top-level `var` declarations.
pub fn go_package_vars(root: Node<'_>, source: &str) -> HashSet<String> {
    let mut names = HashSet::new();
    let mut cursor = root.walk();
    for decl in root.children(&mut cursor) {
        if decl.kind() != "var_declaration" {
            continue;
        }
        for spec in find_kinds(decl, &["var_spec"]) {
            let mut spec_cursor = spec.walk();
            for name in spec.children_by_field_name("name", &mut spec_cursor) {
                names.insert(node_text(name, source).to_string());
            }
        }
    }
    names
}

// --- Rust -----------------------------------------------------------------

pub const RS_FUNCTIONS: &[&str] = &["function_item"];

pub const RS_BLOCKS: &[&str] = &["block"];

/// Method and function names of cross-program and cross-contract calls.
const RS_EXTERNAL: &[&str] = &[
    "invoke", "invoke_signed", "call", "send", "transfer", "call_contract", "execute_contract",
    "cross_contract_call", "external_call",
];

/// Callee path of a Rust call into another program or contract.
pub fn rs_external_call(call: Node<'_>, source: &str) -> Option<String> {
    let target = callee(call)?;
    let path = callee_path(node_text(target, source));
    if RS_EXTERNAL.contains(&last_segment(&path)) {
        Some(path)
    } else {
        None
    }
}

/// Attribute items directly above an item, nearest first.
pub fn rs_attributes<'s>(item: Node<'_>, source: &'s str) -> Vec<&'s str> {
    let mut attrs = Vec::new();
    let mut current = item.prev_sibling();
    while let Some(n) = current {
        match n.kind() {
            "attribute_item" => attrs.push(node_text(n, source)),
            "line_comment" | "block_comment" => {}
            _ => break,
        }
        current = n.prev_sibling();
    }
    attrs
}

/// Whether a node lives in a `#[test]` function or a `#[cfg(test)]` module.
pub fn rs_in_test(node: Node<'_>, source: &str) -> bool {
    let mut current = ancestor(node, &["function_item", "mod_item"]);
    while let Some(item) = current {
        let attrs = rs_attributes(item, source);
        if attrs.iter().any(|a| {
            a.starts_with("#[test") || a.contains("cfg(test)") || a.ends_with("::test]")
        }) {
            return true;
        }
        current = ancestor(item, &["function_item", "mod_item"]);
    }
    false
}

/// Nearest enclosing function of any kind in `kinds`.
pub fn enclosing_fn<'t>(node: Node<'t>, kinds: &[&str]) -> Option<Node<'t>> {
    ancestor(node, kinds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_ident() {
        assert_eq!(root_ident("self.balances[x]"), "self");
        assert_eq!(root_ident("*counter"), "counter");
        assert_eq!(root_ident("balances[msg.sender]"), "balances");
        assert_eq!(root_ident("(a, b)"), "");
    }

    #[test]
    fn test_callee_path() {
        assert_eq!(callee_path("msg.sender.call{value: amount}"), "msg.sender.call");
        assert_eq!(callee_path("token\n  .transfer"), "token.transfer");
        assert_eq!(last_segment("a::b::invoke"), "invoke");
        assert_eq!(last_segment("client.Do"), "Do");
    }

    #[test]
    fn test_pragma_versions() {
        assert!(sol_checked_by_compiler("pragma solidity ^0.8.0;"));
        assert!(sol_checked_by_compiler("pragma solidity 0.8.19;"));
        assert!(sol_checked_by_compiler("pragma solidity >=0.8.0 <0.9.0;"));
        assert!(!sol_checked_by_compiler("pragma solidity >=0.7.0 <0.9.0;"));
        assert!(!sol_checked_by_compiler("pragma solidity ^0.6.12;"));
        assert!(!sol_checked_by_compiler("contract C {}"));
    }
}

//! Access control: publicly invocable entry points with no authorization.

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;
use tree_sitter::{Node, Tree};

use crate::config::AuditConfig;
use crate::error::DetectError;
use crate::finding::{Category, Hit};
use crate::language::Lang;
use crate::source::text::{scan_lines, CommentStyle};
use crate::source::tree::{find_kinds, node_text, walk};
use crate::source::SourceUnit;

use super::call_safety::{GO_AUTH, MOVE_AUTH, RS_AUTH, SOL_ACCESS_MODIFIER, SOL_AUTH};
use super::scope::{move_functions, vyper_functions};
use super::syntax::{
    callee, callee_path, last_segment, lhs, root_ident, rs_attributes, sol_external_call,
    sol_function_name, sol_keywords, sol_modifiers, sol_state_vars, GO_FUNCTIONS,
};
use super::{line_hit, node_hit, Catalog, TextDetector, TreeDetector};

lazy_static! {
    static ref MOVE_ENTRY: Regex = Regex::new(r"\bentry\b").unwrap();
    /// Capability objects passed by reference gate Sui-style entry points.
    static ref MOVE_CAP: Regex = Regex::new(r"&\s*(?:mut\s+)?\w*Cap\b").unwrap();
    static ref SOL_CALLER: Regex = Regex::new(r"\bmsg\.sender\b|\b_msgSender\s*\(").unwrap();
    static ref GO_HANDLER: Regex = Regex::new(
        r"http\.ResponseWriter|\*gin\.Context|echo\.Context|\*fiber\.Ctx|shim\.ChaincodeStubInterface|contractapi\.TransactionContextInterface"
    )
    .unwrap();
    static ref GO_AUTH_TEXT: Regex = Regex::new(
        r"(?i)\b(authenticate|authorize|authmiddleware|checkauth|verifytoken|validatetoken|jwt\.parse|getclientidentity|assertattributevalue|getmspid|isadmin)\w*\s*\("
    )
    .unwrap();
    static ref RS_ROUTE: Regex =
        Regex::new(r"^#\[\s*(?:[\w:]*::)?(get|post|put|delete|patch|route|handler)\b").unwrap();
    static ref RS_CONTEXT: Regex = Regex::new(r"\bContext\s*<\s*(?:'\w+\s*,\s*)?(\w+)").unwrap();
    static ref RS_ACCOUNT_AUTH: Regex = Regex::new(r"\bSigner\s*<|\bhas_one\b|\bconstraint\s*=").unwrap();
    static ref RS_BODY_AUTH: Regex =
        Regex::new(r"\bguard::|\bis_admin\s*\(|\bis_signer\b|\bclaims\b|\bBearer\b|\bAuth\w*\s*[<(:]").unwrap();
}

pub(super) fn register(catalog: &mut Catalog) {
    catalog.insert(Lang::Move, TextDetector::new("move-access-control", Category::AccessControl, scan_move));
    catalog.insert(
        Lang::Solidity,
        TreeDetector::new("sol-access-control", Category::AccessControl, scan_solidity),
    );
    catalog.insert(Lang::Vyper, TextDetector::new("vy-access-control", Category::AccessControl, scan_vyper));
    catalog.insert(Lang::Go, TreeDetector::new("go-access-control", Category::AccessControl, scan_go));
    catalog.insert(Lang::Rust, TreeDetector::new("rs-access-control", Category::AccessControl, scan_rust));
}

fn scan_move(unit: &SourceUnit<'_>, _config: &AuditConfig) -> Vec<Hit> {
    let lines = scan_lines(unit.lines(), CommentStyle::CLike);
    let mut hits = Vec::new();

    for func in move_functions(&lines) {
        if !func.has_body || !MOVE_ENTRY.is_match(&func.header) {
            continue;
        }
        if MOVE_CAP.is_match(&func.header) || MOVE_AUTH.is_match(&func.body_code(&lines)) {
            continue;
        }
        let col = lines[func.decl].code.find("fun").unwrap_or(0);
        hits.push(
            line_hit(
                unit,
                func.decl,
                col,
                format!("Entry function `{}` does not verify its signer or capability", func.name),
            )
            .with_suggestion("Assert the signer address or require an admin capability"),
        );
    }

    hits
}

/// Whether a function body writes a state variable or calls out.
fn sol_moves_state(body: Node<'_>, state_vars: &HashSet<String>, src: &str) -> bool {
    let writes = find_kinds(
        body,
        &["assignment_expression", "augmented_assignment_expression", "update_expression"],
    )
    .into_iter()
    .filter_map(lhs)
    .any(|target| state_vars.contains(root_ident(node_text(target, src))));
    writes
        || find_kinds(body, &["call_expression"])
            .into_iter()
            .any(|call| sol_external_call(call, src).is_some())
}

fn scan_solidity(unit: &SourceUnit<'_>, tree: &Tree, _config: &AuditConfig) -> Result<Vec<Hit>, DetectError> {
    let src = unit.text();
    let root = tree.root_node();
    let state_vars = sol_state_vars(root, src);
    let mut hits = Vec::new();

    for func in find_kinds(root, &["function_definition", "fallback_receive_definition"]) {
        let Some(body) = func.child_by_field_name("body") else {
            continue;
        };
        // Plain ether-accepting receive/fallback hooks are expected.
        if func.kind() == "fallback_receive_definition" && !sol_moves_state(body, &state_vars, src) {
            continue;
        }
        let keywords = sol_keywords(func, src);
        if keywords.iter().any(|k| matches!(*k, "internal" | "private" | "view" | "pure")) {
            continue;
        }
        if sol_modifiers(func, src).iter().any(|m| SOL_ACCESS_MODIFIER.is_match(m)) {
            continue;
        }
        let body_text = node_text(body, src);
        // Functions that act on the caller's own state bind to msg.sender.
        if SOL_AUTH.is_match(body_text) || SOL_CALLER.is_match(body_text) {
            continue;
        }
        let visibility = keywords
            .iter()
            .find(|k| matches!(**k, "public" | "external"))
            .copied()
            .unwrap_or("public");
        hits.push(
            node_hit(
                unit,
                func,
                format!(
                    "Function `{}` is {} and state-changing but has no access control",
                    sol_function_name(func, src),
                    visibility
                ),
            )
            .with_suggestion("Add an onlyOwner/onlyRole modifier or require(msg.sender == owner)"),
        );
    }

    Ok(hits)
}

fn scan_vyper(unit: &SourceUnit<'_>, _config: &AuditConfig) -> Vec<Hit> {
    let lines = scan_lines(unit.lines(), CommentStyle::Hash);
    let mut hits = Vec::new();

    for func in vyper_functions(&lines) {
        let header = &func.header;
        if !header.contains("@external") || header.contains("@view") || header.contains("@pure") {
            continue;
        }
        if func.name == "__init__" || func.body_code(&lines).contains("msg.sender") {
            continue;
        }
        let col = lines[func.decl].code.find("def").unwrap_or(0);
        hits.push(
            line_hit(
                unit,
                func.decl,
                col,
                format!("External function `{}` never checks msg.sender", func.name),
            )
            .with_suggestion("Add `assert msg.sender == self.owner` at the top of the function"),
        );
    }

    hits
}

/// Whether a Go function body calls an authentication helper.
fn go_body_authenticates(body: Node<'_>, src: &str) -> bool {
    if GO_AUTH_TEXT.is_match(node_text(body, src)) {
        return true;
    }
    let mut found = false;
    walk(body, |node| {
        if found || node.kind() != "call_expression" {
            return;
        }
        if let Some(target) = callee(node) {
            found = GO_AUTH.is_match(last_segment(&callee_path(node_text(target, src))));
        }
    });
    found
}

fn scan_go(unit: &SourceUnit<'_>, tree: &Tree, _config: &AuditConfig) -> Result<Vec<Hit>, DetectError> {
    let src = unit.text();
    let root = tree.root_node();
    let mut hits = Vec::new();

    for func in find_kinds(root, GO_FUNCTIONS) {
        let Some(params) = func.child_by_field_name("parameters") else {
            continue;
        };
        if !GO_HANDLER.is_match(node_text(params, src)) {
            continue;
        }
        let Some(body) = func.child_by_field_name("body") else {
            continue;
        };
        if go_body_authenticates(body, src) {
            continue;
        }
        let name_node = func.child_by_field_name("name").unwrap_or(func);
        hits.push(
            node_hit(
                unit,
                name_node,
                format!("Handler `{}` performs no authentication", node_text(name_node, src)),
            )
            .with_suggestion("Authenticate the request or wrap the handler in auth middleware"),
        );
    }

    Ok(hits)
}

/// Whether the Anchor accounts struct named `name` constrains a signer.
fn rs_accounts_constrained(root: Node<'_>, src: &str, name: &str) -> bool {
    find_kinds(root, &["struct_item"]).into_iter().any(|s| {
        s.child_by_field_name("name")
            .is_some_and(|n| node_text(n, src) == name)
            && RS_ACCOUNT_AUTH.is_match(node_text(s, src))
    })
}

fn scan_rust(unit: &SourceUnit<'_>, tree: &Tree, _config: &AuditConfig) -> Result<Vec<Hit>, DetectError> {
    let src = unit.text();
    let root = tree.root_node();
    let mut hits = Vec::new();

    for func in find_kinds(root, &["function_item"]) {
        let attrs = rs_attributes(func, src);
        let params = func
            .child_by_field_name("parameters")
            .map(|p| node_text(p, src))
            .unwrap_or("");
        let route = attrs.iter().any(|a| RS_ROUTE.is_match(a));
        let ink_message = attrs.iter().any(|a| a.contains("ink(message")) && params.contains("&mut self");
        let context = RS_CONTEXT.captures(params).map(|c| c[1].to_string());
        if !route && !ink_message && context.is_none() {
            continue;
        }

        if attrs.iter().any(|a| a.contains("access_control") || a.contains("guard")) {
            continue;
        }
        let Some(body) = func.child_by_field_name("body") else {
            continue;
        };
        let body_text = node_text(body, src);
        if RS_AUTH.is_match(body_text) || RS_BODY_AUTH.is_match(body_text) || RS_BODY_AUTH.is_match(params) {
            continue;
        }
        if let Some(accounts) = &context {
            if rs_accounts_constrained(root, src, accounts) {
                continue;
            }
        }

        let name_node = func.child_by_field_name("name").unwrap_or(func);
        hits.push(
            node_hit(
                unit,
                name_node,
                format!("Entry point `{}` has no authorization check", node_text(name_node, src)),
            )
            .with_suggestion("Check the caller's identity or constrain a Signer account"),
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

    #[test]
    fn test_move_entry_without_signer_check() {
        let src = "module 0x1::m {\n    public entry fun mint(s: &signer, amt: u64) {\n        coin::mint(amt);\n    }\n    public fun view_only(): u64 { 1 }\n    public entry fun admin_mint(_cap: &AdminCap, amt: u64) {\n        coin::mint(amt);\n    }\n}\n";
        let hits = text(scan_move, src);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].line, 2);
        assert_eq!(hits[0].col, Some(18));
        assert!(hits[0].message.contains("mint"));
    }

    #[test]
    fn test_move_signer_assert_suppresses() {
        let src = "module 0x1::m {\n    public entry fun mint(s: &signer) {\n        assert!(signer::address_of(s) == @owner, 0);\n    }\n}\n";
        assert!(text(scan_move, src).is_empty());
    }

    #[test]
    fn test_solidity_receive_and_fallback() {
        let src = r#"contract A {
    uint256 total;
    IVault vault;
    receive() external payable {
        total += msg.value;
    }
    fallback() external payable {
        vault.deposit(msg.value);
    }
}
contract B {
    event Ping();
    receive() external payable {}
    fallback() external payable {
        emit Ping();
    }
}
contract C {
    uint256 total;
    receive() external payable onlyOwner {
        total += 1;
    }
}
"#;
        let hits = tree(scan_solidity, Grammar::Solidity, src);
        let lines: Vec<usize> = hits.iter().map(|h| h.line).collect();
        assert_eq!(lines, vec![4, 7]);
        assert!(hits[0].message.contains("`receive`"));
        assert!(hits[1].message.contains("`fallback`"));
        assert!(hits[1].message.contains("external"));
    }

    #[test]
    fn test_solidity_public_mutating_function() {
        let src = r#"contract C {
    uint256 fee;
    function setFee(uint256 f) external {
        fee = f;
    }
    function getFee() external view returns (uint256) {
        return fee;
    }
    function setFeeOwner(uint256 f) external onlyOwner {
        fee = f;
    }
    function _set(uint256 f) internal {
        fee = f;
    }
}
"#;
        let hits = tree(scan_solidity, Grammar::Solidity, src);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].line, 3);
        assert!(hits[0].message.contains("setFee"));
        assert!(hits[0].message.contains("external"));
    }

    #[test]
    fn test_vyper_external_without_sender_check() {
        let src = "@external\ndef set_fee(f: uint256):\n    self.fee = f\n\n@external\n@view\ndef fee() -> uint256:\n    return self.fee\n\n@external\ndef __init__():\n    self.owner = msg.sender\n";
        let hits = text(scan_vyper, src);
        assert_eq!(hits.len(), 1);
        assert_eq!((hits[0].line, hits[0].col), (2, Some(1)));
    }

    #[test]
    fn test_go_handler_without_auth() {
        let src = "package main\n\nimport \"net/http\"\n\nfunc Withdraw(w http.ResponseWriter, r *http.Request) {\n\tw.Write(nil)\n}\n\nfunc Admin(w http.ResponseWriter, r *http.Request) {\n\tif !authenticate(r) {\n\t\treturn\n\t}\n}\n\nfunc helper(x int) {}\n";
        let hits = tree(scan_go, Grammar::Go, src);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].line, 5);
        assert!(hits[0].message.contains("Withdraw"));
    }

    #[test]
    fn test_rust_routes_and_anchor_contexts() {
        let src = r#"#[post("/withdraw")]
async fn withdraw(body: Json<Req>) -> HttpResponse {
    HttpResponse::Ok().finish()
}

pub fn set_admin(ctx: Context<SetAdmin>, admin: Pubkey) -> Result<()> {
    ctx.accounts.config.admin = admin;
    Ok(())
}

pub fn update(ctx: Context<Update>, v: u64) -> Result<()> {
    ctx.accounts.config.v = v;
    Ok(())
}

#[derive(Accounts)]
pub struct Update<'info> {
    #[account(mut, has_one = authority)]
    pub config: Account<'info, Config>,
    pub authority: Signer<'info>,
}

fn helper() {}
"#;
        let hits = tree(scan_rust, Grammar::Rust, src);
        let lines: Vec<usize> = hits.iter().map(|h| h.line).collect();
        assert_eq!(lines, vec![2, 6]);
    }
}

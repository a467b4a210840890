//! Randomness misuse: chain or clock state used as a random source,
//! non-cryptographic generators and predictable seeds.

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;
use tree_sitter::{Node, Tree};

use crate::config::AuditConfig;
use crate::error::DetectError;
use crate::finding::{Category, Hit};
use crate::language::Lang;
use crate::source::text::{scan_lines, CommentStyle, ScanLine};
use crate::source::tree::{find_kinds, node_text, operator, query_captures};
use crate::source::{Grammar, SourceUnit};

use super::scope::{move_functions, solidity_functions, vyper_functions, TextFn};
use super::syntax::{callee, callee_path, last_segment, rs_in_test};
use super::{line_hit, node_hit, Catalog, TextDetector, TreeDetector};

lazy_static! {
    static ref RAND_NAME: Regex =
        Regex::new(r"(?i)(rand|random|seed|lottery|winner|lucky|dice|roll|shuffle|entropy)").unwrap();
    static ref TRAILING_IDENT: Regex = Regex::new(r"([A-Za-z_]\w*)\s*$").unwrap();

    static ref MOVE_STRONG: Regex = Regex::new(
        r"\btimestamp::now_(?:seconds|microseconds)\s*\(|\bblock::get_current_block_height\s*\(|\btx_context::epoch(?:_timestamp_ms)?\s*\(|\bclock::timestamp_ms\s*\(|\bTransactionContext::block_timestamp\b|\btransaction_context::get_transaction_hash\s*\("
    )
    .unwrap();
    static ref MOVE_WEAK: Regex = Regex::new(r"\bsigner::address_of\s*\(|\btx_context::sender\s*\(").unwrap();
    static ref MOVE_MIXER: Regex = Regex::new(
        r"\bhash::sha[23]_256\s*\(|\baptos_hash::\w+\s*\(|\bkeccak256\s*\(|\bblake2b\w*\s*\(|\bhash\s*\(|%"
    )
    .unwrap();
    static ref MOVE_TX_RANDOM: Regex = Regex::new(r"\bTransactionContext::random\s*\(").unwrap();

    static ref SOL_STRONG: Regex = Regex::new(
        r"\bblock\.(?:timestamp|number|difficulty|prevrandao|coinbase|basefee|gaslimit)\b|\bblockhash\s*\(|\bnow\b"
    )
    .unwrap();
    static ref EVM_WEAK: Regex = Regex::new(r"\bmsg\.sender\b|\btx\.origin\b").unwrap();
    static ref EVM_MIXER: Regex =
        Regex::new(r"\bkeccak256\s*\(|\bsha256\s*\(|\bsha3\s*\(|\bripemd160\s*\(|%").unwrap();
    static ref VY_STRONG: Regex = Regex::new(
        r"\bblock\.(?:timestamp|number|difficulty|prevrandao|coinbase|basefee)\b|\bblockhash\s*\("
    )
    .unwrap();

    static ref GO_SOURCE: Regex =
        Regex::new(r"\btime\.Now\(\)|\bGetTxTimestamp\(\)|\bGetTxID\(\)|\.Header\(\)\.(?:Time|Number)\b").unwrap();
    static ref GO_HASH: Regex =
        Regex::new(r"^(?:sha256|sha512|sha3|md5|sha1|crc32|fnv|crypto)\.\w+$").unwrap();

    static ref RS_SOURCE: Regex = Regex::new(
        r"\bClock::get\s*\(|\bclock\.(?:unix_timestamp|slot|epoch)\b|\benv::block_(?:timestamp|height|timestamp_ms)\s*\(|\benv::random_seed\s*\(|\bSystemTime::now\s*\(|\bInstant::now\s*\(|\bblock_timestamp\s*\("
    )
    .unwrap();
    static ref RS_HASH: Regex =
        Regex::new(r"^(?:hash|hashv|keccak256|sha256|digest|keccak|blake3|hash_message)$").unwrap();
}

pub(super) fn register(catalog: &mut Catalog) {
    catalog.insert(Lang::Move, TextDetector::new("move-randomness", Category::RandomnessMisuse, scan_move));
    catalog.insert(Lang::Solidity, TextDetector::new("sol-randomness", Category::RandomnessMisuse, scan_solidity));
    catalog.insert(Lang::Vyper, TextDetector::new("vy-randomness", Category::RandomnessMisuse, scan_vyper));
    catalog.insert(Lang::Go, TreeDetector::new("go-randomness", Category::RandomnessMisuse, scan_go));
    catalog.insert(Lang::Rust, TreeDetector::new("rs-randomness", Category::RandomnessMisuse, scan_rust));
}

/// Chain-state patterns of one text language.
struct Sources<'r> {
    strong: &'r Regex,
    weak: &'r Regex,
    mixer: &'r Regex,
    suggestion: &'static str,
}

/// Name bound by the first plain assignment on a line
/// (`let x: u64 =`, `uint256 x =`, `self.x =`).
fn assigned_name(code: &str) -> Option<&str> {
    let bytes = code.as_bytes();
    let pos = bytes.iter().enumerate().position(|(i, &b)| {
        b == b'='
            && bytes.get(i + 1) != Some(&b'=')
            && !matches!(i.checked_sub(1).map(|p| bytes[p]), Some(b'=' | b'!' | b'<' | b'>'))
    })?;
    let mut lhs = code[..pos].trim_end();
    lhs = lhs.trim_end_matches(&['+', '-', '*', '/', '%'][..]).trim_end();
    if let Some((name, _ty)) = lhs.split_once(':').filter(|(_, rest)| !rest.starts_with(':')) {
        lhs = name.trim_end();
    }
    TRAILING_IDENT.captures(lhs).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// First whole identifier of `code` that is in `names`, with its byte
/// offset.
fn first_word_in<'c>(code: &'c str, names: &HashSet<String>) -> Option<(&'c str, usize)> {
    if names.is_empty() {
        return None;
    }
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let mut start = None;
    for (i, c) in code.char_indices().chain(std::iter::once((code.len(), ' '))) {
        match (is_word(c), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                if names.contains(&code[s..i]) {
                    return Some((&code[s..i], s));
                }
                start = None;
            }
            _ => {}
        }
    }
    None
}

/// Per-line and per-function scan for chain values turned into
/// randomness.
fn scan_text(unit: &SourceUnit<'_>, lines: &[ScanLine], fns: &[TextFn], rules: &Sources<'_>) -> Vec<Hit> {
    let decls: HashSet<usize> = fns.iter().map(|f| f.decl).collect();
    let mut tainted: HashSet<String> = HashSet::new();
    let mut hits = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        if decls.contains(&idx) {
            tainted.clear();
        }
        let code = line.code.as_str();
        let strong = rules.strong.find(code);
        let weak = rules.weak.find(code);
        let mixed = rules.mixer.is_match(code);
        let named = assigned_name(code).filter(|n| RAND_NAME.is_match(n));

        let source = match (strong, weak) {
            (Some(s), _) if mixed || named.is_some() => Some(s),
            (_, Some(w)) if mixed && named.is_some() => Some(w),
            _ => None,
        };
        if let Some(m) = source {
            let how = match named {
                Some(name) => format!("assigned to `{}`", name),
                None => "hashed or reduced as randomness".to_string(),
            };
            hits.push(
                line_hit(
                    unit,
                    idx,
                    m.start(),
                    format!("Chain value `{}` is predictable but {}", m.as_str().trim_end_matches('(').trim(), how),
                )
                .with_suggestion(rules.suggestion),
            );
            continue;
        }

        if mixed {
            let used = first_word_in(code, &tainted);
            if let Some((name, col)) = used {
                hits.push(
                    line_hit(
                        unit,
                        idx,
                        col,
                        format!("`{}` holds chain state and is hashed or reduced as randomness", name),
                    )
                    .with_suggestion(rules.suggestion),
                );
                continue;
            }
        }

        if strong.is_some() {
            if let Some(name) = assigned_name(code) {
                tainted.insert(name.to_string());
            }
        }
    }

    hits
}

fn scan_move(unit: &SourceUnit<'_>, _config: &AuditConfig) -> Vec<Hit> {
    let lines = scan_lines(unit.lines(), CommentStyle::CLike);
    let fns = move_functions(&lines);
    let rules = Sources {
        strong: &MOVE_STRONG,
        weak: &MOVE_WEAK,
        mixer: &MOVE_MIXER,
        suggestion: "Use a verifiable randomness source such as aptos_framework::randomness or sui::random",
    };
    let mut hits = scan_text(unit, &lines, &fns, &rules);

    for (idx, line) in lines.iter().enumerate() {
        if let Some(m) = MOVE_TX_RANDOM.find(&line.code) {
            hits.push(
                line_hit(unit, idx, m.start(), "`TransactionContext::random` is derived from transaction data and predictable")
                    .with_suggestion(rules.suggestion),
            );
        }
    }

    hits.sort_by_key(|h| (h.line, h.col));
    hits
}

fn scan_solidity(unit: &SourceUnit<'_>, _config: &AuditConfig) -> Vec<Hit> {
    let lines = scan_lines(unit.lines(), CommentStyle::CLikeQuoted);
    let fns = solidity_functions(&lines);
    let rules = Sources {
        strong: &SOL_STRONG,
        weak: &EVM_WEAK,
        mixer: &EVM_MIXER,
        suggestion: "Use a VRF (e.g. Chainlink VRF) or a commit-reveal scheme",
    };
    scan_text(unit, &lines, &fns, &rules)
}

fn scan_vyper(unit: &SourceUnit<'_>, _config: &AuditConfig) -> Vec<Hit> {
    let lines = scan_lines(unit.lines(), CommentStyle::Hash);
    let fns = vyper_functions(&lines);
    let rules = Sources {
        strong: &VY_STRONG,
        weak: &EVM_WEAK,
        mixer: &EVM_MIXER,
        suggestion: "Use a VRF or a commit-reveal scheme",
    };
    scan_text(unit, &lines, &fns, &rules)
}

/// Keep the first hit of each line.
fn one_per_line(mut hits: Vec<Hit>) -> Vec<Hit> {
    hits.sort_by_key(|h| (h.line, h.col));
    hits.dedup_by_key(|h| h.line);
    hits
}

/// Text of a call's argument list.
const GO_IMPORT_QUERY: &str = "(import_spec path: (_) @path)";

fn arguments<'s>(call: Node<'_>, src: &'s str) -> &'s str {
    call.child_by_field_name("arguments")
        .map(|a| node_text(a, src))
        .unwrap_or("")
}

fn scan_go(unit: &SourceUnit<'_>, tree: &Tree, _config: &AuditConfig) -> Result<Vec<Hit>, DetectError> {
    let src = unit.text();
    let root = tree.root_node();
    let mut hits = Vec::new();

    let go = Grammar::Go.language().map_err(|e| DetectError::Internal(e.to_string()))?;
    for path in query_captures(go, GO_IMPORT_QUERY, root, src, "path")? {
        let spec = path.parent().unwrap_or(path);
        let path_text = node_text(path, src).trim_matches(&['"', '`'][..]);
        if path_text == "math/rand" || path_text == "math/rand/v2" {
            hits.push(
                node_hit(unit, spec, format!("`{}` is not cryptographically secure", path_text))
                    .with_suggestion("Use crypto/rand for anything security relevant"),
            );
        }
    }

    for call in find_kinds(root, &["call_expression"]) {
        let Some(target) = callee(call) else {
            continue;
        };
        let path = callee_path(node_text(target, src));
        let args = arguments(call, src);
        if path.ends_with("rand.Seed") || path.ends_with("rand.NewSource") {
            hits.push(
                node_hit(unit, call, format!("`{}{}` gives a predictable sequence", path, args))
                    .with_suggestion("Use crypto/rand instead of a seeded math/rand source"),
            );
        } else if GO_HASH.is_match(&path) && GO_SOURCE.is_match(args) {
            hits.push(
                node_hit(unit, call, format!("Clock or transaction value hashed by `{}` as randomness", path))
                    .with_suggestion("Use crypto/rand or an external randomness beacon"),
            );
        }
    }

    for expr in find_kinds(root, &["binary_expression"]) {
        if operator(expr, src) == Some("%") && GO_SOURCE.is_match(node_text(expr, src)) {
            hits.push(
                node_hit(unit, expr, "Clock or transaction value reduced modulo as randomness")
                    .with_suggestion("Use crypto/rand or an external randomness beacon"),
            );
        }
    }

    Ok(one_per_line(hits))
}

fn scan_rust(unit: &SourceUnit<'_>, tree: &Tree, _config: &AuditConfig) -> Result<Vec<Hit>, DetectError> {
    let src = unit.text();
    let root = tree.root_node();
    let mut hits = Vec::new();

    for call in find_kinds(root, &["call_expression"]) {
        if rs_in_test(call, src) {
            continue;
        }
        let Some(target) = callee(call) else {
            continue;
        };
        let path = callee_path(node_text(target, src));
        let name = last_segment(&path);
        let args = arguments(call, src);
        let message = match name {
            "thread_rng" | "random" if path.contains("rand") || name == "thread_rng" => {
                format!("`{}` is not suitable for on-chain or security-relevant randomness", path)
            }
            "seed_from_u64" | "from_seed" => format!("`{}` with a fixed or guessable seed is predictable", path),
            _ if RS_HASH.is_match(name) && RS_SOURCE.is_match(args) => {
                format!("Chain or clock value hashed by `{}` as randomness", path)
            }
            _ => continue,
        };
        hits.push(node_hit(unit, call, message).with_suggestion("Use OsRng or a verifiable randomness oracle"));
    }

    for expr in find_kinds(root, &["binary_expression"]) {
        if operator(expr, src) == Some("%") && RS_SOURCE.is_match(node_text(expr, src)) && !rs_in_test(expr, src) {
            hits.push(
                node_hit(unit, expr, "Chain or clock value reduced modulo as randomness")
                    .with_suggestion("Use a verifiable randomness oracle"),
            );
        }
    }

    for stmt in find_kinds(root, &["let_declaration"]) {
        let pattern = stmt.child_by_field_name("pattern").map(|p| node_text(p, src)).unwrap_or("");
        let value = stmt.child_by_field_name("value").map(|v| node_text(v, src)).unwrap_or("");
        if RAND_NAME.is_match(pattern) && RS_SOURCE.is_match(value) && !rs_in_test(stmt, src) {
            hits.push(
                node_hit(unit, stmt, format!("Chain or clock value assigned to `{}` as randomness", pattern.trim()))
                    .with_suggestion("Use a verifiable randomness oracle"),
            );
        }
    }

    Ok(one_per_line(hits))
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn test_assigned_name() {
        assert_eq!(assigned_name("    let seed: u64 = x;"), Some("seed"));
        assert_eq!(assigned_name("uint256 rand = 1;"), Some("rand"));
        assert_eq!(assigned_name("    self.winner = a"), Some("winner"));
        assert_eq!(assigned_name("n += 1"), Some("n"));
        assert_eq!(assigned_name("if (a == b) {"), None);
    }

    #[test]
    fn test_solidity_keccak_of_block_timestamp() {
        let src = r#"contract Lottery {
    function draw() external view returns (uint256) {
        return uint256(keccak256(abi.encodePacked(block.timestamp, msg.sender))) % 10;
    }
    function stamp() external view returns (uint256) {
        return block.timestamp;
    }
}
"#;
        let hits = text(scan_solidity, src);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].line, 3);
        assert!(hits[0].message.contains("block.timestamp"));
    }

    #[test]
    fn test_solidity_taint_through_local() {
        let src = "contract C {\n  function f() external {\n    uint256 t = block.number;\n    uint256 pick = t % 7;\n  }\n}\n";
        let hits = text(scan_solidity, src);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].line, 4);
        assert!(hits[0].message.contains("`t`"));
    }

    #[test]
    fn test_first_word_in() {
        let names: HashSet<String> = ["t".to_string(), "seed".to_string()].into_iter().collect();
        assert_eq!(first_word_in("uint x = tt + seed % 7;", &names), Some(("seed", 14)));
        assert_eq!(first_word_in("t_1 % seeds", &names), None);
        assert_eq!(first_word_in("keccak256(t)", &names), Some(("t", 10)));
        assert_eq!(first_word_in("t", &HashSet::new()), None);
    }

    #[test]
    fn test_solidity_taint_reports_first_use_on_line() {
        let src = "contract C {\n  function f() external {\n    uint256 a = block.number;\n    uint256 b = block.timestamp;\n    uint256 pick = b + a % 7;\n  }\n  function g(uint256 a) external {\n    uint256 pick = a % 7;\n  }\n}\n";
        let hits = text(scan_solidity, src);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].line, 5);
        assert!(hits[0].message.contains("`b`"));
        assert_eq!(hits[0].col, Some(20));
    }

    #[test]
    fn test_move_timestamp_hash_and_tx_random() {
        let src = "module 0x1::game {\n    fun roll(): u64 {\n        let seed = timestamp::now_microseconds();\n        let r = TransactionContext::random();\n        seed\n    }\n}\n";
        let hits = text(scan_move, src);
        let lines: Vec<usize> = hits.iter().map(|h| h.line).collect();
        assert_eq!(lines, vec![3, 4]);
    }

    #[test]
    fn test_vyper_block_modulo() {
        let src = "@external\ndef pick() -> uint256:\n    return block.timestamp % 5\n\n@external\ndef now_ts() -> uint256:\n    return block.timestamp\n";
        let hits = text(scan_vyper, src);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].line, 3);
    }

    #[test]
    fn test_go_math_rand_and_seed() {
        let src = "package main\n\nimport (\n\t\"fmt\"\n\t\"math/rand\"\n\t\"time\"\n)\n\nfunc pick() int {\n\trand.Seed(time.Now().UnixNano())\n\treturn int(time.Now().Unix() % 6)\n}\n";
        let hits = tree(scan_go, Grammar::Go, src);
        let lines: Vec<usize> = hits.iter().map(|h| h.line).collect();
        assert_eq!(lines, vec![5, 10, 11]);
    }

    #[test]
    fn test_rust_rng_and_clock() {
        let src = r#"fn a() -> u64 {
    let mut rng = rand::thread_rng();
    rng.gen()
}

fn b() -> u64 {
    let rng = StdRng::seed_from_u64(42);
    0
}

fn c() -> Result<u64> {
    let winner = Clock::get()?.unix_timestamp as u64 % 3;
    Ok(winner)
}
"#;
        let hits = tree(scan_rust, Grammar::Rust, src);
        let lines: Vec<usize> = hits.iter().map(|h| h.line).collect();
        assert_eq!(lines, vec![2, 7, 12]);
    }

    #[test]
    fn test_non_random_uses_are_quiet() {
        assert!(text(scan_solidity, "contract C { uint t = block.timestamp; }").is_empty());
        assert!(tree(scan_rust, Grammar::Rust, "fn f() { let now = SystemTime::now(); }").is_empty());
    }
}

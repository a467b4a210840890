//! End-to-end scenarios for each vulnerability class.

use polyaudit::source::SourceUnit;
use polyaudit::{
    analyze, code_hash, AuditConfig, Catalog, Category, Detector, Finding, Lang, Strategy,
};

fn run(tag: &str, source: &str) -> Vec<Finding> {
    polyaudit::init();
    analyze(tag, source, "scenario").expect("analysis should succeed")
}

fn has(findings: &[Finding], category: Category) -> bool {
    findings.iter().any(|f| f.category == category)
}

#[test]
fn test_public_cross_module_call_without_auth() {
    let solidity = r#"pragma solidity ^0.8.0;
interface IToken { function transfer(address to, uint256 v) external returns (bool); }
contract Treasury {
    IToken token;
    function payout(address to, uint256 v) external {
        token.transfer(to, v);
    }
}
"#;
    let findings = run("sol", solidity);
    assert!(
        has(&findings, Category::CallSafety) || has(&findings, Category::AccessControl),
        "got {:?}",
        findings
    );

    let move_src = "module 0x1::treasury {\n    public entry fun payout(to: address, v: u64) {\n        0x1::coin::transfer<AptosCoin>(to, v);\n    }\n}\n";
    let findings = run("move", move_src);
    assert!(
        has(&findings, Category::CallSafety) || has(&findings, Category::AccessControl),
        "got {:?}",
        findings
    );
}

#[test]
fn test_move_borrow_global_mut_is_freeze_bypass() {
    let src = "module 0x1::bank {\n    public fun wipe(a: address) acquires Store {\n        let s = borrow_global_mut<Store>(a);\n        s.v = 0;\n    }\n}\n";
    let findings = run("move", src);
    let freeze: Vec<&Finding> = findings
        .iter()
        .filter(|f| f.category == Category::FreezeBypass)
        .collect();
    assert_eq!(freeze.len(), 1);
    assert_eq!(freeze[0].line, 3);
}

#[test]
fn test_rust_unwrap_is_logic_defect() {
    let src = "fn parse(s: &str) -> u32 {\n    s.parse::<u32>().unwrap()\n}\n";
    let findings = run("rs", src);
    let defects: Vec<&Finding> = findings
        .iter()
        .filter(|f| f.category == Category::LogicDefect)
        .collect();
    assert_eq!(defects.len(), 1);
    assert_eq!(defects[0].line, 2);
}

#[test]
fn test_rust_unwrap_with_fallback_is_quiet() {
    let src = "fn parse(s: &str) -> u32 {\n    s.parse::<u32>().unwrap_or(0)\n}\n";
    assert!(!has(&run("rs", src), Category::LogicDefect));
}

#[test]
fn test_solidity_block_timestamp_randomness() {
    let src = r#"pragma solidity ^0.8.0;
contract Dice {
    function roll() external view returns (uint256) {
        return uint256(keccak256(abi.encodePacked(block.timestamp, block.prevrandao))) % 6;
    }
}
"#;
    let findings = run("sol", src);
    let random: Vec<&Finding> = findings
        .iter()
        .filter(|f| f.category == Category::RandomnessMisuse)
        .collect();
    assert_eq!(random.len(), 1);
    assert_eq!(random[0].line, 4);
}

#[test]
fn test_findings_follow_category_order() {
    let src = r#"pragma solidity ^0.6.0;
contract Bank {
    mapping(address => uint) balances;
    uint total;
    function withdraw(uint amount) public {
        (bool ok, ) = msg.sender.call{value: amount}("");
        require(ok);
        balances[msg.sender] -= amount;
        total = total - amount;
    }
}
"#;
    let findings = run("sol", src);
    assert!(has(&findings, Category::Overflow));
    assert!(has(&findings, Category::Reentrancy));
    assert!(has(&findings, Category::FreezeBypass));

    let ranks: Vec<usize> = findings.iter().map(|f| f.category.rank()).collect();
    assert!(ranks.windows(2).all(|w| w[0] <= w[1]), "got {:?}", ranks);
}

#[test]
fn test_syntax_tree_parsed_once_per_request() {
    polyaudit::init();
    let catalog = Catalog::builtin();
    let config = AuditConfig::default();
    let src = "package main\n\nfunc add(a, b int) int {\n\treturn a + b\n}\n";
    let unit = SourceUnit::new(src, Lang::Go.grammar());

    let detectors = catalog.for_language(Lang::Go);
    assert!(detectors.iter().all(|d| d.strategy() == Strategy::Tree));
    for detector in &detectors {
        detector.scan(&unit, &config).expect("scan should succeed");
    }
    assert_eq!(unit.parse_count(), 1);
}

#[test]
fn test_non_matching_input_is_quiet_per_detector() {
    polyaudit::init();
    let catalog = Catalog::builtin();
    let config = AuditConfig::default();
    let cases = [
        (Lang::Move, "module 0x1::m {\n    fun id(x: u64): u64 {\n        x\n    }\n}\n"),
        (Lang::Solidity, "pragma solidity ^0.8.0;\ncontract C {\n    function id(uint x) internal pure returns (uint) {\n        return x;\n    }\n}\n"),
        (Lang::Vyper, "@internal\n@pure\ndef ident(x: uint256) -> uint256:\n    return x\n"),
        (Lang::Go, "package main\n\nfunc id(x int) int {\n\treturn x\n}\n"),
        (Lang::Rust, "fn id(x: u64) -> u64 {\n    x\n}\n"),
    ];

    for (lang, src) in cases {
        let unit = SourceUnit::new(src, lang.grammar());
        for detector in catalog.for_language(lang) {
            let hits = detector.scan(&unit, &config).expect("scan should succeed");
            assert!(hits.is_empty(), "{} reported {:?}", detector.name(), hits);
        }
    }
}

#[test]
fn test_code_hash_tracks_source() {
    let a = "contract C { uint x; }";
    let b = "contract C { uint y; }";
    assert_eq!(code_hash(a), code_hash(a));
    assert_ne!(code_hash(a), code_hash(b));
    assert_eq!(code_hash(a).len(), 64);
    assert!(code_hash(a).chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

#[test]
fn test_reinitialization_keeps_results() {
    let src = "fn parse(s: &str) -> u32 {\n    s.parse::<u32>().unwrap()\n}\n";
    let before = run("rs", src);
    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(polyaudit::init);
        }
    });
    assert_eq!(run("rs", src), before);
}

//! Tests for the reporting and request/response formats.
//!
//! These tests pin the text line shape, the JSON report layout and the
//! audit request contract used by the HTTP collaborator.

use std::path::PathBuf;

use polyaudit::digest::{self, handle_json, AuditRequest, NO_FINDINGS_SUMMARY};
use polyaudit::report::{render_json, FileReport};
use polyaudit::{analyze, code_hash, format_findings, AuditConfig, Lang};

fn testdata_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("testdata")
}

fn fixture(name: &str) -> String {
    std::fs::read_to_string(testdata_path().join(name)).expect("should read fixture")
}

#[test]
fn test_format_findings_one_line_each() {
    polyaudit::init();
    let source = fixture("vault.move");
    let findings = analyze("move", &source, "vault.move").unwrap();
    let text = format_findings(&findings);
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines.len(), findings.len());
    for (line, f) in lines.iter().zip(&findings) {
        let prefix = format!("[vault.move:{}:{}] {} - ", f.line, f.col.unwrap_or(0), f.category);
        assert!(line.starts_with(&prefix), "{:?} does not start with {:?}", line, prefix);
        assert!(line.ends_with(&f.message));
    }
}

#[test]
fn test_json_report_shape() {
    polyaudit::init();
    let source = fixture("pool.vy");
    let findings = analyze("vy", &source, "pool.vy").unwrap();
    let count = findings.len();
    let reports = vec![FileReport::new("pool.vy", Lang::Vyper, &source, findings)];

    let json: serde_json::Value = serde_json::from_str(&render_json(&reports).unwrap()).unwrap();
    let entry = &json.as_array().expect("top level is an array")[0];

    assert_eq!(entry["path"], "pool.vy");
    assert_eq!(entry["language"], "vy");
    assert_eq!(entry["codeHash"], code_hash(&source));
    assert_eq!(entry["findings"].as_array().unwrap().len(), count);
    assert_eq!(
        entry["summary"].as_str().unwrap().lines().count(),
        count,
        "summary has one message per finding"
    );

    let first = &entry["findings"][0];
    assert_eq!(first["filePath"], "pool.vy");
    assert!(first["line"].is_u64());
    assert!(first["category"].is_string());
    assert!(first["message"].is_string());
}

#[test]
fn test_json_report_round_trips() {
    let reports = vec![FileReport::new("clean.rs", Lang::Rust, "fn f() -> u8 { 1 }", Vec::new())];
    let parsed: Vec<FileReport> = serde_json::from_str(&render_json(&reports).unwrap()).unwrap();
    assert_eq!(parsed, reports);
    assert_eq!(parsed[0].summary, NO_FINDINGS_SUMMARY);
}

#[test]
fn test_audit_request_contract() {
    let source = fixture("vulnerable.sol");
    let request = serde_json::json!({ "language": "sol", "source": source }).to_string();
    let response = handle_json(&AuditConfig::default(), &request).expect("request should succeed");

    assert!(!response.findings.is_empty());
    assert!(response.findings.iter().all(|f| f.file_path == "upload"));
    assert_eq!(response.code_hash, code_hash(&source));
    assert_eq!(response.summary, digest::summary(&response.findings));

    let record = response.ledger_record();
    assert_eq!(record.code_hash, response.code_hash);
    assert_eq!(record.summary, response.summary);

    let json = serde_json::to_value(&response).unwrap();
    assert!(json.get("codeHash").is_some());
    assert!(json.get("findings").is_some());
    assert!(json.get("summary").is_some());
}

#[test]
fn test_audit_request_with_file_name() {
    let request = AuditRequest {
        language: "move".to_string(),
        source: fixture("vault.move"),
        file_name: Some("sources/vault.move".to_string()),
    };
    let response = digest::audit(&request).unwrap();
    assert!(response
        .findings
        .iter()
        .all(|f| f.file_path == "sources/vault.move"));
}

#[test]
fn test_audit_request_errors() {
    let config = AuditConfig::default();

    let err = handle_json(&config, "not json").unwrap_err();
    assert!(err.error.contains("invalid request"));

    let err = handle_json(&config, r#"{"language": "", "source": "x"}"#).unwrap_err();
    assert!(err.error.contains("invalid request"));

    let err = handle_json(&config, r#"{"language": "java", "source": "x"}"#).unwrap_err();
    assert_eq!(err.error, "unsupported language: java");

    let json = serde_json::to_value(&err).unwrap();
    assert_eq!(json, serde_json::json!({ "error": "unsupported language: java" }));
}

#[test]
fn test_empty_source_response() {
    let request = AuditRequest {
        language: "go".to_string(),
        source: String::new(),
        file_name: None,
    };
    let response = digest::audit(&request).unwrap();
    assert!(response.findings.is_empty());
    assert_eq!(response.summary, NO_FINDINGS_SUMMARY);
    assert_eq!(
        response.code_hash,
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}

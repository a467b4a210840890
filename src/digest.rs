//! Request/response shapes around an analysis, and the values handed to the
//! report ledger.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::AuditConfig;
use crate::error::AuditError;
use crate::finding::Finding;
use crate::registry;

/// Summary used when an analysis produced no findings.
pub const NO_FINDINGS_SUMMARY: &str = "No vulnerabilities found";

/// File name used when a request does not carry one.
pub const DEFAULT_FILE_NAME: &str = "upload";

/// Lowercase hex SHA-256 of the analyzed source.
pub fn code_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Finding messages joined by newlines, in result order.
pub fn summary(findings: &[Finding]) -> String {
    if findings.is_empty() {
        return NO_FINDINGS_SUMMARY.to_string();
    }
    findings
        .iter()
        .map(|f| f.message.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// An inbound analysis request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRequest {
    pub language: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl AuditRequest {
    pub fn file_name(&self) -> &str {
        self.file_name.as_deref().unwrap_or(DEFAULT_FILE_NAME)
    }
}

/// Successful analysis response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditResponse {
    pub findings: Vec<Finding>,
    pub code_hash: String,
    pub summary: String,
}

impl AuditResponse {
    pub fn new(source: &str, findings: Vec<Finding>) -> Self {
        Self {
            code_hash: code_hash(source),
            summary: summary(&findings),
            findings,
        }
    }

    /// The values submitted to the ledger for this response.
    pub fn ledger_record(&self) -> LedgerRecord {
        LedgerRecord {
            code_hash: self.code_hash.clone(),
            summary: self.summary.clone(),
        }
    }
}

/// Failed analysis response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl From<AuditError> for ErrorResponse {
    fn from(err: AuditError) -> Self {
        Self {
            error: err.to_string(),
        }
    }
}

/// The stable pair exposed to the report submission collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    pub code_hash: String,
    pub summary: String,
}

/// Analyze a request with the default configuration.
pub fn audit(request: &AuditRequest) -> Result<AuditResponse, AuditError> {
    audit_with(&AuditConfig::default(), request)
}

pub fn audit_with(config: &AuditConfig, request: &AuditRequest) -> Result<AuditResponse, AuditError> {
    let findings = registry::analyze_with(
        config,
        &request.language,
        &request.source,
        request.file_name(),
    )?;
    Ok(AuditResponse::new(&request.source, findings))
}

/// Decode a JSON request and analyze it.
pub fn handle_json(config: &AuditConfig, input: &str) -> Result<AuditResponse, ErrorResponse> {
    let request: AuditRequest = serde_json::from_str(input).map_err(|e| {
        tracing::debug!(error = %e, "rejecting malformed audit request");
        ErrorResponse::from(AuditError::InvalidInput(
            "missing or invalid `language` or `source`".to_string(),
        ))
    })?;
    audit_with(config, &request).map_err(ErrorResponse::from)
}

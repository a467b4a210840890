//! Output formatting for analysis results.
//!
//! Supports two output formats:
//! - Pretty: colored terminal output grouped per file
//! - JSON: one entry per file with findings, code hash and summary

use colored::*;
use serde::{Deserialize, Serialize};

use crate::digest;
use crate::finding::{Category, Finding};
use crate::language::Lang;

/// One line per finding: `[file:line:col] Category - message`.
pub fn format_findings(findings: &[Finding]) -> String {
    findings
        .iter()
        .map(|f| format!("[{}] {} - {}", f.location(), f.category, f.message))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Results for one analyzed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    pub path: String,
    pub language: String,
    pub findings: Vec<Finding>,
    pub code_hash: String,
    pub summary: String,
}

impl FileReport {
    pub fn new(path: &str, lang: Lang, source: &str, findings: Vec<Finding>) -> Self {
        Self {
            path: path.to_string(),
            language: lang.tag().to_string(),
            code_hash: digest::code_hash(source),
            summary: digest::summary(&findings),
            findings,
        }
    }
}

/// Total findings across reports.
pub fn finding_count(reports: &[FileReport]) -> usize {
    reports.iter().map(|r| r.findings.len()).sum()
}

// =============================================================================
// JSON Format
// =============================================================================

pub fn render_json(reports: &[FileReport]) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(reports)?)
}

/// Write results in JSON format.
pub fn write_json(reports: &[FileReport]) -> anyhow::Result<()> {
    println!("{}", render_json(reports)?);
    Ok(())
}

// =============================================================================
// Pretty Format
// =============================================================================

/// Write results in pretty (human-readable) format.
pub fn write_pretty(reports: &[FileReport]) {
    // Header
    println!();
    print!("  ");
    print!("{}", "polyaudit".cyan().bold());
    println!(" v{}", env!("CARGO_PKG_VERSION"));
    println!();

    for report in reports {
        write_file_report(report);
        println!();
    }

    write_final_status(reports);
    println!();
}

fn write_file_report(report: &FileReport) {
    print!("  {}", report.path.blue().bold());
    println!("  {}", format!("({})", report.language).dimmed());
    println!("  {}", format!("sha256 {}", report.code_hash).dimmed());

    if report.findings.is_empty() {
        println!("    {}", digest::NO_FINDINGS_SUMMARY.green());
        return;
    }

    println!();
    for f in &report.findings {
        write_category_tag(f.category);
        print!("{}", format!(":{}", f.line).dimmed());
        if let Some(col) = f.col {
            print!("{}", format!(":{}", col).dimmed());
        }
        println!();

        // Message on next line, indented
        println!("        {}", f.message);
        if let Some(suggestion) = &f.suggestion {
            println!("        {}", format!("hint: {}", suggestion).dimmed());
        }
    }
}

fn write_category_tag(category: Category) {
    let tag = format!("{:<17}", category.as_str());
    match category {
        Category::Reentrancy | Category::AccessControl | Category::CallSafety => {
            print!("    {}", tag.red())
        }
        Category::Overflow | Category::FreezeBypass | Category::RandomnessMisuse => {
            print!("    {}", tag.yellow())
        }
        Category::LogicDefect => print!("    {}", tag.blue()),
    }
}

fn write_final_status(reports: &[FileReport]) {
    let total = finding_count(reports);
    let plural = if reports.len() != 1 { "s" } else { "" };
    print!(
        "  {}",
        format!("Scanned {} file{}", reports.len(), plural).dimmed()
    );
    print!("  ");

    if total == 0 {
        print!("{}", "CLEAN".green());
    } else {
        print!("{}", format!("{} FINDINGS", total).red());
    }
    println!();
}

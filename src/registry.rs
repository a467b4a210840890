//! Language tag → analyzer lookup and the orchestration entry point.

use once_cell::sync::OnceCell;
use std::collections::BTreeMap;

use crate::analyzer::Analyzer;
use crate::config::AuditConfig;
use crate::detect::Catalog;
use crate::error::AuditError;
use crate::finding::Finding;
use crate::language::Lang;
use crate::source;

/// Analyzers keyed by tag. Populated once per process.
static ANALYZERS: OnceCell<BTreeMap<&'static str, Analyzer>> = OnceCell::new();

/// Register every analyzer and load the grammars.
///
/// Idempotent and safe to call from many threads; the first caller does the
/// work and the rest wait for it.
pub fn init() {
    analyzers();
}

fn analyzers() -> &'static BTreeMap<&'static str, Analyzer> {
    ANALYZERS.get_or_init(|| {
        source::init_grammars();
        let catalog = Catalog::builtin();
        Lang::ALL
            .iter()
            .map(|lang| (lang.tag(), Analyzer::new(*lang, &catalog)))
            .collect()
    })
}

/// Look up the analyzer for a tag.
pub fn get_analyzer(tag: &str) -> Result<&'static Analyzer, AuditError> {
    if tag.is_empty() {
        return Err(AuditError::InvalidInput(
            "language tag must not be empty".to_string(),
        ));
    }
    analyzers()
        .get(tag)
        .ok_or_else(|| AuditError::UnsupportedLanguage(tag.to_string()))
}

/// Registered language tags, sorted.
pub fn supported_languages() -> Vec<&'static str> {
    analyzers().keys().copied().collect()
}

/// Analyze `source` with the default configuration.
pub fn analyze(tag: &str, source: &str, file_path: &str) -> Result<Vec<Finding>, AuditError> {
    analyze_with(&AuditConfig::default(), tag, source, file_path)
}

/// Analyze `source` with an explicit configuration.
///
/// Fails only for an empty or unknown tag. Detector failures are reported
/// as findings.
pub fn analyze_with(
    config: &AuditConfig,
    tag: &str,
    source: &str,
    file_path: &str,
) -> Result<Vec<Finding>, AuditError> {
    let analyzer = get_analyzer(tag)?;
    Ok(analyzer.analyze(source, file_path, config))
}

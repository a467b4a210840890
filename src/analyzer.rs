//! Per-language composition of the seven detectors.
//!
//! An [`Analyzer`] owns one detector per category and runs them against a
//! single [`SourceUnit`]. Detector failures stop at the invocation boundary:
//! a parse failure or internal error becomes one finding of the failing
//! detector's category and the remaining detectors still run.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use rayon::prelude::*;

use crate::config::AuditConfig;
use crate::detect::{Catalog, Detector};
use crate::error::DetectError;
use crate::finding::{Category, Finding};
use crate::language::Lang;
use crate::source::SourceUnit;

/// All detectors of one language, in category order.
pub struct Analyzer {
    lang: Lang,
    detectors: Vec<Arc<dyn Detector>>,
}

impl Analyzer {
    /// Build the analyzer for `lang` from a catalog.
    pub fn new(lang: Lang, catalog: &Catalog) -> Self {
        Self {
            lang,
            detectors: catalog.for_language(lang),
        }
    }

    pub fn lang(&self) -> Lang {
        self.lang
    }

    /// Detector names in run order.
    pub fn detector_names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    /// Run every enabled detector and concatenate their findings in
    /// category order.
    pub fn analyze(&self, source: &str, file_path: &str, config: &AuditConfig) -> Vec<Finding> {
        if source.is_empty() {
            return Vec::new();
        }

        let unit = SourceUnit::new(source, self.lang.grammar()).strict(config.strict_parse);
        let enabled: Vec<&dyn Detector> = self
            .detectors
            .iter()
            .map(|d| d.as_ref())
            .filter(|d| config.is_enabled(d.category()))
            .collect();

        let per_detector: Vec<Vec<Finding>> = if config.parallel {
            // Indexed collect keeps the category order.
            enabled
                .par_iter()
                .map(|d| run_detector(*d, &unit, file_path, config))
                .collect()
        } else {
            enabled
                .iter()
                .map(|d| run_detector(*d, &unit, file_path, config))
                .collect()
        };

        let mut findings = Vec::new();
        for (detector, batch) in enabled.iter().zip(per_detector) {
            findings.extend(batch);
            tracing::debug!(
                detector = detector.name(),
                file = file_path,
                total = findings.len(),
                "detector finished"
            );
        }
        findings
    }
}

/// Invoke one detector, converting any failure into a finding of its
/// category.
fn run_detector(
    detector: &dyn Detector,
    unit: &SourceUnit<'_>,
    file_path: &str,
    config: &AuditConfig,
) -> Vec<Finding> {
    let category = detector.category();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| detector.scan(unit, config)));

    match outcome {
        Ok(Ok(hits)) => hits
            .into_iter()
            .map(|h| h.into_finding(category, file_path))
            .collect(),
        Ok(Err(err)) => {
            tracing::warn!(
                detector = detector.name(),
                file = file_path,
                error = %err,
                "detector failed"
            );
            vec![failure_finding(category, file_path, &err)]
        }
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            tracing::warn!(
                detector = detector.name(),
                file = file_path,
                reason = %reason,
                "detector panicked"
            );
            let err = DetectError::Internal(format!(
                "detector {} aborted: {}",
                detector.name(),
                reason
            ));
            vec![failure_finding(category, file_path, &err)]
        }
    }
}

fn failure_finding(category: Category, file_path: &str, err: &DetectError) -> Finding {
    let suggestion = if err.is_parse() {
        "Fix the syntax error so the remaining checks can run"
    } else {
        "Review this file manually; the check could not complete"
    };
    Finding {
        file_path: file_path.to_string(),
        line: err.line(),
        col: None,
        category,
        message: err.to_string(),
        suggestion: Some(suggestion.to_string()),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::TextDetector;
    use crate::finding::Hit;

    fn boom(_: &SourceUnit<'_>, _: &AuditConfig) -> Vec<Hit> {
        panic!("boom");
    }

    fn first_line(_: &SourceUnit<'_>, _: &AuditConfig) -> Vec<Hit> {
        vec![Hit::new(1, 1, "first line")]
    }

    #[test]
    fn test_empty_source_yields_nothing() {
        let analyzer = Analyzer::new(Lang::Solidity, &Catalog::builtin());
        assert!(analyzer.analyze("", "a.sol", &AuditConfig::default()).is_empty());
    }

    #[test]
    fn test_panicking_detector_becomes_finding() {
        let mut catalog = Catalog::new();
        catalog.insert(
            Lang::Move,
            TextDetector::new("move-test", Category::Reentrancy, boom),
        );
        catalog.insert(
            Lang::Move,
            TextDetector::new("move-test2", Category::LogicDefect, first_line),
        );
        let analyzer = Analyzer::new(Lang::Move, &catalog);
        let findings = analyzer.analyze("module a {}", "a.move", &AuditConfig::default());

        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].category, Category::Reentrancy);
        assert!(findings[0].message.contains("boom"));
        assert_eq!(findings[1].category, Category::LogicDefect);
        assert_eq!(findings[1].file_path, "a.move");
    }

    #[test]
    fn test_strict_parse_failure_is_per_detector() {
        let analyzer = Analyzer::new(Lang::Rust, &Catalog::builtin());
        let config = AuditConfig {
            strict_parse: true,
            ..Default::default()
        };
        let findings = analyzer.analyze("fn broken( {\n", "b.rs", &config);

        assert_eq!(findings.len(), Category::ALL.len());
        for (finding, category) in findings.iter().zip(Category::ALL) {
            assert_eq!(finding.category, category);
            assert!(finding.message.starts_with("failed to parse Rust source"));
            assert!(finding.line >= 1);
        }
    }

    #[test]
    fn test_disabled_categories_are_skipped() {
        let analyzer = Analyzer::new(Lang::Rust, &Catalog::builtin());
        let config = AuditConfig {
            disabled_categories: vec![Category::LogicDefect],
            ..Default::default()
        };
        let findings = analyzer.analyze("fn f(x: Option<u8>) -> u8 { x.unwrap() }\n", "c.rs", &config);
        assert!(findings.iter().all(|f| f.category != Category::LogicDefect));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let analyzer = Analyzer::new(Lang::Go, &Catalog::builtin());
        let src = "package main\n\nvar total int\n\nfunc add(a, b int) int {\n\ttotal = a + b\n\tpanic(\"x\")\n}\n";
        let sequential = analyzer.analyze(src, "m.go", &AuditConfig::default());
        let parallel = analyzer.analyze(
            src,
            "m.go",
            &AuditConfig {
                parallel: true,
                ..Default::default()
            },
        );
        assert!(!sequential.is_empty());
        assert_eq!(sequential, parallel);
    }
}

//! Core types for analysis results.

use serde::{Deserialize, Serialize};

/// The closed set of vulnerability classes the engine reports.
///
/// Variant order is the order analyzers run their detectors in and the
/// order findings appear in a result. Do not reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    Overflow,
    Reentrancy,
    CallSafety,
    AccessControl,
    LogicDefect,
    RandomnessMisuse,
    FreezeBypass,
}

impl Category {
    /// All categories in analyzer order.
    pub const ALL: [Category; 7] = [
        Category::Overflow,
        Category::Reentrancy,
        Category::CallSafety,
        Category::AccessControl,
        Category::LogicDefect,
        Category::RandomnessMisuse,
        Category::FreezeBypass,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Overflow => "Overflow",
            Category::Reentrancy => "Reentrancy",
            Category::CallSafety => "CallSafety",
            Category::AccessControl => "AccessControl",
            Category::LogicDefect => "LogicDefect",
            Category::RandomnessMisuse => "RandomnessMisuse",
            Category::FreezeBypass => "FreezeBypass",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Category::ALL.iter().copied().find(|c| c.as_str() == s)
    }

    /// Position of this category in the fixed analyzer order.
    pub fn rank(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single reported issue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub file_path: String,
    /// 1-indexed line in the analyzed source.
    pub line: usize,
    /// 1-indexed column (in characters) when the detector knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub col: Option<usize>,
    pub category: Category,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Finding {
    /// Location in `file:line:col` form, with col 0 when unknown.
    pub fn location(&self) -> String {
        format!("{}:{}:{}", self.file_path, self.line, self.col.unwrap_or(0))
    }
}

/// What a detector body reports: a position and a message.
///
/// Detector bodies never choose a category; the invocation boundary turns a
/// hit into a [`Finding`] carrying the category of the detector that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub line: usize,
    pub col: Option<usize>,
    pub message: String,
    pub suggestion: Option<String>,
}

impl Hit {
    pub fn new(line: usize, col: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            col: Some(col),
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn into_finding(self, category: Category, file_path: &str) -> Finding {
        Finding {
            file_path: file_path.to_string(),
            line: self.line,
            col: self.col,
            category,
            message: self.message,
            suggestion: self.suggestion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_order_matches_rank() {
        for (i, c) in Category::ALL.iter().enumerate() {
            assert_eq!(c.rank(), i);
        }
        assert!(Category::Overflow < Category::FreezeBypass);
    }

    #[test]
    fn test_category_parse_round_trip() {
        assert_eq!(Category::parse("CallSafety"), Some(Category::CallSafety));
        assert_eq!(Category::parse("callsafety"), None);
    }

    #[test]
    fn test_finding_serializes_camel_case() {
        let finding = Hit::new(3, 5, "msg").into_finding(Category::Overflow, "a.sol");
        let json = serde_json::to_value(&finding).unwrap();
        assert_eq!(json["filePath"], "a.sol");
        assert_eq!(json["category"], "Overflow");
        assert_eq!(json["col"], 5);
        assert!(json.get("suggestion").is_none());
    }

    #[test]
    fn test_location_without_column() {
        let mut finding = Hit::new(7, 1, "m").into_finding(Category::LogicDefect, "x.go");
        finding.col = None;
        assert_eq!(finding.location(), "x.go:7:0");
    }
}

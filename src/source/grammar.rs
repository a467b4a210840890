//! Process-wide tree-sitter grammar handles.
//!
//! Grammars are loaded and checked against the linked tree-sitter runtime
//! once per process. The first caller does the work; concurrent and later
//! callers see the finished state.

use once_cell::sync::OnceCell;
use tree_sitter::{Language, Parser};

/// Grammars backing the tree-based detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Grammar {
    Solidity,
    Go,
    Rust,
}

struct Grammars {
    solidity: Result<Language, String>,
    go: Result<Language, String>,
    rust: Result<Language, String>,
}

static GRAMMARS: OnceCell<Grammars> = OnceCell::new();

/// Load every grammar. Idempotent and safe to call from many threads.
pub fn init() {
    grammars();
}

/// Whether [`init`] has completed.
pub fn is_initialized() -> bool {
    GRAMMARS.get().is_some()
}

fn grammars() -> &'static Grammars {
    GRAMMARS.get_or_init(|| {
        tracing::debug!("loading tree-sitter grammars");
        Grammars {
            solidity: load(tree_sitter_solidity::LANGUAGE.into()),
            go: load(tree_sitter_go::LANGUAGE.into()),
            rust: load(tree_sitter_rust::LANGUAGE.into()),
        }
    })
}

/// Reject grammars built for an incompatible runtime ABI up front.
fn load(language: Language) -> Result<Language, String> {
    let mut parser = Parser::new();
    parser
        .set_language(&language)
        .map_err(|e| e.to_string())?;
    Ok(language)
}

impl Grammar {
    pub fn name(&self) -> &'static str {
        match self {
            Grammar::Solidity => "Solidity",
            Grammar::Go => "Go",
            Grammar::Rust => "Rust",
        }
    }

    /// The loaded language, or why it could not be loaded.
    pub fn language(&self) -> Result<&'static Language, &'static str> {
        let g = grammars();
        let slot = match self {
            Grammar::Solidity => &g.solidity,
            Grammar::Go => &g.go,
            Grammar::Rust => &g.rust,
        };
        slot.as_ref().map_err(|e| e.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        assert!(is_initialized());
        for g in [Grammar::Solidity, Grammar::Go, Grammar::Rust] {
            assert!(g.language().is_ok(), "{} grammar should load", g.name());
        }
    }

    #[test]
    fn test_concurrent_init() {
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    init();
                    assert!(Grammar::Go.language().is_ok());
                });
            }
        });
        assert!(is_initialized());
    }
}

//! Subject languages and their tags.

use phf::phf_map;

use crate::source::Grammar;

/// A language the engine can analyze.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Lang {
    Move,
    Solidity,
    Vyper,
    Go,
    Rust,
}

/// Tag → language. Tags are case-sensitive and have no aliases; each tag
/// doubles as the file extension of the language.
static TAGS: phf::Map<&'static str, Lang> = phf_map! {
    "move" => Lang::Move,
    "sol" => Lang::Solidity,
    "vy" => Lang::Vyper,
    "go" => Lang::Go,
    "rs" => Lang::Rust,
};

impl Lang {
    pub const ALL: [Lang; 5] = [Lang::Move, Lang::Solidity, Lang::Vyper, Lang::Go, Lang::Rust];

    /// The registry tag for this language.
    pub fn tag(&self) -> &'static str {
        match self {
            Lang::Move => "move",
            Lang::Solidity => "sol",
            Lang::Vyper => "vy",
            Lang::Go => "go",
            Lang::Rust => "rs",
        }
    }

    /// Human-readable name used in messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            Lang::Move => "Move",
            Lang::Solidity => "Solidity",
            Lang::Vyper => "Vyper",
            Lang::Go => "Go",
            Lang::Rust => "Rust",
        }
    }

    /// Exact tag lookup.
    pub fn from_tag(tag: &str) -> Option<Lang> {
        TAGS.get(tag).copied()
    }

    /// Grammar used by this language's tree detectors, if any.
    pub fn grammar(&self) -> Option<Grammar> {
        match self {
            Lang::Move | Lang::Vyper => None,
            Lang::Solidity => Some(Grammar::Solidity),
            Lang::Go => Some(Grammar::Go),
            Lang::Rust => Some(Grammar::Rust),
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip() {
        for lang in Lang::ALL {
            assert_eq!(Lang::from_tag(lang.tag()), Some(lang));
        }
    }

    #[test]
    fn test_tags_are_case_sensitive() {
        assert_eq!(Lang::from_tag("SOL"), None);
        assert_eq!(Lang::from_tag("solidity"), None);
        assert_eq!(Lang::from_tag(""), None);
    }

    #[test]
    fn test_text_only_languages_have_no_grammar() {
        assert!(Lang::Move.grammar().is_none());
        assert!(Lang::Vyper.grammar().is_none());
        assert_eq!(Lang::Go.grammar(), Some(Grammar::Go));
    }
}

//! Function boundaries for the text detectors.

use lazy_static::lazy_static;
use regex::Regex;

use crate::source::text::{brace_block_end, indent, ScanLine};

lazy_static! {
    static ref MOVE_FUN: Regex = Regex::new(r"\bfun\s+([A-Za-z_]\w*)").unwrap();
    static ref SOL_FUNCTION: Regex =
        Regex::new(r"^\s*(?:function\s+([A-Za-z_]\w*)|(constructor|receive|fallback))\s*\(").unwrap();
    static ref VY_DEF: Regex = Regex::new(r"^\s*def\s+([A-Za-z_]\w*)\s*\(").unwrap();
    static ref VY_INLINE_BODY: Regex = Regex::new(r"\)\s*(?:->\s*[^:]+)?:\s*\S").unwrap();
}

/// A function located by line scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFn {
    pub name: String,
    /// Line of the `fun`/`function`/`def` keyword (0-indexed).
    pub decl: usize,
    /// Signature text: decorators, modifiers and parameters, joined.
    pub header: String,
    /// First line of the body (0-indexed). Equal to `decl` for one-line
    /// functions.
    pub body_start: usize,
    /// Last line of the function (0-indexed).
    pub end: usize,
    /// False for declarations without a body.
    pub has_body: bool,
}

impl TextFn {
    pub fn contains(&self, idx: usize) -> bool {
        idx >= self.decl && idx <= self.end
    }

    /// Non-blank body lines as `(line index, ordinal)` pairs.
    pub fn body_lines(&self, lines: &[ScanLine]) -> Vec<(usize, usize)> {
        if !self.has_body {
            return Vec::new();
        }
        (self.body_start..=self.end.min(lines.len().saturating_sub(1)))
            .filter(|&i| !lines[i].is_blank())
            .enumerate()
            .map(|(ord, i)| (i, ord))
            .collect()
    }

    /// Code of the body lines, joined with newlines.
    pub fn body_code(&self, lines: &[ScanLine]) -> String {
        if !self.has_body {
            return String::new();
        }
        lines[self.body_start..=self.end.min(lines.len() - 1)]
            .iter()
            .map(|l| l.code.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Innermost function containing line `idx`.
pub fn enclosing(fns: &[TextFn], idx: usize) -> Option<&TextFn> {
    fns.iter().rev().find(|f| f.contains(idx))
}

/// Join code from `from` through the first line for which `stop` holds.
fn header_until(lines: &[ScanLine], from: usize, stop: impl Fn(&str) -> bool) -> (String, usize) {
    let mut header = String::new();
    for (i, line) in lines.iter().enumerate().skip(from).take(20) {
        if !header.is_empty() {
            header.push(' ');
        }
        header.push_str(line.code.trim());
        if stop(line.code.as_str()) {
            return (header, i);
        }
    }
    (header, from)
}

/// Brace-delimited functions (Move, Solidity).
fn brace_functions(lines: &[ScanLine], pattern: &Regex) -> Vec<TextFn> {
    let mut fns = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let Some(caps) = pattern.captures(&line.code) else {
            continue;
        };
        let name = caps
            .iter()
            .skip(1)
            .flatten()
            .next()
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        let (header, header_end) = header_until(lines, idx, |c| c.contains('{') || c.contains(';'));

        match brace_block_end(lines, idx) {
            Some(end) => fns.push(TextFn {
                name,
                decl: idx,
                header,
                body_start: header_end,
                end,
                has_body: true,
            }),
            None => fns.push(TextFn {
                name,
                decl: idx,
                header,
                body_start: idx,
                end: header_end,
                has_body: false,
            }),
        }
    }

    fns
}

/// Move `fun` items, including `public`, `entry` and `native` forms.
pub fn move_functions(lines: &[ScanLine]) -> Vec<TextFn> {
    let mut fns = brace_functions(lines, &MOVE_FUN);
    // The regex matches `fun` anywhere; the prefix must hold only modifiers.
    fns.retain(|f| {
        let code = &lines[f.decl].code;
        let before = code.split("fun").next().unwrap_or("");
        before
            .split(|c: char| c.is_whitespace() || c == '(' || c == ')')
            .all(|w| matches!(w, "" | "public" | "entry" | "native" | "inline" | "friend" | "package" | "script"))
    });
    fns
}

/// Solidity functions, constructors and special functions.
pub fn solidity_functions(lines: &[ScanLine]) -> Vec<TextFn> {
    brace_functions(lines, &SOL_FUNCTION)
}

/// Vyper `def` blocks with their decorators.
pub fn vyper_functions(lines: &[ScanLine]) -> Vec<TextFn> {
    let mut fns = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let Some(caps) = VY_DEF.captures(&line.code) else {
            continue;
        };
        let base = indent(&line.code);

        let mut decorators = Vec::new();
        let mut k = idx;
        while k > 0 {
            k -= 1;
            let prev = lines[k].code.trim();
            if prev.is_empty() {
                continue;
            }
            if prev.starts_with('@') {
                decorators.push(prev.to_string());
            } else {
                break;
            }
        }
        decorators.reverse();

        let (signature, header_end) = header_until(lines, idx, |c| {
            c.trim_end().ends_with(':') || VY_INLINE_BODY.is_match(c)
        });
        let mut header = decorators.join(" ");
        if !header.is_empty() {
            header.push(' ');
        }
        header.push_str(&signature);

        let mut end = header_end;
        for (i, l) in lines.iter().enumerate().skip(header_end + 1) {
            if l.is_blank() {
                continue;
            }
            if indent(&l.code) <= base {
                break;
            }
            end = i;
        }

        fns.push(TextFn {
            name: caps[1].to_string(),
            decl: idx,
            header,
            body_start: (header_end + 1).min(end),
            end,
            has_body: end > header_end,
        });
    }

    fns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::text::{scan_lines, CommentStyle};

    fn scan(src: &str, style: CommentStyle) -> Vec<ScanLine> {
        let lines: Vec<&str> = src.lines().collect();
        scan_lines(&lines, style)
    }

    #[test]
    fn test_move_functions() {
        let lines = scan(
            "module 0x1::m {\n    public entry fun deposit(s: &signer) {\n        let x = 1;\n    }\n    native fun h();\n    // fun not_real() {}\n}",
            CommentStyle::CLike,
        );
        let fns = move_functions(&lines);
        assert_eq!(fns.len(), 2);
        assert_eq!(fns[0].name, "deposit");
        assert!(fns[0].header.starts_with("public entry fun deposit"));
        assert_eq!((fns[0].decl, fns[0].end), (1, 3));
        assert!(!fns[1].has_body);
        assert_eq!(enclosing(&fns, 2).map(|f| f.name.as_str()), Some("deposit"));
    }

    #[test]
    fn test_solidity_functions() {
        let lines = scan(
            "contract C {\n  function f(uint a)\n    external\n    onlyOwner\n  {\n    a;\n  }\n  function g() external;\n}",
            CommentStyle::CLikeQuoted,
        );
        let fns = solidity_functions(&lines);
        assert_eq!(fns.len(), 2);
        assert!(fns[0].header.contains("onlyOwner"));
        assert_eq!(fns[0].body_start, 4);
        assert_eq!(fns[0].end, 6);
        assert!(!fns[1].has_body);
    }

    #[test]
    fn test_vyper_functions() {
        let lines = scan(
            "@external\n@nonreentrant(\"lock\")\ndef withdraw(amount: uint256):\n    x: uint256 = 1\n\n    send(msg.sender, amount)\n\n@view\n@external\ndef get() -> uint256:\n    return 1\n",
            CommentStyle::Hash,
        );
        let fns = vyper_functions(&lines);
        assert_eq!(fns.len(), 2);
        assert!(fns[0].header.contains("@nonreentrant"));
        assert_eq!((fns[0].body_start, fns[0].end), (3, 5));
        assert_eq!(fns[0].body_lines(&lines), vec![(3, 0), (5, 1)]);
        assert!(fns[1].header.starts_with("@view @external def get"));
    }
}

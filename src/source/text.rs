//! Line-oriented helpers for the text detectors.
//!
//! [`scan_lines`] splits every source line into a code channel and a
//! comment channel. Both channels keep the byte length of the original
//! line, so offsets found in either one are valid offsets into the source.

/// How a language spells comments and string literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentStyle {
    /// `//` and `/* */` comments, double-quoted strings (Move).
    CLike,
    /// Same as [`CommentStyle::CLike`] with single-quoted strings too (Solidity).
    CLikeQuoted,
    /// `#` comments, `"""` docstrings, single and double quotes (Vyper).
    Hash,
}

impl CommentStyle {
    fn quotes(&self) -> &'static [char] {
        match self {
            CommentStyle::CLike => &['"'],
            CommentStyle::CLikeQuoted | CommentStyle::Hash => &['"', '\''],
        }
    }
}

/// One source line split into code and comment channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanLine {
    /// Code with comments and string contents blanked out. Quote
    /// characters themselves are kept.
    pub code: String,
    /// Comment text only, everything else blanked out.
    pub comment: String,
}

impl ScanLine {
    pub fn is_blank(&self) -> bool {
        self.code.trim().is_empty()
    }
}

fn blank(out: &mut String, ch: char) {
    for _ in 0..ch.len_utf8() {
        out.push(' ');
    }
}

/// Split lines into code and comment channels.
pub fn scan_lines(lines: &[&str], style: CommentStyle) -> Vec<ScanLine> {
    let quotes = style.quotes();
    let mut out = Vec::with_capacity(lines.len());
    let mut block_end: Option<&'static str> = None;

    for line in lines {
        let chars: Vec<(usize, char)> = line.char_indices().collect();
        let mut code = String::with_capacity(line.len());
        let mut comment = String::with_capacity(line.len());
        let mut in_string: Option<char> = None;
        let mut line_comment = false;
        let mut k = 0;

        while k < chars.len() {
            let (idx, ch) = chars[k];
            let rest = &line[idx..];

            if line_comment {
                blank(&mut code, ch);
                comment.push(ch);
                k += 1;
                continue;
            }

            if let Some(end) = block_end {
                if rest.starts_with(end) {
                    for _ in 0..end.len() {
                        code.push(' ');
                        comment.push(' ');
                    }
                    k += end.len();
                    block_end = None;
                } else {
                    blank(&mut code, ch);
                    comment.push(ch);
                    k += 1;
                }
                continue;
            }

            if let Some(q) = in_string {
                blank(&mut comment, ch);
                if ch == '\\' {
                    blank(&mut code, ch);
                    if let Some(&(_, next)) = chars.get(k + 1) {
                        blank(&mut code, next);
                        blank(&mut comment, next);
                    }
                    k += 2;
                    continue;
                }
                if ch == q {
                    code.push(ch);
                    in_string = None;
                } else {
                    blank(&mut code, ch);
                }
                k += 1;
                continue;
            }

            let opener = match style {
                CommentStyle::CLike | CommentStyle::CLikeQuoted => {
                    if rest.starts_with("//") {
                        line_comment = true;
                        continue;
                    }
                    if rest.starts_with("/*") {
                        Some(("/*", "*/"))
                    } else {
                        None
                    }
                }
                CommentStyle::Hash => {
                    if ch == '#' {
                        line_comment = true;
                        continue;
                    }
                    if rest.starts_with("\"\"\"") {
                        Some(("\"\"\"", "\"\"\""))
                    } else if rest.starts_with("'''") {
                        Some(("'''", "'''"))
                    } else {
                        None
                    }
                }
            };

            if let Some((open, close)) = opener {
                for _ in 0..open.len() {
                    code.push(' ');
                    comment.push(' ');
                }
                k += open.len();
                block_end = Some(close);
                continue;
            }

            if quotes.contains(&ch) {
                in_string = Some(ch);
            }
            code.push(ch);
            blank(&mut comment, ch);
            k += 1;
        }

        out.push(ScanLine { code, comment });
    }

    out
}

/// 1-indexed character column of a byte offset in `line`.
pub fn char_col(line: &str, byte_col: usize) -> usize {
    let end = byte_col.min(line.len());
    match line.get(..end) {
        Some(prefix) => prefix.chars().count() + 1,
        None => byte_col + 1,
    }
}

/// Leading whitespace width of a line.
pub fn indent(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Index of the line closing the brace block that opens at or after
/// `start`. Returns `None` when a `;` ends the declaration before any `{`
/// or no brace opens at all.
pub fn brace_block_end(lines: &[ScanLine], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut opened = false;

    for (i, line) in lines.iter().enumerate().skip(start) {
        for ch in line.code.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' if opened => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Some(i);
                    }
                }
                ';' if !opened => return None,
                _ => {}
            }
        }
    }

    if opened {
        Some(lines.len().saturating_sub(1))
    } else {
        None
    }
}

/// Last line index of the indented body under the line at `header`
/// (Python-style blocks). Returns `header` when the body is empty.
pub fn indented_block_end(lines: &[ScanLine], header: usize) -> usize {
    let Some(head) = lines.get(header) else {
        return header;
    };
    let base = indent(&head.code);
    let mut end = header;

    for (i, line) in lines.iter().enumerate().skip(header + 1) {
        if line.is_blank() {
            continue;
        }
        if indent(&line.code) <= base {
            break;
        }
        end = i;
    }

    end
}

const NOT_OPERANDS: &[&str] = &["mut", "return", "let", "if", "else", "while", "abort", "assert", "in"];

/// Byte offsets of binary `+`, `-` and `*` operators (including their
/// compound-assignment forms) in a line of masked code.
pub fn binary_ops(code: &str) -> Vec<(usize, char)> {
    let bytes = code.as_bytes();
    let mut ops = Vec::new();

    for (i, &b) in bytes.iter().enumerate() {
        let op = b as char;
        if op != '+' && op != '-' && op != '*' {
            continue;
        }

        // `->`, `++`, `--`, `**`, `*/`
        let next = bytes.get(i + 1).copied().unwrap_or(b' ');
        if next == b'>' || next == b'/' || (next == b && op != '*') {
            continue;
        }
        if i > 0 && bytes[i - 1] == b {
            continue;
        }
        if op == '*' && (next == b'*' || (i > 0 && bytes[i - 1] == b'*')) {
            continue;
        }

        let before = code[..i].trim_end();
        let Some(prev) = before.chars().last() else {
            continue;
        };
        if !(prev.is_alphanumeric() || prev == '_' || prev == ')' || prev == ']') {
            continue;
        }
        let word: String = before
            .chars()
            .rev()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        if NOT_OPERANDS.contains(&word.as_str()) {
            continue;
        }

        let after = code[i + 1..].trim_start();
        let after = after.strip_prefix('=').map(str::trim_start).unwrap_or(after);
        if after.starts_with('=') {
            continue;
        }
        let Some(first) = after.chars().next() else {
            continue;
        };
        if first.is_alphanumeric() || first == '_' || first == '(' || first == '*' || first == '&' {
            ops.push((i, op));
        }
    }

    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(src: &str, style: CommentStyle) -> Vec<ScanLine> {
        let lines: Vec<&str> = src.lines().collect();
        scan_lines(&lines, style)
    }

    #[test]
    fn test_line_comment_goes_to_comment_channel() {
        let out = scan("let a = 1; // TODO later", CommentStyle::CLike);
        assert_eq!(out[0].code.trim_end(), "let a = 1;");
        assert!(out[0].comment.contains("TODO later"));
        assert_eq!(out[0].code.len(), "let a = 1; // TODO later".len());
    }

    #[test]
    fn test_block_comment_spans_lines() {
        let out = scan("a /* x + y\n still */ b + c", CommentStyle::CLike);
        assert!(!out[0].code.contains('+'));
        assert!(out[1].code.contains("b + c"));
        assert!(!out[1].code.contains("still"));
    }

    #[test]
    fn test_string_contents_are_masked() {
        let out = scan(r#"x = "a + b"; y = c + d;"#, CommentStyle::CLike);
        assert_eq!(binary_ops(&out[0].code).len(), 1);
        assert!(out[0].code.contains(r#""     ""#));
    }

    #[test]
    fn test_hash_comments_and_docstrings() {
        let out = scan("\"\"\"\nTODO: doc\n\"\"\"\nx = 1  # note", CommentStyle::Hash);
        assert!(out[1].code.trim().is_empty());
        assert!(out[1].comment.contains("TODO"));
        assert!(out[3].comment.contains("note"));
    }

    #[test]
    fn test_binary_ops_skip_arrows_and_derefs() {
        assert!(binary_ops("fun f(): u64 -> x").is_empty());
        assert!(binary_ops("*x = 5;").is_empty());
        assert!(binary_ops("let r = &mut *x;").is_empty());
        assert!(binary_ops("return -1").is_empty());
        assert_eq!(binary_ops("a + b").len(), 1);
        assert_eq!(binary_ops("total = total * rate - fee;").len(), 2);
        assert_eq!(binary_ops("count += 1;").len(), 1);
        assert!(binary_ops("i++").is_empty());
    }

    #[test]
    fn test_brace_block_end() {
        let out = scan("fun f() {\n  if (x) {\n  }\n}\nfun g() {}", CommentStyle::CLike);
        assert_eq!(brace_block_end(&out, 0), Some(3));
        assert_eq!(brace_block_end(&out, 4), Some(4));
        let native = scan("native fun h();", CommentStyle::CLike);
        assert_eq!(brace_block_end(&native, 0), None);
    }

    #[test]
    fn test_indented_block_end() {
        let out = scan("def f():\n    a = 1\n\n    b = 2\ndef g():\n    pass", CommentStyle::Hash);
        assert_eq!(indented_block_end(&out, 0), 3);
        assert_eq!(indented_block_end(&out, 4), 5);
    }
}

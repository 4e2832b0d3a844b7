//! Language-aware delimiter scanner used as the structural check for source files.
//!
//! This is not a parser. It verifies that brackets balance and that strings and
//! block comments terminate, which is enough to reject truncated or garbled
//! model output before it reaches the live tree.

/// Lexical rules for one family of languages.
#[derive(Debug, Clone, Copy)]
pub struct Lexicon {
    line_comments: &'static [&'static str],
    block_comment: Option<(&'static str, &'static str)>,
    quotes: &'static [char],
    /// Python-style `'''` / `"""` strings.
    triple_quotes: bool,
    /// Rust: `'` starts a char literal only when it closes nearby; otherwise a lifetime.
    rust_chars: bool,
    /// Rust raw strings `r"..."`, `r#"..."#`.
    raw_strings: bool,
    /// Plain quoted strings may contain newlines.
    multiline_strings: bool,
}

const C_LIKE: Lexicon = Lexicon {
    line_comments: &["//"],
    block_comment: Some(("/*", "*/")),
    quotes: &['"', '\''],
    triple_quotes: false,
    rust_chars: false,
    raw_strings: false,
    multiline_strings: false,
};

const JS_LIKE: Lexicon = Lexicon {
    line_comments: &["//"],
    block_comment: Some(("/*", "*/")),
    quotes: &['"', '\'', '`'],
    triple_quotes: false,
    rust_chars: false,
    raw_strings: false,
    multiline_strings: false,
};

const RUST: Lexicon = Lexicon {
    line_comments: &["//"],
    block_comment: Some(("/*", "*/")),
    quotes: &['"'],
    triple_quotes: false,
    rust_chars: true,
    raw_strings: true,
    multiline_strings: true,
};

const PYTHON: Lexicon = Lexicon {
    line_comments: &["#"],
    block_comment: None,
    quotes: &['"', '\''],
    triple_quotes: true,
    rust_chars: false,
    raw_strings: false,
    multiline_strings: false,
};

const SHELL: Lexicon = Lexicon {
    line_comments: &["#"],
    block_comment: None,
    quotes: &['"', '\''],
    triple_quotes: false,
    rust_chars: false,
    raw_strings: false,
    multiline_strings: true,
};

/// Pick the lexicon for a file extension. `None` means no delimiter check applies.
pub fn lexicon_for(extension: &str) -> Option<Lexicon> {
    match extension {
        "rs" => Some(RUST),
        "py" => Some(PYTHON),
        "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" => Some(JS_LIKE),
        "go" | "c" | "h" | "cc" | "cpp" | "hpp" | "java" | "cs" | "kt" | "swift" => Some(C_LIKE),
        "sh" | "bash" => Some(SHELL),
        _ => None,
    }
}

/// Scan `source` and return the first structural problem, if any.
pub fn check_delimiters(source: &str, lexicon: &Lexicon) -> Result<(), String> {
    let chars: Vec<char> = source.chars().collect();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1usize;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if c == '\n' {
            line += 1;
            i += 1;
            continue;
        }

        if lexicon
            .line_comments
            .iter()
            .any(|marker| starts_with(&chars, i, marker))
        {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if let Some((open, close)) = lexicon.block_comment
            && starts_with(&chars, i, open)
        {
            let start_line = line;
            i += open.chars().count();
            loop {
                if i >= chars.len() {
                    return Err(format!("unterminated block comment opened on line {start_line}"));
                }
                if starts_with(&chars, i, close) {
                    i += close.chars().count();
                    break;
                }
                if chars[i] == '\n' {
                    line += 1;
                }
                i += 1;
            }
            continue;
        }

        if lexicon.raw_strings
            && let Some(hashes) = raw_string_start(&chars, i)
        {
            let start_line = line;
            // Skip `r`, the hashes, and the opening quote.
            i += 2 + hashes;
            loop {
                if i >= chars.len() {
                    return Err(format!("unterminated raw string opened on line {start_line}"));
                }
                if chars[i] == '"' && (1..=hashes).all(|k| chars.get(i + k) == Some(&'#')) {
                    i += 1 + hashes;
                    break;
                }
                if chars[i] == '\n' {
                    line += 1;
                }
                i += 1;
            }
            continue;
        }

        if lexicon.rust_chars && c == '\'' {
            i += rust_quote_len(&chars, i);
            continue;
        }

        if lexicon.quotes.contains(&c) {
            let start_line = line;
            let triple = lexicon.triple_quotes
                && chars.get(i + 1) == Some(&c)
                && chars.get(i + 2) == Some(&c);
            let (next, newlines) = if triple {
                skip_triple_string(&chars, i, c)
                    .ok_or_else(|| format!("unterminated string opened on line {start_line}"))?
            } else {
                skip_string(&chars, i, c, c == '`' || lexicon.multiline_strings)
                    .ok_or_else(|| format!("unterminated string opened on line {start_line}"))?
            };
            line += newlines;
            i = next;
            continue;
        }

        match c {
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => {
                let expected = opener_for(c);
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, open_line)) => {
                        return Err(format!(
                            "mismatched '{c}' on line {line} (expected closer for '{open}' from line {open_line})"
                        ));
                    }
                    None => return Err(format!("unmatched '{c}' on line {line}")),
                }
            }
            _ => {}
        }
        i += 1;
    }

    if let Some((open, open_line)) = stack.pop() {
        return Err(format!("unclosed '{open}' opened on line {open_line}"));
    }
    Ok(())
}

fn opener_for(close: char) -> char {
    match close {
        ')' => '(',
        ']' => '[',
        _ => '{',
    }
}

fn starts_with(chars: &[char], at: usize, marker: &str) -> bool {
    let mut idx = at;
    for m in marker.chars() {
        if chars.get(idx) != Some(&m) {
            return false;
        }
        idx += 1;
    }
    true
}

/// Returns the number of `#` if a raw string starts at `at`.
fn raw_string_start(chars: &[char], at: usize) -> Option<usize> {
    if chars.get(at) != Some(&'r') {
        return None;
    }
    // `r` must not be the tail of an identifier (`bar"`), except a `b` prefix (`br"`).
    if let Some(prev) = at.checked_sub(1).and_then(|p| chars.get(p))
        && (prev.is_alphanumeric() || *prev == '_')
        && *prev != 'b'
    {
        return None;
    }
    let mut hashes = 0;
    while chars.get(at + 1 + hashes) == Some(&'#') {
        hashes += 1;
    }
    (chars.get(at + 1 + hashes) == Some(&'"')).then_some(hashes)
}

/// Length to skip for a `'` in Rust: a full char literal, or just the quote of a lifetime.
fn rust_quote_len(chars: &[char], at: usize) -> usize {
    match (chars.get(at + 1), chars.get(at + 2)) {
        (Some('\\'), _) => {
            // Escaped char literal such as '\n', '\'' or '\u{1F600}'.
            (at + 3..chars.len().min(at + 13))
                .find(|&j| chars[j] == '\'')
                .map(|j| j - at + 1)
                .unwrap_or(1)
        }
        (Some(_), Some('\'')) => 3,
        _ => 1,
    }
}

/// Skip a single-line string (or multi-line for template literals). Returns
/// the index after the closing quote and the number of newlines crossed.
fn skip_string(chars: &[char], at: usize, quote: char, multiline: bool) -> Option<(usize, usize)> {
    let mut i = at + 1;
    let mut newlines = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '\n' if !multiline => return None,
            '\n' => {
                newlines += 1;
                i += 1;
            }
            c if c == quote => return Some((i + 1, newlines)),
            _ => i += 1,
        }
    }
    None
}

fn skip_triple_string(chars: &[char], at: usize, quote: char) -> Option<(usize, usize)> {
    let mut i = at + 3;
    let mut newlines = 0;
    while i + 2 < chars.len() {
        if chars[i] == '\\' {
            i += 2;
            continue;
        }
        if chars[i] == quote && chars[i + 1] == quote && chars[i + 2] == quote {
            return Some((i + 3, newlines));
        }
        if chars[i] == '\n' {
            newlines += 1;
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rust(src: &str) -> Result<(), String> {
        check_delimiters(src, &RUST)
    }

    #[test]
    fn balanced_rust_passes() {
        let src = r##"
/// Doc with a stray ) inside a comment.
fn parse<'a>(input: &'a str) -> Vec<&'a str> {
    let open = '{';
    let esc = '\'';
    let raw = r#"unbalanced { in raw string"#;
    /* block ( comment */
    vec![input, "str with }", raw]
}
"##;
        assert_eq!(rust(src), Ok(()));
    }

    #[test]
    fn unclosed_brace_is_reported_with_line() {
        let err = rust("fn main() {\n    let x = 1;\n").unwrap_err();
        assert_eq!(err, "unclosed '{' opened on line 1");
    }

    #[test]
    fn mismatched_closer_is_reported() {
        let err = rust("fn main() { let v = vec![1, 2); }").unwrap_err();
        assert!(err.starts_with("mismatched ')'"), "{err}");
    }

    #[test]
    fn stray_closer_is_reported() {
        assert_eq!(rust("}"), Err("unmatched '}' on line 1".to_string()));
    }

    #[test]
    fn unterminated_block_comment_fails() {
        assert!(rust("/* never closed\nfn a() {}").is_err());
    }

    #[test]
    fn python_triple_quotes_and_comments() {
        let src = "def f():\n    \"\"\"Doc with ( and [\n    more\"\"\"\n    # ) stray in comment\n    return {'a': [1, 2]}\n";
        assert_eq!(check_delimiters(src, &PYTHON), Ok(()));
    }

    #[test]
    fn python_unterminated_string_fails() {
        let err = check_delimiters("x = 'abc\ny = 2\n", &PYTHON).unwrap_err();
        assert!(err.contains("unterminated string"), "{err}");
    }

    #[test]
    fn js_template_literals_span_lines() {
        let src = "const s = `line one\n${a}\nline three`;\nfunction f() { return [s]; }\n";
        assert_eq!(check_delimiters(src, &JS_LIKE), Ok(()));
    }

    #[test]
    fn unknown_extensions_have_no_lexicon() {
        assert!(lexicon_for("md").is_none());
        assert!(lexicon_for("rs").is_some());
    }
}

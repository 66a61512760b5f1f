//! Statement splitting for `sqlstatementlist` fragments.
//!
//! # Rules
//!
//! - A symbolic delimiter (`;`, `/`, `$$`) splits wherever it appears in
//!   code. Occurrences inside single-quoted literals, double-quoted
//!   identifiers, `--` line comments and `/* */` block comments are ignored.
//! - A word delimiter (`GO`) splits only where it stands alone on a line,
//!   compared case-insensitively.
//! - Statements are trimmed. Statements holding nothing but whitespace and
//!   comments are dropped.
//! - With `keep_delimiter` the delimiter that terminated a statement is
//!   appended back to it. The unterminated tail never gets one.

/// Split fragment text into executable statements
pub fn split_statements(text: &str, delimiter: &str, keep_delimiter: bool) -> Vec<String> {
    if delimiter.is_empty() {
        return finish(vec![(text, false)], delimiter, keep_delimiter, "");
    }
    if is_word_delimiter(delimiter) {
        finish(split_on_lines(text, delimiter), delimiter, keep_delimiter, "\n")
    } else {
        finish(split_in_code(text, delimiter), delimiter, keep_delimiter, "")
    }
}

/// Returns true if the delimiter is alphanumeric (e.g. `GO`)
fn is_word_delimiter(delimiter: &str) -> bool {
    delimiter.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Scan {
    Code,
    Literal,
    Identifier,
    LineComment,
    BlockComment,
}

/// Raw pieces paired with "was terminated by the delimiter"
fn split_in_code<'a>(text: &'a str, delimiter: &str) -> Vec<(&'a str, bool)> {
    let bytes = text.as_bytes();
    let delim = delimiter.as_bytes();
    let mut pieces = Vec::new();
    let mut state = Scan::Code;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match state {
            Scan::Code => {
                if bytes[i..].starts_with(delim) {
                    pieces.push((&text[start..i], true));
                    i += delim.len();
                    start = i;
                    continue;
                }
                match bytes[i] {
                    b'\'' => state = Scan::Literal,
                    b'"' => state = Scan::Identifier,
                    b'-' if bytes.get(i + 1) == Some(&b'-') => {
                        state = Scan::LineComment;
                        i += 2;
                        continue;
                    }
                    b'/' if bytes.get(i + 1) == Some(&b'*') => {
                        state = Scan::BlockComment;
                        i += 2;
                        continue;
                    }
                    _ => {}
                }
            }
            // A doubled quote closes and immediately reopens the literal
            Scan::Literal if bytes[i] == b'\'' => state = Scan::Code,
            Scan::Identifier if bytes[i] == b'"' => state = Scan::Code,
            Scan::LineComment if bytes[i] == b'\n' => state = Scan::Code,
            Scan::BlockComment if bytes[i..].starts_with(b"*/") => {
                state = Scan::Code;
                i += 2;
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    pieces.push((&text[start..], false));
    pieces
}

fn split_on_lines<'a>(text: &'a str, delimiter: &str) -> Vec<(&'a str, bool)> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        if line.trim().eq_ignore_ascii_case(delimiter) {
            pieces.push((&text[start..offset], true));
            start = offset + line.len();
        }
        offset += line.len();
    }

    pieces.push((&text[start..], false));
    pieces
}

fn finish(pieces: Vec<(&str, bool)>, delimiter: &str, keep: bool, joiner: &str) -> Vec<String> {
    pieces
        .into_iter()
        .filter(|(piece, _)| has_code(piece))
        .map(|(piece, terminated)| {
            let statement = piece.trim();
            if keep && terminated {
                format!("{}{}{}", statement, joiner, delimiter)
            } else {
                statement.to_string()
            }
        })
        .collect()
}

/// Returns true if `text` holds anything besides whitespace and comments
fn has_code(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(b"--") {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
        } else if bytes[i..].starts_with(b"/*") {
            i += 2;
            while i < bytes.len() && !bytes[i..].starts_with(b"*/") {
                i += 1;
            }
            i += 2;
        } else if bytes[i].is_ascii_whitespace() {
            i += 1;
        } else {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_delimiter_gives_two_statements() {
        let sql = "CREATE TABLE a (id INT);\nINSERT INTO a VALUES (1);\n";
        let statements = split_statements(sql, ";", false);
        assert_eq!(
            statements,
            vec!["CREATE TABLE a (id INT)", "INSERT INTO a VALUES (1)"]
        );
    }

    #[test]
    fn test_keep_delimiter_appends_terminator() {
        let statements = split_statements("SELECT 1; SELECT 2", ";", true);
        assert_eq!(statements, vec!["SELECT 1;", "SELECT 2"]);
    }

    #[test]
    fn test_delimiter_inside_literal_ignored() {
        let sql = "INSERT INTO t VALUES ('a;b');INSERT INTO t VALUES ('it''s; fine');";
        let statements = split_statements(sql, ";", false);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[1], "INSERT INTO t VALUES ('it''s; fine')");
    }

    #[test]
    fn test_delimiter_inside_comments_ignored() {
        let sql = "-- setup; first\nCREATE TABLE a (id INT); /* x; y */ DROP TABLE b;";
        let statements = split_statements(sql, ";", false);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("-- setup; first"));
        assert_eq!(statements[1], "/* x; y */ DROP TABLE b");
    }

    #[test]
    fn test_empty_and_comment_only_statements_dropped() {
        let sql = ";;  ;\nSELECT 1;\n-- trailing note\n";
        assert_eq!(split_statements(sql, ";", false), vec!["SELECT 1"]);
    }

    #[test]
    fn test_multi_character_delimiter() {
        let sql = "CREATE FUNCTION f() AS 'x;y' $$ SELECT 1 $$";
        let statements = split_statements(sql, "$$", true);
        assert_eq!(statements, vec!["CREATE FUNCTION f() AS 'x;y'$$", "SELECT 1$$"]);
    }

    #[test]
    fn test_word_delimiter_on_own_line() {
        let sql = "CREATE TABLE a (id INT)\nGO\nINSERT INTO a VALUES (1) -- GOod\ngo\n";
        let statements = split_statements(sql, "GO", false);
        assert_eq!(
            statements,
            vec!["CREATE TABLE a (id INT)", "INSERT INTO a VALUES (1) -- GOod"]
        );

        let kept = split_statements(sql, "GO", true);
        assert_eq!(kept[0], "CREATE TABLE a (id INT)\nGO");
    }

    #[test]
    fn test_crlf_input() {
        let sql = "SELECT 1;\r\nSELECT 2;\r\n";
        assert_eq!(split_statements(sql, ";", false), vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn test_no_delimiter_present() {
        assert_eq!(split_statements("  SELECT 1  ", ";", true), vec!["SELECT 1"]);
        assert!(split_statements("   \n", ";", false).is_empty());
    }
}

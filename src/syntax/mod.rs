//! The WDL parser.
//!
//! Lexing and parsing run over a [`nom_locate::LocatedSpan`] cursor;
//! recursive descent with a Pratt expression core. The grammar is versioned:
//! the `version` clause is scanned first (defaulting to `draft-2` with a
//! warning) and gates version-specific constructs.

pub mod doc;
pub mod expr;
pub mod stmt;
pub mod task;

use crate::ast::{Document, LanguageVersion};
use crate::error::{Error, SourceLoc};
use nom_locate::LocatedSpan;
use tracing::warn;

pub type Span<'a> = LocatedSpan<&'a str>;

/// Words that may not be used as identifiers.
const RESERVED: &[&str] = &[
    "if", "then", "else", "true", "false", "None", "task", "workflow", "call", "scatter",
    "import", "version", "input", "output", "command", "runtime", "meta", "parameter_meta",
    "struct", "as", "in", "alias", "after", "object", "hints", "Array", "Map", "Pair", "String",
    "Int", "Float", "Boolean", "File", "Directory", "Object",
];

pub fn is_reserved(word: &str) -> bool {
    RESERVED.contains(&word)
}

/// Parse a complete WDL document from source text.
///
/// `uri` is the import spelling; `abspath` the resolved location recorded in
/// source positions.
pub fn parse_document(source: &str, uri: &str, abspath: &str) -> Result<Document, Error> {
    let (version, declared_version) = scan_version(source, uri);
    if declared_version.is_none() {
        warn!(target: "wdlrun::syntax", uri, "no version declaration; defaulting to draft-2");
    }
    let mut cur = Cursor::new(source, uri, abspath, version);
    let mut doc = doc::document(&mut cur, declared_version)?;
    doc.source_text = source.to_string();
    Ok(doc)
}

/// Find the `version` clause: the first non-comment, non-blank line.
fn scan_version(source: &str, _uri: &str) -> (LanguageVersion, Option<String>) {
    for line in source.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("version") {
            if rest.starts_with(char::is_whitespace) {
                let spelled = rest.trim().split('#').next().unwrap_or("").trim();
                if let Some(v) = LanguageVersion::parse(spelled) {
                    return (v, Some(spelled.to_string()));
                }
                // An unrecognized version still counts as declared; the
                // newest grammar is the best-effort choice.
                return (LanguageVersion::Development, Some(spelled.to_string()));
            }
        }
        break;
    }
    (LanguageVersion::Draft2, None)
}

/// Parsing cursor: the remaining input plus document identity.
pub struct Cursor<'a> {
    input: Span<'a>,
    uri: String,
    abspath: String,
    version: LanguageVersion,
}

impl<'a> Cursor<'a> {
    pub fn new(source: &'a str, uri: &str, abspath: &str, version: LanguageVersion) -> Self {
        Self {
            input: Span::new(source),
            uri: uri.to_string(),
            abspath: abspath.to_string(),
            version,
        }
    }

    pub fn version(&self) -> LanguageVersion {
        self.version
    }

    pub fn rest(&self) -> &'a str {
        *self.input.fragment()
    }

    /// Current position as a zero-width location.
    pub fn loc(&self) -> SourceLoc {
        let line = self.input.location_line();
        let column = self.input.get_utf8_column() as u32;
        SourceLoc {
            uri: self.uri.clone(),
            abspath: self.abspath.clone(),
            line,
            column,
            end_line: line,
            end_column: column,
        }
    }

    /// A span from `start` to the current position.
    pub fn span_from(&self, start: &SourceLoc) -> SourceLoc {
        let mut loc = start.clone();
        loc.end_line = self.input.location_line();
        loc.end_column = self.input.get_utf8_column() as u32;
        loc
    }

    pub fn error(&self, message: impl Into<String>) -> Error {
        Error::syntax(self.loc(), message)
    }

    /// Advance over `n` bytes (must fall on a char boundary).
    pub fn advance(&mut self, n: usize) {
        let (rest, _taken) = nom::InputTake::take_split(&self.input, n);
        self.input = rest;
    }

    /// Consume whitespace and `#` comments.
    pub fn skip_trivia(&mut self) {
        loop {
            let frag = *self.input.fragment();
            let ws_len = frag
                .char_indices()
                .find(|(_, c)| !c.is_whitespace())
                .map(|(i, _)| i)
                .unwrap_or(frag.len());
            if ws_len > 0 {
                self.advance(ws_len);
            }
            let frag = *self.input.fragment();
            if frag.starts_with('#') {
                let end = frag.find('\n').unwrap_or(frag.len());
                self.advance(end);
            } else {
                break;
            }
        }
    }

    pub fn at_end(&mut self) -> bool {
        self.skip_trivia();
        self.input.fragment().is_empty()
    }

    pub fn peek_char(&self) -> Option<char> {
        self.input.fragment().chars().next()
    }

    /// After trivia, does the input begin with `s`?
    pub fn peek_sym(&mut self, s: &str) -> bool {
        self.skip_trivia();
        self.input.fragment().starts_with(s)
    }

    /// Consume `s` if present (no identifier-boundary check; order longer
    /// operators first at call sites).
    pub fn try_sym(&mut self, s: &str) -> bool {
        if self.peek_sym(s) {
            self.advance(s.len());
            true
        } else {
            false
        }
    }

    pub fn expect_sym(&mut self, s: &str) -> Result<(), Error> {
        if self.try_sym(s) {
            Ok(())
        } else {
            let found: String = self.input.fragment().chars().take(12).collect();
            Err(self.error(format!("expected '{}' but found '{}'", s, found)))
        }
    }

    /// After trivia, does a whole word `kw` follow?
    pub fn peek_keyword(&mut self, kw: &str) -> bool {
        self.skip_trivia();
        let frag = *self.input.fragment();
        frag.strip_prefix(kw)
            .map(|rest| !rest.starts_with(|c: char| c.is_alphanumeric() || c == '_'))
            .unwrap_or(false)
    }

    pub fn try_keyword(&mut self, kw: &str) -> bool {
        if self.peek_keyword(kw) {
            self.advance(kw.len());
            true
        } else {
            false
        }
    }

    pub fn expect_keyword(&mut self, kw: &str) -> Result<(), Error> {
        if self.try_keyword(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", kw)))
        }
    }

    /// Parse an identifier (rejecting reserved words).
    pub fn ident(&mut self) -> Result<String, Error> {
        let word = self.word()?;
        if is_reserved(&word) {
            return Err(self.error(format!("'{}' is a reserved word", word)));
        }
        Ok(word)
    }

    /// Parse an identifier-shaped word without the reserved check.
    pub fn word(&mut self) -> Result<String, Error> {
        self.skip_trivia();
        let frag = *self.input.fragment();
        match frag.chars().next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return Err(self.error("expected identifier")),
        }
        let end = frag
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
            .map(|(i, _)| i)
            .unwrap_or(frag.len());
        let word = frag[..end].to_string();
        self.advance(end);
        Ok(word)
    }

    /// Parse a possibly-dotted name (`ns.task`).
    pub fn dotted_name(&mut self) -> Result<String, Error> {
        let mut name = self.ident()?;
        while self.input.fragment().starts_with('.') {
            self.advance(1);
            name.push('.');
            name.push_str(&self.ident()?);
        }
        Ok(name)
    }

    /// Parse an integer or float literal (no sign).
    pub fn number(&mut self) -> Result<NumberLit, Error> {
        self.skip_trivia();
        let frag = *self.input.fragment();
        let digits_end = frag
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(frag.len());
        if digits_end == 0 {
            return Err(self.error("expected number"));
        }
        let mut end = digits_end;
        let mut is_float = false;
        let bytes = frag.as_bytes();
        if end < bytes.len() && bytes[end] == b'.' && frag[end + 1..].starts_with(|c: char| c.is_ascii_digit())
        {
            is_float = true;
            end += 1;
            end += frag[end..]
                .char_indices()
                .find(|(_, c)| !c.is_ascii_digit())
                .map(|(i, _)| i)
                .unwrap_or(frag.len() - end);
        }
        if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
            let mut exp_end = end + 1;
            if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
                exp_end += 1;
            }
            let exp_digits = frag[exp_end..]
                .char_indices()
                .find(|(_, c)| !c.is_ascii_digit())
                .map(|(i, _)| i)
                .unwrap_or(frag.len() - exp_end);
            if exp_digits > 0 {
                is_float = true;
                end = exp_end + exp_digits;
            }
        }
        let text = &frag[..end];
        let lit = if is_float {
            NumberLit::Float(text.parse::<f64>().map_err(|_| {
                self.error(format!("malformed float literal {}", text))
            })?)
        } else {
            NumberLit::Int(text.parse::<i64>().map_err(|_| {
                self.error(format!("integer literal out of range: {}", text))
            })?)
        };
        self.advance(end);
        Ok(lit)
    }
}

/// A scanned numeric literal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumberLit {
    Int(i64),
    Float(f64),
}

/// Strip the longest common leading-whitespace prefix of the non-empty lines
/// of a command or multi-line string body, honoring `\<newline>` line
/// continuation. Leading and trailing blank lines are removed.
///
/// With `join_continuations` (string literals), a backslash-newline and the
/// following indentation are deleted; without it (command templates, where
/// the shell owns continuation semantics), continued lines are merely
/// excluded from the indent computation.
pub fn dedent_parts(parts: &mut Vec<crate::ast::StringPart>, join_continuations: bool) {
    use crate::ast::StringPart;

    if join_continuations {
        for part in parts.iter_mut() {
            if let StringPart::Text(text) = part {
                let mut joined = String::with_capacity(text.len());
                let mut chars = text.chars().peekable();
                while let Some(c) = chars.next() {
                    if c == '\\' && chars.peek() == Some(&'\n') {
                        chars.next();
                        // Swallow the continuation's leading indentation too.
                        while matches!(chars.peek(), Some(' ') | Some('\t')) {
                            chars.next();
                        }
                    } else {
                        joined.push(c);
                    }
                }
                *text = joined;
            }
        }
    }

    // Collect the indentation of every line start that begins actual
    // content. Lines continued with a trailing backslash do not start fresh
    // content, so their indentation is skipped.
    let mut indents: Vec<String> = Vec::new();
    let mut at_line_start = true;
    let mut continued = false;
    for (index, part) in parts.iter().enumerate() {
        match part {
            StringPart::Text(text) => {
                let mut rest = text.as_str();
                loop {
                    if at_line_start {
                        let indent_len = rest
                            .char_indices()
                            .find(|(_, c)| *c != ' ' && *c != '\t')
                            .map(|(i, _)| i)
                            .unwrap_or(rest.len());
                        let (indent, after) = rest.split_at(indent_len);
                        let line_has_content = if after.is_empty() {
                            // Text ends mid-indentation: the line is
                            // non-empty only when a placeholder follows.
                            index + 1 < parts.len()
                        } else {
                            !(after.starts_with('\n') || after.starts_with("\r\n"))
                        };
                        if line_has_content && !continued {
                            indents.push(indent.to_string());
                        }
                        at_line_start = false;
                        rest = after;
                    }
                    match rest.find('\n') {
                        Some(i) => {
                            continued = rest[..i].trim_end_matches('\r').ends_with('\\');
                            rest = &rest[i + 1..];
                            at_line_start = true;
                        }
                        None => break,
                    }
                }
            }
            StringPart::Placeholder { .. } => {
                at_line_start = false;
            }
        }
    }

    let common: String = match indents.iter().min_by_key(|s| s.len()) {
        Some(shortest) => {
            let mut prefix = shortest.clone();
            for indent in &indents {
                while !indent.starts_with(&prefix) {
                    prefix.pop();
                }
            }
            prefix
        }
        None => String::new(),
    };

    if !common.is_empty() {
        let mut at_line_start = true;
        let mut continued = false;
        for part in parts.iter_mut() {
            match part {
                StringPart::Text(text) => {
                    let mut out = String::with_capacity(text.len());
                    let mut rest = text.as_str();
                    loop {
                        if at_line_start {
                            if !continued {
                                if let Some(stripped) = rest.strip_prefix(common.as_str()) {
                                    rest = stripped;
                                }
                            }
                            at_line_start = false;
                        }
                        match rest.find('\n') {
                            Some(i) => {
                                out.push_str(&rest[..=i]);
                                continued = rest[..i].trim_end_matches('\r').ends_with('\\');
                                rest = &rest[i + 1..];
                                at_line_start = true;
                            }
                            None => {
                                out.push_str(rest);
                                break;
                            }
                        }
                    }
                    *text = out;
                }
                StringPart::Placeholder { .. } => {
                    at_line_start = false;
                }
            }
        }
    }

    // Trim a leading newline after the opener and trailing blank space
    // before the closer.
    if let Some(StringPart::Text(first)) = parts.first_mut() {
        if let Some(stripped) = first.strip_prefix('\n') {
            *first = stripped.to_string();
        } else if let Some(stripped) = first.strip_prefix("\r\n") {
            *first = stripped.to_string();
        }
    }
    if let Some(StringPart::Text(last)) = parts.last_mut() {
        let trimmed = last.trim_end_matches([' ', '\t']);
        if trimmed.ends_with('\n') || trimmed.len() != last.len() {
            *last = trimmed.to_string();
        }
    }
    parts.retain(|p| !matches!(p, StringPart::Text(t) if t.is_empty()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::StringPart;

    #[test]
    fn version_scan_finds_declaration() {
        let (v, declared) = scan_version("# hi\n\nversion 1.1\ntask t {}", "t.wdl");
        assert_eq!(v, LanguageVersion::V1_1);
        assert_eq!(declared.as_deref(), Some("1.1"));
    }

    #[test]
    fn version_scan_defaults_to_draft2() {
        let (v, declared) = scan_version("task t {}", "t.wdl");
        assert_eq!(v, LanguageVersion::Draft2);
        assert!(declared.is_none());
    }

    #[test]
    fn cursor_trivia_and_tokens() {
        let mut cur = Cursor::new(
            "  # comment\n  foo = 12",
            "t.wdl",
            "t.wdl",
            LanguageVersion::V1_0,
        );
        assert_eq!(cur.ident().unwrap(), "foo");
        assert!(cur.try_sym("="));
        assert_eq!(cur.number().unwrap(), NumberLit::Int(12));
        assert!(cur.at_end());
    }

    #[test]
    fn reserved_words_rejected_as_idents() {
        let mut cur = Cursor::new("workflow", "t.wdl", "t.wdl", LanguageVersion::V1_0);
        assert!(cur.ident().is_err());
    }

    #[test]
    fn number_forms() {
        let mut cur = Cursor::new("3.25e2", "t.wdl", "t.wdl", LanguageVersion::V1_0);
        assert_eq!(cur.number().unwrap(), NumberLit::Float(325.0));
        let mut cur = Cursor::new("7", "t.wdl", "t.wdl", LanguageVersion::V1_0);
        assert_eq!(cur.number().unwrap(), NumberLit::Int(7));
    }

    #[test]
    fn keyword_boundary() {
        let mut cur = Cursor::new("inputs", "t.wdl", "t.wdl", LanguageVersion::V1_0);
        assert!(!cur.peek_keyword("input"));
        let mut cur = Cursor::new("input {", "t.wdl", "t.wdl", LanguageVersion::V1_0);
        assert!(cur.try_keyword("input"));
    }

    #[test]
    fn loc_tracks_lines() {
        let mut cur = Cursor::new("\n\n  x", "t.wdl", "t.wdl", LanguageVersion::V1_0);
        cur.skip_trivia();
        let loc = cur.loc();
        assert_eq!(loc.line, 3);
        assert_eq!(loc.column, 3);
    }

    #[test]
    fn dedent_strips_common_indent() {
        let mut parts = vec![StringPart::Text(
            "\n        echo hello\n        echo world\n    ".to_string(),
        )];
        dedent_parts(&mut parts, false);
        match &parts[0] {
            StringPart::Text(t) => assert_eq!(t, "echo hello\necho world\n"),
            _ => panic!("expected text"),
        }
    }

    #[test]
    fn dedent_keeps_relative_indent() {
        let mut parts = vec![StringPart::Text(
            "\n  if true; then\n    echo yes\n  fi\n".to_string(),
        )];
        dedent_parts(&mut parts, false);
        match &parts[0] {
            StringPart::Text(t) => assert_eq!(t, "if true; then\n  echo yes\nfi\n"),
            _ => panic!("expected text"),
        }
    }

    #[test]
    fn dedent_joins_continuations_in_strings() {
        let mut parts = vec![StringPart::Text(
            "\n  echo one \\\n    two\n".to_string(),
        )];
        dedent_parts(&mut parts, true);
        match &parts[0] {
            StringPart::Text(t) => assert_eq!(t, "echo one two\n"),
            _ => panic!("expected text"),
        }
    }

    #[test]
    fn dedent_preserves_continuations_in_commands() {
        let mut parts = vec![StringPart::Text(
            "\n  echo one \\\n    two\n  echo three\n".to_string(),
        )];
        dedent_parts(&mut parts, false);
        match &parts[0] {
            StringPart::Text(t) => assert_eq!(t, "echo one \\\n    two\necho three\n"),
            _ => panic!("expected text"),
        }
    }
}

use std::io::{self, Read};
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use tracing::warn;

use crate::prefixes::{Iri, PrefixTable};

/// Read buffer size for the term lexer (1 MB, one per worker)
const SOURCE_BUFFER_SIZE: usize = 1024 * 1024;

/// Byte stream with an absolute position counter.
///
/// Read errors after the stream has started are recorded and reported once
/// parsing drains, so that a lexing pass never panics mid-shard.
pub struct ByteSource<R: Read> {
    inner: R,
    buf: Vec<u8>,
    len: usize,
    next: usize,
    pos: u64,
    io_error: Option<io::Error>,
}

impl<R: Read> ByteSource<R> {
    pub fn new(inner: R) -> Self {
        Self::with_position(inner, 0)
    }

    /// `pos` is the absolute file offset of the first byte `inner` will
    /// produce, so shard workers report dump-relative positions.
    pub fn with_position(inner: R, pos: u64) -> Self {
        ByteSource {
            inner,
            buf: vec![0u8; SOURCE_BUFFER_SIZE],
            len: 0,
            next: 0,
            pos,
            io_error: None,
        }
    }

    fn next_byte(&mut self) -> Option<u8> {
        if self.next >= self.len {
            if self.io_error.is_some() {
                return None;
            }
            loop {
                match self.inner.read(&mut self.buf) {
                    Ok(0) => return None,
                    Ok(n) => {
                        self.len = n;
                        self.next = 0;
                        break;
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        self.io_error = Some(e);
                        return None;
                    }
                }
            }
        }
        let b = self.buf[self.next];
        self.next += 1;
        self.pos += 1;
        Some(b)
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn take_io_error(&mut self) -> Option<io::Error> {
        self.io_error.take()
    }
}

/// Statement separators recognized by the lexer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Sep {
    Dot,
    Comma,
    Semicolon,
    OpenBracket,
    CloseBracket,
    OpenParen,
    CloseParen,
}

impl Sep {
    fn from_byte(b: u8) -> Option<Sep> {
        match b {
            b'.' => Some(Sep::Dot),
            b',' => Some(Sep::Comma),
            b';' => Some(Sep::Semicolon),
            b'[' => Some(Sep::OpenBracket),
            b']' => Some(Sep::CloseBracket),
            b'(' => Some(Sep::OpenParen),
            b')' => Some(Sep::CloseParen),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Sep::Dot => '.',
            Sep::Comma => ',',
            Sep::Semicolon => ';',
            Sep::OpenBracket => '[',
            Sep::CloseBracket => ']',
            Sep::OpenParen => '(',
            Sep::CloseParen => ')',
        }
    }
}

/// A literal value with optional language tag or datatype.
///
/// The value never contains raw line breaks, tabs, or double quotes; the
/// lexer normalizes those during scanning.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Literal {
    pub value: String,
    pub language: Option<String>,
    pub datatype: Option<Iri>,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.value)?;
        if let Some(lang) = &self.language {
            write!(f, "@{}", lang)?;
        } else if let Some(dt) = &self.datatype {
            write!(f, "^^{}", dt)?;
        }
        Ok(())
    }
}

/// One Turtle term: an IRI, a literal, or a separator.
/// End of input is the lexer iterator returning `None`.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Term {
    Iri(Iri),
    Literal(Literal),
    Sep(Sep),
}

impl Term {
    pub fn iri(text: &str) -> Term {
        Term::Iri(Iri::prefixed(text))
    }

    pub fn literal(value: &str) -> Term {
        Term::Literal(Literal {
            value: value.to_string(),
            language: None,
            datatype: None,
        })
    }

    pub fn lang_literal(value: &str, language: &str) -> Term {
        Term::Literal(Literal {
            value: value.to_string(),
            language: Some(language.to_string()),
            datatype: None,
        })
    }

    pub fn as_iri(&self) -> Option<&Iri> {
        match self {
            Term::Iri(iri) => Some(iri),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Term::Literal(lit) => Some(lit),
            _ => None,
        }
    }

    pub fn is_sep(&self, sep: Sep) -> bool {
        matches!(self, Term::Sep(s) if *s == sep)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => iri.fmt(f),
            Term::Literal(lit) => lit.fmt(f),
            Term::Sep(sep) => write!(f, "{}", sep.as_char()),
        }
    }
}

/// Streaming lexer over the terms of a Turtle/N-Triples byte stream.
///
/// All structural characters are ASCII, so the scan runs on bytes and
/// multi-byte UTF-8 sequences pass through inside tokens untouched.
pub struct TermReader<R: Read> {
    source: ByteSource<R>,
    pushback: Option<u8>,
    prefixes: Arc<PrefixTable>,
    lang_re: Regex,
    format_warnings: u64,
}

impl<R: Read> TermReader<R> {
    pub fn new(inner: R, prefixes: Arc<PrefixTable>) -> Self {
        Self::with_position(inner, 0, prefixes)
    }

    pub fn with_position(inner: R, pos: u64, prefixes: Arc<PrefixTable>) -> Self {
        TermReader {
            source: ByteSource::with_position(inner, pos),
            pushback: None,
            prefixes,
            lang_re: Regex::new("^[A-Za-z0-9-]{2,20}$").unwrap(),
            format_warnings: 0,
        }
    }

    /// Absolute byte offset of the next unread byte.
    pub fn byte_pos(&self) -> u64 {
        self.source.position() - self.pushback.is_some() as u64
    }

    /// Count of malformed tokens seen so far (none of them fatal).
    pub fn format_warnings(&self) -> u64 {
        self.format_warnings
    }

    pub fn take_io_error(&mut self) -> Option<io::Error> {
        self.source.take_io_error()
    }

    fn next_byte(&mut self) -> Option<u8> {
        match self.pushback.take() {
            Some(b) => Some(b),
            None => self.source.next_byte(),
        }
    }

    fn push_back(&mut self, b: u8) {
        debug_assert!(self.pushback.is_none());
        self.pushback = Some(b);
    }

    fn record_warning(&mut self, context: &str, token: &str) {
        self.format_warnings += 1;
        warn!("{}: {:?}", context, token);
    }

    /// Skip whitespace and `#` comments; returns the first byte of a term.
    fn skip_to_term(&mut self) -> Option<u8> {
        loop {
            let b = self.next_byte()?;
            if b == b'#' {
                while let Some(c) = self.next_byte() {
                    if c == b'\n' {
                        break;
                    }
                }
            } else if !b.is_ascii_whitespace() {
                return Some(b);
            }
        }
    }

    fn read_short_string(&mut self, first: u8) -> Vec<u8> {
        let mut raw = Vec::new();
        let mut b = first;
        loop {
            match b {
                b'"' => break,
                b'\\' => {
                    raw.push(b'\\');
                    match self.next_byte() {
                        Some(e) => raw.push(e),
                        None => {
                            let t = String::from_utf8_lossy(&raw).into_owned();
                            self.record_warning("Unexpected end of file in literal", &t);
                            break;
                        }
                    }
                }
                _ => raw.push(b),
            }
            b = match self.next_byte() {
                Some(nb) => nb,
                None => {
                    let t = String::from_utf8_lossy(&raw).into_owned();
                    self.record_warning("Unexpected end of file in literal", &t);
                    break;
                }
            };
        }
        raw
    }

    fn read_long_string(&mut self) -> Vec<u8> {
        let mut raw = Vec::new();
        loop {
            match self.next_byte() {
                Some(b) => {
                    raw.push(b);
                    if raw.ends_with(b"\"\"\"") {
                        raw.truncate(raw.len() - 3);
                        break;
                    }
                }
                None => {
                    let t = String::from_utf8_lossy(&raw).into_owned();
                    self.record_warning("Unexpected end of file in literal", &t);
                    break;
                }
            }
        }
        raw
    }

    fn read_literal(&mut self) -> Term {
        // Distinguish "", "..." and """...""" by two bytes of look-ahead
        let raw = match self.next_byte() {
            Some(b'"') => match self.next_byte() {
                Some(b'"') => self.read_long_string(),
                Some(other) => {
                    self.push_back(other);
                    Vec::new()
                }
                None => Vec::new(),
            },
            Some(first) => self.read_short_string(first),
            None => {
                self.record_warning("Unexpected end of file in literal", "");
                Vec::new()
            }
        };
        let value = normalize_literal(&raw, &mut self.format_warnings);

        match self.next_byte() {
            Some(b'^') => {
                match self.next_byte() {
                    Some(b'^') => {}
                    Some(other) => {
                        self.record_warning("Expected ^^ after literal", &value);
                        self.push_back(other);
                    }
                    None => self.record_warning("Unexpected end of file in datatype of", &value),
                }
                let datatype = self.read_datatype(&value);
                Term::Literal(Literal {
                    value,
                    language: None,
                    datatype,
                })
            }
            Some(b'@') => {
                let mut lang = String::new();
                loop {
                    match self.next_byte() {
                        Some(b) if b == b'-' || b.is_ascii_alphanumeric() => {
                            lang.push(b as char)
                        }
                        Some(other) => {
                            self.push_back(other);
                            break;
                        }
                        None => {
                            self.record_warning(
                                "Unexpected end of file in language of",
                                &value,
                            );
                            break;
                        }
                    }
                }
                if !self.lang_re.is_match(&lang) {
                    self.record_warning("Invalid literal language", &lang);
                }
                Term::Literal(Literal {
                    value,
                    language: Some(lang),
                    datatype: None,
                })
            }
            Some(other) => {
                self.push_back(other);
                Term::Literal(Literal {
                    value,
                    language: None,
                    datatype: None,
                })
            }
            None => Term::Literal(Literal {
                value,
                language: None,
                datatype: None,
            }),
        }
    }

    fn read_datatype(&mut self, literal: &str) -> Option<Iri> {
        let text = match self.next_byte() {
            Some(b'<') => {
                let mut uri = Vec::new();
                loop {
                    match self.next_byte() {
                        Some(b'>') => break,
                        Some(b) => uri.push(b),
                        None => {
                            self.record_warning(
                                "Unexpected end of file in datatype of",
                                literal,
                            );
                            break;
                        }
                    }
                }
                let inner = String::from_utf8_lossy(&uri).into_owned();
                return Some(self.prefixes.compact(&inner));
            }
            Some(first) => {
                let mut name = Vec::new();
                let mut b = first;
                loop {
                    if b.is_ascii_alphanumeric() || b == b':' || b == b'-' || b == b'_' {
                        name.push(b);
                    } else {
                        self.push_back(b);
                        break;
                    }
                    b = match self.next_byte() {
                        Some(nb) => nb,
                        None => break,
                    };
                }
                String::from_utf8_lossy(&name).into_owned()
            }
            None => {
                self.record_warning("Unexpected end of file in datatype of", literal);
                String::new()
            }
        };
        if text.len() < 3 {
            self.record_warning("Invalid literal datatype", &text);
        }
        if text.is_empty() {
            None
        } else {
            Some(Iri::prefixed(&text))
        }
    }

    fn read_iri(&mut self) -> Term {
        let mut uri = Vec::new();
        loop {
            match self.next_byte() {
                Some(b'>') => break,
                Some(b) => uri.push(b),
                None => {
                    let t = String::from_utf8_lossy(&uri).into_owned();
                    self.record_warning("Unexpected end of file in URL", &t);
                    break;
                }
            }
        }
        let inner = String::from_utf8_lossy(&uri).into_owned();
        Term::Iri(self.prefixes.compact(&inner))
    }

    fn read_local(&mut self, first: u8) -> Term {
        let mut name = vec![first];
        loop {
            match self.next_byte() {
                Some(b)
                    if b.is_ascii_whitespace()
                        || matches!(
                            b,
                            b'.' | b',' | b';' | b'[' | b']' | b'"' | b'\'' | b'^' | b'@'
                                | b'(' | b')'
                        ) =>
                {
                    self.push_back(b);
                    break;
                }
                Some(b) => name.push(b),
                None => break,
            }
        }
        let text = String::from_utf8_lossy(&name).into_owned();
        Term::Iri(Iri::prefixed(&text))
    }
}

impl<R: Read> Iterator for TermReader<R> {
    type Item = Term;

    fn next(&mut self) -> Option<Term> {
        let b = self.skip_to_term()?;
        Some(match b {
            b'"' => self.read_literal(),
            b'<' => self.read_iri(),
            _ => match Sep::from_byte(b) {
                Some(sep) => Term::Sep(sep),
                None => self.read_local(b),
            },
        })
    }
}

/// Normalize a raw literal body into a simple single-line value.
///
/// Raw line breaks and tabs become their escaped forms, carriage returns are
/// dropped, and double quotes (bare, escaped, or as ") become single
/// quotes, so the value is safe for line- and tab-delimited output. Unicode
/// escapes decode to their characters; escapes outside the documented set
/// are kept verbatim and counted as format warnings.
fn normalize_literal(raw: &[u8], warnings: &mut u64) -> String {
    let text = String::from_utf8_lossy(raw);
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => {}
            '"' => out.push('\''),
            '\\' => match chars.next() {
                Some('"') => out.push('\''),
                Some('u') => decode_unicode_escape(&mut chars, 4, &mut out, warnings),
                Some('U') => decode_unicode_escape(&mut chars, 8, &mut out, warnings),
                Some('\\') => out.push_str("\\\\"),
                Some('n') => out.push_str("\\n"),
                Some('t') => out.push_str("\\t"),
                Some(other) => {
                    *warnings += 1;
                    warn!("Unrecognized escape in literal: \\{}", other);
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            _ => out.push(c),
        }
    }
    out
}

fn decode_unicode_escape(
    chars: &mut std::str::Chars<'_>,
    len: usize,
    out: &mut String,
    warnings: &mut u64,
) {
    let mut hex = String::with_capacity(len);
    for _ in 0..len {
        match chars.next() {
            Some(h) if h.is_ascii_hexdigit() => hex.push(h),
            Some(other) => {
                hex.push(other);
                break;
            }
            None => break,
        }
    }
    let marker = if len == 4 { "\\u" } else { "\\U" };
    let decoded = if hex.len() == len {
        u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32)
    } else {
        None
    };
    match decoded {
        Some('"') => out.push('\''),
        Some('\n') => out.push_str("\\n"),
        Some('\t') => out.push_str("\\t"),
        Some('\r') => {}
        Some(c) if c.is_control() => {
            out.push_str(marker);
            out.push_str(&hex);
        }
        Some(c) => out.push(c),
        None => {
            *warnings += 1;
            warn!("Invalid unicode escape in literal: {}{}", marker, hex);
            out.push_str(marker);
            out.push_str(&hex);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefixes::Namespace;

    fn lex(input: &str) -> (Vec<Term>, u64) {
        let mut reader = TermReader::new(input.as_bytes(), Arc::new(PrefixTable::wikidata()));
        let terms: Vec<Term> = reader.by_ref().collect();
        (terms, reader.format_warnings())
    }

    #[test]
    fn test_lex_ntriples_line() {
        let line = "<http://www.wikidata.org/entity/Q42> <http://www.w3.org/2000/01/rdf-schema#label> \"Douglas Adams\"@en .";
        let (terms, warnings) = lex(line);
        assert_eq!(
            terms,
            vec![
                Term::iri("wd:Q42"),
                Term::iri("rdfs:label"),
                Term::lang_literal("Douglas Adams", "en"),
                Term::Sep(Sep::Dot),
            ]
        );
        assert_eq!(warnings, 0);
    }

    #[test]
    fn test_lex_already_compacted() {
        let (terms, _) = lex("wd:Q42 rdfs:label \"Douglas Adams\"@en .");
        assert_eq!(
            terms,
            vec![
                Term::iri("wd:Q42"),
                Term::iri("rdfs:label"),
                Term::lang_literal("Douglas Adams", "en"),
                Term::Sep(Sep::Dot),
            ]
        );
    }

    #[test]
    fn test_lex_datatype_literal() {
        let (terms, warnings) =
            lex("\"+11825551\"^^<http://www.w3.org/2001/XMLSchema#decimal> .");
        assert_eq!(warnings, 0);
        let lit = terms[0].as_literal().unwrap();
        assert_eq!(lit.value, "+11825551");
        assert_eq!(lit.datatype.as_ref().unwrap().text, "xsd:decimal");
        assert_eq!(lit.language, None);
    }

    #[test]
    fn test_lex_prefixed_datatype() {
        let (terms, warnings) = lex("\"42\"^^xsd:integer .");
        assert_eq!(warnings, 0);
        let lit = terms[0].as_literal().unwrap();
        assert_eq!(lit.datatype.as_ref().unwrap().text, "xsd:integer");
    }

    #[test]
    fn test_lex_plain_and_empty_string() {
        let (terms, _) = lex("\"hello\" \"\" .");
        assert_eq!(terms[0], Term::literal("hello"));
        assert_eq!(terms[1], Term::literal(""));
        assert_eq!(terms[2], Term::Sep(Sep::Dot));
    }

    #[test]
    fn test_lex_long_string() {
        let (terms, warnings) = lex("\"\"\"a \"quoted\" b\"\"\"@en .");
        assert_eq!(warnings, 0);
        let lit = terms[0].as_literal().unwrap();
        assert_eq!(lit.value, "a 'quoted' b");
        assert_eq!(lit.language.as_deref(), Some("en"));
    }

    #[test]
    fn test_raw_newline_kept_escaped() {
        let (terms, _) = lex("\"line one\nline two\" .");
        assert_eq!(terms[0], Term::literal("line one\\nline two"));
    }

    #[test]
    fn test_raw_tab_and_cr_normalized() {
        let (terms, _) = lex("\"a\tb\r\" .");
        assert_eq!(terms[0], Term::literal("a\\tb"));
    }

    #[test]
    fn test_escaped_quote_becomes_single_quote() {
        let (terms, _) = lex("\"say \\\"hi\\\"\" .");
        assert_eq!(terms[0], Term::literal("say 'hi'"));
    }

    #[test]
    fn test_unicode_escape_decoded() {
        let (terms, warnings) = lex("\"caf\\u00e9\" .");
        assert_eq!(warnings, 0);
        assert_eq!(terms[0], Term::literal("café"));
    }

    #[test]
    fn test_unicode_escape_quote() {
        let (terms, _) = lex("\"a\\u0022b\" .");
        assert_eq!(terms[0], Term::literal("a'b"));
    }

    #[test]
    fn test_invalid_language_warns_but_continues() {
        let (terms, warnings) = lex("\"x\"@a . \"y\"@en .");
        assert_eq!(warnings, 1);
        assert_eq!(terms.len(), 4);
        assert_eq!(
            terms[0].as_literal().unwrap().language.as_deref(),
            Some("a")
        );
        assert_eq!(terms[2], Term::lang_literal("y", "en"));
    }

    #[test]
    fn test_eof_in_iri_warns() {
        let (terms, warnings) = lex("<http://www.wikidata.org/entity/Q42");
        assert_eq!(warnings, 1);
        assert_eq!(terms, vec![Term::iri("wd:Q42")]);
    }

    #[test]
    fn test_eof_in_literal_warns() {
        let (terms, warnings) = lex("\"unterminated");
        assert_eq!(warnings, 1);
        assert_eq!(terms, vec![Term::literal("unterminated")]);
    }

    #[test]
    fn test_comments_and_whitespace_skipped() {
        let (terms, _) = lex("# header comment\n  wd:Q1 # trailing\n wdt:P31 .");
        assert_eq!(
            terms,
            vec![Term::iri("wd:Q1"), Term::iri("wdt:P31"), Term::Sep(Sep::Dot)]
        );
    }

    #[test]
    fn test_all_separators() {
        let (terms, _) = lex(". , ; [ ] ( )");
        let seps: Vec<Sep> = terms
            .iter()
            .map(|t| match t {
                Term::Sep(s) => *s,
                other => panic!("expected separator, got {:?}", other),
            })
            .collect();
        assert_eq!(
            seps,
            vec![
                Sep::Dot,
                Sep::Comma,
                Sep::Semicolon,
                Sep::OpenBracket,
                Sep::CloseBracket,
                Sep::OpenParen,
                Sep::CloseParen,
            ]
        );
    }

    #[test]
    fn test_statement_namespace_classified() {
        let (terms, _) = lex("<http://www.wikidata.org/entity/statement/Q23-abc> .");
        let iri = terms[0].as_iri().unwrap();
        assert_eq!(iri.text, "s:Q23-abc");
        assert_eq!(iri.ns, Namespace::Statement);
    }

    #[test]
    fn test_byte_position_tracks_consumed_input() {
        let input = "wd:Q1 wdt:P31 wd:Q5 .\n";
        let mut reader =
            TermReader::new(input.as_bytes(), Arc::new(PrefixTable::wikidata()));
        while reader.next().is_some() {}
        assert_eq!(reader.byte_pos(), input.len() as u64);
    }

    #[test]
    fn test_display_round_trip() {
        let table = PrefixTable::wikidata();
        let (terms, _) = lex("<http://www.wikidata.org/entity/Q42> .");
        let iri = terms[0].as_iri().unwrap();
        assert_eq!(
            table.expand(&iri.text),
            "<http://www.wikidata.org/entity/Q42>"
        );
        assert_eq!(format!("{}", terms[0]), "wd:Q42");
        assert_eq!(
            format!("{}", Term::lang_literal("Douglas Adams", "en")),
            "\"Douglas Adams\"@en"
        );
    }
}

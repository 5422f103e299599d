//! Lexical scanner: partitions raw SQL text into comments, quoted
//! identifiers, bare words and ignorable characters.
//!
//! The scanner knows nothing about statement grammar. It never fails: an
//! unterminated comment or quote extends to the end of the input and is
//! flagged with `terminated = false`, leaving the syntax error to the engine.
//! Concatenating the text of every token reproduces the input exactly.

use serde::Serialize;

/// The four identifier quoting styles SQLite accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStyle {
    /// `'...'`
    Single,
    /// `"..."`
    Double,
    /// `` `...` ``
    Backtick,
    /// `[...]`
    Bracket,
}

impl QuoteStyle {
    pub fn from_open(c: char) -> Option<Self> {
        match c {
            '\'' => Some(QuoteStyle::Single),
            '"' => Some(QuoteStyle::Double),
            '`' => Some(QuoteStyle::Backtick),
            '[' => Some(QuoteStyle::Bracket),
            _ => None,
        }
    }

    pub fn open(self) -> char {
        match self {
            QuoteStyle::Single => '\'',
            QuoteStyle::Double => '"',
            QuoteStyle::Backtick => '`',
            QuoteStyle::Bracket => '[',
        }
    }

    pub fn close(self) -> char {
        match self {
            QuoteStyle::Bracket => ']',
            other => other.open(),
        }
    }

    /// Brackets have no escape; the other styles escape by doubling.
    pub fn escapes(self) -> bool {
        self != QuoteStyle::Bracket
    }

    /// Serialize a logical name in this style.
    pub fn quote(self, value: &str) -> String {
        let close = self.close();
        let mut out = String::with_capacity(value.len() + 2);
        out.push(self.open());
        for c in value.chars() {
            out.push(c);
            if c == close && self.escapes() {
                out.push(c);
            }
        }
        out.push(close);
        out
    }

    /// Recover the logical name from the verbatim quoted text.
    ///
    /// A missing closing delimiter is tolerated.
    pub fn unquote(self, raw: &str) -> String {
        let inner = raw.strip_prefix(self.open()).unwrap_or(raw);
        let (inner, _) = split_quoted_body(inner, self);
        if !self.escapes() {
            return inner.to_string();
        }
        let close = self.close();
        let mut doubled = String::with_capacity(2);
        doubled.push(close);
        doubled.push(close);
        inner.replace(&doubled, &close.to_string())
    }
}

/// Find where a quoted body ends. Returns the body (without the closing
/// delimiter) and whether the close was found.
fn split_quoted_body(body: &str, style: QuoteStyle) -> (&str, bool) {
    let close = style.close();
    let mut chars = body.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if c != close {
            continue;
        }
        if style.escapes() && matches!(chars.peek(), Some((_, next)) if *next == close) {
            chars.next();
            continue;
        }
        return (&body[..idx], true);
    }
    (body, false)
}

/// Double-quote a name for generated SQL.
pub fn quote_identifier(name: &str) -> String {
    QuoteStyle::Double.quote(name)
}

/// Characters that may appear in a bare identifier.
pub fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Kind of a scanned span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "style")]
pub enum TokenKind {
    Whitespace,
    /// `--` up to and including the next newline.
    LineComment,
    /// `/* ... */`
    BlockComment,
    Quoted(QuoteStyle),
    /// Maximal run of identifier characters starting with a letter or `_`.
    Word,
    /// Anything else: one punctuation character, or a run of identifier
    /// characters starting with a digit.
    Ignorable,
}

/// One span of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    /// Byte offset of `text` in the scanned input.
    pub offset: usize,
    /// False when a comment or quote ran off the end of the input.
    pub terminated: bool,
}

impl<'a> Token<'a> {
    /// Whitespace and comments.
    pub fn is_trivia(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Whitespace | TokenKind::LineComment | TokenKind::BlockComment
        )
    }

    pub fn end(&self) -> usize {
        self.offset + self.text.len()
    }

    /// Case-insensitive keyword test on a bare word.
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    /// Test for a single punctuation character.
    pub fn is_symbol(&self, symbol: char) -> bool {
        self.kind == TokenKind::Ignorable && self.text.len() == symbol.len_utf8() && self.text.starts_with(symbol)
    }
}

/// Left-to-right scanner over SQL text.
pub struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn emit(&mut self, kind: TokenKind, len: usize, terminated: bool) -> Token<'a> {
        let token = Token {
            kind,
            text: &self.src[self.pos..self.pos + len],
            offset: self.pos,
            terminated,
        };
        self.pos += len;
        token
    }

    fn scan_line_comment(&mut self) -> Token<'a> {
        let rest = self.rest();
        match rest.find('\n') {
            Some(idx) => self.emit(TokenKind::LineComment, idx + 1, true),
            None => self.emit(TokenKind::LineComment, rest.len(), true),
        }
    }

    fn scan_block_comment(&mut self) -> Token<'a> {
        let rest = self.rest();
        match rest[2..].find("*/") {
            Some(idx) => self.emit(TokenKind::BlockComment, idx + 4, true),
            None => self.emit(TokenKind::BlockComment, rest.len(), false),
        }
    }

    fn scan_quoted(&mut self, style: QuoteStyle) -> Token<'a> {
        let rest = self.rest();
        let open_len = style.open().len_utf8();
        let (body, closed) = split_quoted_body(&rest[open_len..], style);
        if closed {
            let len = open_len + body.len() + style.close().len_utf8();
            self.emit(TokenKind::Quoted(style), len, true)
        } else {
            self.emit(TokenKind::Quoted(style), rest.len(), false)
        }
    }

    fn scan_run(&mut self, kind: TokenKind) -> Token<'a> {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|(_, c)| !is_identifier_char(*c))
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        self.emit(kind, len, true)
    }

    fn scan_whitespace(&mut self) -> Token<'a> {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|(_, c)| !c.is_ascii_whitespace())
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        self.emit(TokenKind::Whitespace, len, true)
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        let rest = self.rest();
        let c = rest.chars().next()?;

        if rest.starts_with("--") {
            return Some(self.scan_line_comment());
        }
        if rest.starts_with("/*") {
            return Some(self.scan_block_comment());
        }
        if let Some(style) = QuoteStyle::from_open(c) {
            return Some(self.scan_quoted(style));
        }
        if c.is_ascii_whitespace() {
            return Some(self.scan_whitespace());
        }
        if c.is_ascii_alphabetic() || c == '_' {
            return Some(self.scan_run(TokenKind::Word));
        }
        if c.is_ascii_digit() {
            return Some(self.scan_run(TokenKind::Ignorable));
        }
        Some(self.emit(TokenKind::Ignorable, c.len_utf8(), true))
    }
}

/// Scan the whole input into tokens.
pub fn scan(src: &str) -> Vec<Token<'_>> {
    Scanner::new(src).collect()
}

/// An identifier as written in the SQL text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identifier {
    raw: String,
    style: Option<QuoteStyle>,
}

impl Identifier {
    /// Build from a `Word` or `Quoted` token; `None` for anything else.
    pub fn from_token(token: &Token<'_>) -> Option<Self> {
        let style = match token.kind {
            TokenKind::Word => None,
            TokenKind::Quoted(style) => Some(style),
            _ => return None,
        };
        Some(Self {
            raw: token.text.to_string(),
            style,
        })
    }

    /// A bare (unquoted) identifier.
    pub fn bare(name: &str) -> Self {
        Self {
            raw: name.to_string(),
            style: None,
        }
    }

    /// The verbatim source text, quotes and escapes included.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn style(&self) -> Option<QuoteStyle> {
        self.style
    }

    /// The logical name with quotes removed and escapes collapsed.
    pub fn value(&self) -> String {
        match self.style {
            Some(style) => style.unquote(&self.raw),
            None => self.raw.clone(),
        }
    }

    /// ASCII case-insensitive comparison of the logical name.
    pub fn matches(&self, name: &str) -> bool {
        self.value().eq_ignore_ascii_case(name)
    }
}

//! Typed grammar fragments over scanned tokens.
//!
//! A [`Cursor`] walks the significant tokens of a token slice, skipping
//! whitespace and comments. Every fragment returns its own typed match and
//! leaves the cursor untouched when it fails, so productions are built by
//! plain sequencing and optional groups are a saved-cursor restore.

use std::ops::Range;

use serde::Serialize;

use crate::lexer::{Identifier, Token, TokenKind};

/// A possibly schema-qualified object reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectRef {
    pub schema: Option<Identifier>,
    pub table: Identifier,
    /// Byte range of the whole reference in the scanned text.
    pub span: Range<usize>,
}

impl ObjectRef {
    /// True when the reference resolves in the `main` schema.
    pub fn in_main_schema(&self) -> bool {
        self.schema.as_ref().map_or(true, |s| s.matches("main"))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Cursor<'t, 'a> {
    tokens: &'t [Token<'a>],
    pos: usize,
}

impl<'t, 'a> Cursor<'t, 'a> {
    pub fn new(tokens: &'t [Token<'a>]) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Start at a token index.
    pub fn at(tokens: &'t [Token<'a>], pos: usize) -> Self {
        Self { tokens, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Index of the next significant token, if any.
    fn significant(&self) -> Option<usize> {
        (self.pos..self.tokens.len()).find(|&i| !self.tokens[i].is_trivia())
    }

    /// The next significant token without consuming it.
    pub fn peek(&self) -> Option<&'t Token<'a>> {
        self.significant().map(|i| &self.tokens[i])
    }

    /// Consume and return the next significant token.
    pub fn advance(&mut self) -> Option<&'t Token<'a>> {
        let idx = self.significant()?;
        self.pos = idx + 1;
        Some(&self.tokens[idx])
    }

    pub fn at_end(&self) -> bool {
        self.significant().is_none()
    }

    /// Match one keyword, case-insensitively.
    pub fn keyword(&mut self, keyword: &str) -> bool {
        match self.peek() {
            Some(token) if token.is_keyword(keyword) => {
                self.advance();
                true
            }
            _ => false,
        }
    }

    /// Match a keyword sequence such as `IF NOT EXISTS`, all or nothing.
    pub fn keywords(&mut self, keywords: &[&str]) -> bool {
        let saved = *self;
        for keyword in keywords {
            if !self.keyword(keyword) {
                *self = saved;
                return false;
            }
        }
        true
    }

    /// Match the first of several alternative keywords.
    pub fn any_keyword(&mut self, keywords: &[&'static str]) -> Option<&'static str> {
        let found = keywords.iter().copied().find(|k| self.peek().is_some_and(|t| t.is_keyword(k)))?;
        self.advance();
        Some(found)
    }

    pub fn symbol(&mut self, symbol: char) -> bool {
        match self.peek() {
            Some(token) if token.is_symbol(symbol) => {
                self.advance();
                true
            }
            _ => false,
        }
    }

    /// Match a bare or quoted identifier.
    pub fn identifier(&mut self) -> Option<(Identifier, Range<usize>)> {
        let token = self.peek()?;
        let ident = Identifier::from_token(token)?;
        let span = token.offset..token.end();
        self.advance();
        Some((ident, span))
    }

    /// `[schema-identifier .] table-identifier`, trivia allowed around the dot.
    pub fn object(&mut self) -> Option<ObjectRef> {
        let saved = *self;
        let (first, first_span) = self.identifier()?;

        let before_dot = *self;
        if self.symbol('.') {
            if let Some((table, table_span)) = self.identifier() {
                return Some(ObjectRef {
                    schema: Some(first),
                    table,
                    span: first_span.start..table_span.end,
                });
            }
            // a dangling `schema.` is not an object reference
            *self = saved;
            return None;
        }
        *self = before_dot;

        Some(ObjectRef {
            schema: None,
            table: first,
            span: first_span,
        })
    }

    /// Whether the next significant token is the given keyword.
    pub fn peek_keyword(&self, keyword: &str) -> bool {
        self.peek().is_some_and(|t| t.is_keyword(keyword))
    }

    pub fn peek_symbol(&self, symbol: char) -> bool {
        self.peek().is_some_and(|t| t.is_symbol(symbol))
    }

    /// Whether the next significant token is an identifier (bare or quoted).
    pub fn peek_identifier(&self) -> bool {
        self.peek()
            .is_some_and(|t| matches!(t.kind, TokenKind::Word | TokenKind::Quoted(_)))
    }
}

//! Source positions attached to every node.
//!
//! A `Token` is either a plain source token or a read-only wrapper around another token.
//! Wrappers let synthesized code point back at (or deliberately hide from) the user's source:
//! - `Range`: spans from a start token to an end token
//! - `Nested`: an outer/inner pair, e.g. "this call ... resolves to this declaration"
//! - `AutoGenerated`: code that did not come from the user
//! - `Include`: code pulled in from an included file
//! - `Fixup`: a rewriter-owned wrapper whose text may be patched later
//!
//! Wrapping never mutates the wrapped token.

use serde::Serialize;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

pub type Token = Rc<TokenX>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("unsupported operation: cannot set `{field}` on a {kind} token")]
    UnsupportedOperation { field: &'static str, kind: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceToken {
    pub file: Rc<String>,
    pub line: u32,
    pub col: u32,
    /// byte offset into the file
    pub pos: usize,
    pub val: String,
    pub leading_trivia: String,
    pub trailing_trivia: String,
    pub valid: bool,
}

#[derive(Debug)]
pub enum TokenX {
    Source(SourceToken),
    Range { start: Token, end: Token },
    Nested { outer: Token, inner: Token, message: Option<String> },
    AutoGenerated(Token),
    Include { tok: Token, include_file: Rc<String> },
    Fixup { tok: Token, val: String },
}

impl TokenX {
    pub fn source(file: &str, line: u32, col: u32, pos: usize, val: &str) -> Token {
        Rc::new(TokenX::Source(SourceToken {
            file: Rc::new(file.to_string()),
            line,
            col,
            pos,
            val: val.to_string(),
            leading_trivia: String::new(),
            trailing_trivia: String::new(),
            valid: true,
        }))
    }

    /// Token for code that has no position at all
    pub fn none() -> Token {
        Rc::new(TokenX::Source(SourceToken {
            file: Rc::new(String::new()),
            line: 0,
            col: 0,
            pos: 0,
            val: String::new(),
            leading_trivia: String::new(),
            trailing_trivia: String::new(),
            valid: false,
        }))
    }

    pub fn range(start: &Token, end: &Token) -> Token {
        Rc::new(TokenX::Range { start: start.clone(), end: end.clone() })
    }

    pub fn nested(outer: &Token, inner: &Token, message: Option<String>) -> Token {
        Rc::new(TokenX::Nested { outer: outer.clone(), inner: inner.clone(), message })
    }

    pub fn auto_generated(tok: &Token) -> Token {
        Rc::new(TokenX::AutoGenerated(tok.clone()))
    }

    pub fn include(tok: &Token, include_file: &str) -> Token {
        Rc::new(TokenX::Include { tok: tok.clone(), include_file: Rc::new(include_file.to_string()) })
    }

    pub fn fixup(tok: &Token, val: &str) -> Token {
        Rc::new(TokenX::Fixup { tok: tok.clone(), val: val.to_string() })
    }

    fn kind_name(&self) -> &'static str {
        match self {
            TokenX::Source(_) => "source",
            TokenX::Range { .. } => "range",
            TokenX::Nested { .. } => "nested",
            TokenX::AutoGenerated(_) => "auto-generated",
            TokenX::Include { .. } => "include",
            TokenX::Fixup { .. } => "fixup",
        }
    }

    /// The token a wrapper delegates its position to
    pub fn wrapped(&self) -> Option<&Token> {
        match self {
            TokenX::Source(_) => None,
            TokenX::Range { start, .. } => Some(start),
            TokenX::Nested { outer, .. } => Some(outer),
            TokenX::AutoGenerated(tok) => Some(tok),
            TokenX::Include { tok, .. } => Some(tok),
            TokenX::Fixup { tok, .. } => Some(tok),
        }
    }

    fn base(&self) -> &SourceToken {
        match self {
            TokenX::Source(s) => s,
            TokenX::Range { start: tok, .. }
            | TokenX::Nested { outer: tok, .. }
            | TokenX::AutoGenerated(tok)
            | TokenX::Include { tok, .. }
            | TokenX::Fixup { tok, .. } => tok.base(),
        }
    }

    pub fn file(&self) -> &Rc<String> {
        &self.base().file
    }

    pub fn line(&self) -> u32 {
        self.base().line
    }

    pub fn col(&self) -> u32 {
        self.base().col
    }

    pub fn pos(&self) -> usize {
        self.base().pos
    }

    pub fn leading_trivia(&self) -> &str {
        &self.base().leading_trivia
    }

    pub fn trailing_trivia(&self) -> &str {
        &self.base().trailing_trivia
    }

    pub fn is_valid(&self) -> bool {
        self.base().valid
    }

    /// Textual value.
    /// For a range token this is a blank string as long as the byte span it covers,
    /// which is only meaningful for highlighting.
    pub fn val(&self) -> String {
        match self {
            TokenX::Source(s) => s.val.clone(),
            TokenX::Range { start, end } => {
                let stop = end.pos() + end.val().len();
                " ".repeat(stop.saturating_sub(start.pos()))
            }
            TokenX::Fixup { val, .. } => val.clone(),
            TokenX::Nested { outer: tok, .. }
            | TokenX::AutoGenerated(tok)
            | TokenX::Include { tok, .. } => tok.val(),
        }
    }

    fn source_mut(&mut self, field: &'static str) -> Result<&mut SourceToken, TokenError> {
        let kind = self.kind_name();
        match self {
            TokenX::Source(s) => Ok(s),
            _ => Err(TokenError::UnsupportedOperation { field, kind }),
        }
    }

    pub fn set_line(&mut self, line: u32) -> Result<(), TokenError> {
        self.source_mut("line")?.line = line;
        Ok(())
    }

    pub fn set_col(&mut self, col: u32) -> Result<(), TokenError> {
        self.source_mut("col")?.col = col;
        Ok(())
    }

    pub fn set_pos(&mut self, pos: usize) -> Result<(), TokenError> {
        self.source_mut("pos")?.pos = pos;
        Ok(())
    }

    pub fn set_file(&mut self, file: &str) -> Result<(), TokenError> {
        self.source_mut("file")?.file = Rc::new(file.to_string());
        Ok(())
    }

    pub fn set_leading_trivia(&mut self, trivia: &str) -> Result<(), TokenError> {
        self.source_mut("leading_trivia")?.leading_trivia = trivia.to_string();
        Ok(())
    }

    pub fn set_trailing_trivia(&mut self, trivia: &str) -> Result<(), TokenError> {
        self.source_mut("trailing_trivia")?.trailing_trivia = trivia.to_string();
        Ok(())
    }

    /// Only source tokens and rewriter-owned fixup tokens accept new text
    pub fn set_val(&mut self, new_val: &str) -> Result<(), TokenError> {
        let kind = self.kind_name();
        match self {
            TokenX::Source(s) => s.val = new_val.to_string(),
            TokenX::Fixup { val, .. } => *val = new_val.to_string(),
            _ => return Err(TokenError::UnsupportedOperation { field: "val", kind }),
        }
        Ok(())
    }
}

/// true iff tok or any token it wraps (transitively) is an auto-generated marker
pub fn is_auto_generated(tok: &TokenX) -> bool {
    let mut tok = tok;
    loop {
        if let TokenX::AutoGenerated(_) = tok {
            return true;
        }
        match tok.wrapped() {
            Some(inner) => tok = inner,
            None => return false,
        }
    }
}

/// true iff tok or any token it wraps came from an included file
pub fn is_included(tok: &TokenX) -> bool {
    let mut tok = tok;
    loop {
        if let TokenX::Include { .. } = tok {
            return true;
        }
        match tok.wrapped() {
            Some(inner) => tok = inner,
            None => return false,
        }
    }
}

impl fmt::Display for TokenX {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return write!(f, "<generated>");
        }
        write!(f, "{}({},{})", self.file(), self.line(), self.col())?;
        if let TokenX::Nested { inner, message: Some(message), .. } = self {
            write!(f, " [{}: {}({},{})]", message, inner.file(), inner.line(), inner.col())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_val_covers_span() {
        let start = TokenX::source("a.dfy", 1, 1, 10, "forall");
        let end = TokenX::source("a.dfy", 1, 20, 29, "}");
        let range = TokenX::range(&start, &end);
        assert_eq!(range.val().len(), 29 + 1 - 10);
        assert_eq!(range.pos(), 10);
    }

    #[test]
    fn auto_generated_is_transitive() {
        let tok = TokenX::source("a.dfy", 3, 4, 40, "Valid");
        let auto = TokenX::auto_generated(&tok);
        let nested = TokenX::nested(&auto, &tok, Some("resolves to".to_string()));
        let fixup = TokenX::fixup(&nested, "Valid()");
        assert!(is_auto_generated(&fixup));
        assert!(!is_auto_generated(&tok));
        assert!(!is_auto_generated(&TokenX::nested(&tok, &auto, None)));
        assert_eq!(fixup.line(), 3);
    }

    #[test]
    fn wrappers_reject_setters() {
        let tok = TokenX::source("a.dfy", 3, 4, 40, "x");
        let mut auto = TokenX::AutoGenerated(tok.clone());
        assert_eq!(
            auto.set_line(7),
            Err(TokenError::UnsupportedOperation { field: "line", kind: "auto-generated" })
        );
        assert!(auto.set_val("y").is_err());
        let mut fixup = TokenX::Fixup { tok: tok.clone(), val: "x".to_string() };
        assert!(fixup.set_val("y").is_ok());
        assert_eq!(fixup.val(), "y");
        assert!(fixup.set_col(1).is_err());
        // the wrapped token is untouched
        assert_eq!(tok.val(), "x");
    }

    #[test]
    fn include_marker() {
        let tok = TokenX::source("lib.dfy", 1, 1, 0, "lemma");
        let inc = TokenX::include(&tok, "lib.dfy");
        assert!(is_included(&TokenX::auto_generated(&inc)));
        assert!(!is_included(&tok));
    }
}

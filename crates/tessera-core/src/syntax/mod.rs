//! Source-level building blocks for the snippet language.
//!
//! This module provides:
//! - A tolerant lexer shared by every analysis pass
//! - The syntax tree of the reference language
//! - A recursive-descent parser producing that tree

pub mod ast;
pub mod lexer;
pub mod parser;

pub use lexer::{LexEnd, Lexed, Token, TokenKind, lex};
pub use parser::{ParseError, Parser};

/// Byte range in a snippet's source.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, bincode::Encode, bincode::Decode,
    serde::Serialize, serde::Deserialize,
)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Smallest span covering both `self` and `other`.
    pub fn to(self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }
}

//! Tolerant lexer shared by the completeness analyzer, the classifier and
//! the reference compiler.
//!
//! The lexer never fails: malformed input is reported through [`LexEnd`]
//! and [`TokenKind::Error`] tokens so that callers can decide whether the
//! buffer is incomplete or broken.

use super::Span;

/// Kind of a lexed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier or keyword.
    Ident,
    /// `int` literal.
    Int,
    /// `long` literal (`L` suffix).
    Long,
    /// Floating point literal.
    Double,
    /// Character literal; `text` holds the decoded character.
    Char,
    /// String literal; `text` holds the decoded value.
    Str,
    /// Text block (`"""`); `text` holds the decoded value.
    TextBlock,
    /// Operator or punctuation.
    Punct,
    /// A character that starts no valid token.
    Error,
}

/// A single token with its byte span in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
}

impl Token {
    /// True for an identifier token spelled exactly `word`.
    pub fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == word
    }

    /// True for a punctuation token spelled exactly `punct`.
    pub fn is_punct(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == punct
    }

    pub fn is_ident(&self) -> bool {
        self.kind == TokenKind::Ident && !is_keyword(&self.text)
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Int
                | TokenKind::Long
                | TokenKind::Double
                | TokenKind::Char
                | TokenKind::Str
                | TokenKind::TextBlock
        ) || (self.kind == TokenKind::Ident
            && matches!(self.text.as_str(), "true" | "false" | "null"))
    }
}

/// How lexing of the buffer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexEnd {
    /// Every construct was closed.
    Clean,
    /// Input ends inside `/* ... */`.
    OpenComment,
    /// Input ends inside a string literal.
    OpenString {
        /// The last character of the input is an escaping backslash.
        trailing_backslash: bool,
    },
    /// Input ends inside a character literal.
    OpenChar,
    /// Input ends inside a `"""` text block.
    OpenTextBlock,
    /// A string or char literal was cut by a line break before the end.
    BrokenLiteral { at: usize },
}

/// Result of lexing a buffer.
#[derive(Debug, Clone)]
pub struct Lexed {
    pub tokens: Vec<Token>,
    pub end: LexEnd,
}

const KEYWORDS: &[&str] = &[
    "abstract", "assert", "boolean", "break", "byte", "case", "catch", "char", "class", "const",
    "continue", "default", "do", "double", "else", "enum", "extends", "final", "finally", "float",
    "for", "goto", "if", "implements", "import", "instanceof", "int", "interface", "long",
    "native", "new", "package", "private", "protected", "public", "return", "short", "static",
    "strictfp", "super", "switch", "synchronized", "this", "throw", "throws", "transient", "try",
    "void", "volatile", "while", "true", "false", "null",
];

/// Operators, longest first so that greedy matching works.
const PUNCTS: &[&str] = &[
    ">>>=", "<<=", ">>=", ">>>", "...", "->", "::", "++", "--", "&&", "||", "==", "!=", "<=",
    ">=", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "<<", ">>", "(", ")", "{", "}", "[",
    "]", ";", ",", ".", "@", "=", ">", "<", "!", "~", "?", ":", "+", "-", "*", "/", "&", "|",
    "^", "%",
];

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

pub fn keywords() -> &'static [&'static str] {
    KEYWORDS
}

/// Lex `src` into tokens, skipping whitespace and comments.
pub fn lex(src: &str) -> Lexed {
    Lexer { src, pos: 0 }.run()
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn starts_with(&self, s: &str) -> bool {
        self.src[self.pos..].starts_with(s)
    }

    fn run(mut self) -> Lexed {
        let mut tokens = Vec::new();
        let mut broken: Option<usize> = None;

        loop {
            self.skip_whitespace();
            let start = self.pos;
            let Some(c) = self.peek() else { break };

            if self.starts_with("//") {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.bump();
                }
                continue;
            }
            if self.starts_with("/*") {
                self.pos += 2;
                match self.src[self.pos..].find("*/") {
                    Some(off) => self.pos += off + 2,
                    None => {
                        return Lexed {
                            tokens,
                            end: LexEnd::OpenComment,
                        };
                    }
                }
                continue;
            }

            if self.starts_with("\"\"\"") {
                match self.text_block() {
                    Some(value) => tokens.push(Token {
                        kind: TokenKind::TextBlock,
                        text: value,
                        span: Span::new(start, self.pos),
                    }),
                    None => {
                        return Lexed {
                            tokens,
                            end: LexEnd::OpenTextBlock,
                        };
                    }
                }
                continue;
            }

            if c == '"' || c == '\'' {
                match self.quoted(c) {
                    Quoted::Closed(value) => tokens.push(Token {
                        kind: if c == '"' { TokenKind::Str } else { TokenKind::Char },
                        text: value,
                        span: Span::new(start, self.pos),
                    }),
                    Quoted::Broken => {
                        broken.get_or_insert(start);
                        tokens.push(Token {
                            kind: TokenKind::Error,
                            text: self.src[start..self.pos].to_string(),
                            span: Span::new(start, self.pos),
                        });
                    }
                    Quoted::Open { trailing_backslash } => {
                        let end = if c == '"' {
                            LexEnd::OpenString { trailing_backslash }
                        } else {
                            LexEnd::OpenChar
                        };
                        return Lexed { tokens, end };
                    }
                }
                continue;
            }

            if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()))
            {
                let kind = self.number();
                tokens.push(Token {
                    kind,
                    text: self.src[start..self.pos].replace('_', ""),
                    span: Span::new(start, self.pos),
                });
                continue;
            }

            if is_ident_start(c) {
                while self.peek().is_some_and(is_ident_part) {
                    self.bump();
                }
                tokens.push(Token {
                    kind: TokenKind::Ident,
                    text: self.src[start..self.pos].to_string(),
                    span: Span::new(start, self.pos),
                });
                continue;
            }

            if let Some(p) = PUNCTS.iter().find(|p| self.starts_with(p)) {
                self.pos += p.len();
                tokens.push(Token {
                    kind: TokenKind::Punct,
                    text: (*p).to_string(),
                    span: Span::new(start, self.pos),
                });
                continue;
            }

            self.bump();
            tokens.push(Token {
                kind: TokenKind::Error,
                text: c.to_string(),
                span: Span::new(start, self.pos),
            });
        }

        let end = match broken {
            Some(at) => LexEnd::BrokenLiteral { at },
            None => LexEnd::Clean,
        };
        Lexed { tokens, end }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn number(&mut self) -> TokenKind {
        if self.starts_with("0x") || self.starts_with("0X") {
            self.pos += 2;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit() || c == '_') {
                self.bump();
            }
            return self.int_suffix();
        }

        let mut floating = false;
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
            self.bump();
        }
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            floating = true;
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign = matches!(self.peek_at(1), Some('+' | '-'));
            let digit_at = if sign { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                floating = true;
                for _ in 0..digit_at {
                    self.bump();
                }
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }
        match self.peek() {
            Some('d' | 'D' | 'f' | 'F') => {
                self.bump();
                TokenKind::Double
            }
            _ if floating => TokenKind::Double,
            _ => self.int_suffix(),
        }
    }

    fn int_suffix(&mut self) -> TokenKind {
        if matches!(self.peek(), Some('l' | 'L')) {
            self.bump();
            TokenKind::Long
        } else {
            TokenKind::Int
        }
    }

    fn quoted(&mut self, quote: char) -> Quoted {
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Quoted::Open { trailing_backslash: false },
                Some('\n') => return Quoted::Broken,
                Some(c) if c == quote => return Quoted::Closed(value),
                Some('\\') => match self.bump() {
                    None => return Quoted::Open { trailing_backslash: true },
                    Some('\n') => return Quoted::Broken,
                    Some(e) => value.push(unescape(e)),
                },
                Some(c) => value.push(c),
            }
        }
    }

    /// Lex a text block. Returns `None` when the closing delimiter is missing.
    fn text_block(&mut self) -> Option<String> {
        self.pos += 3;
        // The opening delimiter must be followed by a line break.
        while self.peek().is_some_and(|c| c == ' ' || c == '\t' || c == '\r') {
            self.bump();
        }
        if self.peek() == Some('\n') {
            self.bump();
        }
        let mut value = String::new();
        loop {
            if self.starts_with("\"\"\"") {
                self.pos += 3;
                return Some(strip_indent(&value));
            }
            match self.bump()? {
                '\\' => {
                    let escaped = self.bump()?;
                    value.push(unescape(escaped));
                }
                c => value.push(c),
            }
        }
    }
}

enum Quoted {
    Closed(String),
    Open { trailing_backslash: bool },
    Broken,
}

fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        'b' => '\u{8}',
        'f' => '\u{c}',
        's' => ' ',
        other => other,
    }
}

/// Remove the common leading indentation of a text block.
fn strip_indent(raw: &str) -> String {
    let indent = raw
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    raw.lines()
        .map(|l| l.get(indent..).unwrap_or_else(|| l.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
        + if raw.ends_with('\n') { "\n" } else { "" }
}

pub fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

pub fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

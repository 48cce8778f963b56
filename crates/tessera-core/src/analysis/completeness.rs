//! Completeness analysis of raw input buffers.
//!
//! A single forward scan over the lexed tokens tracks bracket depth and a
//! handful of statement-level flags (pending `else`, `catch`, do-`while`) to
//! find the first unit boundary. When no boundary exists, the trailing token
//! decides between "keep typing" and "complete once terminated".

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::syntax::lexer::{LexEnd, Token, TokenKind, is_keyword, lex};
use crate::syntax::parser::{DeclShape, Parser};

/// How complete a buffer is, from "more text needed" to "ready".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Completeness {
    /// Whitespace and comments only.
    Empty,
    /// Ends inside an unterminated construct.
    DefinitelyIncomplete,
    /// A control statement header without its body.
    ConsideredIncomplete,
    /// Complete once a `;` is appended.
    CompleteWithSemi,
    /// One fully formed unit, possibly followed by more input.
    Complete,
    /// Malformed in a way unrelated to incompleteness.
    Unknown,
}

impl Completeness {
    /// True when the returned unit can be submitted as is.
    pub fn is_complete(self) -> bool {
        matches!(self, Completeness::Complete | Completeness::CompleteWithSemi)
    }
}

/// Result of [`analyze`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionInfo {
    pub completeness: Completeness,
    /// The unit to submit. For `CompleteWithSemi` and `ConsideredIncomplete`
    /// the terminating `;` has been appended.
    pub source: Option<String>,
    /// Input following the unit, to be analyzed next.
    pub remaining: String,
}

impl CompletionInfo {
    fn new(completeness: Completeness, source: Option<String>, remaining: &str) -> Self {
        debug!(?completeness, "analyzed input");
        Self {
            completeness,
            source,
            remaining: remaining.to_string(),
        }
    }
}

/// Words that never end a unit.
const DANGLING_WORDS: &[&str] = &[
    "new", "throw", "else", "do", "try", "import", "instanceof", "extends", "implements",
    "throws", "permits", "catch", "finally", "case", "default", "assert",
];

/// Words that may end a unit missing only its `;`.
const TERMINAL_WORDS: &[&str] = &["true", "false", "null", "this", "return", "break", "continue"];

/// Analyze `input` for the first complete unit.
pub fn analyze(input: &str) -> CompletionInfo {
    let lexed = lex(input);
    let tokens = &lexed.tokens;

    let problem_at = match lexed.end {
        LexEnd::BrokenLiteral { at } => Some(at),
        _ => None,
    };
    let scan = Scan::run(input, tokens);

    if let Some(end) = scan.boundary {
        if problem_at.is_none_or(|at| at >= end) {
            let source = input[..end].trim().to_string();
            return CompletionInfo::new(Completeness::Complete, Some(source), &input[end..]);
        }
    }

    let whole = || Some(input.trim().to_string());
    match lexed.end {
        LexEnd::Clean => {}
        LexEnd::OpenComment | LexEnd::OpenChar | LexEnd::OpenTextBlock => {
            return CompletionInfo::new(Completeness::DefinitelyIncomplete, None, "");
        }
        LexEnd::OpenString { trailing_backslash } => {
            let completeness = if trailing_backslash {
                Completeness::Unknown
            } else {
                Completeness::DefinitelyIncomplete
            };
            let source = trailing_backslash.then(|| input.trim().to_string());
            return CompletionInfo::new(completeness, source, "");
        }
        LexEnd::BrokenLiteral { .. } => {
            return CompletionInfo::new(Completeness::Unknown, whole(), "");
        }
    }

    let Some(last) = tokens.last() else {
        return CompletionInfo::new(Completeness::Empty, None, "");
    };
    if scan.unbalanced {
        return CompletionInfo::new(Completeness::Unknown, whole(), "");
    }
    if scan.depth > 0 || scan.pending {
        return CompletionInfo::new(Completeness::DefinitelyIncomplete, None, "");
    }
    if is_dangling(last) {
        return CompletionInfo::new(Completeness::DefinitelyIncomplete, None, "");
    }
    if scan.brace_ends && scan.declaration && !scan.saw_body {
        // A type or method header still waiting for its body.
        return CompletionInfo::new(Completeness::DefinitelyIncomplete, None, "");
    }

    let terminated = Some(format!("{};", input.trim()));
    if scan.header_end == Some(tokens.len() - 1) {
        return CompletionInfo::new(Completeness::ConsideredIncomplete, terminated, "");
    }
    CompletionInfo::new(Completeness::CompleteWithSemi, terminated, "")
}

fn is_dangling(tok: &Token) -> bool {
    match tok.kind {
        TokenKind::Punct => !matches!(tok.text.as_str(), ")" | "]" | "}" | "++" | "--" | ";"),
        TokenKind::Ident if is_keyword(&tok.text) => !TERMINAL_WORDS.contains(&tok.text.as_str()),
        TokenKind::Ident => DANGLING_WORDS.contains(&tok.text.as_str()),
        _ => false,
    }
}

/// Forward scan state.
#[derive(Default)]
struct Scan {
    /// Byte offset just past the first unit boundary.
    boundary: Option<usize>,
    depth: usize,
    unbalanced: bool,
    /// A `try` without handler or a `do` without its `while` is open.
    pending: bool,
    /// `}` at depth zero ends the unit.
    brace_ends: bool,
    /// The unit is a type or method declaration.
    declaration: bool,
    /// A `{` was opened at depth zero.
    saw_body: bool,
    /// Index of the `)` closing the most recent control header.
    header_end: Option<usize>,
}

impl Scan {
    fn run(input: &str, tokens: &[Token]) -> Scan {
        let mut scan = Scan::default();
        let Some(first) = tokens.first() else {
            return scan;
        };

        let shape = Parser::new(input)
            .ok()
            .and_then(|mut parser| parser.declaration_shape());
        scan.declaration = matches!(shape, Some(DeclShape::Type(_) | DeclShape::Method));
        scan.brace_ends = scan.declaration
            || first.is_punct("{")
            || ["if", "while", "for", "do", "try", "switch", "synchronized"]
                .iter()
                .any(|w| first.is_word(w));

        let mut stack: Vec<&str> = Vec::new();
        let mut awaiting_handler = false;
        let mut awaiting_while = 0usize;
        let mut header_open = false;

        for (i, tok) in tokens.iter().enumerate() {
            let at_top = stack.is_empty();
            if tok.kind == TokenKind::Ident && at_top {
                match tok.text.as_str() {
                    "try" => awaiting_handler = true,
                    "catch" | "finally" => awaiting_handler = false,
                    "do" => awaiting_while += 1,
                    "while" if awaiting_while > 0 => awaiting_while -= 1,
                    "if" | "while" | "for" | "switch" | "synchronized" => header_open = true,
                    _ => {}
                }
            }
            if tok.kind != TokenKind::Punct {
                continue;
            }
            match tok.text.as_str() {
                open @ ("(" | "[" | "{") => {
                    if at_top && open == "{" {
                        scan.saw_body = true;
                    }
                    stack.push(open);
                }
                close @ (")" | "]" | "}") => {
                    let expected = match close {
                        ")" => "(",
                        "]" => "[",
                        _ => "{",
                    };
                    if stack.pop() != Some(expected) {
                        scan.unbalanced = true;
                        break;
                    }
                    if stack.is_empty() {
                        if close == ")" && std::mem::take(&mut header_open) {
                            scan.header_end = Some(i);
                        }
                        if close == "}"
                            && scan.brace_ends
                            && boundary_allowed(tokens, i, awaiting_handler, awaiting_while)
                        {
                            scan.boundary = Some(tok.span.end);
                            break;
                        }
                    }
                }
                ";" if at_top => {
                    if boundary_allowed(tokens, i, awaiting_handler, awaiting_while) {
                        scan.boundary = Some(tok.span.end);
                        break;
                    }
                }
                _ => {}
            }
        }

        scan.depth = stack.len();
        scan.pending = awaiting_handler || awaiting_while > 0;
        scan
    }
}

/// A terminator at `i` ends the unit unless the statement continues.
fn boundary_allowed(tokens: &[Token], i: usize, awaiting_handler: bool, awaiting_while: usize) -> bool {
    if awaiting_handler || awaiting_while > 0 {
        return false;
    }
    match tokens.get(i + 1) {
        Some(next) => !["else", "catch", "finally"].iter().any(|w| next.is_word(w)),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completeness(input: &str) -> Completeness {
        analyze(input).completeness
    }

    #[test]
    fn test_empty() {
        assert_eq!(completeness(""), Completeness::Empty);
        assert_eq!(completeness("  // note\n /* block */ "), Completeness::Empty);
    }

    #[test]
    fn test_expression_needs_semi() {
        let info = analyze("x * 4");
        assert_eq!(info.completeness, Completeness::CompleteWithSemi);
        assert_eq!(info.source.as_deref(), Some("x * 4;"));

        let info = analyze("x * 4;");
        assert_eq!(info.completeness, Completeness::Complete);
        assert_eq!(info.source.as_deref(), Some("x * 4;"));
    }

    #[test]
    fn test_balanced_expressions_need_only_a_semi() {
        for expr in [
            "x * 4",
            "1 + 2",
            "foo(1, 2)",
            "(a + b) * c",
            "a[i] + b[j]",
            "list.get(0).name()",
            "Math.max(a, b)",
            "\"text\".length()",
            "x = y + 1",
            "a ? b : c",
            "x == y && z",
            "-x",
            "!done",
            "'c'",
            "3.14",
        ] {
            let info = analyze(expr);
            assert_eq!(info.completeness, Completeness::CompleteWithSemi, "{expr}");
            assert_eq!(info.source, Some(format!("{expr};")), "{expr}");

            let terminated = format!("{expr};");
            let info = analyze(&terminated);
            assert_eq!(info.completeness, Completeness::Complete, "{terminated}");
            assert_eq!(info.source.as_deref(), Some(terminated.as_str()));
            assert!(info.remaining.is_empty());
        }
    }

    #[test]
    fn test_open_constructs_stay_open_after_one_more_character() {
        const EXTRA: &[char] = &[
            ' ', '\n', 'a', 'Z', '0', '_', ';', ',', '.', '+', '=', '(', '[', '{', ')', ']', '}',
            '"', '/', '*',
        ];
        // Characters that close the construct, or cannot legally follow it.
        let cases: &[(&str, &str)] = &[
            ("int mu() {", ")]}"),
            ("class A {", ")]}"),
            ("foo(1,", ")]}"),
            ("int[] a = {1, 2,", ")]}"),
            ("\"abc", "\"\n"),
            ("String s = \"abc", "\"\n"),
            ("/* comment", ""),
            ("String s = \"\"\"\n   text", ""),
        ];
        for &(open, excluded) in cases {
            assert_eq!(completeness(open), Completeness::DefinitelyIncomplete, "{open}");
            for &c in EXTRA.iter().filter(|c| !excluded.contains(**c)) {
                let input = format!("{open}{c}");
                assert_eq!(
                    completeness(&input),
                    Completeness::DefinitelyIncomplete,
                    "{input:?}"
                );
            }
        }
    }

    #[test]
    fn test_remaining_input() {
        let info = analyze("int x = 1; int y = 2;");
        assert_eq!(info.completeness, Completeness::Complete);
        assert_eq!(info.source.as_deref(), Some("int x = 1;"));
        assert_eq!(info.remaining, " int y = 2;");
    }

    #[test]
    fn test_open_constructs_are_definitely_incomplete() {
        for input in [
            "int mu() {",
            "\"abc",
            "/* comment",
            "foo(1,",
            "String s = \"\"\"\n   text",
            "x +",
            "a.",
            "new",
            "int[] a = {1, 2,",
            "enum E { A, B,",
            "try { f(); }",
            "do { i++; }",
            "if (a) b(); else",
            "class A extends B",
            "int f()",
            "import java.util.",
        ] {
            assert_eq!(completeness(input), Completeness::DefinitelyIncomplete, "{input}");
        }
    }

    #[test]
    fn test_control_headers_are_considered_incomplete() {
        for input in ["if (x > 1)", "while (true)", "for (int i = 0; i < 3; i++)"] {
            let info = analyze(input);
            assert_eq!(info.completeness, Completeness::ConsideredIncomplete, "{input}");
            assert!(info.source.unwrap().ends_with(';'));
        }
        assert_eq!(
            completeness("if (x) { } else if (y)"),
            Completeness::ConsideredIncomplete
        );
    }

    #[test]
    fn test_brace_terminated_units() {
        let info = analyze("int mu() { return x * 4; } mu()");
        assert_eq!(info.completeness, Completeness::Complete);
        assert_eq!(info.source.as_deref(), Some("int mu() { return x * 4; }"));
        assert_eq!(info.remaining.trim(), "mu()");

        assert_eq!(completeness("class A { int x; }"), Completeness::Complete);
        assert_eq!(completeness("if (a) { b(); }"), Completeness::Complete);
        assert_eq!(completeness("try { f(); } catch (Exception e) { }"), Completeness::Complete);
        assert_eq!(completeness("do { i++; } while (i < 3);"), Completeness::Complete);
    }

    #[test]
    fn test_if_else_continues_unit() {
        let info = analyze("if (a) b(); else c(); d();");
        assert_eq!(info.source.as_deref(), Some("if (a) b(); else c();"));
        assert_eq!(info.remaining.trim(), "d();");
    }

    #[test]
    fn test_array_initializer_is_not_a_boundary() {
        assert_eq!(completeness("int[] a = {1, 2}"), Completeness::CompleteWithSemi);
        assert_eq!(completeness("int[] a = {1, 2};"), Completeness::Complete);
    }

    #[test]
    fn test_postfix_and_literals_need_semi() {
        for input in ["i++", "\"done\"", "return", "foo()", "a[0]", "int x"] {
            assert_eq!(completeness(input), Completeness::CompleteWithSemi, "{input}");
        }
    }

    #[test]
    fn test_unknown_inputs() {
        assert_eq!(completeness("\"abc\\"), Completeness::Unknown);
        assert_eq!(completeness("\"abc\nx"), Completeness::Unknown);
        assert_eq!(completeness("x)"), Completeness::Unknown);
    }

    #[test]
    fn test_broken_literal_after_boundary() {
        let info = analyze("int x = 1; \"ab\ncd");
        assert_eq!(info.completeness, Completeness::Complete);
        assert_eq!(info.source.as_deref(), Some("int x = 1;"));
    }

    #[test]
    fn test_text_block_closed_by_exact_delimiter() {
        assert_eq!(
            completeness("String s = \"\"\"\n  a \\\"\"\" b\n  \"\"\""),
            Completeness::CompleteWithSemi
        );
    }
}

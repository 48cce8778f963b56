//! Completion candidates for the word under the cursor.

use crate::compile::{BUILTIN_CLASSES, static_members};
use crate::syntax::lexer::{LexEnd, keywords, lex};

/// Words that could replace the text between `anchor` and the cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Suggestions {
    /// Byte offset where the word being completed starts.
    pub anchor: usize,
    /// Sorted, without duplicates.
    pub candidates: Vec<String>,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Suggest completions for the word ending at byte offset `cursor`.
///
/// Plain words complete against `names`, the builtin classes and the
/// keywords. After `Qualifier.` only members of a builtin class are offered.
/// Nothing is offered inside a literal or a comment.
pub fn suggest<'a>(
    input: &str,
    cursor: usize,
    names: impl IntoIterator<Item = &'a str>,
) -> Suggestions {
    let cursor = cursor.min(input.len());
    if !input.is_char_boundary(cursor) {
        return Suggestions {
            anchor: cursor,
            candidates: Vec::new(),
        };
    }
    let before = &input[..cursor];
    let anchor = before
        .char_indices()
        .rev()
        .take_while(|&(_, c)| is_word_char(c))
        .last()
        .map_or(cursor, |(i, _)| i);
    let head = &before[..anchor];
    let prefix = &before[anchor..];
    let mut found = Suggestions {
        anchor,
        candidates: Vec::new(),
    };
    if prefix.starts_with(|c: char| c.is_ascii_digit()) || in_literal_or_comment(head) {
        return found;
    }

    let pool: Vec<&str> = match head.strip_suffix('.') {
        Some(qualified) => {
            let start = qualified
                .char_indices()
                .rev()
                .take_while(|&(_, c)| is_word_char(c) || c == '.')
                .last()
                .map_or(qualified.len(), |(i, _)| i);
            static_members(&qualified[start..])
        }
        None => names
            .into_iter()
            .chain(BUILTIN_CLASSES.iter().copied())
            .chain(keywords().iter().copied())
            .collect(),
    };
    found.candidates = pool
        .into_iter()
        .filter(|word| word.starts_with(prefix))
        .map(str::to_string)
        .collect();
    found.candidates.sort();
    found.candidates.dedup();
    found
}

fn in_literal_or_comment(head: &str) -> bool {
    let lexed = lex(head);
    if matches!(
        lexed.end,
        LexEnd::OpenComment | LexEnd::OpenString { .. } | LexEnd::OpenChar | LexEnd::OpenTextBlock
    ) {
        return true;
    }
    let after_tokens = lexed.tokens.last().map_or(0, |t| t.span.end);
    let trailing = &head[after_tokens..];
    trailing
        .rfind("//")
        .is_some_and(|at| !trailing[at..].contains('\n'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(input: &str, names: &[&str]) -> Vec<String> {
        suggest(input, input.len(), names.iter().copied()).candidates
    }

    #[test]
    fn test_declared_names_and_keywords() {
        assert_eq!(complete("co", &["count", "total"]), ["const", "continue", "count"]);
        assert_eq!(complete("x + to", &["count", "total"]), ["total"]);
        let info = suggest("int y = cou", 11, ["count"]);
        assert_eq!(info.anchor, 8);
        assert_eq!(info.candidates, ["count"]);
    }

    #[test]
    fn test_builtin_members_after_dot() {
        assert_eq!(complete("Math.ma", &["make"]), ["max"]);
        assert_eq!(complete("System.out.pr", &[]), ["print", "println"]);
        assert_eq!(complete("System.o", &[]), ["out"]);
        assert!(complete("point.x", &["xs"]).is_empty());
    }

    #[test]
    fn test_nothing_inside_literals_or_comments() {
        assert!(complete("\"co", &["count"]).is_empty());
        assert!(complete("x // co", &["count"]).is_empty());
        assert!(complete("/* co", &["count"]).is_empty());
        assert_eq!(complete("// done\nco", &["count"]), ["const", "continue", "count"]);
        assert!(complete("12", &[]).is_empty());
    }

    #[test]
    fn test_cursor_in_the_middle() {
        let info = suggest("Mat + 1", 3, []);
        assert_eq!(info.anchor, 0);
        assert_eq!(info.candidates, ["Math"]);
        assert!(suggest("é", 1, []).candidates.is_empty());
    }
}

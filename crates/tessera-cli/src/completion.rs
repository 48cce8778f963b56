//! Tab completion for the line editor.

use rustyline::completion::Completer;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Helper};
use tessera_core::analysis::suggest;

/// Slash commands offered when a line starts with `/`.
const COMMANDS: &[&str] = &[
    "/drop", "/env", "/exit", "/ext", "/help", "/history", "/imports", "/list", "/methods",
    "/reload", "/reset", "/types", "/vars",
];

/// Completes slash commands and snippet source.
///
/// The editor owns the helper, so it keeps its own copy of the declared
/// names; the shell refreshes it before every prompt.
#[derive(Default)]
pub struct ShellHelper {
    names: Vec<String>,
}

impl ShellHelper {
    pub fn set_names(&mut self, names: Vec<String>) {
        self.names = names;
    }

    fn candidates(&self, line: &str, pos: usize) -> (usize, Vec<String>) {
        let pos = pos.min(line.len());
        if line.starts_with('/') && line.is_char_boundary(pos) && !line[..pos].contains(' ') {
            let typed = &line[..pos];
            let commands = COMMANDS
                .iter()
                .filter(|c| c.starts_with(typed))
                .map(|c| c.to_string())
                .collect();
            return (0, commands);
        }
        let found = suggest(line, pos, self.names.iter().map(String::as_str));
        (found.anchor, found.candidates)
    }
}

impl Completer for ShellHelper {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        Ok(self.candidates(line, pos))
    }
}

impl Hinter for ShellHelper {
    type Hint = String;
}

impl Highlighter for ShellHelper {}

impl Validator for ShellHelper {}

impl Helper for ShellHelper {}

#[cfg(test)]
mod tests {
    use super::*;

    fn helper(names: &[&str]) -> ShellHelper {
        let mut helper = ShellHelper::default();
        helper.set_names(names.iter().map(|n| n.to_string()).collect());
        helper
    }

    #[test]
    fn test_commands_complete_at_line_start() {
        let helper = helper(&[]);
        assert_eq!(helper.candidates("/re", 3), (0, vec!["/reload".into(), "/reset".into()]));
        assert_eq!(helper.candidates("/ex", 3), (0, vec!["/exit".into(), "/ext".into()]));
        assert_eq!(helper.candidates("/drop x", 7).1, Vec::<String>::new());
    }

    #[test]
    fn test_source_completes_declared_names() {
        let helper = helper(&["total", "tally"]);
        assert_eq!(
            helper.candidates("int sum = ta", 12),
            (10, vec!["tally".into(), "total".into()])
        );
        assert_eq!(helper.candidates("Math.sq", 7), (5, vec!["sqrt".into()]));
    }
}

//! Rendering of snippet events and diagnostics for the shell.

use tessera_core::compile::Symbol;
use tessera_core::{
    Diagnostic, Engine, Feedback, RunException, Snippet, SnippetEvent, SnippetKind, Status,
};

/// Lines to print after an `eval` or `drop`.
pub fn render(engine: &Engine, events: &[SnippetEvent], mode: Feedback) -> Vec<String> {
    let mut lines = Vec::new();
    for event in events {
        let Ok(snippet) = engine.snippet(event.snippet) else {
            continue;
        };
        match (event.cause, event.previous, event.status) {
            (None, Status::Nonexistent, Status::Rejected) => {
                lines.extend(error_lines(snippet));
            }
            (None, Status::Nonexistent, _) => {
                lines.extend(accepted(snippet, event, events, mode));
            }
            (None, _, Status::Dropped) if mode == Feedback::Normal => {
                lines.push(format!("|  dropped {}", snippet.describe()));
            }
            (Some(_), _, status)
                if mode == Feedback::Normal && status.is_active() && !event.is_noop() =>
            {
                lines.push(format!(
                    "|  update modified {}{}",
                    snippet.describe(),
                    recoverable_suffix(snippet)
                ));
            }
            _ => {}
        }
        if let Some(exception) = &event.exception {
            lines.extend(exception_lines(engine, snippet, exception));
        }
    }
    lines
}

fn accepted(
    snippet: &Snippet,
    event: &SnippetEvent,
    events: &[SnippetEvent],
    mode: Feedback,
) -> Vec<String> {
    let mut lines = Vec::new();
    if let (Some(value), Some(name)) = (&event.value, &snippet.name) {
        if mode != Feedback::Silent {
            lines.push(format!("{name} ==> {value}"));
        }
        if snippet.status == Status::Valid {
            return lines;
        }
    }
    if mode != Feedback::Normal || !snippet.is_persistent() {
        return lines;
    }
    if matches!(snippet.kind, SnippetKind::Import(_)) {
        return lines;
    }
    if snippet.is_var() && snippet.status == Status::Valid && event.exception.is_none() {
        return lines;
    }
    let verb = events
        .iter()
        .find(|e| e.cause == Some(snippet.key) && e.status == Status::Overwritten)
        .map_or("created", |e| {
            if e.is_signature_change {
                "replaced"
            } else {
                "modified"
            }
        });
    lines.push(format!(
        "|  {verb} {}{}",
        snippet.describe(),
        recoverable_suffix(snippet)
    ));
    lines
}

/// `, however, it cannot be invoked until variable x is declared` for
/// snippets waiting on undefined names.
pub fn recoverable_suffix(snippet: &Snippet) -> String {
    let use_verb = match snippet.status {
        Status::RecoverableDefined => "invoked",
        Status::RecoverableNotDefined => "referenced",
        _ => return String::new(),
    };
    if snippet.unresolved.is_empty() {
        return format!(", however, it cannot be {use_verb} until it is corrected");
    }
    format!(
        ", however, it cannot be {use_verb} until {}",
        declared_list(&snippet.unresolved)
    )
}

/// `variable x is declared`, `variable x, and method f() are declared`.
fn declared_list(symbols: &[Symbol]) -> String {
    let names: Vec<String> = symbols.iter().map(Symbol::describe).collect();
    match names.as_slice() {
        [one] => format!("{one} is declared"),
        [init @ .., last] => format!("{}, and {last} are declared", init.join(", ")),
        [] => String::new(),
    }
}

fn exception_lines(engine: &Engine, snippet: &Snippet, exception: &RunException) -> Vec<String> {
    match exception {
        RunException::User { class, message } => {
            let head = match message {
                Some(message) => format!("|  Exception {class}: {message}"),
                None => format!("|  Exception {class}"),
            };
            vec![head, format!("|        at (#{}:1)", snippet.id)]
        }
        RunException::Resolution { snippet_id, names } => {
            let target = engine.find_by_id(snippet_id).and_then(|k| engine.snippet(k).ok());
            let message = match target {
                Some(target) if !target.unresolved.is_empty() => format!(
                    "|  attempted to use {} which cannot be invoked until {}",
                    target.describe(),
                    declared_list(&target.unresolved)
                ),
                Some(target) => format!(
                    "|  attempted to use {} which references undefined {}",
                    target.describe(),
                    names.join(", ")
                ),
                None => format!("|  {exception}"),
            };
            vec![message]
        }
        RunException::Stopped => vec!["|  Stopped".to_string()],
        RunException::Termination(_) => vec![
            "|  Execution engine terminated.".to_string(),
            "|  Restore definitions with: /reload".to_string(),
        ],
        RunException::Internal(message) => vec![format!("|  Internal error: {message}")],
    }
}

/// `|  Error:` block with the source line and a caret under the span.
pub fn error_lines(snippet: &Snippet) -> Vec<String> {
    let errors: Vec<&Diagnostic> = snippet.diagnostics.iter().filter(|d| d.is_error).collect();
    if errors.is_empty() {
        return vec!["|  Error:".to_string(), "|  rejected".to_string()];
    }
    let mut lines = Vec::new();
    for diagnostic in errors {
        lines.push("|  Error:".to_string());
        for line in diagnostic.message.lines() {
            lines.push(format!("|  {line}"));
        }
        if let Some((source_line, caret)) = underline(&snippet.source, diagnostic) {
            lines.push(format!("|  {source_line}"));
            lines.push(format!("|  {caret}"));
        }
    }
    lines
}

fn floor_boundary(source: &str, mut index: usize) -> usize {
    index = index.min(source.len());
    while !source.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn underline(source: &str, diagnostic: &Diagnostic) -> Option<(String, String)> {
    if source.is_empty() {
        return None;
    }
    let start = floor_boundary(source, diagnostic.start);
    let line_start = source[..start].rfind('\n').map_or(0, |i| i + 1);
    let line_end = source[start..].find('\n').map_or(source.len(), |i| start + i);
    let end = floor_boundary(source, diagnostic.end.max(start)).min(line_end);

    let indent = source[line_start..start].chars().count();
    let width = source[start..end].chars().count();
    let marker = match width {
        0 | 1 => "^".to_string(),
        n => format!("^{}^", "-".repeat(n - 2)),
    };
    Some((
        source[line_start..line_end].to_string(),
        format!("{}{marker}", " ".repeat(indent)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::UserIo;

    fn engine() -> Engine {
        Engine::builder()
            .execution("direct")
            .io(UserIo::sink())
            .build()
            .unwrap()
    }

    fn eval(engine: &mut Engine, source: &str) -> Vec<String> {
        let events = engine.eval(source).unwrap();
        render(engine, &events, Feedback::Normal)
    }

    #[test]
    fn test_method_waiting_on_dropped_variable() {
        let mut engine = engine();
        assert_eq!(eval(&mut engine, "int x = 10;"), ["x ==> 10"]);
        assert_eq!(
            eval(&mut engine, "int mu() { return x * 4; }"),
            ["|  created method mu()"]
        );
        let x = engine.find_by_name("x")[0];
        let events = engine.drop(x).unwrap();
        assert_eq!(
            render(&engine, &events, Feedback::Normal),
            [
                "|  dropped variable x",
                "|  update modified method mu(), however, it cannot be invoked until variable x is declared",
            ]
        );
    }

    #[test]
    fn test_redeclared_method_is_modified() {
        let mut engine = engine();
        eval(&mut engine, "int f() { return 1; }");
        assert_eq!(
            eval(&mut engine, "int f() { return 2; }"),
            ["|  modified method f()"]
        );
        assert_eq!(
            eval(&mut engine, "String f() { return \"s\"; }"),
            ["|  replaced method f()"]
        );
    }

    #[test]
    fn test_concise_shows_values_only() {
        let mut engine = engine();
        let events = engine.eval("class A {}").unwrap();
        assert!(render(&engine, &events, Feedback::Concise).is_empty());
        let events = engine.eval("2 * 21").unwrap();
        assert_eq!(render(&engine, &events, Feedback::Concise), ["$1 ==> 42"]);
    }

    #[test]
    fn test_user_exception() {
        let mut engine = engine();
        let lines = eval(&mut engine, "1 / 0");
        assert!(lines[0].starts_with("|  Exception java.lang.ArithmeticException"));
    }

    #[test]
    fn test_error_caret() {
        let diagnostic = Diagnostic {
            code: "x".into(),
            message: "bad".into(),
            is_error: true,
            start: 8,
            end: 11,
            position: 8,
        };
        let (line, caret) = underline("int x = \"s\";", &diagnostic).unwrap();
        assert_eq!(line, "int x = \"s\";");
        assert_eq!(caret, "        ^-^");
    }

    #[test]
    fn test_declared_list() {
        let symbols = [Symbol::Var("x".into()), Symbol::Method("f".into())];
        assert_eq!(
            declared_list(&symbols),
            "variable x, and method f() are declared"
        );
    }
}

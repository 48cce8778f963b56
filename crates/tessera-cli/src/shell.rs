//! The interactive read-eval-print loop and its slash commands.

use std::io::IsTerminal;

use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{CompletionType, Config, Editor};
use tessera_core::analysis::Completeness;
use tessera_core::{Engine, EngineConfig, Error, Feedback, Snippet, SnippetKey, Status, UserIo};
use tracing::{debug, warn};

use crate::completion::ShellHelper;
use crate::feedback::{self, recoverable_suffix};
use crate::interrupt::Interrupter;

const PROMPT: &str = "tessera> ";
const CONTINUATION: &str = "   ...> ";

const HELP: &str = "\
|  Type a declaration, statement or expression to evaluate it.
|
|  /list [-all]        list the source of active snippets (or all of them)
|  /vars               list declared variables and their values
|  /methods            list declared methods
|  /types              list declared classes, interfaces, enums and records
|  /imports            list imports
|  /drop <id|name>     drop a snippet
|  /<id>               re-run the snippet with that id
|  /!                  re-run the last snippet
|  /-<n>               re-run the n-th previous snippet
|  /history            list everything typed in this session
|  /reset              start over with an empty session
|  /reload             restart and replay the active snippets
|  /env [spec]         show or change the execution control, then reload
|  /ext <cmd> [arg]    send ping, pid or loaded to the execution control
|  /help               show this help
|  /exit               leave the shell
|
|  Tab completes commands and declared names; Ctrl-C interrupts a running snippet.";

/// Where input lines come from.
enum Input {
    /// Line editing on a terminal.
    Editor(Editor<ShellHelper, DefaultHistory>),
    /// Piped input, read through the same stream user code reads from.
    Piped,
}

enum Line {
    Text(String),
    Interrupted,
    Eof,
}

pub struct Shell {
    engine: Engine,
    config: EngineConfig,
    io: UserIo,
    input: Input,
    interrupter: Interrupter,
    /// Every line typed, for `/history`.
    history: Vec<String>,
}

impl Shell {
    pub fn start(config: EngineConfig) -> tessera_core::Result<Self> {
        let io = UserIo::stdio();
        let engine = Engine::builder()
            .config(config.clone())
            .io(io.clone())
            .build()?;
        for attempt in engine.failover_attempts() {
            debug!(backend = %attempt.name, cause = %attempt.cause, "skipped execution control");
        }
        let input = if std::io::stdin().is_terminal() {
            let editor_config = Config::builder()
                .completion_type(CompletionType::List)
                .build();
            match Editor::with_config(editor_config) {
                Ok(mut editor) => {
                    editor.set_helper(Some(ShellHelper::default()));
                    Input::Editor(editor)
                }
                Err(e) => {
                    warn!("line editing unavailable: {e}");
                    Input::Piped
                }
            }
        } else {
            Input::Piped
        };
        Ok(Self {
            engine,
            config,
            io,
            input,
            interrupter: Interrupter::install(),
            history: Vec::new(),
        })
    }

    fn interactive(&self) -> bool {
        matches!(self.input, Input::Editor(_))
    }

    fn read_line(&mut self, prompt: &str) -> anyhow::Result<Line> {
        match &mut self.input {
            Input::Editor(editor) => {
                if let Some(helper) = editor.helper_mut() {
                    helper.set_names(
                        self.engine
                            .declared_names()
                            .into_iter()
                            .map(String::from)
                            .collect(),
                    );
                }
                match editor.readline(prompt) {
                    Ok(line) => {
                        if !line.trim().is_empty() {
                            let _ = editor.add_history_entry(line.as_str());
                        }
                        Ok(Line::Text(line))
                    }
                    Err(ReadlineError::Interrupted) => Ok(Line::Interrupted),
                    Err(ReadlineError::Eof) => Ok(Line::Eof),
                    Err(e) => Err(e.into()),
                }
            }
            Input::Piped => Ok(match self.io.read_line() {
                Some(line) => Line::Text(line),
                None => Line::Eof,
            }),
        }
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        if self.interactive() {
            println!("|  Welcome to tessera -- type /help for help");
        }
        let mut buffer = String::new();
        loop {
            let prompt = if buffer.is_empty() { PROMPT } else { CONTINUATION };
            let line = match self.read_line(prompt)? {
                Line::Text(line) => line,
                Line::Interrupted => {
                    buffer.clear();
                    continue;
                }
                Line::Eof => break,
            };
            self.history.push(line.clone());

            if buffer.is_empty() && line.trim_start().starts_with('/') {
                if !self.command(line.trim())? {
                    break;
                }
                continue;
            }

            buffer.push_str(&line);
            buffer.push('\n');
            buffer = self.consume(buffer);
        }
        self.engine.close();
        Ok(())
    }

    /// Evaluate every complete unit at the front of `buffer`; return what
    /// still needs more input.
    fn consume(&mut self, mut buffer: String) -> String {
        loop {
            let info = self.engine.analyze_completion(&buffer);
            match info.completeness {
                Completeness::Empty => return String::new(),
                Completeness::DefinitelyIncomplete | Completeness::ConsideredIncomplete => {
                    return buffer;
                }
                Completeness::Unknown => {
                    self.eval(buffer.trim());
                    return String::new();
                }
                Completeness::Complete | Completeness::CompleteWithSemi => {
                    let Some(unit) = info.source else {
                        return String::new();
                    };
                    self.eval(&unit);
                    buffer = info.remaining;
                }
            }
        }
    }

    fn eval(&mut self, unit: &str) {
        self.interrupter.arm(self.engine.stop_handle());
        let result = self.engine.eval(unit);
        self.interrupter.disarm();
        match result {
            Ok(events) => self.print(feedback::render(&self.engine, &events, self.config.feedback)),
            Err(e) => self.report(&e),
        }
    }

    fn print(&self, lines: Vec<String>) {
        for line in lines {
            println!("{line}");
        }
    }

    fn report(&self, e: &Error) {
        for line in e.with_hint().lines() {
            println!("|  {}", line.trim_start());
        }
    }

    fn message(&self, text: &str) {
        if self.config.feedback != Feedback::Silent {
            println!("|  {text}");
        }
    }

    /// Run a slash command. Returns `false` to leave the shell.
    fn command(&mut self, line: &str) -> anyhow::Result<bool> {
        let (name, arg) = match line.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (line, ""),
        };
        match name {
            "/exit" | "/quit" => return Ok(false),
            "/help" | "/?" => println!("{HELP}"),
            "/list" => self.list(arg == "-all"),
            "/vars" => self.vars(),
            "/methods" => self.methods(),
            "/types" => self.types(),
            "/imports" => self.imports(),
            "/drop" => self.drop_snippets(arg),
            "/history" => {
                for entry in &self.history {
                    println!("{entry}");
                }
            }
            "/reset" => {
                self.message("Resetting state.");
                self.restart(None, false);
            }
            "/reload" => {
                self.message("Restarting and restoring state.");
                self.restart(None, true);
            }
            "/env" if arg.is_empty() => {
                let spec = if self.config.execution.is_empty() {
                    "(default)"
                } else {
                    self.config.execution.as_str()
                };
                println!("|  execution: {spec}, active: {}", self.engine.backend_name());
            }
            "/env" => {
                self.message("Setting new execution control and restoring state.");
                self.restart(Some(arg.to_string()), true);
            }
            "/ext" => {
                let (command, rest) = arg.split_once(' ').unwrap_or((arg, ""));
                match self.engine.extension_command(command, rest.trim()) {
                    Ok(reply) => println!("|  {reply}"),
                    Err(e) => self.report(&e),
                }
            }
            "/!" => self.rerun_from_end(1),
            other => {
                let id = &other[1..];
                if let Some(n) = id.strip_prefix('-').and_then(|n| n.parse::<usize>().ok()) {
                    self.rerun_from_end(n);
                } else if let Some(key) = self.engine.find_by_id(id) {
                    self.rerun(key);
                } else {
                    println!("|  Invalid command: {other}");
                    println!("|  Type /help for help.");
                }
            }
        }
        Ok(true)
    }

    fn rerun_from_end(&mut self, n: usize) {
        let count = self.engine.snippets().count();
        match count.checked_sub(n) {
            Some(index) if n > 0 => {
                let key = self.engine.snippets().nth(index).map(|s| s.key);
                if let Some(key) = key {
                    self.rerun(key);
                }
            }
            _ => println!("|  No such snippet: /-{n}"),
        }
    }

    fn rerun(&mut self, key: SnippetKey) {
        let Ok(source) = self.engine.snippet(key).map(|s| s.source.clone()) else {
            return;
        };
        println!("{source}");
        self.eval(&source);
    }

    /// Replace the engine, optionally with a new spec, replaying the active
    /// snippets when `replay` is set. The old engine stays if the new one
    /// cannot start.
    fn restart(&mut self, execution: Option<String>, replay: bool) {
        let mut config = self.config.clone();
        if let Some(spec) = execution {
            config.execution = spec;
        }
        let sources = if replay {
            self.engine.replay_sources()
        } else {
            Vec::new()
        };
        let engine = Engine::builder()
            .config(config.clone())
            .io(self.io.clone())
            .build();
        match engine {
            Ok(engine) => {
                self.engine = engine;
                self.config = config;
            }
            Err(e) => {
                self.report(&e);
                return;
            }
        }
        for source in sources {
            match self.engine.eval(&source) {
                Ok(events) => {
                    for event in events.iter().filter(|e| e.status == Status::Rejected) {
                        if let Ok(snippet) = self.engine.snippet(event.snippet) {
                            self.print(feedback::error_lines(snippet));
                        }
                    }
                }
                Err(e) => {
                    self.report(&e);
                    break;
                }
            }
        }
    }

    fn list(&self, all: bool) {
        for snippet in self.engine.snippets() {
            let shown = all || (snippet.status.is_active() && snippet.is_persistent())
                || (snippet.status == Status::Valid && !snippet.is_persistent());
            if !shown {
                continue;
            }
            let mut lines = snippet.source.lines();
            if let Some(first) = lines.next() {
                println!("{:>5} : {first}", snippet.id);
            }
            for line in lines {
                println!("        {line}");
            }
        }
    }

    fn vars(&mut self) {
        let vars: Vec<(SnippetKey, String, Status)> = self
            .engine
            .variables()
            .into_iter()
            .map(|s| (s.key, s.signature().unwrap_or_else(|| s.describe()), s.status))
            .collect();
        for (key, signature, status) in vars {
            let value = match status {
                Status::Valid | Status::RecoverableDefined => match self.engine.var_value(key) {
                    Ok(value) => value,
                    Err(e) => format!("({e})"),
                },
                _ => "(not-active)".to_string(),
            };
            println!("|    {signature} = {value}");
        }
    }

    fn methods(&self) {
        for snippet in self.engine.methods() {
            println!("|    {}{}", signature(snippet), recoverable_suffix(snippet));
        }
    }

    fn types(&self) {
        for snippet in self.engine.types() {
            println!("|    {}{}", signature(snippet), recoverable_suffix(snippet));
        }
    }

    fn imports(&self) {
        for snippet in self.engine.imports() {
            println!("|    {}", signature(snippet));
        }
    }

    fn drop_snippets(&mut self, arg: &str) {
        if arg.is_empty() {
            println!("|  /drop requires a snippet id or name");
            return;
        }
        let keys = match self.engine.find_by_id(arg) {
            Some(key) => vec![key],
            None => self.engine.find_by_name(arg),
        };
        if keys.is_empty() {
            println!("|  No such snippet: {arg}");
            return;
        }
        for key in keys {
            match self.engine.drop(key) {
                Ok(events) => {
                    self.print(feedback::render(&self.engine, &events, self.config.feedback))
                }
                Err(e) => self.report(&e),
            }
        }
    }
}

fn signature(snippet: &Snippet) -> String {
    snippet.signature().unwrap_or_else(|| snippet.describe())
}

//! The evaluation engine.
//!
//! An [`Engine`] owns one session: the snippet graph, the compiler, the id
//! generator and the active execution control. Every `eval` and `drop` runs
//! on the caller's thread; user code runs in the backend, which can be
//! interrupted from another thread through [`Engine::stop_handle`].
//!
//! # Example
//!
//! ```no_run
//! use tessera_core::Engine;
//!
//! let mut engine = Engine::builder().execution("direct").build()?;
//! for unit in engine.source_to_snippets("int x = 10; x * 4") {
//!     for event in engine.eval(&unit)? {
//!         println!("{:?} -> {:?}", event.status, event.value);
//!     }
//! }
//! # Ok::<(), tessera_core::Error>(())
//! ```

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::analysis::{
    Completeness, CompletionInfo, SnippetKind, Suggestions, TempNames, VarKind, analyze, classify,
    suggest,
};
use crate::compile::{CompileUnit, Compiler, Diagnostic, SketchCompiler, Ty};
use crate::config::EngineConfig;
use crate::error::{Error, FailoverAttempt, Result};
use crate::execute::{
    BackendRegistry, ExecutionControl, ExecutionSpec, LaunchEnv, RunException, StopHandle, UserIo,
};
use crate::graph::{Snippet, SnippetEvent, SnippetGraph, SnippetKey, Status, Transition, initial_status};
use crate::ids::{IdGenerator, IdSpace, SequentialIds};

/// Configures and starts an [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    registry: BackendRegistry,
    compiler: Box<dyn Compiler>,
    ids: Box<dyn IdGenerator>,
    io: Option<UserIo>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            registry: BackendRegistry::with_defaults(),
            compiler: Box::new(SketchCompiler::new()),
            ids: Box::new(SequentialIds::new()),
            io: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Execution control spec, overriding the configured one.
    pub fn execution(mut self, spec: impl Into<String>) -> Self {
        self.config.execution = spec.into();
        self
    }

    pub fn registry(mut self, registry: BackendRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn compiler(mut self, compiler: impl Compiler + 'static) -> Self {
        self.compiler = Box::new(compiler);
        self
    }

    pub fn id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Box::new(ids);
        self
    }

    /// User streams. Defaults to the process's stdio.
    pub fn io(mut self, io: UserIo) -> Self {
        self.io = Some(io);
        self
    }

    /// Parse the spec, start a backend through the failover chain and run
    /// the startup snippets.
    pub fn build(self) -> Result<Engine> {
        let spec = ExecutionSpec::parse(&self.config.execution)?;
        let env = LaunchEnv {
            io: self.io.unwrap_or_else(UserIo::stdio),
            launch_timeout: Duration::from_millis(self.config.launch_timeout_ms),
            worker_path: self.config.worker_path.clone(),
        };
        let started = self.registry.start(&spec, &env)?;

        let mut engine = Engine {
            graph: SnippetGraph::new(),
            compiler: self.compiler,
            ids: self.ids,
            temp_names: TempNames::new(),
            control: started.control,
            backend: started.name,
            failed: started.failed,
            closed: false,
            startup_end: 0,
            config: self.config,
        };

        let startup = engine.config.startup.clone();
        for source in &startup {
            for unit in engine.source_to_snippets(source) {
                let events = engine.eval_unit(&unit, IdSpace::Startup)?;
                if events.iter().any(|e| e.status == Status::Rejected) {
                    warn!(snippet = %unit, "startup snippet rejected");
                }
            }
        }
        engine.startup_end = engine.graph.len();
        Ok(engine)
    }
}

/// An evaluation session.
pub struct Engine {
    graph: SnippetGraph,
    compiler: Box<dyn Compiler>,
    ids: Box<dyn IdGenerator>,
    temp_names: TempNames,
    control: Box<dyn ExecutionControl>,
    backend: String,
    failed: Vec<FailoverAttempt>,
    closed: bool,
    /// Snippets before this key came from the startup list.
    startup_end: usize,
    config: EngineConfig,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Name of the execution control that came up.
    pub fn backend_name(&self) -> &str {
        &self.backend
    }

    /// Chain entries that failed before the active backend started.
    pub fn failover_attempts(&self) -> &[FailoverAttempt] {
        &self.failed
    }

    /// Completeness of the first unit in `input`.
    pub fn analyze_completion(&self, input: &str) -> CompletionInfo {
        analyze(input)
    }

    /// Split `input` into units. A trailing incomplete or malformed part is
    /// returned as the last unit, where it evaluates as erroneous.
    pub fn source_to_snippets(&self, input: &str) -> Vec<String> {
        let mut units = Vec::new();
        let mut rest = input.to_string();
        loop {
            let info = analyze(&rest);
            match (info.completeness, info.source) {
                (Completeness::Empty, _) => break,
                (c, Some(source)) if c.is_complete() => {
                    units.push(source);
                    rest = info.remaining;
                }
                _ => {
                    let tail = rest.trim();
                    if !tail.is_empty() {
                        units.push(tail.to_string());
                    }
                    break;
                }
            }
        }
        units
    }

    /// Evaluate one unit of source. Input that is complete but for its `;`
    /// is terminated first.
    ///
    /// Only the first unit is evaluated and anything after it is dropped with
    /// a warning. Split multi-unit input with [`Engine::source_to_snippets`]
    /// and evaluate each piece.
    pub fn eval(&mut self, input: &str) -> Result<Vec<SnippetEvent>> {
        let info = analyze(input);
        if info.completeness.is_complete() && !info.remaining.trim().is_empty() {
            warn!(ignored = %info.remaining.trim(), "input after the first unit was not evaluated");
        }
        let unit = match info.source {
            _ if info.completeness == Completeness::Empty => return Ok(Vec::new()),
            Some(source) if info.completeness.is_complete() => source,
            _ => input.trim().to_string(),
        };
        self.eval_unit(&unit, IdSpace::Main)
    }

    fn eval_unit(&mut self, unit: &str, space: IdSpace) -> Result<Vec<SnippetEvent>> {
        if self.closed {
            return Err(Error::Closed);
        }
        let mut events = Vec::new();
        for classified in classify(unit) {
            let mut temp_names = self.temp_names.clone();
            let name = match classified.kind {
                SnippetKind::Var(VarKind::TempVarExpression) => {
                    Some(temp_names.next_name(|n| self.graph.var_name_taken(n)))
                }
                _ => classified.name,
            };

            if let Some(key) = self.graph.unchanged(classified.kind, &classified.source) {
                debug!(snippet = %key, "unchanged redeclaration");
                events.push(SnippetEvent::new(key, Status::Valid, Status::Valid, false, None));
                continue;
            }

            let mut unit = CompileUnit {
                snippet_id: "pending".to_string(),
                source: classified.source,
                kind: classified.kind,
                name,
            };
            let outcome = self.compiler.compile(&unit, &self.graph.context());
            let status = initial_status(unit.kind, &outcome);
            unit.snippet_id = self.ids.next_id(match status {
                Status::Rejected => IdSpace::Rejected,
                _ => space,
            });
            if status != Status::Rejected && outcome.value_type != Some(Ty::Void) {
                self.temp_names = temp_names;
            }

            let tx = self.graph.accept(&*self.compiler, unit, outcome);
            events.extend(self.apply(tx, true));
            if self.closed {
                break;
            }
        }
        Ok(events)
    }

    /// Drop an active declaration.
    pub fn drop(&mut self, key: SnippetKey) -> Result<Vec<SnippetEvent>> {
        self.snippet(key)?;
        if self.closed {
            return Err(Error::Closed);
        }
        let tx = self.graph.drop(&*self.compiler, key)?;
        Ok(self.apply(tx, false))
    }

    /// Hand a transition's work to the backend and run what it asks for.
    fn apply(&mut self, tx: Transition, run_first: bool) -> Vec<SnippetEvent> {
        let Transition {
            mut events,
            load,
            retire,
            initialize,
        } = tx;

        if !load.is_empty() {
            if let Err(e) = self.control.load(load) {
                self.record_failure(&mut events, e);
                return events;
            }
        }
        if !retire.is_empty() {
            if let Err(e) = self.control.retire(retire) {
                self.record_failure(&mut events, e);
                return events;
            }
        }

        if run_first {
            if let Some(first) = events.first_mut() {
                if first.previous == Status::Nonexistent && first.status == Status::Valid {
                    let key = first.snippet;
                    let (value, exception) = self.run(key);
                    first.value = value;
                    first.exception = exception;
                }
            }
        }
        for key in initialize {
            if self.closed {
                break;
            }
            let (value, exception) = self.run(key);
            if let Some(event) = events.iter_mut().find(|e| e.snippet == key) {
                event.value = value;
                event.exception = exception;
            }
        }
        events
    }

    /// Run a snippet's entry point. Statements and void expressions have no
    /// value.
    fn run(&mut self, key: SnippetKey) -> (Option<String>, Option<RunException>) {
        let Some(snippet) = self.graph.get(key) else {
            return (None, None);
        };
        let Some(entry) = snippet.entry else {
            return (None, None);
        };
        let silent =
            snippet.kind == SnippetKind::Statement || snippet.value_type == Some(Ty::Void);
        let class_name = snippet.class_name();
        match self.control.invoke(&class_name, entry) {
            Ok(_) if silent => (None, None),
            Ok(value) => (Some(value), None),
            Err(e) => {
                self.note_termination(&e);
                (None, Some(e))
            }
        }
    }

    fn record_failure(&mut self, events: &mut [SnippetEvent], e: RunException) {
        self.note_termination(&e);
        if let Some(first) = events.first_mut() {
            first.exception = Some(e);
        }
    }

    fn note_termination(&mut self, e: &RunException) {
        if matches!(e, RunException::Termination(_)) && !self.closed {
            warn!(backend = %self.backend, "execution control terminated: {e}");
            self.closed = true;
        }
    }

    pub fn snippet(&self, key: SnippetKey) -> Result<&Snippet> {
        self.graph
            .get(key)
            .ok_or_else(|| Error::InvalidKey(key.to_string()))
    }

    /// Every snippet evaluated in this session, in order.
    pub fn snippets(&self) -> impl Iterator<Item = &Snippet> {
        self.graph.snippets()
    }

    /// Active declarations, in order.
    pub fn active_snippets(&self) -> impl Iterator<Item = &Snippet> {
        self.graph.active()
    }

    pub fn variables(&self) -> Vec<&Snippet> {
        self.graph.active().filter(|s| s.is_var()).collect()
    }

    pub fn methods(&self) -> Vec<&Snippet> {
        self.graph
            .active()
            .filter(|s| s.kind == SnippetKind::Method)
            .collect()
    }

    pub fn types(&self) -> Vec<&Snippet> {
        self.graph
            .active()
            .filter(|s| matches!(s.kind, SnippetKind::TypeDecl(_)))
            .collect()
    }

    pub fn imports(&self) -> Vec<&Snippet> {
        self.graph
            .active()
            .filter(|s| matches!(s.kind, SnippetKind::Import(_)))
            .collect()
    }

    pub fn status(&self, key: SnippetKey) -> Result<Status> {
        Ok(self.snippet(key)?.status)
    }

    pub fn diagnostics(&self, key: SnippetKey) -> Result<&[Diagnostic]> {
        Ok(&self.snippet(key)?.diagnostics)
    }

    /// Names the snippet references but nothing defines, in order of first
    /// occurrence.
    pub fn unresolved_dependencies(&self, key: SnippetKey) -> Result<Vec<String>> {
        Ok(self.snippet(key)?.unresolved_names())
    }

    /// Active snippets that reference `key`.
    pub fn dependents(&self, key: SnippetKey) -> Result<Vec<SnippetKey>> {
        self.snippet(key)?;
        Ok(self.graph.dependents(key))
    }

    pub fn find_by_id(&self, id: &str) -> Option<SnippetKey> {
        self.graph.find_by_id(id)
    }

    /// Completions for the word ending at byte offset `cursor` of `input`,
    /// drawn from the active declarations, builtin classes and keywords.
    pub fn completion_suggestions(&self, input: &str, cursor: usize) -> Suggestions {
        suggest(input, cursor, self.declared_names())
    }

    /// Names of the active declarations other than imports.
    pub fn declared_names(&self) -> Vec<&str> {
        self.graph
            .active()
            .filter(|s| !matches!(s.kind, SnippetKind::Import(_)))
            .filter_map(|s| s.name.as_deref())
            .collect()
    }

    /// Active declarations named `name`.
    pub fn find_by_name(&self, name: &str) -> Vec<SnippetKey> {
        self.graph.find_by_name(name)
    }

    /// Current value of an active variable, rendered for display.
    pub fn var_value(&mut self, key: SnippetKey) -> Result<String> {
        let snippet = self.snippet(key)?;
        if !snippet.is_var() {
            return Err(Error::WrongKind {
                key: snippet.id.clone(),
                expected: "a variable",
                actual: snippet.kind.to_string(),
            });
        }
        if self.closed {
            return Err(Error::Closed);
        }
        if !snippet.status.is_active() {
            return Err(Error::InvalidOperation(format!(
                "{} is {}",
                snippet.describe(),
                snippet.status
            )));
        }
        let class_name = snippet.class_name();
        let name = snippet.name.clone().unwrap_or_default();
        self.control.var_value(&class_name, &name).map_err(|e| {
            self.note_termination(&e);
            Error::Execution(e.to_string())
        })
    }

    /// Backend-specific command (`ping`, `pid`, `loaded`).
    pub fn extension_command(&mut self, command: &str, arg: &str) -> Result<String> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.control.extension_command(command, arg).map_err(|e| {
            self.note_termination(&e);
            Error::Execution(e.to_string())
        })
    }

    /// Sources of the active snippets the user entered, for replay into a
    /// fresh engine.
    pub fn replay_sources(&self) -> Vec<String> {
        self.graph
            .active()
            .filter(|s| s.key.as_usize() >= self.startup_end)
            .map(|s| s.source.clone())
            .collect()
    }

    /// Ask running user code to stop. Advisory; the running call returns
    /// with [`RunException::Stopped`] once the code notices.
    pub fn stop(&self) {
        self.control.stop();
    }

    /// Handle for stopping user code from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.control.stop_handle()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Shut down the backend. Queries keep working afterwards.
    pub fn close(&mut self) {
        if !self.closed {
            info!(backend = %self.backend, "closing engine");
        }
        self.closed = true;
        self.control.close();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::builder()
            .execution("direct")
            .io(UserIo::sink())
            .build()
            .unwrap()
    }

    #[test]
    fn test_source_to_snippets_splits_units() {
        let engine = engine();
        assert_eq!(
            engine.source_to_snippets("int x = 1; int y = 2;\nx + y"),
            vec!["int x = 1;", "int y = 2;", "x + y;"]
        );
        assert!(engine.source_to_snippets("  ").is_empty());
    }

    #[test]
    fn test_eval_takes_only_the_first_unit() {
        let mut engine = engine();
        let events = engine.eval("int a = 1; int b = 2;").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(engine.find_by_name("a").len(), 1);
        assert!(engine.find_by_name("b").is_empty());
    }

    #[test]
    fn test_completion_suggestions_follow_active_names() {
        let mut engine = engine();
        engine.eval("int counter = 1;").unwrap();
        engine.eval("int countDown() { return counter - 1; }").unwrap();
        let info = engine.completion_suggestions("coun", 4);
        assert_eq!(info.anchor, 0);
        assert_eq!(info.candidates, ["countDown", "counter"]);

        let counter = engine.find_by_name("counter")[0];
        engine.drop(counter).unwrap();
        assert_eq!(engine.completion_suggestions("coun", 4).candidates, ["countDown"]);
        assert_eq!(
            engine.completion_suggestions("1 + Integer.MA", 14).candidates,
            ["MAX_VALUE"]
        );
    }

    #[test]
    fn test_temporary_gets_value_and_name() {
        let mut engine = engine();
        let events = engine.eval("1 + 2").unwrap();
        assert_eq!(events[0].value.as_deref(), Some("3"));
        let snippet = engine.snippet(events[0].snippet).unwrap();
        assert_eq!(snippet.name.as_deref(), Some("$1"));
        assert_eq!(snippet.id, "1");
    }

    #[test]
    fn test_rejected_ids_use_their_own_sequence() {
        let mut engine = engine();
        let events = engine.eval("int x = \"s\";").unwrap();
        assert_eq!(events[0].status, Status::Rejected);
        assert_eq!(engine.snippet(events[0].snippet).unwrap().id, "e1");
        let events = engine.eval("int y = 1;").unwrap();
        assert_eq!(engine.snippet(events[0].snippet).unwrap().id, "1");
    }

    #[test]
    fn test_queries_after_close() {
        let mut engine = engine();
        let key = engine.eval("int x = 3;").unwrap()[0].snippet;
        engine.close();
        assert!(engine.is_closed());
        assert_eq!(engine.status(key).unwrap(), Status::Valid);
        assert_eq!(engine.variables().len(), 1);
        assert!(matches!(engine.eval("x"), Err(Error::Closed)));
        assert!(matches!(engine.var_value(key), Err(Error::Closed)));
        assert!(matches!(engine.drop(key), Err(Error::Closed)));
        assert!(matches!(
            engine.status(SnippetKey(42)),
            Err(Error::InvalidKey(_))
        ));
    }

    #[test]
    fn test_wrong_kind_checked_before_closed() {
        let mut engine = engine();
        let key = engine.eval("int f() { return 1; }").unwrap()[0].snippet;
        engine.close();
        assert!(matches!(engine.var_value(key), Err(Error::WrongKind { .. })));
    }
}

//! Interpreter runtime for compiled snippets.
//!
//! This module provides:
//! - [`Runtime`]: the loaded program (variables, methods, types) and the
//!   interpreter that executes bound syntax trees
//! - [`Value`]: runtime values with the shell's display rules
//! - [`RuntimeIo`] / [`LineSource`]: the user streams the program sees
//!
//! Both execution control families host a `Runtime`: the direct backend on
//! an executor thread of the engine process, the remote backend inside the
//! worker agent. A `Runtime` is single threaded; it is created and driven on
//! the thread that owns it.

mod builtins;
mod interp;
mod value;

pub use value::{Array, MESSAGE_FIELD, Object, ObjectKind, Value, format_double, quote_str};

use std::cell::RefCell;
use std::io::{self, BufRead, Write};
use std::rc::Rc;
use std::time::Instant;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::compile::{ClassBytecode, ExecBody, INIT_METHOD, Member, RUN_METHOD, Ty};
use crate::execute::{AbortHandle, RunException};
use crate::syntax::ast::{MethodDecl, TypeDecl};

use interp::{Frame, Unwind};

/// Call depth at which user code gets a `StackOverflowError`.
pub const MAX_DEPTH: usize = 2000;

/// Stack size for threads that host a [`Runtime`].
pub const RUNTIME_STACK_SIZE: usize = 256 * 1024 * 1024;

/// Line-oriented user input.
pub trait LineSource: Send {
    /// Next line without its terminator; `None` at end of input.
    fn read_line(&mut self) -> io::Result<Option<String>>;
}

/// [`LineSource`] over any buffered reader.
pub struct LineReader<R>(pub R);

impl<R: BufRead + Send> LineSource for LineReader<R> {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.0.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }
}

/// Streams user code writes to and reads from.
pub struct RuntimeIo {
    pub out: Box<dyn Write + Send>,
    pub err: Box<dyn Write + Send>,
    pub input: Box<dyn LineSource>,
}

impl RuntimeIo {
    /// Discard output, empty input.
    pub fn sink() -> Self {
        Self {
            out: Box::new(io::sink()),
            err: Box::new(io::sink()),
            input: Box::new(LineReader(io::empty())),
        }
    }
}

/// A snippet-level variable.
struct Global {
    owner: String,
    ty: Ty,
    value: Value,
}

/// A snippet-level method.
struct GlobalMethod {
    owner: String,
    decl: Rc<MethodDecl>,
}

/// A user type and its static state.
pub(crate) struct TypeEntry {
    owner: String,
    decl: Rc<TypeDecl>,
    statics: RefCell<FxHashMap<String, Value>>,
}

impl TypeEntry {
    /// Names of direct supertypes, superclass first.
    fn parents(&self) -> Vec<String> {
        self.decl
            .extends
            .iter()
            .chain(&self.decl.implements)
            .map(|t| t.base().to_string())
            .collect()
    }

    /// Give every static field and enum constant its default value.
    fn declare_statics(&self) {
        let mut statics = self.statics.borrow_mut();
        for name in &self.decl.constants {
            statics.insert(name.clone(), Value::Null);
        }
        for f in self.decl.fields.iter().filter(|f| interp::is_static_field(&self.decl, f)) {
            let v = f.var.ty.as_ref().map_or(Value::Null, value::default_for_ref);
            statics.insert(f.var.name.clone(), v);
        }
    }
}

/// The loaded program and its interpreter.
pub struct Runtime {
    classes: FxHashMap<String, Rc<ClassBytecode>>,
    vars: FxHashMap<String, Global>,
    methods: FxHashMap<(String, String), GlobalMethod>,
    types: FxHashMap<String, Rc<TypeEntry>>,
    io: RuntimeIo,
    abort: AbortHandle,
    depth: usize,
    seed: u64,
    started: Instant,
}

impl Runtime {
    pub fn new(io: RuntimeIo, abort: AbortHandle) -> Self {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x2545_F491_4F6C_DD1D)
            | 1;
        Self {
            classes: FxHashMap::default(),
            vars: FxHashMap::default(),
            methods: FxHashMap::default(),
            types: FxHashMap::default(),
            io,
            abort,
            depth: 0,
            seed,
            started: Instant::now(),
        }
    }

    /// Install classes. Redefining a class keeps the value of a variable
    /// whose owner and type are unchanged. Static initializers of types run
    /// once every class of the batch is installed.
    pub fn load(&mut self, classes: Vec<ClassBytecode>) {
        let mut fresh_types = Vec::new();
        for class in classes {
            let class = Rc::new(class);
            debug!(class = %class.class_name, corralled = class.is_corralled(), "load");
            match &class.member {
                Member::Var { name, ty, .. } => {
                    let keep = self
                        .vars
                        .get(name)
                        .is_some_and(|g| g.owner == class.class_name && g.ty == *ty);
                    if !keep {
                        self.vars.insert(
                            name.clone(),
                            Global {
                                owner: class.class_name.clone(),
                                ty: ty.clone(),
                                value: value::default_for(ty),
                            },
                        );
                    }
                }
                Member::Method(decl) => {
                    self.methods.insert(
                        (decl.name.clone(), decl.param_sig()),
                        GlobalMethod {
                            owner: class.class_name.clone(),
                            decl: Rc::new(decl.clone()),
                        },
                    );
                }
                Member::Type(decl) => {
                    let entry = Rc::new(TypeEntry {
                        owner: class.class_name.clone(),
                        decl: Rc::new(decl.clone()),
                        statics: RefCell::new(FxHashMap::default()),
                    });
                    entry.declare_statics();
                    self.types.insert(decl.name.clone(), entry.clone());
                    if !class.is_corralled() {
                        fresh_types.push(entry);
                    }
                }
                Member::Import | Member::Exec(_) => {}
            }
            self.classes.insert(class.class_name.clone(), class);
        }
        for entry in fresh_types {
            self.abort.reset();
            if let Err(unwind) = self.init_statics(&entry) {
                let err = self.to_run_exception(unwind);
                warn!(class = %entry.decl.name, "static initializer failed: {err}");
            }
        }
    }

    /// Remove classes. A binding is only removed while the retired class
    /// still owns it.
    pub fn retire(&mut self, class_names: &[String]) {
        for name in class_names {
            debug!(class = %name, "retire");
            self.classes.remove(name);
            self.vars.retain(|_, g| g.owner != *name);
            self.methods.retain(|_, m| m.owner != *name);
            self.types.retain(|_, t| t.owner != *name);
        }
    }

    /// Run an entry point of a loaded class and render its value.
    ///
    /// `$init` evaluates a variable's initializer and stores the result;
    /// `$run` executes an expression or statement. Statements yield an
    /// empty string.
    pub fn invoke(&mut self, class_name: &str, method: &str) -> Result<String, RunException> {
        let class = self
            .classes
            .get(class_name)
            .cloned()
            .ok_or_else(|| RunException::Internal(format!("class {class_name} is not loaded")))?;
        if class.is_corralled() {
            return Err(RunException::Resolution {
                snippet_id: class.snippet_id.clone(),
                names: class.unresolved.clone(),
            });
        }
        self.abort.reset();
        self.depth = 0;
        let result = match (&class.member, method) {
            (Member::Var { name, ty, init }, INIT_METHOD) => {
                self.initialize(class_name, name, ty, init.as_ref())
            }
            (Member::Exec(body), RUN_METHOD) => self.run(body),
            _ => {
                return Err(RunException::Internal(format!(
                    "{class_name} has no entry point {method}"
                )));
            }
        };
        let _ = self.io.out.flush();
        let _ = self.io.err.flush();
        result.map_err(|unwind| self.to_run_exception(unwind))
    }

    /// Current value of a variable, rendered for display.
    pub fn var_value(&mut self, class_name: &str, name: &str) -> Result<String, RunException> {
        let value = match self.vars.get(name) {
            Some(g) if g.owner == class_name => g.value.clone(),
            _ => {
                return Err(RunException::Internal(format!(
                    "variable {name} of {class_name} is not loaded"
                )));
            }
        };
        self.abort.reset();
        self.display(&value)
            .map_err(|unwind| self.to_run_exception(unwind))
    }

    /// Names of loaded classes, sorted.
    pub fn loaded_classes(&self) -> Vec<String> {
        let mut names: Vec<_> = self.classes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Backend-specific commands outside the core protocol.
    pub fn extension_command(&self, command: &str, _arg: &str) -> Result<String, RunException> {
        match command {
            "ping" => Ok("pong".to_string()),
            "pid" => Ok(std::process::id().to_string()),
            "loaded" => Ok(self.loaded_classes().join(" ")),
            other => Err(RunException::Internal(format!(
                "unsupported extension command '{other}'"
            ))),
        }
    }

    fn initialize(
        &mut self,
        class_name: &str,
        name: &str,
        ty: &Ty,
        init: Option<&crate::syntax::ast::Expr>,
    ) -> Result<String, Unwind> {
        let value = match init {
            Some(expr) => {
                let mut frame = Frame::top();
                let v = self.eval(expr, &mut frame)?;
                interp::coerce_to(v, ty)
            }
            None => value::default_for(ty),
        };
        match self.vars.get_mut(name) {
            Some(g) if g.owner == class_name => g.value = value.clone(),
            _ => {
                return Err(Unwind::Fatal(RunException::Internal(format!(
                    "variable {name} is not loaded"
                ))));
            }
        }
        self.display(&value)
    }

    fn run(&mut self, body: &ExecBody) -> Result<String, Unwind> {
        let mut frame = Frame::top();
        match body {
            ExecBody::Expr(expr) => {
                let value = self.eval(expr, &mut frame)?;
                self.display(&value)
            }
            ExecBody::Stmt(stmt) => {
                self.exec(stmt, &mut frame)?;
                Ok(String::new())
            }
        }
    }

    fn to_run_exception(&mut self, unwind: Unwind) -> RunException {
        match unwind {
            Unwind::Stop => RunException::Stopped,
            Unwind::Fatal(e) => e,
            Unwind::Throw(value) => {
                let (class, message) = match &value {
                    Value::Object(obj) => (obj.class.clone(), obj.message()),
                    other => (format!("{other:?}"), None),
                };
                RunException::User {
                    class: crate::compile::qualified_exception_name(&class),
                    message,
                }
            }
        }
    }

    /// Fail with a resolution error while `owner` is corralled.
    fn ensure_live(&self, owner: &str) -> Result<(), Unwind> {
        match self.classes.get(owner) {
            Some(class) if class.is_corralled() => Err(Unwind::Fatal(RunException::Resolution {
                snippet_id: class.snippet_id.clone(),
                names: class.unresolved.clone(),
            })),
            Some(_) => Ok(()),
            None => Err(Unwind::Fatal(RunException::Internal(format!(
                "class {owner} is not loaded"
            )))),
        }
    }

    fn write_out(&mut self, text: &str) {
        let _ = self.io.out.write_all(text.as_bytes());
        let _ = self.io.out.flush();
    }

    fn write_err(&mut self, text: &str) {
        let _ = self.io.err.write_all(text.as_bytes());
        let _ = self.io.err.flush();
    }

    /// xorshift64*.
    fn next_random(&mut self) -> f64 {
        let mut x = self.seed;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.seed = x;
        let bits = x.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 11;
        bits as f64 / (1u64 << 53) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{SnippetKind, VarKind, classify};
    use crate::compile::{CompileContext, CompileUnit, Compiler, SketchCompiler};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    /// Compiles snippets in sequence and runs them like the engine would.
    struct Session {
        ctx: CompileContext,
        runtime: Runtime,
        next: usize,
        out: Capture,
    }

    impl Session {
        fn new() -> Self {
            Self::with_input("")
        }

        fn with_input(input: &str) -> Self {
            let out = Capture::default();
            let io = RuntimeIo {
                out: Box::new(out.clone()),
                err: Box::new(io::sink()),
                input: Box::new(LineReader(io::Cursor::new(input.as_bytes().to_vec()))),
            };
            Self {
                ctx: CompileContext::new(),
                runtime: Runtime::new(io, AbortHandle::new()),
                next: 0,
                out,
            }
        }

        fn eval(&mut self, source: &str) -> Result<String, RunException> {
            let classified = classify(source).remove(0);
            self.next += 1;
            let name = match classified.kind {
                SnippetKind::Var(VarKind::TempVarExpression) => Some(format!("${}", self.next)),
                _ => classified.name.clone(),
            };
            let unit = CompileUnit {
                snippet_id: self.next.to_string(),
                source: classified.source.clone(),
                kind: classified.kind,
                name,
            };
            let outcome = SketchCompiler::new().compile(&unit, &self.ctx);
            assert!(!outcome.has_errors(), "{source}: {:?}", outcome.diagnostics);
            if let Some(decl) = outcome.declaration.clone() {
                self.ctx.insert(decl);
            }
            let artifact = outcome.artifact.expect("artifact");
            let class_name = artifact.class_name.clone();
            let entry = match &artifact.member {
                Member::Var { .. } => Some(INIT_METHOD),
                Member::Exec(_) => Some(RUN_METHOD),
                _ => None,
            };
            self.runtime.load(vec![artifact]);
            match entry {
                Some(method) => self.runtime.invoke(&class_name, method),
                None => Ok(String::new()),
            }
        }

        fn value(&mut self, source: &str) -> String {
            self.eval(source).unwrap()
        }
    }

    #[test]
    fn test_arithmetic_and_display() {
        let mut s = Session::new();
        assert_eq!(s.value("1 + 2"), "3");
        assert_eq!(s.value("7 / 2"), "3");
        assert_eq!(s.value("7 / 2.0"), "3.5");
        assert_eq!(s.value("Integer.MAX_VALUE + 1"), "-2147483648");
        assert_eq!(s.value("\"a\" + 1 + 2"), "\"a12\"");
        assert_eq!(s.value("'x'"), "'x'");
        assert_eq!(s.value("10L * 3"), "30");
        assert_eq!(s.value("-7 % 3"), "-1");
        assert_eq!(s.value("1 << 33"), "2");
    }

    #[test]
    fn test_variables_and_methods() {
        let mut s = Session::new();
        assert_eq!(s.value("int x = 10;"), "10");
        assert_eq!(s.value("int mu() { return x * 4; }"), "");
        assert_eq!(s.value("mu()"), "40");
        s.value("x = 3");
        assert_eq!(s.value("mu()"), "12");
        assert_eq!(s.value("x += 2"), "5");
    }

    #[test]
    fn test_recursion_and_loops() {
        let mut s = Session::new();
        s.value("long fact(int n) { return n <= 1 ? 1 : n * fact(n - 1); }");
        assert_eq!(s.value("fact(20)"), "2432902008176640000");
        s.value("int total = 0;");
        s.value("for (int i = 0; i < 5; i++) { if (i == 3) continue; total += i; }");
        assert_eq!(s.value("total"), "7");
    }

    #[test]
    fn test_classes_records_and_enums() {
        let mut s = Session::new();
        s.value("record Point(int x, int y) {}");
        assert_eq!(s.value("new Point(1, 2)"), "Point[x=1, y=2]");
        assert_eq!(s.value("new Point(1, 2).y()"), "2");
        assert_eq!(s.value("new Point(1, 2).equals(new Point(1, 2))"), "true");
        s.value("class Counter { int n; void inc() { n++; } int get() { return n; } }");
        s.value("Counter c = new Counter();");
        s.value("c.inc()");
        s.value("c.inc()");
        assert_eq!(s.value("c.get()"), "2");
        s.value("enum Color { RED, GREEN }");
        assert_eq!(s.value("Color.GREEN"), "GREEN");
        assert_eq!(s.value("Color.GREEN.ordinal()"), "1");
    }

    #[test]
    fn test_inheritance_and_overrides() {
        let mut s = Session::new();
        s.value("class Animal { String sound() { return \"...\"; } String speak() { return \"I say \" + sound(); } }");
        s.value("class Dog extends Animal { String sound() { return \"woof\"; } }");
        assert_eq!(s.value("new Dog().speak()"), "\"I say woof\"");
        s.value("class Named { String name; Named(String name) { this.name = name; } public String toString() { return \"Named(\" + name + \")\"; } }");
        assert_eq!(s.value("new Named(\"a\")"), "Named(a)");
        s.value("class Base { int v = 1; Base(int add) { v += add; } }");
        s.value("class Derived extends Base { int w = v * 10; Derived() { super(4); } }");
        assert_eq!(s.value("new Derived().w"), "50");
    }

    #[test]
    fn test_arrays() {
        let mut s = Session::new();
        assert_eq!(s.value("int[] a = {1, 2, 3};"), "int[3] { 1, 2, 3 }");
        assert_eq!(s.value("a.length"), "3");
        s.value("a[1] *= 5");
        assert_eq!(s.value("a[1]"), "10");
        assert_eq!(s.value("new int[2][]"), "int[2][] { null, null }");
        assert_eq!(s.value("new String[] {\"x\"}"), "String[1] { \"x\" }");
        let err = s.eval("a[5]").unwrap_err();
        assert_eq!(
            err,
            RunException::User {
                class: "java.lang.ArrayIndexOutOfBoundsException".into(),
                message: Some("Index 5 out of bounds for length 3".into()),
            }
        );
    }

    #[test]
    fn test_exceptions() {
        let mut s = Session::new();
        let err = s.eval("1 / 0").unwrap_err();
        assert_eq!(
            err,
            RunException::User {
                class: "java.lang.ArithmeticException".into(),
                message: Some("/ by zero".into()),
            }
        );
        s.value("String r = \"\";");
        s.value("try { throw new IllegalStateException(\"bad\"); } catch (RuntimeException e) { r = e.getMessage(); } finally { r = r + \"!\"; }");
        assert_eq!(s.value("r"), "\"bad!\"");
        s.value("class Oops extends Exception { Oops(String m) { super(m); } }");
        let err = s.eval("throw new Oops(\"x\");").unwrap_err();
        assert_eq!(
            err,
            RunException::User {
                class: "Oops".into(),
                message: Some("x".into()),
            }
        );
        let err = s.eval("Integer.parseInt(\"abc\")").unwrap_err();
        assert!(matches!(err, RunException::User { class, .. } if class == "java.lang.NumberFormatException"));
    }

    #[test]
    fn test_stack_overflow_is_user_exception() {
        let err = std::thread::Builder::new()
            .stack_size(RUNTIME_STACK_SIZE)
            .spawn(|| {
                let mut s = Session::new();
                s.value("int down(int n) { return down(n + 1); }");
                s.eval("down(0)").unwrap_err()
            })
            .unwrap()
            .join()
            .unwrap();
        assert!(matches!(err, RunException::User { class, .. } if class == "java.lang.StackOverflowError"));
    }

    #[test]
    fn test_output_and_input() {
        let mut s = Session::with_input("world\n");
        s.value("System.out.println(\"hello \" + IO.readLine())");
        s.value("System.out.print(1.0 / 4)");
        assert_eq!(s.out.text(), "hello world\n0.25");
        assert_eq!(s.value("IO.readLine()"), "null");
    }

    #[test]
    fn test_strings() {
        let mut s = Session::new();
        assert_eq!(s.value("\"hello\".substring(1, 3)"), "\"el\"");
        assert_eq!(s.value("\"hello\".indexOf('l')"), "2");
        assert_eq!(s.value("\"a,b,,\".split(\",\").length"), "2");
        assert_eq!(s.value("\"Ab\".compareTo(\"Ac\")"), "-1");
        assert_eq!(s.value("String.join(\"-\", \"a b c\".split(\" \"))"), "\"a-b-c\"");
        assert_eq!(s.value("\"hello\".hashCode()"), "99162322");
    }

    #[test]
    fn test_corralled_class_reports_resolution() {
        let mut s = Session::new();
        s.value("int mu() { return x * 4; }");
        let err = s.eval("mu()").unwrap_err();
        assert_eq!(
            err,
            RunException::Resolution {
                snippet_id: "1".into(),
                names: vec!["x".into()],
            }
        );
    }

    #[test]
    fn test_abort_stops_loop() {
        let mut s = Session::new();
        s.value("int n = 0;");
        let abort = s.runtime.abort.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            abort.abort();
        });
        let err = s.eval("while (true) { n++; }").unwrap_err();
        handle.join().unwrap();
        assert_eq!(err, RunException::Stopped);
    }

    #[test]
    fn test_retire_respects_owner() {
        let mut s = Session::new();
        s.value("int x = 1;");
        s.value("int x = 2;");
        s.runtime.retire(&["$S1".to_string()]);
        assert_eq!(s.runtime.var_value("$S2", "x").unwrap(), "2");
        s.runtime.retire(&["$S2".to_string()]);
        assert!(s.runtime.var_value("$S2", "x").is_err());
    }
}

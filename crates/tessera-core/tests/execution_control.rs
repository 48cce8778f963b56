//! Integration tests for execution control: failover, remote agents, user
//! streams and stopping.

use std::io::{Cursor, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tessera_core::execute::{DirectFactory, ExecutionControl, LaunchEnv, RemoteControl, SpecEntry};
use tessera_core::ipc::{agent, pipe};
use tessera_core::runtime::LineReader;
use tessera_core::{
    BackendFactory, BackendRegistry, Engine, Error, Result, RunException, Status, UserIo,
};

// =============================================================================
// Test Helpers
// =============================================================================

/// Records every launch; fails unless it wraps a working factory.
struct Recording {
    name: &'static str,
    inner: Option<DirectFactory>,
    launched: Arc<Mutex<Vec<String>>>,
}

impl BackendFactory for Recording {
    fn name(&self) -> &str {
        self.name
    }

    fn launch(&self, entry: &SpecEntry, env: &LaunchEnv) -> Result<Box<dyn ExecutionControl>> {
        self.launched.lock().unwrap().push(self.name.to_string());
        match &self.inner {
            Some(inner) => inner.launch(entry, env),
            None => Err(Error::Launch(format!("{} always fails", self.name))),
        }
    }
}

fn recording_registry(launched: &Arc<Mutex<Vec<String>>>) -> BackendRegistry {
    let mut registry = BackendRegistry::with_defaults();
    for name in ["bad1", "bad2", "jdi"] {
        registry.register(Recording {
            name,
            inner: None,
            launched: launched.clone(),
        });
    }
    registry.register(Recording {
        name: "good",
        inner: Some(DirectFactory),
        launched: launched.clone(),
    });
    registry
}

/// Runs an agent on a thread, connected through in-memory pipes.
struct InMemoryRemote;

impl BackendFactory for InMemoryRemote {
    fn name(&self) -> &str {
        "inmemory"
    }

    fn launch(&self, _entry: &SpecEntry, env: &LaunchEnv) -> Result<Box<dyn ExecutionControl>> {
        let (commands, agent_in) = pipe();
        let (agent_out, frames) = pipe();
        thread::spawn(move || agent::serve(Box::new(agent_in), Box::new(agent_out), "token"));
        let control = RemoteControl::attach(
            Box::new(frames),
            Box::new(commands),
            env.io.clone(),
            "token",
            Duration::from_secs(5),
        )?;
        Ok(Box::new(control))
    }
}

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// User streams with captured output and the given input text.
fn captured_io(input: &str) -> (UserIo, Capture, Capture) {
    let out = Capture::default();
    let err = Capture::default();
    let io = UserIo::new(
        Box::new(out.clone()),
        Box::new(err.clone()),
        Box::new(LineReader(Cursor::new(input.to_string()))),
    );
    (io, out, err)
}

fn engine_on(spec: &str, io: UserIo) -> Engine {
    let mut registry = BackendRegistry::with_defaults();
    registry.register(InMemoryRemote);
    Engine::builder()
        .registry(registry)
        .execution(spec)
        .io(io)
        .build()
        .unwrap()
}

// =============================================================================
// Failover
// =============================================================================

#[test]
fn test_failover_records_each_failure() {
    let launched: Arc<Mutex<Vec<String>>> = Arc::default();
    let engine = Engine::builder()
        .registry(recording_registry(&launched))
        .execution("bad1,bad2,good")
        .io(UserIo::sink())
        .build()
        .unwrap();
    assert_eq!(engine.backend_name(), "good");
    let failed: Vec<_> = engine
        .failover_attempts()
        .iter()
        .map(|a| a.name.as_str())
        .collect();
    assert_eq!(failed, ["bad1", "bad2"]);
    assert!(engine.failover_attempts()[0].cause.contains("bad1 always fails"));
    assert_eq!(*launched.lock().unwrap(), ["bad1", "bad2", "good"]);
}

#[test]
fn test_exhausted_chain_is_an_error() {
    let launched: Arc<Mutex<Vec<String>>> = Arc::default();
    let err = Engine::builder()
        .registry(recording_registry(&launched))
        .execution("bad1, bad2")
        .io(UserIo::sink())
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, Error::FailoverExhausted(ref attempts) if attempts.len() == 2));
}

#[test]
fn test_syntax_error_before_any_launch() {
    let launched: Arc<Mutex<Vec<String>>> = Arc::default();
    let err = Engine::builder()
        .registry(recording_registry(&launched))
        .execution("jdi:launch(true)$")
        .io(UserIo::sink())
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, Error::SpecSyntax { .. }));
    assert!(launched.lock().unwrap().is_empty());
}

#[test]
fn test_colon_form_reaches_factory() {
    let launched: Arc<Mutex<Vec<String>>> = Arc::default();
    let engine = Engine::builder()
        .registry(recording_registry(&launched))
        .execution("jdi:launch(true), good")
        .io(UserIo::sink())
        .build()
        .unwrap();
    assert_eq!(engine.backend_name(), "good");
    assert_eq!(*launched.lock().unwrap(), ["jdi", "good"]);
}

#[test]
fn test_missing_worker_fails_over_to_direct() {
    let engine = Engine::builder()
        .execution("remote(worker=/nonexistent/tessera-worker), direct")
        .io(UserIo::sink())
        .build()
        .unwrap();
    assert_eq!(engine.backend_name(), "direct");
    assert_eq!(engine.failover_attempts().len(), 1);
    assert_eq!(engine.failover_attempts()[0].name, "remote");
}

// =============================================================================
// Remote agents
// =============================================================================

#[test]
fn test_session_over_in_memory_agent() {
    let (io, out, _err) = captured_io("");
    let mut engine = engine_on("inmemory", io);
    assert_eq!(engine.extension_command("ping", "").unwrap(), "pong");

    engine.eval("int x = 10;").unwrap();
    engine.eval("int mu() { return x * 4; }").unwrap();
    let events = engine.eval("mu()").unwrap();
    assert_eq!(events[0].value.as_deref(), Some("40"));

    engine.eval("System.out.println(\"over the wire\");").unwrap();
    assert!(out.text().contains("over the wire\n"));

    let x = engine.find_by_name("x")[0];
    assert_eq!(engine.var_value(x).unwrap(), "10");
    engine.close();
    assert!(engine.is_closed());
}

#[test]
fn test_remote_input_round_trip() {
    let (io, _out, _err) = captured_io("typed line\n");
    let mut engine = engine_on("inmemory", io);
    let events = engine.eval("IO.readLine()").unwrap();
    assert_eq!(events[0].value.as_deref(), Some("\"typed line\""));
}

#[test]
fn test_remote_agent_over_tcp() {
    let port = {
        let spare = TcpListener::bind("127.0.0.1:0").unwrap();
        spare.local_addr().unwrap().port()
    };
    let addr = format!("127.0.0.1:{port}");
    let worker = thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match agent::connect(&addr, "tcp-token") {
                Err(Error::Launch(_)) if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(20));
                }
                other => return other,
            }
        }
    });

    let mut engine = Engine::builder()
        .execution(format!("remote(launch=false, port={port}, token=tcp-token)"))
        .io(UserIo::sink())
        .build()
        .unwrap();
    assert_eq!(engine.backend_name(), "remote");
    let events = engine.eval("6 * 7").unwrap();
    assert_eq!(events[0].value.as_deref(), Some("42"));
    engine.close();
    worker.join().unwrap().unwrap();
}

// =============================================================================
// User streams and stopping
// =============================================================================

#[test]
fn test_direct_user_streams() {
    let (io, out, err) = captured_io("first\nsecond\n");
    let mut engine = engine_on("direct", io);
    engine.eval("System.out.println(\"to out\");").unwrap();
    engine.eval("System.err.println(\"to err\");").unwrap();
    let events = engine.eval("IO.readLine() + IO.readLine()").unwrap();
    assert_eq!(events[0].value.as_deref(), Some("\"firstsecond\""));
    assert!(out.text().contains("to out\n"));
    assert!(err.text().contains("to err\n"));
}

fn stop_running_loop(spec: &str) {
    let mut engine = engine_on(spec, UserIo::sink());
    let handle = engine.stop_handle();
    let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let finished = done.clone();
    let stopper = thread::spawn(move || {
        while !finished.load(std::sync::atomic::Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(50));
            handle.stop();
        }
    });

    let events = engine.eval("while (true) { }").unwrap();
    done.store(true, std::sync::atomic::Ordering::SeqCst);
    stopper.join().unwrap();

    assert_eq!(events[0].exception, Some(RunException::Stopped));
    assert_eq!(events[0].value, None);
    let events = engine.eval("1 + 2").unwrap();
    assert_eq!(events[0].value.as_deref(), Some("3"));
}

#[test]
fn test_stop_direct_loop() {
    stop_running_loop("direct");
}

#[test]
fn test_stop_remote_loop() {
    stop_running_loop("inmemory");
}

fn terminate_running_loop(spec: &str) {
    let mut engine = engine_on(spec, UserIo::sink());
    let handle = engine.stop_handle();
    let killer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        handle.terminate();
    });

    let events = engine.eval("while (true) { }").unwrap();
    killer.join().unwrap();

    assert!(matches!(events[0].exception, Some(RunException::Termination(_))));
    assert!(engine.is_closed());
    assert!(matches!(engine.eval("1 + 2"), Err(Error::Closed)));
}

#[test]
fn test_terminate_direct_loop_closes_engine() {
    terminate_running_loop("direct");
}

#[test]
fn test_terminate_remote_loop_closes_engine() {
    terminate_running_loop("inmemory");
}

// =============================================================================
// Worker binary
// =============================================================================

#[test]
#[ignore = "Requires tessera-worker binary"]
fn test_launched_worker() {
    let mut engine = Engine::builder()
        .execution("remote")
        .io(UserIo::sink())
        .build()
        .unwrap();
    assert_eq!(engine.backend_name(), "remote");
    let pid = engine.extension_command("pid", "").unwrap();
    assert_ne!(pid, std::process::id().to_string());

    let events = engine.eval("String greet(String who) { return \"hi \" + who; }").unwrap();
    assert_eq!(events[0].status, Status::Valid);
    let events = engine.eval("greet(\"worker\")").unwrap();
    assert_eq!(events[0].value.as_deref(), Some("\"hi worker\""));
    assert!(!engine.extension_command("loaded", "").unwrap().is_empty());
}

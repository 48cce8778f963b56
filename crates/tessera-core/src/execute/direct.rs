//! In-process execution on a dedicated executor thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::context::{AbortHandle, UserIo};
use super::control::{ExecutionControl, Interrupt, RunException, StopHandle};
use super::dispatcher::{BackendFactory, LaunchEnv};
use super::spec::SpecEntry;
use crate::compile::ClassBytecode;
use crate::error::{Error, Result};
use crate::ipc::Bridge;
use crate::runtime::{RUNTIME_STACK_SIZE, Runtime, RuntimeIo};

/// How long an invocation waits for its output to reach the user streams.
const OUTPUT_SYNC: Duration = Duration::from_secs(2);

/// How long `close` waits for the executor to wind down before detaching it.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Factory for [`DirectControl`]. Takes no parameters.
pub struct DirectFactory;

impl BackendFactory for DirectFactory {
    fn name(&self) -> &str {
        "direct"
    }

    fn launch(&self, _entry: &SpecEntry, env: &LaunchEnv) -> Result<Box<dyn ExecutionControl>> {
        Ok(Box::new(DirectControl::start(env.io.clone())?))
    }
}

enum Request {
    Load(Vec<ClassBytecode>),
    Retire(Vec<String>),
    Invoke { class_name: String, method: String },
    VarValue { class_name: String, name: String },
    Extension { command: String, arg: String },
}

type Reply<T = String> = std::result::Result<T, RunException>;

/// Runs snippets in this process. The runtime lives on its own thread with
/// a large stack; user output reaches the engine's streams through pipes.
pub struct DirectControl {
    requests: Option<Sender<(Request, Sender<Reply>)>>,
    executor: Option<JoinHandle<()>>,
    out: Bridge,
    err: Bridge,
    abort: AbortHandle,
    closed: Arc<AtomicBool>,
}

impl DirectControl {
    pub fn start(io: UserIo) -> Result<Self> {
        let (out_writer, out) = Bridge::spawn("stdout", io.out.clone())?;
        let (err_writer, err) = Bridge::spawn("stderr", io.err.clone())?;

        let runtime_io = RuntimeIo {
            out: Box::new(out_writer),
            err: Box::new(err_writer),
            input: Box::new(io.lines()),
        };
        let abort = AbortHandle::new();
        let executor_abort = abort.clone();
        let (requests, inbox) = mpsc::channel::<(Request, Sender<Reply>)>();
        let executor = std::thread::Builder::new()
            .name("tessera-executor".into())
            .stack_size(RUNTIME_STACK_SIZE)
            .spawn(move || {
                let mut runtime = Runtime::new(runtime_io, executor_abort);
                for (request, reply) in inbox {
                    let _ = reply.send(serve(&mut runtime, request));
                }
                debug!("executor finished");
            })
            .map_err(|e| Error::Launch(format!("cannot start executor thread: {e}")))?;

        Ok(Self {
            requests: Some(requests),
            executor: Some(executor),
            out,
            err,
            abort,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn call(&mut self, request: Request) -> Reply {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RunException::Termination("direct execution control is closed".into()));
        }
        let Some(requests) = &self.requests else {
            return Err(RunException::Termination("direct execution control is closed".into()));
        };
        let (reply, replies) = mpsc::channel();
        if requests.send((request, reply)).is_err() {
            return Err(self.lost());
        }
        let result = loop {
            match replies.recv_timeout(Duration::from_millis(50)) {
                Ok(result) => break result,
                Err(RecvTimeoutError::Timeout) if self.closed.load(Ordering::SeqCst) => {
                    return Err(RunException::Termination("execution control terminated".into()));
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Err(self.lost()),
            }
        };
        self.out.sync(OUTPUT_SYNC);
        self.err.sync(OUTPUT_SYNC);
        if self.closed.load(Ordering::SeqCst) {
            return Err(RunException::Termination("execution control terminated".into()));
        }
        result
    }

    fn lost(&self) -> RunException {
        self.closed.store(true, Ordering::SeqCst);
        RunException::Termination("executor thread exited".into())
    }
}

fn serve(runtime: &mut Runtime, request: Request) -> Reply {
    match request {
        Request::Load(classes) => {
            runtime.load(classes);
            Ok(String::new())
        }
        Request::Retire(names) => {
            runtime.retire(&names);
            Ok(String::new())
        }
        Request::Invoke { class_name, method } => runtime.invoke(&class_name, &method),
        Request::VarValue { class_name, name } => runtime.var_value(&class_name, &name),
        Request::Extension { command, arg } => runtime.extension_command(&command, &arg),
    }
}

struct DirectInterrupt {
    abort: AbortHandle,
    closed: Arc<AtomicBool>,
}

impl Interrupt for DirectInterrupt {
    fn stop(&self) {
        self.abort.abort();
    }

    fn terminate(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.abort.abort();
    }
}

impl ExecutionControl for DirectControl {
    fn name(&self) -> &str {
        "direct"
    }

    fn load(&mut self, classes: Vec<ClassBytecode>) -> Reply<()> {
        self.call(Request::Load(classes)).map(drop)
    }

    fn retire(&mut self, class_names: Vec<String>) -> Reply<()> {
        self.call(Request::Retire(class_names)).map(drop)
    }

    fn invoke(&mut self, class_name: &str, method: &str) -> Reply {
        self.call(Request::Invoke {
            class_name: class_name.to_string(),
            method: method.to_string(),
        })
    }

    fn var_value(&mut self, class_name: &str, name: &str) -> Reply {
        self.call(Request::VarValue {
            class_name: class_name.to_string(),
            name: name.to_string(),
        })
    }

    fn extension_command(&mut self, command: &str, arg: &str) -> Reply {
        self.call(Request::Extension {
            command: command.to_string(),
            arg: arg.to_string(),
        })
    }

    fn stop_handle(&self) -> StopHandle {
        StopHandle::new(DirectInterrupt {
            abort: self.abort.clone(),
            closed: self.closed.clone(),
        })
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        if self.requests.take().is_none() {
            return;
        }
        self.abort.abort();
        if let Some(executor) = self.executor.take() {
            let deadline = Instant::now() + CLOSE_GRACE;
            while !executor.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            if executor.is_finished() {
                let _ = executor.join();
                self.out.join();
                self.err.join();
            } else {
                warn!("executor thread did not stop; detaching it");
            }
        }
        debug!("direct execution control closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for DirectControl {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::classify;
    use crate::compile::{CompileContext, CompileUnit, Compiler, RUN_METHOD, SketchCompiler};
    use crate::runtime::LineReader;
    use std::io::{self, Write};
    use std::sync::Mutex;

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

    fn expression(id: &str, source: &str) -> ClassBytecode {
        let classified = classify(source).remove(0);
        let unit = CompileUnit {
            snippet_id: id.to_string(),
            source: classified.source,
            kind: classified.kind,
            name: classified.name,
        };
        SketchCompiler::new()
            .compile(&unit, &CompileContext::new())
            .artifact
            .unwrap()
    }

    #[test]
    fn test_output_arrives_before_invoke_returns() {
        let out = Capture::default();
        let io = UserIo::new(
            Box::new(out.clone()),
            Box::new(io::sink()),
            Box::new(LineReader(io::empty())),
        );
        let mut control = DirectControl::start(io).unwrap();
        let class = expression("1", "System.out.print(\"hi\")");
        let name = class.class_name.clone();
        control.load(vec![class]).unwrap();
        control.invoke(&name, RUN_METHOD).unwrap();
        assert_eq!(&*out.0.lock().unwrap(), b"hi");
        control.close();
        assert!(control.is_closed());
    }

    #[test]
    fn test_terminate_unblocks_running_invoke() {
        let mut control = DirectControl::start(UserIo::sink()).unwrap();
        let class = expression("1", "while (true) {}");
        let name = class.class_name.clone();
        control.load(vec![class]).unwrap();
        let handle = control.stop_handle();
        let killer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            handle.terminate();
        });
        let err = control.invoke(&name, RUN_METHOD).unwrap_err();
        killer.join().unwrap();
        assert!(matches!(err, RunException::Termination(_)));
        assert!(control.is_closed());
        assert!(matches!(
            control.invoke(&name, RUN_METHOD),
            Err(RunException::Termination(_))
        ));
    }

    #[test]
    fn test_extension_commands() {
        let mut control = DirectControl::start(UserIo::sink()).unwrap();
        assert_eq!(control.extension_command("ping", "").unwrap(), "pong");
        assert!(control.extension_command("bogus", "").is_err());
    }
}

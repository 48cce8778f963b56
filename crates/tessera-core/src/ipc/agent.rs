//! The worker side of the remote backend.
//!
//! An agent hosts a [`Runtime`] and serves engine commands over any byte
//! stream pair: the worker's stdio, a TCP connection, or in-memory pipes.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::mux::{Channel, ChannelWriter, MuxSink};
use super::protocol::{WorkerCommand, WorkerResponse, read_message, write_message};
use crate::compile::ClassBytecode;
use crate::error::{Error, Result};
use crate::execute::{AbortHandle, RunException};
use crate::runtime::{LineSource, RUNTIME_STACK_SIZE, Runtime, RuntimeIo};

/// Serve one engine until it shuts the agent down or disconnects.
pub fn serve(reader: Box<dyn Read + Send>, writer: Box<dyn Write + Send>, token: &str) -> Result<()> {
    let sink: MuxSink = Arc::new(Mutex::new(writer));
    let mut replies = ChannelWriter::new(sink.clone(), Channel::Reply);
    write_message(
        &mut replies,
        &WorkerResponse::Hello {
            token: token.to_string(),
            pid: std::process::id(),
        },
    )?;
    info!(pid = std::process::id(), "agent ready");

    let abort = AbortHandle::new();
    let (command_tx, command_rx) = mpsc::channel();
    let (line_tx, line_rx) = mpsc::channel();

    let stop = abort.clone();
    std::thread::Builder::new()
        .name("tessera-agent-reader".into())
        .spawn(move || read_commands(reader, command_tx, line_tx, stop))?;

    let io = RuntimeIo {
        out: Box::new(ChannelWriter::new(sink.clone(), Channel::Stdout)),
        err: Box::new(ChannelWriter::new(sink.clone(), Channel::Stderr)),
        input: Box::new(RemoteInput {
            request: ChannelWriter::new(sink, Channel::Input),
            lines: line_rx,
            abort: abort.clone(),
        }),
    };
    let runner = std::thread::Builder::new()
        .name("tessera-agent".into())
        .stack_size(RUNTIME_STACK_SIZE)
        .spawn(move || run_commands(Runtime::new(io, abort), command_rx, replies))?;
    runner
        .join()
        .map_err(|_| Error::Execution("agent runtime thread panicked".into()))?
}

/// Connect to a listening engine and serve it.
pub fn connect(addr: &str, token: &str) -> Result<()> {
    let stream = TcpStream::connect(addr)
        .map_err(|e| Error::Launch(format!("cannot connect to engine at {addr}: {e}")))?;
    stream.set_nodelay(true)?;
    info!(%addr, "connected to engine");
    let reader = stream.try_clone()?;
    serve(Box::new(reader), Box::new(stream), token)
}

/// Route incoming commands. Stop and input replies are handled here so they
/// reach the runtime while it is busy.
fn read_commands(
    mut reader: Box<dyn Read + Send>,
    commands: Sender<WorkerCommand>,
    lines: Sender<Option<String>>,
    abort: AbortHandle,
) {
    loop {
        match read_message::<_, WorkerCommand>(&mut reader) {
            Ok(Some(WorkerCommand::Stop)) => {
                debug!("stop requested");
                abort.abort();
            }
            Ok(Some(WorkerCommand::Input { line })) => {
                let _ = lines.send(line);
            }
            Ok(Some(command)) => {
                let shutdown = matches!(command, WorkerCommand::Shutdown);
                if commands.send(command).is_err() || shutdown {
                    return;
                }
            }
            Ok(None) => {
                debug!("engine closed the command stream");
                break;
            }
            Err(e) => {
                warn!("command stream failed: {e}");
                break;
            }
        }
    }
    // Lost the engine: unwind whatever is running so the runtime thread exits.
    abort.abort();
}

fn run_commands(
    mut runtime: Runtime,
    commands: Receiver<WorkerCommand>,
    mut replies: ChannelWriter,
) -> Result<()> {
    while let Ok(command) = commands.recv() {
        let response = match command {
            WorkerCommand::Load { classes } => match decode(&classes) {
                Ok(classes) => {
                    runtime.load(classes);
                    WorkerResponse::Done
                }
                Err(e) => failed(RunException::Internal(e.to_string())),
            },
            WorkerCommand::Retire { class_names } => {
                runtime.retire(&class_names);
                WorkerResponse::Done
            }
            WorkerCommand::Invoke { class_name, method } => {
                outcome(runtime.invoke(&class_name, &method))
            }
            WorkerCommand::VarValue { class_name, name } => {
                outcome(runtime.var_value(&class_name, &name))
            }
            WorkerCommand::Extension { command, arg } => {
                outcome(runtime.extension_command(&command, &arg))
            }
            WorkerCommand::Ping => WorkerResponse::Pong,
            WorkerCommand::Shutdown => {
                write_message(&mut replies, &WorkerResponse::ShuttingDown)?;
                info!("agent shutting down");
                return Ok(());
            }
            WorkerCommand::Stop | WorkerCommand::Input { .. } => continue,
        };
        write_message(&mut replies, &response)?;
    }
    Ok(())
}

fn decode(classes: &[Vec<u8>]) -> Result<Vec<ClassBytecode>> {
    classes.iter().map(|bytes| ClassBytecode::from_bytes(bytes)).collect()
}

fn outcome(result: std::result::Result<String, RunException>) -> WorkerResponse {
    match result {
        Ok(text) => WorkerResponse::Value { text },
        Err(exception) => failed(exception),
    }
}

fn failed(exception: RunException) -> WorkerResponse {
    WorkerResponse::Failed { exception }
}

/// User input fetched from the engine one line at a time.
struct RemoteInput {
    request: ChannelWriter,
    lines: Receiver<Option<String>>,
    abort: AbortHandle,
}

impl LineSource for RemoteInput {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        self.request.signal()?;
        loop {
            match self.lines.recv_timeout(Duration::from_millis(50)) {
                Ok(line) => return Ok(line),
                Err(RecvTimeoutError::Timeout) if self.abort.is_aborted() => {
                    return Err(io::Error::new(io::ErrorKind::Interrupted, "input interrupted"));
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::mux::read_frame;
    use crate::ipc::pipe::pipe;

    #[test]
    fn test_hello_ping_shutdown() {
        let (mut commands, agent_in) = pipe();
        let (agent_out, mut frames) = pipe();
        let agent = std::thread::spawn(move || serve(Box::new(agent_in), Box::new(agent_out), "tok"));

        let reply = |frames: &mut crate::ipc::pipe::PipeReader| -> WorkerResponse {
            let (channel, payload) = read_frame(frames).unwrap().unwrap();
            assert_eq!(channel, Channel::Reply);
            read_message(&mut payload.as_slice()).unwrap().unwrap()
        };
        match reply(&mut frames) {
            WorkerResponse::Hello { token, .. } => assert_eq!(token, "tok"),
            other => panic!("unexpected {other:?}"),
        }
        write_message(&mut commands, &WorkerCommand::Ping).unwrap();
        assert!(matches!(reply(&mut frames), WorkerResponse::Pong));
        write_message(&mut commands, &WorkerCommand::Shutdown).unwrap();
        assert!(matches!(reply(&mut frames), WorkerResponse::ShuttingDown));
        agent.join().unwrap().unwrap();
    }
}

//! Out-of-process execution through a worker agent.
//!
//! The engine talks to an agent over a byte stream pair. In launch mode the
//! engine spawns `tessera-worker` and uses its stdio; in listen mode it
//! waits for an external worker to connect over TCP. Either way the agent
//! must open with a hello carrying the session token.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::context::{SharedWriter, UserIo};
use super::control::{ExecutionControl, Interrupt, RunException, StopHandle};
use super::dispatcher::{BackendFactory, LaunchEnv};
use super::spec::SpecEntry;
use crate::compile::ClassBytecode;
use crate::error::{Error, Result};
use crate::ipc::mux::{Channel, read_frame};
use crate::ipc::{
    Bridge, PipeCloser, PipeReader, PipeWriter, WorkerCommand, WorkerKillHandle, WorkerProcess,
    WorkerResponse, find_worker_binary, pipe, read_message, write_message,
};

const OUTPUT_SYNC: Duration = Duration::from_secs(2);

/// How long a launched worker gets to exit after `Shutdown`.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

const NAME: &str = "remote";

/// Factory for [`RemoteControl`].
///
/// Parameters:
/// - `launch` (default `true`): spawn the worker, or listen for one
/// - `host`, `port` (default `127.0.0.1`, `0`): listen address
/// - `timeout`: milliseconds to wait for the worker's hello
/// - `token`: session token; random when omitted
/// - `worker`: worker binary path
pub struct RemoteFactory;

impl BackendFactory for RemoteFactory {
    fn name(&self) -> &str {
        NAME
    }

    fn launch(&self, entry: &SpecEntry, env: &LaunchEnv) -> Result<Box<dyn ExecutionControl>> {
        let default_timeout = env.launch_timeout.as_millis() as u64;
        let timeout = Duration::from_millis(entry.param_u64(NAME, "timeout", default_timeout)?);
        let token = entry
            .param("token")
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let control = if entry.param_bool(NAME, "launch", true)? {
            let explicit = entry
                .param("worker")
                .map(PathBuf::from)
                .or_else(|| env.worker_path.clone());
            let path = find_worker_binary(explicit.as_deref())?;
            RemoteControl::launch(&path, &token, env.io.clone(), timeout)?
        } else {
            let host = entry.param("host").unwrap_or("127.0.0.1");
            let port = entry.param_u64(NAME, "port", 0)?;
            let port = u16::try_from(port).map_err(|_| Error::InvalidParameter {
                backend: NAME.to_string(),
                key: "port".to_string(),
                message: format!("{port} is not a valid port"),
            })?;
            RemoteControl::listen(host, port, &token, env.io.clone(), timeout)?
        };
        Ok(Box::new(control))
    }
}

/// What carries the byte streams, for teardown.
enum Transport {
    Process(WorkerProcess),
    Socket(TcpStream),
    /// Caller-provided streams; their owner ends them.
    Streams,
    Released,
}

/// Drives a worker agent over a multiplexed byte stream.
pub struct RemoteControl {
    commands: SharedWriter,
    replies: PipeReader,
    replies_closer: PipeCloser,
    out: Bridge,
    err: Bridge,
    demux: Option<JoinHandle<()>>,
    transport: Transport,
    kill: Option<WorkerKillHandle>,
    socket: Option<TcpStream>,
    pid: Option<u32>,
    closed: Arc<AtomicBool>,
}

impl RemoteControl {
    /// Spawn a worker binary and attach to its stdio.
    pub fn launch(path: &Path, token: &str, io: UserIo, timeout: Duration) -> Result<Self> {
        let (process, stdin, stdout) = WorkerProcess::spawn(path, token)?;
        info!(pid = process.pid(), worker = %path.display(), "worker launched");
        Self::establish(
            Box::new(stdout),
            Box::new(stdin),
            io,
            token,
            timeout,
            Transport::Process(process),
        )
    }

    /// Wait for an external worker to connect to `host:port`.
    pub fn listen(host: &str, port: u16, token: &str, io: UserIo, timeout: Duration) -> Result<Self> {
        let listener = TcpListener::bind((host, port))
            .map_err(|e| Error::Launch(format!("cannot listen on {host}:{port}: {e}")))?;
        info!(addr = %listener.local_addr()?, "waiting for a worker to connect");
        let stream = accept_within(&listener, timeout)?;
        stream.set_nodelay(true)?;
        let reader = stream.try_clone()?;
        let writer = stream.try_clone()?;
        Self::establish(
            Box::new(reader),
            Box::new(writer),
            io,
            token,
            timeout,
            Transport::Socket(stream),
        )
    }

    /// Attach to an agent over caller-provided streams.
    pub fn attach(
        reader: Box<dyn Read + Send>,
        writer: Box<dyn Write + Send>,
        io: UserIo,
        token: &str,
        timeout: Duration,
    ) -> Result<Self> {
        Self::establish(reader, writer, io, token, timeout, Transport::Streams)
    }

    fn establish(
        reader: Box<dyn Read + Send>,
        writer: Box<dyn Write + Send>,
        io: UserIo,
        token: &str,
        timeout: Duration,
        transport: Transport,
    ) -> Result<Self> {
        let commands: SharedWriter = Arc::new(Mutex::new(writer));
        let (reply_writer, replies) = pipe();
        let replies_closer = reply_writer.closer();
        let (out_writer, out) = Bridge::spawn("stdout", io.out.clone())?;
        let (err_writer, err) = Bridge::spawn("stderr", io.err.clone())?;
        let routes = Routes {
            replies: reply_writer,
            out: out_writer,
            err: err_writer,
            io,
            commands: commands.clone(),
        };
        let demux = std::thread::Builder::new()
            .name("tessera-demux".into())
            .spawn(move || demux(reader, routes))?;

        let (kill, socket) = match &transport {
            Transport::Process(process) => (Some(WorkerKillHandle::new(process)), None),
            Transport::Socket(stream) => (None, stream.try_clone().ok()),
            Transport::Streams | Transport::Released => (None, None),
        };
        let mut control = Self {
            commands,
            replies,
            replies_closer,
            out,
            err,
            demux: Some(demux),
            transport,
            kill,
            socket,
            pid: None,
            closed: Arc::new(AtomicBool::new(false)),
        };

        if !control.replies.wait_readable(timeout) {
            return Err(Error::Launch(format!(
                "worker did not answer within {} ms",
                timeout.as_millis()
            )));
        }
        match read_message::<_, WorkerResponse>(&mut control.replies) {
            Ok(Some(WorkerResponse::Hello { token: presented, pid })) if presented == token => {
                info!(pid, "remote agent attached");
                control.pid = Some(pid);
                Ok(control)
            }
            Ok(Some(WorkerResponse::Hello { .. })) => {
                Err(Error::Launch("worker presented the wrong token".into()))
            }
            Ok(Some(other)) => Err(Error::Launch(format!("unexpected handshake {other:?}"))),
            Ok(None) => Err(Error::Launch("worker exited before the handshake".into())),
            Err(e) => Err(Error::Launch(format!("handshake failed: {e}"))),
        }
    }

    /// Process id the agent reported in its hello.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn request(&mut self, command: WorkerCommand) -> std::result::Result<WorkerResponse, RunException> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RunException::Termination("remote execution control is closed".into()));
        }
        if let Err(e) = send_command(&self.commands, &command) {
            return Err(self.lost(e.to_string()));
        }
        match read_message::<_, WorkerResponse>(&mut self.replies) {
            Ok(Some(response)) => {
                self.out.sync(OUTPUT_SYNC);
                self.err.sync(OUTPUT_SYNC);
                Ok(response)
            }
            Ok(None) => Err(self.lost("worker disconnected".into())),
            Err(e) => Err(self.lost(e.to_string())),
        }
    }

    fn lost(&self, why: String) -> RunException {
        if !self.closed.swap(true, Ordering::SeqCst) {
            warn!("remote agent lost: {why}");
        }
        RunException::Termination(why)
    }
}

fn expect_value(response: WorkerResponse) -> std::result::Result<String, RunException> {
    match response {
        WorkerResponse::Value { text } => Ok(text),
        WorkerResponse::Failed { exception } => Err(exception),
        other => Err(RunException::Internal(format!("unexpected response {other:?}"))),
    }
}

fn expect_done(response: WorkerResponse) -> std::result::Result<(), RunException> {
    match response {
        WorkerResponse::Done => Ok(()),
        WorkerResponse::Failed { exception } => Err(exception),
        other => Err(RunException::Internal(format!("unexpected response {other:?}"))),
    }
}

fn send_command(commands: &SharedWriter, command: &WorkerCommand) -> Result<()> {
    let mut writer = commands
        .lock()
        .map_err(|_| Error::Ipc("command stream lock poisoned".into()))?;
    write_message(&mut *writer, command)
}

fn accept_within(listener: &TcpListener, timeout: Duration) -> Result<TcpStream> {
    listener.set_nonblocking(true)?;
    let deadline = Instant::now() + timeout;
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                debug!(%peer, "worker connected");
                return Ok(stream);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(Error::Launch(format!(
                        "no worker connected within {} ms",
                        timeout.as_millis()
                    )));
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Where the demultiplexer sends each channel.
struct Routes {
    replies: PipeWriter,
    out: PipeWriter,
    err: PipeWriter,
    io: UserIo,
    commands: SharedWriter,
}

fn demux(mut reader: Box<dyn Read + Send>, mut routes: Routes) {
    loop {
        let (channel, payload) = match read_frame(&mut reader) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("agent stream ended");
                break;
            }
            Err(e) => {
                warn!("agent stream failed: {e}");
                break;
            }
        };
        let routed = match channel {
            Channel::Reply => routes.replies.write_all(&payload).map_err(Error::from),
            Channel::Stdout => routes.out.write_all(&payload).map_err(Error::from),
            Channel::Stderr => routes.err.write_all(&payload).map_err(Error::from),
            Channel::Input => {
                let line = routes.io.read_line();
                send_command(&routes.commands, &WorkerCommand::Input { line })
            }
        };
        if let Err(e) = routed {
            debug!(?channel, "dropped agent frame: {e}");
        }
    }
}

struct RemoteInterrupt {
    commands: SharedWriter,
    closed: Arc<AtomicBool>,
    replies: PipeCloser,
    kill: Option<WorkerKillHandle>,
    socket: Option<TcpStream>,
}

impl Interrupt for RemoteInterrupt {
    fn stop(&self) {
        if let Err(e) = send_command(&self.commands, &WorkerCommand::Stop) {
            debug!("stop not delivered: {e}");
        }
    }

    fn terminate(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(kill) = &self.kill {
            kill.kill();
        }
        if let Some(socket) = &self.socket {
            let _ = socket.shutdown(Shutdown::Both);
        }
        self.replies.close();
    }
}

impl ExecutionControl for RemoteControl {
    fn name(&self) -> &str {
        NAME
    }

    fn load(&mut self, classes: Vec<ClassBytecode>) -> std::result::Result<(), RunException> {
        let classes = classes
            .iter()
            .map(ClassBytecode::to_bytes)
            .collect::<Result<Vec<_>>>()
            .map_err(|e| RunException::Internal(e.to_string()))?;
        expect_done(self.request(WorkerCommand::Load { classes })?)
    }

    fn retire(&mut self, class_names: Vec<String>) -> std::result::Result<(), RunException> {
        expect_done(self.request(WorkerCommand::Retire { class_names })?)
    }

    fn invoke(&mut self, class_name: &str, method: &str) -> std::result::Result<String, RunException> {
        expect_value(self.request(WorkerCommand::Invoke {
            class_name: class_name.to_string(),
            method: method.to_string(),
        })?)
    }

    fn var_value(&mut self, class_name: &str, name: &str) -> std::result::Result<String, RunException> {
        expect_value(self.request(WorkerCommand::VarValue {
            class_name: class_name.to_string(),
            name: name.to_string(),
        })?)
    }

    fn extension_command(
        &mut self,
        command: &str,
        arg: &str,
    ) -> std::result::Result<String, RunException> {
        expect_value(self.request(WorkerCommand::Extension {
            command: command.to_string(),
            arg: arg.to_string(),
        })?)
    }

    fn stop_handle(&self) -> StopHandle {
        StopHandle::new(RemoteInterrupt {
            commands: self.commands.clone(),
            closed: self.closed.clone(),
            replies: self.replies_closer.clone(),
            kill: self.kill.clone(),
            socket: self.socket.as_ref().and_then(|s| s.try_clone().ok()),
        })
    }

    fn close(&mut self) {
        let transport = std::mem::replace(&mut self.transport, Transport::Released);
        if matches!(transport, Transport::Released) {
            return;
        }
        let was_open = !self.closed.swap(true, Ordering::SeqCst);
        if was_open {
            let _ = send_command(&self.commands, &WorkerCommand::Shutdown);
        }
        let joinable = match transport {
            Transport::Process(mut process) => {
                process.shutdown(SHUTDOWN_GRACE);
                true
            }
            Transport::Socket(stream) => {
                let _ = stream.shutdown(Shutdown::Both);
                true
            }
            Transport::Streams | Transport::Released => false,
        };
        self.replies_closer.close();
        if joinable {
            if let Some(demux) = self.demux.take() {
                let _ = demux.join();
            }
            self.out.join();
            self.err.join();
        }
        debug!("remote execution control closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for RemoteControl {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::agent;

    fn in_memory(token: &'static str) -> (RemoteControl, JoinHandle<Result<()>>) {
        let (commands, agent_in) = pipe();
        let (agent_out, frames) = pipe();
        let agent = std::thread::spawn(move || agent::serve(Box::new(agent_in), Box::new(agent_out), token));
        let control = RemoteControl::attach(
            Box::new(frames),
            Box::new(commands),
            UserIo::sink(),
            "secret",
            Duration::from_secs(5),
        );
        (control.map_err(|e| e.to_string()).unwrap(), agent)
    }

    #[test]
    fn test_attach_and_ping() {
        let (mut control, agent) = in_memory("secret");
        assert!(control.pid().is_some());
        assert_eq!(control.extension_command("ping", "").unwrap(), "pong");
        control.close();
        assert!(control.is_closed());
        agent.join().unwrap().unwrap();
    }

    #[test]
    fn test_wrong_token_rejected() {
        let (commands, agent_in) = pipe();
        let (agent_out, frames) = pipe();
        std::thread::spawn(move || agent::serve(Box::new(agent_in), Box::new(agent_out), "other"));
        let err = RemoteControl::attach(
            Box::new(frames),
            Box::new(commands),
            UserIo::sink(),
            "secret",
            Duration::from_secs(5),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("wrong token"));
    }

    #[test]
    fn test_silent_peer_times_out() {
        let (_keep, frames) = pipe();
        let (commands, _agent_in) = pipe();
        let started = Instant::now();
        let err = RemoteControl::attach(
            Box::new(frames),
            Box::new(commands),
            UserIo::sink(),
            "secret",
            Duration::from_millis(50),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::Launch(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_agent_disconnect_is_termination() {
        let (commands, agent_in) = pipe();
        let (mut agent_out, frames) = pipe();
        let hello = WorkerResponse::Hello {
            token: "secret".into(),
            pid: 1,
        };
        let mut message = Vec::new();
        write_message(&mut message, &hello).unwrap();
        crate::ipc::mux::write_frame(&mut agent_out, Channel::Reply, &message).unwrap();
        let mut control = RemoteControl::attach(
            Box::new(frames),
            Box::new(commands),
            UserIo::sink(),
            "secret",
            Duration::from_secs(5),
        )
        .map_err(|e| e.to_string())
        .unwrap();
        drop(agent_out);
        drop(agent_in);
        let err = control.invoke("$S1", "$run").unwrap_err();
        assert!(matches!(err, RunException::Termination(_)));
        assert!(control.is_closed());
    }
}

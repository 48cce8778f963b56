//! IPC protocol messages between the engine and a worker agent.
//!
//! Uses length-prefixed rkyv messages.
//! Format: 4-byte length (u32 LE) + rkyv-encoded message.
//!
//! Commands travel engine to agent on a plain stream. Responses travel back
//! on the reply channel of the agent's multiplexed stream (see [`super::mux`]).

use std::io::{Read, Write};

use rkyv::{Archive, Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::execute::RunException;

/// Largest message either side accepts.
const MAX_MESSAGE_LEN: usize = 100 * 1024 * 1024;

/// Command sent from the engine to the agent.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub enum WorkerCommand {
    /// Install classes. Each entry is an encoded `ClassBytecode`.
    Load { classes: Vec<Vec<u8>> },

    /// Remove classes by name.
    Retire { class_names: Vec<String> },

    /// Run an entry point of a loaded class.
    Invoke { class_name: String, method: String },

    /// Read a variable's display value.
    VarValue { class_name: String, name: String },

    /// Backend-specific command.
    Extension { command: String, arg: String },

    /// Answer to an input request; `None` is end of input.
    Input { line: Option<String> },

    /// Stop the running invocation. Handled out of band by the agent.
    Stop,

    /// Ping to check if the agent is alive.
    Ping,

    /// Shut the agent down gracefully.
    Shutdown,
}

/// Response sent from the agent to the engine.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub enum WorkerResponse {
    /// First message after connecting.
    Hello { token: String, pid: u32 },

    /// Load or retire completed.
    Done,

    /// Display value of an invocation or variable.
    Value { text: String },

    /// The request failed.
    Failed { exception: RunException },

    /// Response to Ping.
    Pong,

    /// The agent is exiting.
    ShuttingDown,
}

/// Write a message to a writer using length-prefixed rkyv encoding.
pub fn write_message<W: Write>(
    writer: &mut W,
    message: &impl for<'a> Serialize<
        rkyv::rancor::Strategy<
            rkyv::ser::Serializer<
                rkyv::util::AlignedVec,
                rkyv::ser::allocator::ArenaHandle<'a>,
                rkyv::ser::sharing::Share,
            >,
            rkyv::rancor::Error,
        >,
    >,
) -> Result<()> {
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(message)
        .map_err(|e| Error::Serialization(format!("Failed to encode IPC message: {}", e)))?;

    // One buffer so a framed transport carries the message in one piece.
    let mut framed = Vec::with_capacity(4 + bytes.len());
    framed.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    framed.extend_from_slice(&bytes);
    writer
        .write_all(&framed)
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Ipc(format!("Failed to flush IPC stream: {}", e)))?;

    Ok(())
}

/// Read a message from a reader using length-prefixed rkyv encoding.
///
/// Returns `Ok(None)` on a clean end of stream before a message starts.
/// Every message is validated before it is deserialized: the `Hello`
/// handshake arrives before the peer has shown its token.
pub fn read_message<R: Read, T>(reader: &mut R) -> Result<Option<T>>
where
    T: Archive,
    T::Archived: for<'a> rkyv::bytecheck::CheckBytes<rkyv::api::high::HighValidator<'a, rkyv::rancor::Error>>
        + Deserialize<T, rkyv::rancor::Strategy<rkyv::de::Pool, rkyv::rancor::Error>>,
{
    let mut len_bytes = [0u8; 4];
    let mut filled = 0;
    while filled < len_bytes.len() {
        match reader.read(&mut len_bytes[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(Error::Ipc("IPC stream ended inside a message length".into())),
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(Error::Ipc(format!("Failed to read IPC message length: {}", e))),
        }
    }
    let len = u32::from_le_bytes(len_bytes) as usize;

    // Sanity check: reject absurdly large messages (100MB)
    if len > MAX_MESSAGE_LEN {
        return Err(Error::Ipc(format!("IPC message too large: {} bytes", len)));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .map_err(|e| Error::Ipc(format!("Failed to read IPC message body: {}", e)))?;

    // Archived data must sit at its archive alignment.
    let mut bytes = rkyv::util::AlignedVec::<16>::with_capacity(len);
    bytes.extend_from_slice(&body);
    let message = rkyv::from_bytes::<T, rkyv::rancor::Error>(&bytes)
        .map_err(|e| Error::Deserialization(format!("Failed to decode IPC message: {}", e)))?;

    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_command_roundtrip() {
        let cmd = WorkerCommand::Invoke {
            class_name: "$S4".to_string(),
            method: "$run".to_string(),
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &cmd).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: WorkerCommand = read_message(&mut cursor).unwrap().unwrap();

        match decoded {
            WorkerCommand::Invoke { class_name, method } => {
                assert_eq!(class_name, "$S4");
                assert_eq!(method, "$run");
            }
            _ => panic!("Wrong command type"),
        }
    }

    #[test]
    fn test_failure_carries_exception() {
        let resp = WorkerResponse::Failed {
            exception: RunException::Resolution {
                snippet_id: "2".into(),
                names: vec!["x".into()],
            },
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &resp).unwrap();
        let decoded: WorkerResponse = read_message(&mut Cursor::new(buf)).unwrap().unwrap();

        match decoded {
            WorkerResponse::Failed { exception } => assert_eq!(
                exception,
                RunException::Resolution {
                    snippet_id: "2".into(),
                    names: vec!["x".into()],
                }
            ),
            _ => panic!("Wrong response type"),
        }
    }

    #[test]
    fn test_end_of_stream() {
        let mut empty = Cursor::new(Vec::new());
        assert!(read_message::<_, WorkerCommand>(&mut empty).unwrap().is_none());

        let mut truncated = Cursor::new(vec![8, 0]);
        assert!(matches!(
            read_message::<_, WorkerCommand>(&mut truncated),
            Err(Error::Ipc(_))
        ));
    }

    #[test]
    fn test_oversized_message_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(u32::MAX).to_le_bytes());
        let err = read_message::<_, WorkerResponse>(&mut Cursor::new(buf)).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_malformed_body_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&64u32.to_le_bytes());
        buf.extend_from_slice(&[0xff; 64]);
        let err = read_message::<_, WorkerResponse>(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, Error::Deserialization(_)));

        let mut short = Vec::new();
        short.extend_from_slice(&1u32.to_le_bytes());
        short.push(0);
        assert!(read_message::<_, WorkerResponse>(&mut Cursor::new(short)).is_err());
    }
}

//! Error types for tessera-core.

use thiserror::Error;

/// Result type for tessera-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// One failed entry of an execution control chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverAttempt {
    /// Backend name as written in the spec.
    pub name: String,
    /// Why the backend could not be started.
    pub cause: String,
}

/// Errors that can occur in tessera-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to parse snippet source.
    #[error("parse error: {0}")]
    Parse(String),

    /// Malformed execution control spec string.
    #[error("execution control spec syntax error at {position}: {message}")]
    SpecSyntax { position: usize, message: String },

    /// Spec names a backend that is not registered.
    #[error("unknown execution control: {0}")]
    UnknownBackend(String),

    /// Backend parameter has the wrong shape.
    #[error("invalid parameter '{key}' for {backend}: {message}")]
    InvalidParameter {
        backend: String,
        key: String,
        message: String,
    },

    /// Every backend in the chain failed to start.
    #[error("no execution control could be started: {}", format_attempts(.0))]
    FailoverExhausted(Vec<FailoverAttempt>),

    /// Backend could not be launched or attached.
    #[error("launch failed: {0}")]
    Launch(String),

    /// The engine lost its backend and only answers queries.
    #[error("engine is closed")]
    Closed,

    /// Snippet key not issued by this engine.
    #[error("invalid snippet key: {0}")]
    InvalidKey(String),

    /// Snippet exists but is not of the kind the accessor expects.
    #[error("snippet {key} is {actual}, expected {expected}")]
    WrongKind {
        key: String,
        expected: &'static str,
        actual: String,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// IPC communication error with worker process.
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Execution error.
    #[error("execution error: {0}")]
    Execution(String),

    /// Execution was aborted by user request.
    #[error("execution aborted")]
    Aborted,

    /// Invalid operation (e.g., dropping a snippet twice).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

fn format_attempts(attempts: &[FailoverAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{} ({})", a.name, a.cause))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Message with a recovery hint, for display in the shell.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::SpecSyntax { .. } => {
                Some("expected name, name(key=value,...) or name:key(value), comma separated")
            }
            Error::UnknownBackend(_) => Some("known execution controls are 'direct' and 'remote'"),
            Error::FailoverExhausted(_) => {
                Some("try --execution direct, or set TESSERA_WORKER_PATH to the worker binary")
            }
            Error::Launch(_) => Some("check that tessera-worker is built and on PATH"),
            Error::Closed => Some("use /reload to restart and restore definitions"),
            Error::InvalidKey(_) => Some("use /list to see snippet ids"),
            Error::Config(_) => Some("the config file must be JSON"),
            _ => None,
        };
        match hint {
            Some(hint) => format!("{self}\n  hint: {hint}"),
            None => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failover_message_lists_attempts() {
        let err = Error::FailoverExhausted(vec![
            FailoverAttempt {
                name: "bad1".into(),
                cause: "boom".into(),
            },
            FailoverAttempt {
                name: "bad2".into(),
                cause: "bang".into(),
            },
        ]);
        assert_eq!(
            err.to_string(),
            "no execution control could be started: bad1 (boom), bad2 (bang)"
        );
    }

    #[test]
    fn test_hint() {
        assert!(Error::Closed.with_hint().contains("hint: use /reset"));
        assert_eq!(Error::Aborted.with_hint(), "execution aborted");
    }
}

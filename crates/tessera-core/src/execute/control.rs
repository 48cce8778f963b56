//! The uniform surface every execution backend implements.

use std::sync::Arc;

use rkyv::{Archive, Deserialize, Serialize};

use crate::compile::ClassBytecode;

/// Why an invocation did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Archive, Serialize, Deserialize)]
pub enum RunException {
    /// User code threw; `class` is the fully qualified exception class.
    #[error("{}", describe_user(.class, .message))]
    User {
        class: String,
        message: Option<String>,
    },

    /// A corralled class was reached before its dependencies were defined.
    #[error("snippet {snippet_id} references undefined {}", .names.join(", "))]
    Resolution {
        snippet_id: String,
        names: Vec<String>,
    },

    /// The backend went away; the engine must be considered closed.
    #[error("execution engine terminated: {0}")]
    Termination(String),

    /// The backend could not carry out the request.
    #[error("internal execution error: {0}")]
    Internal(String),

    /// Execution was stopped at the user's request.
    #[error("execution stopped")]
    Stopped,
}

fn describe_user(class: &str, message: &Option<String>) -> String {
    match message {
        Some(m) => format!("{class}: {m}"),
        None => class.to_string(),
    }
}

/// Out-of-band interruption of a backend.
pub trait Interrupt: Send + Sync {
    /// Ask running user code to stop.
    fn stop(&self);

    /// Tear the backend down under a blocked caller. A call in flight fails
    /// with [`RunException::Termination`] instead of hanging.
    fn terminate(&self);
}

/// Cloneable, thread-safe handle to a backend's [`Interrupt`].
#[derive(Clone)]
pub struct StopHandle(Arc<dyn Interrupt>);

impl StopHandle {
    pub fn new(interrupt: impl Interrupt + 'static) -> Self {
        Self(Arc::new(interrupt))
    }

    pub fn stop(&self) {
        self.0.stop();
    }

    pub fn terminate(&self) {
        self.0.terminate();
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StopHandle")
    }
}

/// An execution backend.
///
/// Implementations move compiled classes to wherever code runs and report
/// outcomes as [`RunException`]s. Every method but `close` may be called
/// only while the backend is open; a closed backend answers with
/// [`RunException::Termination`].
pub trait ExecutionControl: Send {
    /// Name of the backend family, for logs.
    fn name(&self) -> &str;

    /// Install or redefine classes.
    fn load(&mut self, classes: Vec<ClassBytecode>) -> Result<(), RunException>;

    /// Remove classes whose snippets are gone.
    fn retire(&mut self, class_names: Vec<String>) -> Result<(), RunException>;

    /// Run an entry point and return its display value.
    fn invoke(&mut self, class_name: &str, method: &str) -> Result<String, RunException>;

    /// Display value of a variable owned by `class_name`.
    fn var_value(&mut self, class_name: &str, name: &str) -> Result<String, RunException>;

    /// Backend-specific command, e.g. `ping`, `pid`, `loaded`.
    fn extension_command(&mut self, command: &str, arg: &str) -> Result<String, RunException>;

    /// Handle usable from other threads while a call is in flight.
    fn stop_handle(&self) -> StopHandle;

    /// Stop the current invocation, if any.
    fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Release the backend. Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let user = RunException::User {
            class: "java.lang.IllegalStateException".into(),
            message: Some("bad".into()),
        };
        assert_eq!(user.to_string(), "java.lang.IllegalStateException: bad");
        let bare = RunException::User {
            class: "Oops".into(),
            message: None,
        };
        assert_eq!(bare.to_string(), "Oops");
        let res = RunException::Resolution {
            snippet_id: "3".into(),
            names: vec!["x".into(), "y".into()],
        };
        assert_eq!(res.to_string(), "snippet 3 references undefined x, y");
    }
}

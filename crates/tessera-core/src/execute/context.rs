//! Cooperative cancellation and user stream plumbing shared by backends.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::runtime::{LineReader, LineSource};

/// Handle for cooperative cancellation of a running snippet.
///
/// `AbortHandle` is a shared flag. It can be cloned and shared across
/// threads, and any clone can trigger the abort which will be visible to all
/// other clones. The interpreter polls it at loop back-edges and calls.
///
/// # Example
///
/// ```
/// use tessera_core::execute::AbortHandle;
///
/// let handle = AbortHandle::new();
/// let handle_clone = handle.clone();
///
/// // Check abort status
/// assert!(!handle.is_aborted());
///
/// // Trigger abort from any clone
/// handle_clone.abort();
///
/// // All clones see the abort
/// assert!(handle.is_aborted());
/// ```
#[derive(Clone, Default)]
pub struct AbortHandle {
    /// Shared abort flag.
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Create a new abort handle.
    pub fn new() -> Self {
        Self {
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if abort has been requested.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Relaxed)
    }

    /// Request abort of execution.
    ///
    /// Running code observes the request at its next poll and unwinds with
    /// a stopped outcome.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Relaxed);
    }

    /// Reset the abort flag.
    ///
    /// Called before starting a new execution to clear any previous abort.
    pub fn reset(&self) {
        self.aborted.store(false, Ordering::Relaxed);
    }
}

/// A writer shared between the engine and backend forwarding threads.
pub type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// The engine's user-facing streams, handed to every backend launch.
///
/// Cloning shares the same underlying streams, so a failed launch leaves
/// them usable for the next backend in the chain.
#[derive(Clone)]
pub struct UserIo {
    pub out: SharedWriter,
    pub err: SharedWriter,
    pub input: Arc<Mutex<Box<dyn LineSource>>>,
}

impl UserIo {
    pub fn new(
        out: Box<dyn Write + Send>,
        err: Box<dyn Write + Send>,
        input: Box<dyn LineSource>,
    ) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
            err: Arc::new(Mutex::new(err)),
            input: Arc::new(Mutex::new(input)),
        }
    }

    /// The process's own standard streams.
    pub fn stdio() -> Self {
        Self::new(
            Box::new(io::stdout()),
            Box::new(io::stderr()),
            Box::new(LineReader(io::BufReader::new(io::stdin()))),
        )
    }

    /// Discard output, empty input.
    pub fn sink() -> Self {
        Self::new(
            Box::new(io::sink()),
            Box::new(io::sink()),
            Box::new(LineReader(io::empty())),
        )
    }

    /// Next line of user input; read errors end the input.
    pub fn read_line(&self) -> Option<String> {
        let mut input = match self.input.lock() {
            Ok(input) => input,
            Err(poisoned) => poisoned.into_inner(),
        };
        input.read_line().unwrap_or_else(|e| {
            tracing::warn!("user input failed: {e}");
            None
        })
    }

    /// A [`LineSource`] view of the shared input.
    pub fn lines(&self) -> SharedLines {
        SharedLines(self.input.clone())
    }
}

/// [`LineSource`] reading from [`UserIo`]'s shared input.
pub struct SharedLines(Arc<Mutex<Box<dyn LineSource>>>);

impl LineSource for SharedLines {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut input = self
            .0
            .lock()
            .map_err(|_| io::Error::other("user input lock poisoned"))?;
        input.read_line()
    }
}

/// Write to a shared writer, ignoring a poisoned lock's previous panic.
pub(crate) fn write_shared(writer: &SharedWriter, bytes: &[u8]) -> io::Result<()> {
    let mut w = match writer.lock() {
        Ok(w) => w,
        Err(poisoned) => poisoned.into_inner(),
    };
    w.write_all(bytes)?;
    w.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_reset() {
        let handle = AbortHandle::new();
        handle.abort();
        assert!(handle.is_aborted());
        handle.reset();
        assert!(!handle.is_aborted());
    }

    #[test]
    fn test_user_io_lines() {
        let io = UserIo::new(
            Box::new(io::sink()),
            Box::new(io::sink()),
            Box::new(LineReader(io::Cursor::new(b"a\nb\n".to_vec()))),
        );
        assert_eq!(io.read_line().as_deref(), Some("a"));
        let mut lines = io.lines();
        assert_eq!(lines.read_line().unwrap().as_deref(), Some("b"));
        assert_eq!(io.read_line(), None);
    }
}

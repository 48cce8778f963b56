//! In-process byte pipes.
//!
//! A pipe joins one writer and one reader through a growable circular
//! buffer. Writes never block: when the buffer is full it doubles, keeping
//! byte order. Reads block until at least one byte is available or the
//! writer is gone, in which case pending bytes are still delivered before
//! end of stream.

use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::execute::{SharedWriter, write_shared};

const INITIAL_CAPACITY: usize = 4096;

struct Ring {
    buf: Vec<u8>,
    head: usize,
    len: usize,
    writer_closed: bool,
    reader_closed: bool,
    /// Bytes ever written.
    written: u64,
}

impl Ring {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity.max(1)],
            head: 0,
            len: 0,
            writer_closed: false,
            reader_closed: false,
            written: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn grow(&mut self, needed: usize) {
        let mut capacity = self.capacity();
        while capacity < needed {
            capacity *= 2;
        }
        if capacity == self.capacity() {
            return;
        }
        let mut buf = vec![0; capacity];
        let first = self.len.min(self.capacity() - self.head);
        buf[..first].copy_from_slice(&self.buf[self.head..self.head + first]);
        buf[first..self.len].copy_from_slice(&self.buf[..self.len - first]);
        self.buf = buf;
        self.head = 0;
    }

    fn push(&mut self, data: &[u8]) {
        self.grow(self.len + data.len());
        let cap = self.capacity();
        let tail = (self.head + self.len) % cap;
        let first = data.len().min(cap - tail);
        self.buf[tail..tail + first].copy_from_slice(&data[..first]);
        self.buf[..data.len() - first].copy_from_slice(&data[first..]);
        self.len += data.len();
        self.written += data.len() as u64;
    }

    fn pop(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.len);
        let cap = self.capacity();
        let first = n.min(cap - self.head);
        out[..first].copy_from_slice(&self.buf[self.head..self.head + first]);
        out[first..n].copy_from_slice(&self.buf[..n - first]);
        self.head = (self.head + n) % cap;
        self.len -= n;
        n
    }
}

struct Shared {
    ring: Mutex<Ring>,
    ready: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Ring> {
        match self.ring.lock() {
            Ok(ring) => ring,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Create a connected writer and reader.
pub fn pipe() -> (PipeWriter, PipeReader) {
    pipe_with_capacity(INITIAL_CAPACITY)
}

pub fn pipe_with_capacity(capacity: usize) -> (PipeWriter, PipeReader) {
    let shared = Arc::new(Shared {
        ring: Mutex::new(Ring::with_capacity(capacity)),
        ready: Condvar::new(),
    });
    (
        PipeWriter {
            shared: shared.clone(),
        },
        PipeReader { shared },
    )
}

/// Writing end of a [`pipe`]. Dropping it ends the stream.
pub struct PipeWriter {
    shared: Arc<Shared>,
}

impl PipeWriter {
    /// Signal end of stream. Buffered bytes stay readable.
    pub fn close(&self) {
        self.shared.lock().writer_closed = true;
        self.shared.ready.notify_all();
    }

    /// Counter of bytes written so far, observable from other threads.
    pub fn counter(&self) -> WriteCounter {
        WriteCounter {
            shared: self.shared.clone(),
        }
    }

    /// Handle that can end the stream without owning the writer.
    pub fn closer(&self) -> PipeCloser {
        PipeCloser {
            shared: self.shared.clone(),
        }
    }
}

/// Ends a pipe's stream from another thread.
#[derive(Clone)]
pub struct PipeCloser {
    shared: Arc<Shared>,
}

impl PipeCloser {
    pub fn close(&self) {
        self.shared.lock().writer_closed = true;
        self.shared.ready.notify_all();
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut ring = self.shared.lock();
        if ring.reader_closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed"));
        }
        if ring.writer_closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe writer closed"));
        }
        ring.push(buf);
        drop(ring);
        self.shared.ready.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reading end of a [`pipe`].
pub struct PipeReader {
    shared: Arc<Shared>,
}

impl PipeReader {
    /// Wait until a read would not block. Returns `false` on timeout.
    pub fn wait_readable(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut ring = self.shared.lock();
        while ring.len == 0 && !ring.writer_closed {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            ring = match self.shared.ready.wait_timeout(ring, deadline - now) {
                Ok((ring, _)) => ring,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    /// Bytes buffered and not yet read.
    pub fn available(&self) -> usize {
        self.shared.lock().len
    }

    pub fn capacity(&self) -> usize {
        self.shared.lock().capacity()
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut ring = self.shared.lock();
        while ring.len == 0 {
            if ring.writer_closed {
                return Ok(0);
            }
            ring = match self.shared.ready.wait(ring) {
                Ok(ring) => ring,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        let n = ring.pop(buf);
        drop(ring);
        self.shared.ready.notify_all();
        Ok(n)
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.shared.lock().reader_closed = true;
        self.shared.ready.notify_all();
    }
}

/// Read-only view of a pipe's write counter.
#[derive(Clone)]
pub struct WriteCounter {
    shared: Arc<Shared>,
}

impl WriteCounter {
    pub fn written(&self) -> u64 {
        self.shared.lock().written
    }
}

/// Copies a pipe into a user stream on its own thread.
pub struct Forwarder {
    delivered: Arc<(Mutex<u64>, Condvar)>,
    thread: Option<JoinHandle<()>>,
}

impl Forwarder {
    pub fn spawn(name: &str, mut reader: PipeReader, sink: SharedWriter) -> io::Result<Self> {
        let delivered = Arc::new((Mutex::new(0u64), Condvar::new()));
        let progress = delivered.clone();
        let label = name.to_string();
        let thread = std::thread::Builder::new()
            .name(format!("tessera-{name}"))
            .spawn(move || {
                let mut buf = [0u8; 8192];
                loop {
                    let n = match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => n,
                        Err(e) => {
                            debug!(stream = %label, "forwarder read failed: {e}");
                            break;
                        }
                    };
                    if let Err(e) = write_shared(&sink, &buf[..n]) {
                        debug!(stream = %label, "forwarder write failed: {e}");
                    }
                    let (count, cv) = &*progress;
                    if let Ok(mut count) = count.lock() {
                        *count += n as u64;
                    }
                    cv.notify_all();
                }
            })?;
        Ok(Self {
            delivered,
            thread: Some(thread),
        })
    }

    /// Wait until `total` bytes have reached the sink, or `timeout` passes.
    pub fn sync(&self, total: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (count, cv) = &*self.delivered;
        let Ok(mut delivered) = count.lock() else {
            return false;
        };
        while *delivered < total {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            delivered = match cv.wait_timeout(delivered, deadline - now) {
                Ok((d, _)) => d,
                Err(_) => return false,
            };
        }
        true
    }

    /// Wait for the thread to finish after its pipe's writer is closed.
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// A pipe whose reading end is forwarded to a user stream.
pub struct Bridge {
    forwarder: Forwarder,
    counter: WriteCounter,
}

impl Bridge {
    /// Returns the writer to hand to the producing side.
    pub fn spawn(name: &str, sink: SharedWriter) -> io::Result<(PipeWriter, Self)> {
        let (writer, reader) = pipe();
        let counter = writer.counter();
        let forwarder = Forwarder::spawn(name, reader, sink)?;
        Ok((writer, Self { forwarder, counter }))
    }

    /// Wait until everything written so far has reached the sink.
    pub fn sync(&self, timeout: Duration) {
        if !self.forwarder.sync(self.counter.written(), timeout) {
            debug!("user output still pending after {} ms", timeout.as_millis());
        }
    }

    pub fn join(&mut self) {
        self.forwarder.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_write_then_read() {
        let (mut w, mut r) = pipe();
        w.write_all(b"hello").unwrap();
        let mut buf = [0u8; 16];
        let n = r.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn test_growth_preserves_order() {
        let (mut w, mut r) = pipe_with_capacity(4);
        let mut buf = [0u8; 3];
        w.write_all(b"abc").unwrap();
        assert_eq!(r.read(&mut buf[..2]).unwrap(), 2);
        assert_eq!(&buf[..2], b"ab");
        // Wraps around, then grows past the original capacity.
        w.write_all(b"defghij").unwrap();
        assert!(r.capacity() >= 8);
        drop(w);
        let mut rest = Vec::new();
        r.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"cdefghij");
    }

    #[test]
    fn test_close_delivers_pending_then_eof() {
        let (mut w, mut r) = pipe();
        w.write_all(b"xy").unwrap();
        w.close();
        let mut buf = [0u8; 8];
        assert_eq!(r.read(&mut buf).unwrap(), 2);
        assert_eq!(r.read(&mut buf).unwrap(), 0);
        assert_eq!(r.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_read_blocks_until_write() {
        let (mut w, mut r) = pipe();
        let reader = std::thread::spawn(move || {
            let mut buf = [0u8; 4];
            let n = r.read(&mut buf).unwrap();
            buf[..n].to_vec()
        });
        std::thread::sleep(Duration::from_millis(20));
        w.write_all(b"late").unwrap();
        assert_eq!(reader.join().unwrap(), b"late");
    }

    #[test]
    fn test_write_after_reader_dropped_fails() {
        let (mut w, r) = pipe();
        drop(r);
        let err = w.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_closer_ends_blocked_read() {
        let (w, mut r) = pipe();
        let closer = w.closer();
        let reader = std::thread::spawn(move || {
            let mut buf = [0u8; 4];
            r.read(&mut buf).unwrap()
        });
        std::thread::sleep(Duration::from_millis(20));
        closer.close();
        assert_eq!(reader.join().unwrap(), 0);
        drop(w);
    }

    #[test]
    fn test_wait_readable_times_out() {
        let (w, r) = pipe();
        assert!(!r.wait_readable(Duration::from_millis(10)));
        w.close();
        assert!(r.wait_readable(Duration::from_millis(10)));
    }

    #[test]
    fn test_forwarder_sync() {
        let sink: Arc<Mutex<Vec<u8>>> = Arc::default();
        struct Collect(Arc<Mutex<Vec<u8>>>);
        impl Write for Collect {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let target: SharedWriter = Arc::new(Mutex::new(Box::new(Collect(sink.clone()))));
        let (mut w, r) = pipe();
        let counter = w.counter();
        let mut fwd = Forwarder::spawn("test", r, target).unwrap();
        w.write_all(b"abc").unwrap();
        w.write_all(b"def").unwrap();
        assert!(fwd.sync(counter.written(), Duration::from_secs(5)));
        assert_eq!(&*sink.lock().unwrap(), b"abcdef");
        drop(w);
        fwd.join();
    }
}

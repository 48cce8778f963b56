//! Inter-process communication for the remote execution backend.
//!
//! This module provides:
//! - In-process byte pipes that bridge user streams between threads
//! - The length-prefixed command and response protocol
//! - Channel multiplexing of replies, user output and input requests
//! - The worker agent that serves a runtime over a byte stream
//! - Worker binary discovery and process management

pub mod agent;
pub mod mux;
pub mod pipe;
pub mod protocol;
mod worker;

pub use pipe::{Bridge, Forwarder, PipeCloser, WriteCounter, PipeReader, PipeWriter, pipe};
pub use protocol::{WorkerCommand, WorkerResponse, read_message, write_message};
pub use worker::{WORKER_PATH_ENV, WorkerKillHandle, WorkerProcess, find_worker_binary};

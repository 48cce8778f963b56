//! Execution control for compiled snippets.
//!
//! This module provides:
//! - [`ExecutionControl`]: the surface every backend implements
//! - [`ExecutionSpec`]: parsing of execution control spec strings
//! - [`BackendRegistry`]: named backend factories with ordered failover
//! - [`DirectControl`]: runs snippets on an executor thread in this process
//! - [`RemoteControl`]: runs snippets in a worker agent over a byte stream
//! - [`AbortHandle`]: cooperative cancellation of running user code

mod context;
mod control;
mod direct;
mod dispatcher;
mod remote;
mod spec;

pub use context::{AbortHandle, SharedLines, SharedWriter, UserIo};
pub(crate) use context::write_shared;
pub use control::{ExecutionControl, Interrupt, RunException, StopHandle};
pub use direct::{DirectControl, DirectFactory};
pub use dispatcher::{BackendFactory, BackendRegistry, LaunchEnv, Started};
pub use remote::{RemoteControl, RemoteFactory};
pub use spec::{ExecutionSpec, SpecEntry};
